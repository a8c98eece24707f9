// Copyright 2021 Datafuse Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fmt::Display, str::FromStr};

use log::{debug, warn};

use crate::{
    fields::{DUPLICATE, FieldCatalog, PACKETS, PKT_DROP_PACKETS, RECORD_TYPE},
    filters::{Match, SingleQuery},
};

use super::{
    QueryError,
    filter::{LabelFilter, LineFieldKind, LineFilter, strip_quotes},
};

pub const APP_LABEL: &str = "app";
pub const APP_NAME: &str = "netobserv-flowcollector";

const QUERY_RANGE_PATH: &str = "/loki/api/v1/query_range";
const NON_ZERO: &str = "[1-9][0-9]*";
const EMPTY_ATOM: &str = "\"\"";

/// How duplicated flows (reported by both ends) are filtered out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DedupFilter {
    #[default]
    None,
    /// Keep lines explicitly marked `"Duplicate":false`.
    KeepOriginals,
    /// Drop lines marked `"Duplicate":true`, keep unmarked ones.
    DropDuplicates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    FlowLog,
    NewConnection,
    Heartbeat,
    EndConnection,
    AllConnections,
}

impl RecordType {
    fn values(self) -> &'static [&'static str] {
        match self {
            RecordType::FlowLog => &["flowLog"],
            RecordType::NewConnection => &["newConnection"],
            RecordType::Heartbeat => &["heartbeat"],
            RecordType::EndConnection => &["endConnection"],
            RecordType::AllConnections => &["newConnection", "heartbeat", "endConnection"],
        }
    }
}

impl FromStr for RecordType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flowLog" => Ok(RecordType::FlowLog),
            "newConnection" => Ok(RecordType::NewConnection),
            "heartbeat" => Ok(RecordType::Heartbeat),
            "endConnection" => Ok(RecordType::EndConnection),
            "allConnections" => Ok(RecordType::AllConnections),
            other => Err(QueryError::Unsupported(format!(
                "unknown record type `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PacketLoss {
    /// Flows where every packet was dropped.
    Dropped,
    /// Flows with at least one dropped packet.
    HasDrops,
    /// Flows with at least one packet sent.
    Sent,
    #[default]
    All,
}

impl FromStr for PacketLoss {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dropped" => Ok(PacketLoss::Dropped),
            "hasDrops" => Ok(PacketLoss::HasDrops),
            "sent" => Ok(PacketLoss::Sent),
            "all" => Ok(PacketLoss::All),
            other => Err(QueryError::Unsupported(format!(
                "unknown packet loss value `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlowQueryOptions {
    /// Unix seconds.
    pub start: Option<i64>,
    /// Unix seconds.
    pub end: Option<i64>,
    pub limit: Option<u64>,
    pub dedup: DedupFilter,
    pub record_type: Option<RecordType>,
    pub packet_loss: PacketLoss,
}

/// Label filters applied after the `json` stage, composed with `or` or `and`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct JsonClause {
    any: bool,
    filters: Vec<LabelFilter>,
}

impl JsonClause {
    fn single(filter: LabelFilter) -> Self {
        Self {
            any: false,
            filters: vec![filter],
        }
    }

    fn new(any: bool, filters: Vec<LabelFilter>) -> Self {
        Self { any, filters }
    }

    fn len(&self) -> usize {
        self.filters.len()
    }

    fn write_into(&self, buf: &mut String) {
        if let [filter] = self.filters.as_slice() {
            filter.write_into(buf);
            return;
        }
        let joiner = if self.any { " or " } else { " and " };
        buf.push('(');
        for (idx, filter) in self.filters.iter().enumerate() {
            if idx > 0 {
                buf.push_str(joiner);
            }
            filter.write_into(buf);
        }
        buf.push(')');
    }
}

/// Builds the `query_range` URL fetching raw flow records for one filter
/// group.
#[derive(Debug, Clone)]
pub struct FlowQueryBuilder<'a> {
    catalog: &'a FieldCatalog,
    base_url: &'a str,
    options: FlowQueryOptions,
    fixed_labels: Vec<LabelFilter>,
    labels: Vec<LabelFilter>,
    fixed_line_filters: Vec<LineFilter>,
    line_filters: Vec<LineFilter>,
    any_line_filters: bool,
    json_clauses: Vec<JsonClause>,
    any_json_clauses: bool,
}

impl<'a> FlowQueryBuilder<'a> {
    pub fn new(catalog: &'a FieldCatalog, base_url: &'a str, options: FlowQueryOptions) -> Self {
        let mut builder = Self {
            catalog,
            base_url,
            options,
            fixed_labels: vec![LabelFilter::string(APP_LABEL, APP_NAME, false)],
            labels: Vec::new(),
            fixed_line_filters: Vec::new(),
            line_filters: Vec::new(),
            any_line_filters: false,
            json_clauses: Vec::new(),
            any_json_clauses: false,
        };
        builder.add_dedup();
        builder.add_record_type();
        builder.add_packet_loss();
        builder
    }

    pub fn with_group(
        catalog: &'a FieldCatalog,
        base_url: &'a str,
        options: FlowQueryOptions,
        group: &SingleQuery,
    ) -> Result<Self, QueryError> {
        let mut builder = Self::new(catalog, base_url, options);
        builder.add_group(group)?;
        Ok(builder)
    }

    pub fn options(&self) -> &FlowQueryOptions {
        &self.options
    }

    pub fn catalog(&self) -> &FieldCatalog {
        self.catalog
    }

    pub fn add_group(&mut self, group: &SingleQuery) -> Result<(), QueryError> {
        for m in group {
            self.add_match(m)?;
        }
        Ok(())
    }

    /// Classifies one user match as a stream selector, a line filter or a
    /// label filter after the `json` stage.
    pub fn add_match(&mut self, m: &Match) -> Result<(), QueryError> {
        let atoms = m.atoms().collect::<Vec<_>>();
        let is_label = self.catalog.is_label(&m.key);

        if m.regex {
            let filter = LabelFilter::regex(&m.key, &m.values, m.not);
            if is_label {
                self.labels.push(filter);
            } else {
                self.json_clauses.push(JsonClause::single(filter));
            }
            return Ok(());
        }

        if m.more_than_or_equal {
            let filter = LineFilter::for_atoms(
                &m.key,
                atoms,
                self.line_kind(&m.key),
                self.catalog.needs_strict_key(&m.key),
                m.not,
                true,
            )?;
            self.line_filters.push(filter);
            return Ok(());
        }

        if is_label {
            self.labels
                .push(LabelFilter::from_atoms(&m.key, &atoms, m.not));
            return Ok(());
        }

        let pair = self.catalog.common_pair(&m.key);
        let labelled_pair = pair
            .as_ref()
            .filter(|(src, dst)| self.catalog.is_label(src) || self.catalog.is_label(dst));
        if let Some((src, dst)) = labelled_pair {
            let filters = vec![
                LabelFilter::from_atoms(src, &atoms, m.not),
                LabelFilter::from_atoms(dst, &atoms, m.not),
            ];
            self.json_clauses.push(JsonClause::new(!m.not, filters));
            return Ok(());
        }

        let keys = match pair {
            Some((src, dst)) => vec![src, dst],
            None => vec![m.key.clone()],
        };

        if self.catalog.is_ip(&m.key) {
            let filters = keys
                .iter()
                .flat_map(|key| {
                    atoms.iter().map(move |atom| {
                        LabelFilter::ip(key, strip_quotes(atom).unwrap_or(*atom), m.not)
                    })
                })
                .collect();
            self.json_clauses.push(JsonClause::new(!m.not, filters));
            return Ok(());
        }

        // empty fields are omitted from the JSON line, only the json stage
        // can tell them apart from missing lines
        if atoms.contains(&EMPTY_ATOM) {
            let filters = keys
                .iter()
                .map(|key| LabelFilter::multi_values_regex(key, atoms.iter().copied(), m.not))
                .collect();
            self.json_clauses.push(JsonClause::new(!m.not, filters));
            return Ok(());
        }

        let filter = LineFilter::for_atoms(
            &m.key,
            atoms,
            self.line_kind(&m.key),
            self.catalog.needs_strict_key(&m.key),
            m.not,
            false,
        )?;
        self.line_filters.push(filter);
        Ok(())
    }

    /// Keeps only lines where `key` is set. Unaffected by the any-match
    /// rewrite.
    pub fn require_field(&mut self, key: &str) {
        let strict = self.catalog.needs_strict_key(key);
        self.fixed_line_filters
            .push(LineFilter::presence(key, strict));
    }

    /// Rewrites the user filters so that the query matches lines satisfying
    /// any of them instead of all of them. Fixed filters (app, dedup, record
    /// type, packet loss) still apply to every line.
    pub fn into_any_match(mut self) -> Self {
        let labels = self.labels.len();
        let lines = self.line_filters.len();
        let json = self.json_clauses.iter().map(JsonClause::len).sum::<usize>();

        if labels + lines + json <= 1 || (labels == 0 && lines == 0) {
            self.any_json_clauses = true;
            return self;
        }

        if labels == 0 && json == 0 && self.line_filters.iter().all(|filter| !filter.not) {
            self.any_line_filters = true;
            return self;
        }

        let mut clauses = self
            .labels
            .drain(..)
            .map(JsonClause::single)
            .collect::<Vec<_>>();
        for line_filter in std::mem::take(&mut self.line_filters) {
            match line_filter.to_label_filters() {
                Some(filters) => clauses.extend(self.lift_line_filters(&line_filter, filters)),
                None => {
                    let mut rendered = String::new();
                    line_filter.write_into(&mut rendered);
                    warn!("dropping line filter `{rendered}` from any-match query");
                }
            }
        }
        clauses.append(&mut self.json_clauses);
        self.json_clauses = clauses;
        self.any_line_filters = false;
        self.any_json_clauses = true;
        self
    }

    /// Writes `{selector}` followed by the line filters and, when needed or
    /// forced, the `json` stage with its label filters.
    pub fn write_body(&self, buf: &mut String, force_json: bool) -> Result<(), QueryError> {
        let selector = self
            .fixed_labels
            .iter()
            .chain(self.labels.iter())
            .collect::<Vec<_>>();
        write_stream_selector(&selector, buf)?;

        for filter in &self.fixed_line_filters {
            filter.write_into(buf);
        }
        if self.any_line_filters && self.line_filters.len() > 1 {
            buf.push_str("|~`");
            for (idx, filter) in self.line_filters.iter().enumerate() {
                if idx > 0 {
                    buf.push('|');
                }
                buf.push('(');
                buf.push_str(&filter.body());
                buf.push(')');
            }
            buf.push('`');
        } else {
            for filter in &self.line_filters {
                filter.write_into(buf);
            }
        }

        if force_json || !self.json_clauses.is_empty() {
            buf.push_str("|json");
        }
        if !self.json_clauses.is_empty() {
            buf.push('|');
            let joiner = if self.any_json_clauses { " or " } else { "|" };
            for (idx, clause) in self.json_clauses.iter().enumerate() {
                if idx > 0 {
                    buf.push_str(joiner);
                }
                clause.write_into(buf);
            }
        }
        Ok(())
    }

    pub fn build(&self) -> Result<String, QueryError> {
        let mut url = String::with_capacity(256);
        url.push_str(self.base_url.trim_end_matches('/'));
        url.push_str(QUERY_RANGE_PATH);
        url.push_str("?query=");
        self.write_body(&mut url, false)?;
        push_param(&mut url, "start", self.options.start);
        push_param(&mut url, "end", self.options.end);
        push_param(&mut url, "limit", self.options.limit);
        debug!("built flow query: {url}");
        Ok(url)
    }

    fn add_dedup(&mut self) {
        match self.options.dedup {
            DedupFilter::None => {}
            DedupFilter::KeepOriginals => self
                .fixed_line_filters
                .push(LineFilter::bool(DUPLICATE, false, false, false)),
            DedupFilter::DropDuplicates => self
                .fixed_line_filters
                .push(LineFilter::bool(DUPLICATE, true, false, true)),
        }
    }

    fn add_record_type(&mut self) {
        let Some(record_type) = self.options.record_type else {
            return;
        };
        let values = record_type.values();
        if self.catalog.is_label(RECORD_TYPE) {
            let filter = match values {
                [value] => LabelFilter::string(RECORD_TYPE, *value, false),
                _ => LabelFilter::regex(RECORD_TYPE, values.join("|"), false),
            };
            self.fixed_labels.push(filter);
        } else {
            let strict = self.catalog.needs_strict_key(RECORD_TYPE);
            self.fixed_line_filters
                .push(LineFilter::exact(RECORD_TYPE, values.iter().copied(), strict));
        }
    }

    fn add_packet_loss(&mut self) {
        let packets_strict = self.catalog.needs_strict_key(PACKETS);
        let drops_strict = self.catalog.needs_strict_key(PKT_DROP_PACKETS);
        match self.options.packet_loss {
            PacketLoss::Dropped => {
                self.fixed_line_filters
                    .push(LineFilter::number(PACKETS, "0", packets_strict));
                self.fixed_line_filters
                    .push(LineFilter::regex(PKT_DROP_PACKETS, NON_ZERO, drops_strict));
            }
            PacketLoss::HasDrops => self
                .fixed_line_filters
                .push(LineFilter::regex(PKT_DROP_PACKETS, NON_ZERO, drops_strict)),
            PacketLoss::Sent => self
                .fixed_line_filters
                .push(LineFilter::regex(PACKETS, NON_ZERO, packets_strict)),
            PacketLoss::All => {}
        }
    }

    fn line_kind(&self, key: &str) -> LineFieldKind {
        if self.catalog.is_numeric(key) {
            LineFieldKind::Numeric
        } else if self.catalog.is_array(key) {
            LineFieldKind::Array
        } else {
            LineFieldKind::Text
        }
    }

    /// A line filter on a bare common key (`Port`) matched both `SrcPort`
    /// and `DstPort`; as label filters both names must be spelled out.
    fn lift_line_filters(&self, source: &LineFilter, filters: Vec<LabelFilter>) -> Vec<JsonClause> {
        let mut lifted = Vec::with_capacity(filters.len());
        for filter in filters {
            match self.catalog.common_pair(&filter.key) {
                Some((src, dst)) => {
                    let mut src_filter = filter.clone();
                    src_filter.key = src;
                    let mut dst_filter = filter;
                    dst_filter.key = dst;
                    lifted.push(JsonClause::new(!source.not, vec![src_filter, dst_filter]));
                }
                None => lifted.push(JsonClause::single(filter)),
            }
        }
        lifted
    }
}

/// Writes `{l1,l2,…}`. LogQL rejects a query without any stream selector.
pub(crate) fn write_stream_selector(
    labels: &[&LabelFilter],
    buf: &mut String,
) -> Result<(), QueryError> {
    if labels.is_empty() {
        return Err(QueryError::InvalidQuery(
            "at least one stream selector is required".into(),
        ));
    }
    buf.push('{');
    for (idx, label) in labels.iter().enumerate() {
        if idx > 0 {
            buf.push(',');
        }
        label.write_into(buf);
    }
    buf.push('}');
    Ok(())
}

pub(crate) fn push_param<T: Display>(url: &mut String, name: &str, value: Option<T>) {
    if let Some(value) = value {
        url.push('&');
        url.push_str(name);
        url.push('=');
        url.push_str(&value.to_string());
    }
}
