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

use std::{str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::Deserialize;

use crate::{
    duration::DurationValue,
    error::AppError,
    filters::MultiQueries,
    logql::{
        Aggregate, DedupFilter, FlowQueryOptions, MetricFunction, MetricType, PacketLoss,
        RecordType, TopologyOptions,
    },
    prometheus::PromWindow,
    reporter::Reporter,
};

pub(crate) const DEFAULT_LIMIT: u64 = 100;
pub(crate) const DEFAULT_STEP: &str = "30s";
pub(crate) const DEFAULT_RATE_INTERVAL: &str = "2m";
/// Window used for Prometheus when the request leaves the start open.
const DEFAULT_PROM_RANGE_SECONDS: i64 = 3_600;

static CUSTOM_AGGREGATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_]+$").expect("custom aggregate pattern must compile")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchMode {
    #[default]
    All,
    Any,
}

impl FromStr for MatchMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "all" => Ok(MatchMode::All),
            "any" => Ok(MatchMode::Any),
            other => Err(AppError::BadRequest(format!("unknown match `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DataSourceChoice {
    #[default]
    Auto,
    Loki,
    Prom,
}

impl FromStr for DataSourceChoice {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "auto" => Ok(DataSourceChoice::Auto),
            "loki" => Ok(DataSourceChoice::Loki),
            "prom" => Ok(DataSourceChoice::Prom),
            other => Err(AppError::BadRequest(format!("unknown dataSource `{other}`"))),
        }
    }
}

/// `K8S_FlowLayer` restriction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Infrastructure,
    Application,
}

impl Layer {
    pub fn value(self) -> &'static str {
        match self {
            Layer::Infrastructure => "\"infra\"",
            Layer::Application => "\"app\"",
        }
    }
}

impl FromStr for Layer {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "infrastructure" => Ok(Layer::Infrastructure),
            "application" => Ok(Layer::Application),
            other => Err(AppError::BadRequest(format!("unknown layer `{other}`"))),
        }
    }
}

/// Query string of the records and export endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordsQuery {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub time_range: Option<String>,
    pub limit: Option<String>,
    pub record_type: Option<String>,
    pub packet_loss: Option<String>,
    pub dedup: Option<String>,
    pub filters: Option<String>,
    #[serde(rename = "match")]
    pub match_mode: Option<String>,
    pub format: Option<String>,
    pub columns: Option<String>,
}

pub struct RecordsRequest {
    pub options: FlowQueryOptions,
    pub filters: MultiQueries,
    pub match_mode: MatchMode,
}

impl RecordsQuery {
    pub fn resolve(&self, now: i64) -> Result<RecordsRequest, AppError> {
        let window = TimeWindow::resolve(
            self.start_time.as_deref(),
            self.end_time.as_deref(),
            self.time_range.as_deref(),
            now,
        )?;
        let dedup = if parse_bool(self.dedup.as_deref(), "dedup")? {
            DedupFilter::KeepOriginals
        } else {
            DedupFilter::None
        };
        Ok(RecordsRequest {
            options: FlowQueryOptions {
                start: window.start,
                end: window.end,
                limit: Some(parse_limit(self.limit.as_deref())?),
                dedup,
                record_type: parse_optional(self.record_type.as_deref())?,
                packet_loss: parse_optional(self.packet_loss.as_deref())?.unwrap_or_default(),
            },
            filters: parse_filters(self.filters.as_deref())?,
            match_mode: self.match_mode.as_deref().unwrap_or_default().parse()?,
        })
    }

    /// Requested CSV columns, when any.
    pub fn columns(&self) -> Option<Vec<String>> {
        self.columns
            .as_deref()
            .filter(|columns| !columns.is_empty())
            .map(|columns| columns.split(',').map(str::to_string).collect())
    }
}

/// Query string of the metrics endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsQuery {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub time_range: Option<String>,
    pub limit: Option<String>,
    pub step: Option<String>,
    pub rate_interval: Option<String>,
    #[serde(rename = "type")]
    pub metric_type: Option<String>,
    pub function: Option<String>,
    pub aggregate_by: Option<String>,
    pub scope: Option<String>,
    pub groups: Option<String>,
    pub record_type: Option<String>,
    pub packet_loss: Option<String>,
    pub dedup: Option<String>,
    pub filters: Option<String>,
    pub data_source: Option<String>,
    pub layer: Option<String>,
    pub reporter: Option<String>,
    pub namespace: Option<String>,
}

pub struct MetricsRequest {
    pub flow: FlowQueryOptions,
    pub topology: TopologyOptions,
    pub prom_window: PromWindow,
    pub filters: MultiQueries,
    pub data_source: DataSourceChoice,
    pub layer: Option<Layer>,
    pub reporter: Reporter,
    pub namespace: Option<String>,
}

impl MetricsQuery {
    pub fn resolve(&self, now: i64) -> Result<MetricsRequest, AppError> {
        let window = TimeWindow::resolve(
            self.start_time.as_deref(),
            self.end_time.as_deref(),
            self.time_range.as_deref(),
            now,
        )?;
        let top = parse_limit(self.limit.as_deref())?;
        let step = parse_duration_field(self.step.as_deref().unwrap_or(DEFAULT_STEP), "step")?;
        let rate_interval = parse_duration_field(
            self.rate_interval.as_deref().unwrap_or(DEFAULT_RATE_INTERVAL),
            "rateInterval",
        )?;

        let metric_type: MetricType = self
            .metric_type
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .ok_or_else(|| AppError::BadRequest("missing type".into()))?
            .parse()?;
        let function: MetricFunction = parse_optional(self.function.as_deref())?.unwrap_or_default();
        let aggregate_key = self
            .aggregate_by
            .as_deref()
            .or(self.scope.as_deref())
            .filter(|raw| !raw.is_empty())
            .ok_or_else(|| AppError::BadRequest("missing aggregateBy".into()))?;
        let aggregate = Aggregate::new(aggregate_key, self.groups.as_deref())?;
        if aggregate.is_custom() && !CUSTOM_AGGREGATE.is_match(aggregate.key()) {
            return Err(AppError::BadRequest(format!(
                "invalid aggregateBy `{aggregate_key}`"
            )));
        }

        let dedup = if parse_bool(self.dedup.as_deref(), "dedup")? {
            DedupFilter::DropDuplicates
        } else {
            DedupFilter::None
        };
        let prom_end = window.end.unwrap_or(now);
        let prom_start = match window.start {
            Some(start) => start,
            None => prom_end
                .checked_sub(DEFAULT_PROM_RANGE_SECONDS)
                .ok_or_else(|| out_of_range("endTime", prom_end))?,
        };
        let prom_window = PromWindow {
            start: prom_start,
            end: prom_end,
        };

        Ok(MetricsRequest {
            flow: FlowQueryOptions {
                start: window.start,
                end: window.end,
                limit: Some(top),
                dedup,
                record_type: parse_optional(self.record_type.as_deref())?,
                packet_loss: parse_optional(self.packet_loss.as_deref())?.unwrap_or_default(),
            },
            topology: TopologyOptions {
                top,
                step: step.to_string(),
                rate_interval: rate_interval.to_string(),
                metric_type,
                function,
                aggregate,
            },
            prom_window,
            filters: parse_filters(self.filters.as_deref())?,
            data_source: self.data_source.as_deref().unwrap_or_default().parse()?,
            layer: parse_optional(self.layer.as_deref())?,
            reporter: parse_optional(self.reporter.as_deref())?.unwrap_or_default(),
            namespace: self.namespace.clone().filter(|ns| !ns.is_empty()),
        })
    }
}

/// Query window in unix seconds; `None` leaves the bound to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeWindow {
    /// `startTime` wins over `timeRange`. `endTime` is moved to the next
    /// second so that flows of the last second are included.
    pub fn resolve(
        start_time: Option<&str>,
        end_time: Option<&str>,
        time_range: Option<&str>,
        now: i64,
    ) -> Result<Self, AppError> {
        let start = match parse_int(start_time, "startTime")? {
            Some(start) => Some(start),
            None => match parse_int(time_range, "timeRange")? {
                Some(range) => Some(
                    now.checked_sub(range)
                        .ok_or_else(|| out_of_range("timeRange", range))?,
                ),
                None => None,
            },
        };
        let end = match parse_int(end_time, "endTime")? {
            Some(end) => Some(end.checked_add(1).ok_or_else(|| out_of_range("endTime", end))?),
            None => None,
        };
        Ok(Self { start, end })
    }
}

fn out_of_range(field: &str, value: i64) -> AppError {
    AppError::BadRequest(format!("{field} `{value}` is out of range"))
}

fn parse_int(raw: Option<&str>, field: &str) -> Result<Option<i64>, AppError> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|err| AppError::BadRequest(format!("invalid {field} `{raw}`: {err}"))),
    }
}

fn parse_limit(raw: Option<&str>) -> Result<u64, AppError> {
    match parse_int(raw, "limit")? {
        None => Ok(DEFAULT_LIMIT),
        Some(limit) if limit > 0 => Ok(limit as u64),
        Some(limit) => Err(AppError::BadRequest(format!(
            "limit must be positive, got {limit}"
        ))),
    }
}

fn parse_bool(raw: Option<&str>, field: &str) -> Result<bool, AppError> {
    match raw.unwrap_or_default() {
        "" | "false" => Ok(false),
        "true" => Ok(true),
        other => Err(AppError::BadRequest(format!("invalid {field} `{other}`"))),
    }
}

fn parse_optional<T>(raw: Option<&str>) -> Result<Option<T>, AppError>
where
    T: FromStr,
    AppError: From<T::Err>,
{
    match raw.filter(|raw| !raw.is_empty()) {
        None => Ok(None),
        Some(raw) => Ok(Some(raw.parse()?)),
    }
}

fn parse_filters(raw: Option<&str>) -> Result<MultiQueries, AppError> {
    Ok(MultiQueries::parse(raw.unwrap_or_default())?)
}

/// Accepts a duration literal or a number of seconds.
fn parse_duration_field(raw: &str, field: &str) -> Result<DurationValue, AppError> {
    match DurationValue::parse_literal(raw) {
        Ok(value) => Ok(value),
        Err(literal_err) => raw
            .trim()
            .parse::<i64>()
            .map_err(|err| err.to_string())
            .and_then(DurationValue::from_seconds)
            .map_err(|numeric_err| {
                AppError::BadRequest(format!(
                    "invalid {field} `{raw}`: {literal_err}; {numeric_err}"
                ))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn end_time_moves_to_next_second() {
        let window = TimeWindow::resolve(Some("100"), Some("200"), None, NOW).unwrap();
        assert_eq!(window, TimeWindow {
            start: Some(100),
            end: Some(201)
        });
    }

    #[test]
    fn time_range_is_relative_to_now() {
        let window = TimeWindow::resolve(None, None, Some("300"), NOW).unwrap();
        assert_eq!(window.start, Some(NOW - 300));
        assert_eq!(window.end, None);
        let explicit = TimeWindow::resolve(Some("5"), None, Some("300"), NOW).unwrap();
        assert_eq!(explicit.start, Some(5));
        assert!(TimeWindow::resolve(Some("yesterday"), None, None, NOW).is_err());
    }

    #[test]
    fn extreme_times_are_rejected() {
        for (start, end, range) in [
            (None, Some("9223372036854775807"), None),
            (None, None, Some("-9223372036854775808")),
        ] {
            let err = TimeWindow::resolve(start, end, range, NOW).unwrap_err();
            assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        }
        let window = TimeWindow::resolve(None, Some("9223372036854775806"), None, NOW).unwrap();
        assert_eq!(window.end, Some(i64::MAX));
    }

    #[test]
    fn open_prometheus_window_cannot_underflow() {
        let query = MetricsQuery {
            end_time: Some("-9223372036854775807".into()),
            ..metrics("namespace")
        };
        let err = query.resolve(NOW).err().expect("window underflow");
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn records_defaults() {
        let request = RecordsQuery::default().resolve(NOW).unwrap();
        assert_eq!(request.options.limit, Some(DEFAULT_LIMIT));
        assert_eq!(request.options.dedup, DedupFilter::None);
        assert_eq!(request.options.packet_loss, PacketLoss::All);
        assert_eq!(request.match_mode, MatchMode::All);
        assert_eq!(request.filters.len(), 1);
    }

    #[test]
    fn records_parse_every_option() {
        let query = RecordsQuery {
            limit: Some("5".into()),
            dedup: Some("true".into()),
            record_type: Some("endConnection".into()),
            packet_loss: Some("dropped".into()),
            filters: Some("Proto%3D6%7CProto%3D17".into()),
            match_mode: Some("any".into()),
            columns: Some("SrcAddr,DstAddr".into()),
            ..RecordsQuery::default()
        };
        let request = query.resolve(NOW).unwrap();
        assert_eq!(request.options.limit, Some(5));
        assert_eq!(request.options.dedup, DedupFilter::KeepOriginals);
        assert_eq!(request.options.record_type, Some(RecordType::EndConnection));
        assert_eq!(request.options.packet_loss, PacketLoss::Dropped);
        assert_eq!(request.filters.len(), 2);
        assert_eq!(request.match_mode, MatchMode::Any);
        assert_eq!(query.columns().unwrap(), ["SrcAddr", "DstAddr"]);
    }

    #[test]
    fn rejects_bad_values() {
        for query in [
            RecordsQuery {
                limit: Some("0".into()),
                ..RecordsQuery::default()
            },
            RecordsQuery {
                limit: Some("ten".into()),
                ..RecordsQuery::default()
            },
            RecordsQuery {
                dedup: Some("maybe".into()),
                ..RecordsQuery::default()
            },
            RecordsQuery {
                record_type: Some("everything".into()),
                ..RecordsQuery::default()
            },
            RecordsQuery {
                match_mode: Some("some".into()),
                ..RecordsQuery::default()
            },
        ] {
            let err = query.resolve(NOW).err().expect("must fail");
            assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        }
    }

    fn metrics(aggregate: &str) -> MetricsQuery {
        MetricsQuery {
            metric_type: Some("Bytes".into()),
            aggregate_by: Some(aggregate.into()),
            ..MetricsQuery::default()
        }
    }

    #[test]
    fn metrics_defaults() {
        let request = metrics("namespace").resolve(NOW).unwrap();
        assert_eq!(request.topology.top, DEFAULT_LIMIT);
        assert_eq!(request.topology.step, "30s");
        assert_eq!(request.topology.rate_interval, "2m");
        assert_eq!(request.topology.function, MetricFunction::Rate);
        assert_eq!(request.data_source, DataSourceChoice::Auto);
        assert_eq!(request.reporter, Reporter::Both);
        assert_eq!(request.prom_window, PromWindow {
            start: NOW - DEFAULT_PROM_RANGE_SECONDS,
            end: NOW
        });
    }

    #[test]
    fn metrics_accept_scope_alias_and_numeric_step() {
        let query = MetricsQuery {
            metric_type: Some("DnsLatencyMs".into()),
            scope: Some("host".into()),
            step: Some("60".into()),
            function: Some("p99".into()),
            dedup: Some("true".into()),
            layer: Some("infrastructure".into()),
            reporter: Some("source".into()),
            data_source: Some("prom".into()),
            ..MetricsQuery::default()
        };
        let request = query.resolve(NOW).unwrap();
        assert_eq!(request.topology.aggregate.key(), "host");
        assert_eq!(request.topology.step, "1m");
        assert_eq!(request.flow.dedup, DedupFilter::DropDuplicates);
        assert_eq!(request.layer, Some(Layer::Infrastructure));
        assert_eq!(request.reporter, Reporter::Source);
        assert_eq!(request.data_source, DataSourceChoice::Prom);
    }

    #[test]
    fn metrics_require_type_and_aggregate() {
        let err = MetricsQuery {
            aggregate_by: Some("app".into()),
            ..MetricsQuery::default()
        }
        .resolve(NOW)
        .err()
        .expect("missing type");
        assert_eq!(err.to_string(), "missing type");

        let err = MetricsQuery {
            metric_type: Some("Bytes".into()),
            ..MetricsQuery::default()
        }
        .resolve(NOW)
        .err()
        .expect("missing aggregateBy");
        assert_eq!(err.to_string(), "missing aggregateBy");
    }

    #[test]
    fn custom_aggregate_must_be_a_field_name() {
        assert!(metrics("SrcK8S_Zone").resolve(NOW).is_ok());
        assert!(metrics("a}|b").resolve(NOW).is_err());
        let bad_step = MetricsQuery {
            step: Some("soon".into()),
            ..metrics("app")
        };
        assert!(bad_step.resolve(NOW).is_err());
    }
}
