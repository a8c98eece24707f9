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

//! Metric queries over flow logs: `topk(K,sum by(G)(FN({…}|json|unwrap V[R])))`.

use std::{fmt::Display, str::FromStr};

use log::debug;
use serde::Deserialize;

use crate::{fields::FieldCatalog, filters::SingleQuery};

use super::{
    QueryError,
    flow::{FlowQueryBuilder, FlowQueryOptions, push_param},
};

const QUERY_RANGE_PATH: &str = "/loki/api/v1/query_range";

const OWNER_LABELS: &[&str] = &[
    "SrcK8S_OwnerName",
    "SrcK8S_OwnerType",
    "DstK8S_OwnerName",
    "DstK8S_OwnerType",
    "SrcK8S_Namespace",
    "DstK8S_Namespace",
];

const RESOURCE_LABELS: &[&str] = &[
    "SrcK8S_Name",
    "SrcK8S_Type",
    "SrcAddr",
    "SrcK8S_HostName",
    "DstK8S_Name",
    "DstK8S_Type",
    "DstAddr",
    "DstK8S_HostName",
];

/// The measured value of a metric query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum MetricType {
    Flows,
    Bytes,
    Packets,
    DnsLatencyMs,
    TimeFlowRttNs,
    PktDropPackets,
    PktDropBytes,
    DnsFlows,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Flows => "Flows",
            MetricType::Bytes => "Bytes",
            MetricType::Packets => "Packets",
            MetricType::DnsLatencyMs => "DnsLatencyMs",
            MetricType::TimeFlowRttNs => "TimeFlowRttNs",
            MetricType::PktDropPackets => "PktDropPackets",
            MetricType::PktDropBytes => "PktDropBytes",
            MetricType::DnsFlows => "DnsFlows",
        }
    }

    /// Field that must be present in a flow for it to carry this value.
    pub fn required_field(self) -> Option<&'static str> {
        match self {
            MetricType::DnsLatencyMs => Some("DnsLatencyMs"),
            MetricType::TimeFlowRttNs => Some("TimeFlowRttNs"),
            MetricType::PktDropPackets => Some("PktDropPackets"),
            MetricType::PktDropBytes => Some("PktDropBytes"),
            MetricType::DnsFlows => Some("DnsId"),
            MetricType::Flows | MetricType::Bytes | MetricType::Packets => None,
        }
    }

    /// Types that count flows rather than sum a field.
    pub fn is_count(self) -> bool {
        matches!(self, MetricType::Flows | MetricType::DnsFlows)
    }

    /// Prometheus exports these in seconds while the console shows
    /// milliseconds.
    pub fn prometheus_scale(self) -> Option<&'static str> {
        match self {
            MetricType::DnsLatencyMs | MetricType::TimeFlowRttNs => Some("*1000"),
            _ => None,
        }
    }
}

impl Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Flows" => Ok(MetricType::Flows),
            "Bytes" => Ok(MetricType::Bytes),
            "Packets" => Ok(MetricType::Packets),
            "DnsLatencyMs" => Ok(MetricType::DnsLatencyMs),
            "TimeFlowRttNs" => Ok(MetricType::TimeFlowRttNs),
            "PktDropPackets" => Ok(MetricType::PktDropPackets),
            "PktDropBytes" => Ok(MetricType::PktDropBytes),
            "DnsFlows" => Ok(MetricType::DnsFlows),
            other => Err(QueryError::Unsupported(format!(
                "unknown metric type `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetricFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    P90,
    P99,
    #[default]
    Rate,
}

impl MetricFunction {
    pub fn quantile(self) -> Option<&'static str> {
        match self {
            MetricFunction::P90 => Some("0.9"),
            MetricFunction::P99 => Some("0.99"),
            _ => None,
        }
    }

    pub fn top_operator(self) -> &'static str {
        if self == MetricFunction::Min {
            "bottomk"
        } else {
            "topk"
        }
    }

    fn range_function(self) -> &'static str {
        match self {
            MetricFunction::Count => "count_over_time",
            MetricFunction::Sum => "sum_over_time",
            MetricFunction::Avg => "avg_over_time",
            MetricFunction::Min => "min_over_time",
            MetricFunction::Max => "max_over_time",
            MetricFunction::P90 | MetricFunction::P99 => "quantile_over_time",
            MetricFunction::Rate => "rate",
        }
    }
}

impl FromStr for MetricFunction {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(MetricFunction::Count),
            "sum" => Ok(MetricFunction::Sum),
            "avg" => Ok(MetricFunction::Avg),
            "min" => Ok(MetricFunction::Min),
            "max" => Ok(MetricFunction::Max),
            "p90" => Ok(MetricFunction::P90),
            "p99" => Ok(MetricFunction::P99),
            "rate" => Ok(MetricFunction::Rate),
            other => Err(QueryError::Unsupported(format!(
                "unknown function `{other}`"
            ))),
        }
    }
}

/// Labels a metric query is grouped by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    key: String,
    labels: Vec<String>,
    custom: bool,
}

impl Aggregate {
    /// Resolves an `aggregateBy` value and the optional comma-separated
    /// `groups` extension.
    pub fn new(key: &str, groups: Option<&str>) -> Result<Self, QueryError> {
        let (labels, custom): (Vec<&str>, bool) = match key {
            "app" => (vec!["app"], false),
            "droppedState" => (vec!["PktDropLatestState"], false),
            "droppedCause" => (vec!["PktDropLatestDropCause"], false),
            "dnsRCode" => (vec!["DnsFlagsResponseCode"], false),
            "cluster" => (vec!["K8S_ClusterName"], false),
            "zone" => (vec!["SrcK8S_Zone", "DstK8S_Zone"], false),
            "host" => (vec!["SrcK8S_HostName", "DstK8S_HostName"], false),
            "namespace" => (vec!["SrcK8S_Namespace", "DstK8S_Namespace"], false),
            "owner" => (OWNER_LABELS.to_vec(), false),
            "resource" => {
                let mut labels = OWNER_LABELS.to_vec();
                labels.extend_from_slice(RESOURCE_LABELS);
                (labels, false)
            }
            "" => {
                return Err(QueryError::Unsupported(
                    "aggregateBy cannot be empty".into(),
                ));
            }
            other => (vec![other], true),
        };
        let mut aggregate = Self {
            key: key.to_string(),
            labels: labels.into_iter().map(str::to_string).collect(),
            custom,
        };
        for group in groups.into_iter().flat_map(|groups| groups.split(',')) {
            let extra: &[&str] = match group.trim() {
                "" => &[],
                "clusters" => &["K8S_ClusterName"],
                "zones" => &["SrcK8S_Zone", "DstK8S_Zone"],
                "hosts" => &["SrcK8S_HostName", "DstK8S_HostName"],
                "namespaces" => &["SrcK8S_Namespace", "DstK8S_Namespace"],
                "owners" => OWNER_LABELS,
                other => {
                    return Err(QueryError::Unsupported(format!(
                        "unknown group `{other}`"
                    )));
                }
            };
            for label in extra {
                if !aggregate.labels.iter().any(|existing| existing == label) {
                    aggregate.labels.push(label.to_string());
                }
            }
        }
        Ok(aggregate)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// True when `aggregateBy` named a raw field rather than a known scope.
    pub fn is_custom(&self) -> bool {
        self.custom
    }

    pub fn joined(&self) -> String {
        self.labels.join(",")
    }
}

#[derive(Debug, Clone)]
pub struct TopologyOptions {
    /// `K` of `topk`/`bottomk`, also sent as the query limit.
    pub top: u64,
    pub step: String,
    pub rate_interval: String,
    pub metric_type: MetricType,
    pub function: MetricFunction,
    pub aggregate: Aggregate,
}

impl TopologyOptions {
    pub fn effective_function(&self) -> MetricFunction {
        if self.metric_type.is_count() {
            MetricFunction::Count
        } else {
            self.function
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopologyQueryBuilder<'a> {
    flow: FlowQueryBuilder<'a>,
    base_url: &'a str,
    options: TopologyOptions,
}

impl<'a> TopologyQueryBuilder<'a> {
    pub fn new(
        catalog: &'a FieldCatalog,
        base_url: &'a str,
        flow_options: FlowQueryOptions,
        options: TopologyOptions,
    ) -> Self {
        let flow_options = FlowQueryOptions {
            limit: None,
            ..flow_options
        };
        let mut flow = FlowQueryBuilder::new(catalog, base_url, flow_options);
        if options.aggregate.is_custom() {
            flow.require_field(options.aggregate.key());
        }
        if let Some(field) = options.metric_type.required_field() {
            flow.require_field(field);
        }
        Self {
            flow,
            base_url,
            options,
        }
    }

    pub fn with_group(
        catalog: &'a FieldCatalog,
        base_url: &'a str,
        flow_options: FlowQueryOptions,
        options: TopologyOptions,
        group: &SingleQuery,
    ) -> Result<Self, QueryError> {
        let mut builder = Self::new(catalog, base_url, flow_options, options);
        builder.flow.add_group(group)?;
        Ok(builder)
    }

    pub fn build(&self) -> Result<String, QueryError> {
        let function = self.options.effective_function();
        let top = self.options.top;

        let mut url = String::with_capacity(320);
        url.push_str(self.base_url.trim_end_matches('/'));
        url.push_str(QUERY_RANGE_PATH);
        url.push_str("?query=");
        url.push_str(function.top_operator());
        url.push('(');
        url.push_str(&top.to_string());
        url.push_str(",sum by(");
        url.push_str(&self.options.aggregate.joined());
        url.push_str(")(");
        url.push_str(function.range_function());
        url.push('(');
        if let Some(quantile) = function.quantile() {
            url.push_str(quantile);
            url.push(',');
        }
        self.flow.write_body(&mut url, true)?;
        if function != MetricFunction::Count {
            url.push_str("|unwrap ");
            url.push_str(self.options.metric_type.as_str());
            url.push_str("|__error__=\"\"");
        }
        url.push('[');
        url.push_str(&self.options.rate_interval);
        url.push_str("])))");

        let window = self.flow.options();
        push_param(&mut url, "start", window.start);
        push_param(&mut url, "end", window.end);
        push_param(&mut url, "limit", Some(top));
        push_param(&mut url, "step", Some(&self.options.step));
        debug!("built topology query: {url}");
        Ok(url)
    }
}
