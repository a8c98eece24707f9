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

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::{
    fields::{Direction, FLOW_DIRECTION},
    filters::SingleQuery,
    logql::{MetricFunction, MetricType, TopologyOptions, is_exact, strip_quotes},
};

const METRIC_PREFIX: &str = "netobserv_";
const DNS_LATENCY_MARKER: &str = "_dns_latency_seconds";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromMetricType {
    Counter,
    Histogram,
}

/// One metric exported by the flow pipeline, as listed in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricInfo {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: PromMetricType,
    pub value_field: MetricType,
    #[serde(default = "any_direction")]
    pub direction: Direction,
    #[serde(default)]
    pub labels: BTreeSet<String>,
}

fn enabled_by_default() -> bool {
    true
}

fn any_direction() -> Direction {
    Direction::Any
}

impl MetricInfo {
    fn supports(&self, function: MetricFunction, value: MetricType) -> bool {
        match self.metric_type {
            PromMetricType::Counter => function == MetricFunction::Rate || value.is_count(),
            PromMetricType::Histogram => matches!(
                function,
                MetricFunction::Avg | MetricFunction::P90 | MetricFunction::P99
            ),
        }
    }

    fn direction_matches(&self, need: Direction) -> bool {
        if self.direction == need {
            return true;
        }
        self.direction == Direction::Any
            && need != Direction::Any
            && self.labels.contains(FLOW_DIRECTION)
    }

    fn satisfies(&self, need: &MetricNeed) -> bool {
        self.value_field == need.value
            && self.supports(need.function, need.value)
            && self.direction_matches(need.direction)
            && need.labels.iter().all(|label| self.labels.contains(label))
    }

    /// Name shown to users, which is also the flag enabling the metric.
    pub fn short_name(&self) -> &str {
        self.name.strip_prefix(METRIC_PREFIX).unwrap_or(&self.name)
    }
}

/// What a metric query requires from a Prometheus metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricNeed {
    pub labels: BTreeSet<String>,
    pub value: MetricType,
    pub direction: Direction,
    pub function: MetricFunction,
}

impl MetricNeed {
    /// Derives the need of one filter group. A single positive
    /// `FlowDirection` value becomes the direction, other direction filters
    /// are plain label requirements. Returns `None` when a match cannot be
    /// expressed as a PromQL label matcher.
    pub fn for_group(group: &SingleQuery, options: &TopologyOptions) -> Option<Self> {
        let mut labels = options
            .aggregate
            .labels()
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>();
        let mut direction = Direction::Any;
        for m in group {
            if m.more_than_or_equal {
                return None;
            }
            if m.key == FLOW_DIRECTION && !m.not && !m.regex {
                let atoms = m.atoms().collect::<Vec<_>>();
                if let [atom] = atoms.as_slice() {
                    let code = if is_exact(atom) {
                        strip_quotes(atom).unwrap_or_default()
                    } else {
                        *atom
                    };
                    if let Some(parsed) = Direction::from_code(code) {
                        direction = parsed;
                        continue;
                    }
                }
            }
            labels.insert(m.key.clone());
        }
        Some(Self {
            labels,
            value: options.metric_type,
            direction,
            function: options.effective_function(),
        })
    }
}

/// Immutable list of configured metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricInventory {
    metrics: Vec<MetricInfo>,
}

impl MetricInventory {
    /// Each DNS latency histogram also provides a flow counter through its
    /// `_count` series.
    pub fn new(metrics: Vec<MetricInfo>) -> Self {
        let mut all = metrics.clone();
        for metric in metrics {
            if metric.metric_type == PromMetricType::Histogram
                && metric.name.contains(DNS_LATENCY_MARKER)
            {
                all.push(MetricInfo {
                    name: format!("{}_count", metric.name),
                    metric_type: PromMetricType::Counter,
                    value_field: MetricType::DnsFlows,
                    ..metric
                });
            }
        }
        Self { metrics: all }
    }

    pub fn metrics(&self) -> &[MetricInfo] {
        &self.metrics
    }

    /// First enabled metric able to answer `need`.
    pub fn find_metric(&self, need: &MetricNeed) -> Option<&MetricInfo> {
        self.metrics
            .iter()
            .find(|metric| metric.enabled && metric.satisfies(need))
    }

    /// Disabled metrics that would answer `need` if they were enabled.
    pub fn find_disabled_candidates(&self, need: &MetricNeed) -> Vec<String> {
        self.metrics
            .iter()
            .filter(|metric| !metric.enabled && metric.satisfies(need))
            .map(|metric| metric.short_name().to_string())
            .collect()
    }
}
