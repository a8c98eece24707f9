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

use log::debug;

use crate::{
    fields::{Direction, FLOW_DIRECTION},
    filters::SingleQuery,
    logql::{LabelFilter, MetricFunction, QueryError, TopologyOptions},
};

use super::inventory::{MetricInfo, PromMetricType};

const QUERY_RANGE_PATH: &str = "/api/v1/query_range";

/// Window of a range query, in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromWindow {
    pub start: i64,
    pub end: i64,
}

/// Builds the `query_range` URL answering a metric query from `metric`.
pub fn build_query(
    base_url: &str,
    metric: &MetricInfo,
    group: &SingleQuery,
    options: &TopologyOptions,
    window: PromWindow,
) -> Result<String, QueryError> {
    let selector = label_selector(metric, group)?;
    let function = options.effective_function();
    let groups = options.aggregate.joined();
    let rate_interval = &options.rate_interval;
    let name = &metric.name;

    let inner = match (metric.metric_type, function.quantile()) {
        (PromMetricType::Histogram, Some(quantile)) => format!(
            "histogram_quantile({quantile},sum by({groups},le)(rate({name}_bucket{selector}[{rate_interval}])))"
        ),
        (PromMetricType::Histogram, None) if function == MetricFunction::Avg => format!(
            "(sum by({groups})(rate({name}_sum{selector}[{rate_interval}]))/sum by({groups})(rate({name}_count{selector}[{rate_interval}])))"
        ),
        (PromMetricType::Histogram, None) => {
            return Err(QueryError::Unsupported(format!(
                "histogram metric {name} cannot be used with this function"
            )));
        }
        (PromMetricType::Counter, _) => {
            format!("sum by({groups})(rate({name}{selector}[{rate_interval}]))")
        }
    };
    let scale = options.metric_type.prometheus_scale().unwrap_or_default();

    let mut url = String::with_capacity(256);
    url.push_str(base_url.trim_end_matches('/'));
    url.push_str(QUERY_RANGE_PATH);
    url.push_str("?query=");
    url.push_str(function.top_operator());
    url.push('(');
    url.push_str(&options.top.to_string());
    url.push(',');
    url.push_str(&inner);
    url.push_str(scale);
    url.push(')');
    url.push_str(&format!(
        "&start={}&end={}&step={}",
        window.start, window.end, options.step
    ));
    debug!("built prometheus query: {url}");
    Ok(url)
}

/// `{k1="v1",k2=~"…"}` from the group matches. A metric restricted to one
/// direction is queried without its `FlowDirection` filter.
fn label_selector(metric: &MetricInfo, group: &SingleQuery) -> Result<String, QueryError> {
    let mut filters = Vec::with_capacity(group.len());
    for m in group {
        if m.more_than_or_equal {
            return Err(QueryError::Unsupported(format!(
                "`{}>=` cannot be expressed with prometheus labels",
                m.key
            )));
        }
        if m.key == FLOW_DIRECTION && metric.direction != Direction::Any {
            continue;
        }
        let filter = if m.regex {
            LabelFilter::regex(&m.key, &m.values, m.not)
        } else {
            let atoms = m.atoms().collect::<Vec<_>>();
            LabelFilter::from_atoms(&m.key, &atoms, m.not)
        };
        filters.push(filter);
    }
    if filters.is_empty() {
        return Ok(String::new());
    }
    let mut selector = String::from("{");
    for (idx, filter) in filters.iter().enumerate() {
        if idx > 0 {
            selector.push(',');
        }
        filter.write_into(&mut selector);
    }
    selector.push('}');
    Ok(selector)
}
