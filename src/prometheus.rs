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

//! PromQL emission backed by the configured metric inventory.

mod inventory;
mod query;

pub use inventory::{MetricInfo, MetricInventory, MetricNeed};
pub use query::{PromWindow, build_query};

use crate::{filters::SingleQuery, logql::TopologyOptions};

/// Metric answering `group`, when Prometheus can handle it at all.
pub fn plan<'a>(
    inventory: &'a MetricInventory,
    group: &SingleQuery,
    options: &TopologyOptions,
) -> Option<&'a MetricInfo> {
    let need = MetricNeed::for_group(group, options)?;
    inventory.find_metric(&need)
}

/// Names of disabled metrics that would let Prometheus handle `group`.
pub fn disabled_candidates(
    inventory: &MetricInventory,
    group: &SingleQuery,
    options: &TopologyOptions,
) -> Vec<String> {
    MetricNeed::for_group(group, options)
        .map(|need| inventory.find_disabled_candidates(&need))
        .unwrap_or_default()
}
