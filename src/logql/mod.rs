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

//! LogQL emission for flow records and topology metrics.

mod filter;
mod flow;
mod more_than;
mod topology;

pub use filter::{LabelFilter, is_exact, strip_quotes};
pub use flow::{DedupFilter, FlowQueryBuilder, FlowQueryOptions, PacketLoss, RecordType};
pub use topology::{Aggregate, MetricFunction, MetricType, TopologyOptions, TopologyQueryBuilder};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("invalid number for `{key}`: {value}")]
    InvalidNumber { key: String, value: String },
    #[error("value must be a positive integer: {0}")]
    NotANumber(String),
    #[error("{0}")]
    Unsupported(String),
}
