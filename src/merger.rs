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

//! Accumulation of partial query results into one response.

mod matrix;
mod streams;

pub use matrix::MatrixMerger;
pub use streams::StreamMerger;

use chrono::Utc;
use thiserror::Error;

use crate::model::{AggregatedQueryResponse, AggregatedStats, QueryResponseData, ResultValue};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("wrong result type: expected {expected}, got {actual}")]
    WrongResultType {
        expected: &'static str,
        actual: &'static str,
    },
}

pub trait Merger {
    fn add(&mut self, data: QueryResponseData) -> Result<(), MergeError>;

    fn into_response(self) -> AggregatedQueryResponse;
}

pub(crate) fn aggregated(result: ResultValue, stats: AggregatedStats) -> AggregatedQueryResponse {
    AggregatedQueryResponse {
        result_type: result.result_type(),
        result,
        stats,
        is_mock: false,
        unix_timestamp: Utc::now().timestamp_millis(),
    }
}
