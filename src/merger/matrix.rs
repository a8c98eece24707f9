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

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::model::{
    AggregatedQueryResponse, AggregatedStats, QueryResponseData, RESULT_MATRIX, ResultValue,
    SampleStream,
};

use super::{MergeError, Merger, aggregated};

struct SeriesBucket {
    series: SampleStream,
    seen: HashSet<(i64, String)>,
}

/// Merges time series by metric labels, keeping each `(timestamp, value)`
/// sample once. The limit applies to the number of distinct series.
pub struct MatrixMerger {
    limit: u64,
    index: HashMap<BTreeMap<String, String>, usize>,
    buckets: Vec<SeriesBucket>,
    stats: AggregatedStats,
}

impl MatrixMerger {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            index: HashMap::new(),
            buckets: Vec::new(),
            stats: AggregatedStats::default(),
        }
    }
}

impl Merger for MatrixMerger {
    fn add(&mut self, data: QueryResponseData) -> Result<(), MergeError> {
        let matrix = match data.result {
            ResultValue::Matrix(matrix) => matrix,
            other => {
                return Err(MergeError::WrongResultType {
                    expected: RESULT_MATRIX,
                    actual: other.result_type(),
                });
            }
        };

        for series in matrix {
            self.stats.total_entries += series.values.len();
            let position = match self.index.get(&series.metric) {
                Some(position) => *position,
                None => {
                    self.buckets.push(SeriesBucket {
                        series: SampleStream {
                            metric: series.metric.clone(),
                            values: Vec::with_capacity(series.values.len()),
                        },
                        seen: HashSet::new(),
                    });
                    self.index.insert(series.metric, self.buckets.len() - 1);
                    self.buckets.len() - 1
                }
            };
            let bucket = &mut self.buckets[position];
            for sample in series.values {
                if bucket.seen.insert((sample.timestamp_ms, sample.value_text())) {
                    bucket.series.values.push(sample);
                } else {
                    self.stats.duplicates += 1;
                }
            }
        }

        self.stats.num_queries += 1;
        if self.buckets.len() as u64 >= self.limit {
            self.stats.limit_reached = true;
        }
        self.stats.queries_stats.push(data.stats);
        Ok(())
    }

    fn into_response(self) -> AggregatedQueryResponse {
        let matrix = self
            .buckets
            .into_iter()
            .map(|bucket| bucket.series)
            .collect();
        aggregated(ResultValue::Matrix(matrix), self.stats)
    }
}
