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
    AggregatedQueryResponse, AggregatedStats, QueryResponseData, RESULT_STREAMS, ResultValue,
    Stream,
};

use super::{MergeError, Merger, aggregated};

struct StreamBucket {
    stream: Stream,
    seen: HashSet<(i64, String)>,
}

/// Merges log streams by label set, keeping each `(timestamp, line)` entry
/// once per stream. Streams keep the order in which they were first seen.
pub struct StreamMerger {
    limit: u64,
    index: HashMap<BTreeMap<String, String>, usize>,
    buckets: Vec<StreamBucket>,
    stats: AggregatedStats,
}

impl StreamMerger {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            index: HashMap::new(),
            buckets: Vec::new(),
            stats: AggregatedStats::default(),
        }
    }
}

impl Merger for StreamMerger {
    fn add(&mut self, data: QueryResponseData) -> Result<(), MergeError> {
        let streams = match data.result {
            ResultValue::Streams(streams) => streams,
            other => {
                return Err(MergeError::WrongResultType {
                    expected: RESULT_STREAMS,
                    actual: other.result_type(),
                });
            }
        };

        let mut incoming = 0usize;
        for stream in streams {
            incoming += stream.entries.len();
            let position = match self.index.get(&stream.labels) {
                Some(position) => *position,
                None => {
                    self.buckets.push(StreamBucket {
                        stream: Stream {
                            labels: stream.labels.clone(),
                            entries: Vec::with_capacity(stream.entries.len()),
                        },
                        seen: HashSet::new(),
                    });
                    self.index.insert(stream.labels, self.buckets.len() - 1);
                    self.buckets.len() - 1
                }
            };
            let bucket = &mut self.buckets[position];
            for entry in stream.entries {
                if bucket.seen.insert((entry.timestamp_ns, entry.line.clone())) {
                    bucket.stream.entries.push(entry);
                } else {
                    self.stats.duplicates += 1;
                }
            }
        }

        self.stats.num_queries += 1;
        self.stats.total_entries += incoming;
        if incoming as u64 >= self.limit {
            self.stats.limit_reached = true;
        }
        self.stats.queries_stats.push(data.stats);
        Ok(())
    }

    fn into_response(self) -> AggregatedQueryResponse {
        let streams = self
            .buckets
            .into_iter()
            .map(|bucket| bucket.stream)
            .collect();
        aggregated(ResultValue::Streams(streams), self.stats)
    }
}
