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

//! Wire format of Loki and Prometheus range query responses, and of the
//! aggregated response sent to the console.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};
use serde_json::Value;

pub const RESULT_STREAMS: &str = "streams";
pub const RESULT_MATRIX: &str = "matrix";

/// One log line of a stream, serialized as `["<unix ns>", "<line>"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub timestamp_ns: i64,
    pub line: String,
}

impl Serialize for StreamEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.timestamp_ns.to_string(), &self.line).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StreamEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (timestamp, line) = <(String, String)>::deserialize(deserializer)?;
        let timestamp_ns = timestamp
            .parse()
            .map_err(|err| D::Error::custom(format!("invalid timestamp `{timestamp}`: {err}")))?;
        Ok(Self { timestamp_ns, line })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    #[serde(rename = "stream")]
    pub labels: BTreeMap<String, String>,
    #[serde(rename = "values")]
    pub entries: Vec<StreamEntry>,
}

/// One sample, serialized as `[<unix seconds>, "<value>"]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePair {
    pub timestamp_ms: i64,
    pub value: f64,
}

impl SamplePair {
    /// Value text as Prometheus writes it.
    pub fn value_text(&self) -> String {
        if self.value.is_nan() {
            "NaN".into()
        } else if self.value == f64::INFINITY {
            "+Inf".into()
        } else if self.value == f64::NEG_INFINITY {
            "-Inf".into()
        } else {
            self.value.to_string()
        }
    }
}

impl Serialize for SamplePair {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let seconds = self.timestamp_ms as f64 / 1000.0;
        (seconds, self.value_text()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SamplePair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (seconds, value) = <(f64, String)>::deserialize(deserializer)?;
        let value = value
            .parse()
            .map_err(|err| D::Error::custom(format!("invalid sample value `{value}`: {err}")))?;
        Ok(Self {
            timestamp_ms: (seconds * 1000.0).round() as i64,
            value,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleStream {
    pub metric: BTreeMap<String, String>,
    pub values: Vec<SamplePair>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultValue {
    Streams(Vec<Stream>),
    Matrix(Vec<SampleStream>),
}

impl ResultValue {
    pub fn result_type(&self) -> &'static str {
        match self {
            ResultValue::Streams(_) => RESULT_STREAMS,
            ResultValue::Matrix(_) => RESULT_MATRIX,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponseData {
    pub result: ResultValue,
    pub stats: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawData {
    result_type: String,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    stats: Value,
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    status: String,
    data: RawData,
}

impl QueryResponseData {
    /// Decodes a Loki or Prometheus `query_range` response body.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: RawResponse = serde_json::from_slice(body)?;
        if !raw.status.is_empty() && raw.status != "success" {
            return Err(serde_json::Error::custom(format!(
                "query status is `{}`",
                raw.status
            )));
        }
        let result = match raw.data.result_type.as_str() {
            RESULT_STREAMS => ResultValue::Streams(serde_json::from_value(raw.data.result)?),
            RESULT_MATRIX => ResultValue::Matrix(serde_json::from_value(raw.data.result)?),
            other => {
                return Err(serde_json::Error::custom(format!(
                    "unsupported result type `{other}`"
                )));
            }
        };
        Ok(Self {
            result,
            stats: raw.data.stats,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedStats {
    pub num_queries: usize,
    pub limit_reached: bool,
    pub total_entries: usize,
    pub duplicates: usize,
    pub queries_stats: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedQueryResponse {
    pub result_type: &'static str,
    pub result: ResultValue,
    pub stats: AggregatedStats,
    pub is_mock: bool,
    /// Unix milliseconds at which the response was produced.
    pub unix_timestamp: i64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_loki_streams() {
        let body = br#"{"status":"success","data":{"resultType":"streams","result":[
            {"stream":{"app":"netobserv-flowcollector"},"values":[["1700000000000000000","{\"Proto\":6}"]]}
        ],"stats":{"summary":{"totalEntriesReturned":1}}}}"#;
        let data = QueryResponseData::from_slice(body).unwrap();
        let ResultValue::Streams(streams) = &data.result else {
            panic!("expected streams");
        };
        assert_eq!(streams[0].labels["app"], "netobserv-flowcollector");
        assert_eq!(streams[0].entries[0].timestamp_ns, 1_700_000_000_000_000_000);
        assert_eq!(data.stats["summary"]["totalEntriesReturned"], 1);
    }

    #[test]
    fn decodes_prometheus_matrix() {
        let body = br#"{"status":"success","data":{"resultType":"matrix","result":[
            {"metric":{"SrcK8S_Namespace":"a"},"values":[[1700000000.5,"12.5"],[1700000030,"NaN"],[1700000060,"+Inf"]]}
        ]}}"#;
        let data = QueryResponseData::from_slice(body).unwrap();
        let ResultValue::Matrix(matrix) = &data.result else {
            panic!("expected matrix");
        };
        let values = &matrix[0].values;
        assert_eq!(values[0].timestamp_ms, 1_700_000_000_500);
        assert_eq!(values[0].value, 12.5);
        assert!(values[1].value.is_nan());
        assert_eq!(values[2].value_text(), "+Inf");
        assert_eq!(data.stats, Value::Null);
    }

    #[test]
    fn rejects_other_result_types_and_errors() {
        let vector = br#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;
        assert!(QueryResponseData::from_slice(vector).is_err());
        let failed = br#"{"status":"error","data":{"resultType":"matrix","result":[]}}"#;
        assert!(QueryResponseData::from_slice(failed).is_err());
        assert!(QueryResponseData::from_slice(b"not json").is_err());
    }

    #[test]
    fn serializes_console_shapes() {
        let stream = Stream {
            labels: BTreeMap::from([("app".to_string(), "x".to_string())]),
            entries: vec![StreamEntry {
                timestamp_ns: 42,
                line: "{}".into(),
            }],
        };
        assert_eq!(
            serde_json::to_value(&stream).unwrap(),
            json!({"stream": {"app": "x"}, "values": [["42", "{}"]]})
        );
        let sample = SamplePair {
            timestamp_ms: 1_500,
            value: 2.0,
        };
        assert_eq!(serde_json::to_value(sample).unwrap(), json!([1.5, "2"]));
    }
}
