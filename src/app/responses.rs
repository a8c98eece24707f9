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

use axum::{
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    model::{ResultValue, Stream},
    store::StoreResponse,
};

pub(crate) const TIMESTAMP_COLUMN: &str = "Timestamp";

#[derive(Serialize)]
pub(crate) struct StatusResponse {
    pub status: &'static str,
}

/// Upstream body relayed with its status, for the alerting pass-through.
pub(crate) struct Relayed(pub StoreResponse);

impl IntoResponse for Relayed {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::BAD_GATEWAY);
        (
            status,
            [(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            self.0.body,
        )
            .into_response()
    }
}

#[derive(Debug)]
pub(crate) struct CsvExport(pub String);

impl IntoResponse for CsvExport {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [
                (CONTENT_TYPE, HeaderValue::from_static("text/csv")),
                (
                    CONTENT_DISPOSITION,
                    HeaderValue::from_static("attachment; filename=export.csv"),
                ),
            ],
            Bytes::from(self.0),
        )
            .into_response()
    }
}

struct Row {
    timestamp: String,
    fields: Map<String, Value>,
}

/// Renders merged flow records as CSV. Without `columns`, the header is
/// `Timestamp` then every field seen, sorted; with `columns`, it is that
/// ordering with `Timestamp` moved first when listed.
pub(crate) fn records_csv(result: &ResultValue, columns: Option<&[String]>) -> String {
    let rows = match result {
        ResultValue::Streams(streams) => collect_rows(streams),
        ResultValue::Matrix(_) => Vec::new(),
    };
    let header = csv_header(&rows, columns);

    let mut out = String::with_capacity(64 * (rows.len() + 1));
    push_line(&mut out, header.iter().map(String::as_str));
    for row in &rows {
        let cells: Vec<String> = header
            .iter()
            .map(|column| {
                if column == TIMESTAMP_COLUMN {
                    csv_escape(&row.timestamp)
                } else {
                    row.fields.get(column).map(value_cell).unwrap_or_default()
                }
            })
            .collect();
        push_line(&mut out, cells.iter().map(String::as_str));
    }
    out
}

fn collect_rows(streams: &[Stream]) -> Vec<Row> {
    let mut rows = Vec::new();
    for stream in streams {
        for entry in &stream.entries {
            let fields = match serde_json::from_str::<Value>(&entry.line) {
                Ok(Value::Object(fields)) => fields,
                _ => {
                    log::warn!("skipping non-JSON flow line in export");
                    continue;
                }
            };
            let timestamp = DateTime::from_timestamp_nanos(entry.timestamp_ns)
                .to_rfc3339_opts(SecondsFormat::Secs, true);
            rows.push(Row { timestamp, fields });
        }
    }
    rows
}

fn csv_header(rows: &[Row], columns: Option<&[String]>) -> Vec<String> {
    match columns {
        Some(columns) => {
            let mut header = Vec::with_capacity(columns.len());
            if columns.iter().any(|c| c == TIMESTAMP_COLUMN) {
                header.push(TIMESTAMP_COLUMN.to_string());
            }
            header.extend(
                columns
                    .iter()
                    .filter(|c| c.as_str() != TIMESTAMP_COLUMN)
                    .cloned(),
            );
            header
        }
        None => {
            let keys: BTreeSet<&String> = rows.iter().flat_map(|row| row.fields.keys()).collect();
            std::iter::once(TIMESTAMP_COLUMN.to_string())
                .chain(keys.into_iter().cloned())
                .collect()
        }
    }
}

fn push_line<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    for (idx, cell) in cells.enumerate() {
        if idx > 0 {
            out.push(',');
        }
        out.push_str(cell);
    }
    out.push('\n');
}

fn value_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => csv_escape(s),
        other => csv_escape(&other.to_string()),
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('\n') || s.contains('"') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::StreamEntry;

    fn streams(lines: &[(i64, &str)]) -> ResultValue {
        ResultValue::Streams(vec![Stream {
            labels: BTreeMap::new(),
            entries: lines
                .iter()
                .map(|(ts, line)| StreamEntry {
                    timestamp_ns: *ts,
                    line: line.to_string(),
                })
                .collect(),
        }])
    }

    #[test]
    fn header_lists_sorted_fields_after_timestamp() {
        let result = streams(&[
            (1_700_000_000_000_000_000, r#"{"SrcAddr":"10.0.0.1","Bytes":42}"#),
            (1_700_000_001_000_000_000, r#"{"DstAddr":"10.0.0.2","Interfaces":["eth0","br-ex"]}"#),
        ]);
        assert_eq!(
            records_csv(&result, None),
            "Timestamp,Bytes,DstAddr,Interfaces,SrcAddr\n\
             2023-11-14T22:13:20Z,42,,,10.0.0.1\n\
             2023-11-14T22:13:21Z,,10.0.0.2,\"[\"\"eth0\"\",\"\"br-ex\"\"]\",\n"
        );
    }

    #[test]
    fn requested_columns_keep_their_order() {
        let result = streams(&[(0, r#"{"SrcAddr":"a","DstAddr":"b"}"#)]);
        let columns = vec!["DstAddr".to_string(), "SrcAddr".to_string()];
        assert_eq!(records_csv(&result, Some(&columns)), "DstAddr,SrcAddr\nb,a\n");

        let columns = vec![
            "SrcAddr".to_string(),
            TIMESTAMP_COLUMN.to_string(),
            "Missing".to_string(),
        ];
        assert_eq!(
            records_csv(&result, Some(&columns)),
            "Timestamp,SrcAddr,Missing\n1970-01-01T00:00:00Z,a,\n"
        );
    }

    #[test]
    fn escapes_quotes_and_commas() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn skips_lines_that_are_not_objects() {
        let result = streams(&[(0, "not json"), (0, "[1,2]"), (0, r#"{"A":1}"#)]);
        assert_eq!(records_csv(&result, None), "Timestamp,A\n1970-01-01T00:00:00Z,1\n");
    }
}
