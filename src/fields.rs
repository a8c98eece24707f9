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

//! Static classification of flow field names.
//!
//! The query builders never look at raw field names directly: they ask the
//! catalog whether a key is a Loki label, a number, an IP, or an array, and
//! whether a bare key stands for a `Src`/`Dst` pair.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

pub const SRC_PREFIX: &str = "Src";
pub const DST_PREFIX: &str = "Dst";

pub const FLOW_DIRECTION: &str = "FlowDirection";
pub const RECORD_TYPE: &str = "_RecordType";
pub const DUPLICATE: &str = "Duplicate";
pub const PACKETS: &str = "Packets";
pub const PKT_DROP_PACKETS: &str = "PktDropPackets";
pub const FLOW_LAYER: &str = "K8S_FlowLayer";
pub const SRC_NAMESPACE: &str = "SrcK8S_Namespace";
pub const DST_NAMESPACE: &str = "DstK8S_Namespace";
pub const DST_TYPE: &str = "DstK8S_Type";

const DEFAULT_NUMERIC: &[&str] = &[
    "Port",
    "SrcPort",
    "DstPort",
    "Packets",
    "Proto",
    "Bytes",
    "DnsId",
    "DnsLatencyMs",
    "Dscp",
    "IcmpType",
    "IcmpCode",
    "Flags",
    "FlowDirection",
    "TimeFlowRttNs",
    "PktDropPackets",
    "PktDropBytes",
];

const DEFAULT_IP: &[&str] = &["SrcAddr", "DstAddr", "SrcK8S_HostIP", "DstK8S_HostIP"];

/// Direction of a flow as reported by the agent; the wire value is numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Direction {
    Ingress,
    Egress,
    Inner,
    Any,
}

impl Direction {
    /// Value of the `FlowDirection` field for this direction.
    pub fn code(self) -> Option<&'static str> {
        match self {
            Direction::Ingress => Some("0"),
            Direction::Egress => Some("1"),
            Direction::Inner => Some("2"),
            Direction::Any => None,
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(Direction::Ingress),
            "1" => Some(Direction::Egress),
            "2" => Some(Direction::Inner),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    labels: HashSet<String>,
    numeric: HashSet<String>,
    ip: HashSet<String>,
    array: HashSet<String>,
    known: HashSet<String>,
}

impl FieldCatalog {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut catalog = Self::default();
        for label in labels {
            let label = label.into();
            catalog.known.insert(label.clone());
            catalog.labels.insert(label);
        }
        for name in DEFAULT_NUMERIC {
            catalog.numeric.insert(name.to_string());
            catalog.known.insert(name.to_string());
        }
        for name in DEFAULT_IP {
            catalog.ip.insert(name.to_string());
            catalog.known.insert(name.to_string());
        }
        catalog
    }

    /// Registers a field description coming from configuration. `kind` is a
    /// type such as `number` or `string[]`, `format` is free text where `IP`
    /// marks an address field.
    pub fn register(&mut self, name: &str, kind: Option<&str>, format: Option<&str>) {
        self.known.insert(name.to_string());
        if let Some(kind) = kind {
            let kind = kind.to_ascii_lowercase();
            if kind.contains("array") || kind.ends_with("[]") {
                self.array.insert(name.to_string());
            } else if kind == "number" {
                self.numeric.insert(name.to_string());
            }
        }
        if format.is_some_and(|format| format.contains("IP")) {
            self.ip.insert(name.to_string());
        }
    }

    pub fn with_fields(
        mut self,
        types: &BTreeMap<String, String>,
        formats: &BTreeMap<String, String>,
    ) -> Self {
        for (name, kind) in types {
            self.register(name, Some(kind), None);
        }
        for (name, format) in formats {
            self.register(name, None, Some(format));
        }
        self
    }

    pub fn is_label(&self, key: &str) -> bool {
        self.labels.contains(key)
    }

    pub fn is_numeric(&self, key: &str) -> bool {
        self.numeric.contains(key) || self.common_variant_matches(key, &self.numeric)
    }

    pub fn is_ip(&self, key: &str) -> bool {
        self.ip.contains(key) || self.common_variant_matches(key, &self.ip)
    }

    pub fn is_array(&self, key: &str) -> bool {
        self.array.contains(key) || self.common_variant_matches(key, &self.array)
    }

    /// Swaps the `Src`/`Dst` prefix of a directional key.
    pub fn peer(key: &str) -> Option<String> {
        if let Some(rest) = key.strip_prefix(SRC_PREFIX) {
            Some(format!("{DST_PREFIX}{rest}"))
        } else {
            key.strip_prefix(DST_PREFIX)
                .map(|rest| format!("{SRC_PREFIX}{rest}"))
        }
    }

    /// For a bare key such as `K8S_Name`, returns the `Src…`/`Dst…` variants
    /// when at least one of them is a known field.
    pub fn common_pair(&self, key: &str) -> Option<(String, String)> {
        if key.starts_with(SRC_PREFIX) || key.starts_with(DST_PREFIX) {
            return None;
        }
        let src = format!("{SRC_PREFIX}{key}");
        let dst = format!("{DST_PREFIX}{key}");
        (self.known.contains(&src) || self.known.contains(&dst)).then_some((src, dst))
    }

    /// Line filters normally match the end of a key so that a bare `Port`
    /// also finds `SrcPort` and `DstPort`. A key that is not such a common
    /// key but is the suffix of another known field (`Packets` inside
    /// `PktDropPackets`) must be matched with its opening quote.
    pub fn needs_strict_key(&self, key: &str) -> bool {
        if self.common_pair(key).is_some() {
            return false;
        }
        self.known
            .iter()
            .any(|other| other.len() > key.len() && other.ends_with(key))
    }

    fn common_variant_matches(&self, key: &str, set: &HashSet<String>) -> bool {
        self.common_pair(key)
            .is_some_and(|(src, dst)| set.contains(&src) || set.contains(&dst))
    }
}
