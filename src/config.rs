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

//! YAML configuration of the backend.
//!
//! ```yaml
//! server:
//!   port: 9001
//! loki:
//!   url: http://loki:3100/
//!   labels: [SrcK8S_Namespace, DstK8S_Namespace, FlowDirection]
//!   timeout: 30s
//! prometheus:
//!   url: http://prometheus:9090/
//!   metrics:
//!     - name: netobserv_namespace_flows_total
//!       type: counter
//!       valueField: Flows
//!       labels: [SrcK8S_Namespace, DstK8S_Namespace]
//! frontend:
//!   deduper: { mark: true, merge: false }
//! ```

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::AppError,
    fields::FieldCatalog,
    prometheus::{MetricInfo, MetricInventory},
    store::StoreOptions,
};

const DEFAULT_PORT: u16 = 9001;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub loki: LokiConfig,
    pub prometheus: PrometheusConfig,
    pub frontend: FrontendConfig,
}

/// Listener settings. TLS and CORS values are handed to the wrapper that
/// terminates them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub port: u16,
    pub metrics_port: Option<u16>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub cors_origin: Option<String>,
    pub cors_methods: Option<String>,
    pub cors_headers: Option<String>,
    pub cors_max_age: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            metrics_port: None,
            cert_path: None,
            key_path: None,
            cors_origin: None,
            cors_methods: None,
            cors_headers: None,
            cors_max_age: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthCheck {
    #[default]
    Auto,
    Authenticated,
    Admin,
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LokiConfig {
    pub disabled: bool,
    pub url: String,
    pub status_url: Option<String>,
    pub labels: Vec<String>,
    pub fields_type: BTreeMap<String, String>,
    pub fields_format: BTreeMap<String, String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(rename = "tenantID")]
    pub tenant_id: Option<String>,
    pub skip_tls: bool,
    pub ca_path: Option<PathBuf>,
    pub forward_user_token: bool,
    pub auth_check: AuthCheck,
}

impl Default for LokiConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            url: String::new(),
            status_url: None,
            labels: Vec::new(),
            fields_type: BTreeMap::new(),
            fields_format: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
            tenant_id: None,
            skip_tls: false,
            ca_path: None,
            forward_user_token: false,
            auth_check: AuthCheck::Auto,
        }
    }
}

impl LokiConfig {
    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }

    /// Base URL of the readiness endpoint.
    pub fn status_url(&self) -> &str {
        self.status_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .unwrap_or(&self.url)
    }

    /// Whether console requests must carry a user token.
    pub fn requires_token(&self) -> bool {
        match self.auth_check {
            AuthCheck::Auto => self.forward_user_token,
            AuthCheck::Authenticated | AuthCheck::Admin => true,
            AuthCheck::None => false,
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            timeout: self.timeout,
            skip_tls: self.skip_tls,
            ca_path: self.ca_path.clone(),
            tenant_id: self.tenant_id.clone(),
            forward_user_token: self.forward_user_token,
            token_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlertManagerConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PrometheusConfig {
    pub url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub skip_tls: bool,
    pub ca_path: Option<PathBuf>,
    pub forward_user_token: bool,
    pub token_path: Option<PathBuf>,
    pub metrics: Vec<MetricInfo>,
    pub alert_manager: AlertManagerConfig,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: DEFAULT_TIMEOUT,
            skip_tls: false,
            ca_path: None,
            forward_user_token: false,
            token_path: None,
            metrics: Vec::new(),
            alert_manager: AlertManagerConfig::default(),
        }
    }
}

impl PrometheusConfig {
    pub fn is_enabled(&self) -> bool {
        !self.url.is_empty()
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            timeout: self.timeout,
            skip_tls: self.skip_tls,
            ca_path: self.ca_path.clone(),
            tenant_id: None,
            forward_user_token: self.forward_user_token,
            token_path: self.token_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeduperConfig {
    pub mark: bool,
    pub merge: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Settings served to the console as-is. Only the parts the backend reads
/// are typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FrontendConfig {
    pub deduper: DeduperConfig,
    pub fields: Vec<FieldInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, AppError> {
        let config: Config =
            serde_yaml::from_str(raw).map_err(|err| AppError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.loki.is_enabled() {
            if self.loki.url.is_empty() {
                return Err(AppError::Config("loki.url is required".into()));
            }
            if self.loki.labels.is_empty() {
                return Err(AppError::Config("loki.labels must not be empty".into()));
            }
        }
        if let Some(metric) = self.prometheus.metrics.iter().find(|m| m.name.is_empty()) {
            return Err(AppError::Config(format!(
                "prometheus metric with value field {:?} has no name",
                metric.value_field
            )));
        }
        Ok(())
    }

    pub fn catalog(&self) -> FieldCatalog {
        let mut catalog = FieldCatalog::new(self.loki.labels.iter().cloned())
            .with_fields(&self.loki.fields_type, &self.loki.fields_format);
        for field in &self.frontend.fields {
            catalog.register(
                &field.name,
                field.kind.as_deref(),
                field.format.as_deref(),
            );
        }
        catalog
    }

    pub fn inventory(&self) -> MetricInventory {
        MetricInventory::new(self.prometheus.metrics.clone())
    }
}
