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

//! HTTP access to the Loki and Prometheus stores.

use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use reqwest::{
    Certificate, Client,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use thiserror::Error;
use url::Url;

use crate::error::{AppError, DataSource};

const TENANT_HEADER: &str = "X-Scope-OrgID";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid url `{url}`: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("client setup failed: {0}")]
    Setup(String),
}

impl StoreError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else if err.is_connect() {
            StoreError::Connect(err.to_string())
        } else {
            StoreError::Request(err.to_string())
        }
    }

    pub fn into_app_error(self, datasource: DataSource) -> AppError {
        match self {
            StoreError::Timeout | StoreError::Connect(_) => AppError::ServiceUnavailable(format!(
                "error while fetching data from {datasource}: {self}"
            )),
            StoreError::InvalidUrl { .. } => AppError::Internal(self.to_string()),
            StoreError::Request(_) | StoreError::Setup(_) => AppError::Internal(format!(
                "error while fetching data from {datasource}: {self}"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreResponse {
    pub status: u16,
    pub body: Bytes,
}

impl StoreResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// One upstream store. `token` is the `Authorization` header of the
/// console request, forwarded when the store is configured to.
#[async_trait]
pub trait StoreCaller: Send + Sync {
    async fn get(&self, url: &str, token: Option<&str>) -> Result<StoreResponse, StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub timeout: Duration,
    pub skip_tls: bool,
    pub ca_path: Option<PathBuf>,
    pub tenant_id: Option<String>,
    pub forward_user_token: bool,
    pub token_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct HttpStore {
    client: Client,
    forward_user_token: bool,
    service_token: Option<String>,
}

impl HttpStore {
    pub fn new(options: &StoreOptions) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        if let Some(tenant) = options.tenant_id.as_deref().filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(tenant)
                .map_err(|err| StoreError::Setup(format!("invalid tenant id: {err}")))?;
            headers.insert(TENANT_HEADER, value);
        }

        let mut builder = Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(options.skip_tls);
        if !options.timeout.is_zero() {
            builder = builder.timeout(options.timeout);
        }
        if let Some(path) = &options.ca_path {
            let pem = std::fs::read(path).map_err(|err| {
                StoreError::Setup(format!("cannot read CA file {}: {err}", path.display()))
            })?;
            let certificate = Certificate::from_pem(&pem)
                .map_err(|err| StoreError::Setup(format!("invalid CA file: {err}")))?;
            builder = builder.add_root_certificate(certificate);
        }
        let client = builder
            .build()
            .map_err(|err| StoreError::Setup(err.to_string()))?;

        let service_token = match &options.token_path {
            Some(path) => {
                let token = std::fs::read_to_string(path).map_err(|err| {
                    StoreError::Setup(format!("cannot read token file {}: {err}", path.display()))
                })?;
                Some(format!("Bearer {}", token.trim()))
            }
            None => None,
        };

        Ok(Self {
            client,
            forward_user_token: options.forward_user_token,
            service_token,
        })
    }

    fn authorization<'a>(&'a self, token: Option<&'a str>) -> Option<&'a str> {
        if self.forward_user_token {
            if let Some(token) = token {
                return Some(token);
            }
        }
        self.service_token.as_deref()
    }
}

#[async_trait]
impl StoreCaller for HttpStore {
    async fn get(&self, url: &str, token: Option<&str>) -> Result<StoreResponse, StoreError> {
        let url = encode_query(url)?;
        debug!("GET {url}");
        let mut request = self.client.get(url);
        if let Some(authorization) = self.authorization(token) {
            request = request.header(AUTHORIZATION, authorization);
        }
        let response = request.send().await.map_err(StoreError::from_reqwest)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(StoreError::from_reqwest)?;
        Ok(StoreResponse { status, body })
    }
}

/// Percent-encodes the parameters of a URL whose query string is raw text.
/// Parameters are split on `&`, then on the first `=`.
pub fn encode_query(raw: &str) -> Result<Url, StoreError> {
    let invalid = |err: url::ParseError| StoreError::InvalidUrl {
        url: raw.to_string(),
        message: err.to_string(),
    };
    let Some((base, query)) = raw.split_once('?') else {
        return Url::parse(raw).map_err(invalid);
    };
    let params = query
        .split('&')
        .filter(|param| !param.is_empty())
        .map(|param| param.split_once('=').unwrap_or((param, "")));
    Url::parse_with_params(base, params).map_err(invalid)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use axum::{Router, http::HeaderMap as AxumHeaders, routing::get};

    use super::*;

    #[test]
    fn encodes_raw_logql() {
        let url = encode_query(
            "http://loki:3100/loki/api/v1/query_range?query={app=\"netobserv-flowcollector\"}|~`Proto\":6[,}]`&start=1&end=2&limit=100",
        )
        .unwrap();
        assert_eq!(url.path(), "/loki/api/v1/query_range");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs[0].0, "query");
        assert_eq!(
            pairs[0].1,
            "{app=\"netobserv-flowcollector\"}|~`Proto\":6[,}]`"
        );
        assert_eq!(pairs[3], ("limit".to_string(), "100".to_string()));
        assert!(!url.as_str().contains('{'));
    }

    #[test]
    fn keeps_equals_inside_values() {
        let url = encode_query("http://prom/api/v1/query_range?query=a{b=\"c\"}&step=30s").unwrap();
        let (key, value) = url.query_pairs().next().unwrap();
        assert_eq!(key, "query");
        assert_eq!(value, "a{b=\"c\"}");
    }

    #[test]
    fn plain_urls_pass_through() {
        let url = encode_query("http://loki:3100/ready").unwrap();
        assert_eq!(url.as_str(), "http://loki:3100/ready");
        assert!(matches!(
            encode_query("not a url"),
            Err(StoreError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn timeouts_are_unavailable() {
        let err = StoreError::Timeout.into_app_error(DataSource::Loki);
        assert_eq!(err.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn missing_token_file_fails_setup() {
        let options = StoreOptions {
            token_path: Some(PathBuf::from("/nonexistent/token")),
            ..StoreOptions::default()
        };
        assert!(matches!(HttpStore::new(&options), Err(StoreError::Setup(_))));
    }

    async fn echo_headers(headers: AxumHeaders) -> String {
        let tenant = headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        format!("{tenant}|{auth}")
    }

    async fn serve_echo() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/echo", get(echo_headers));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/echo")
    }

    #[tokio::test]
    async fn sends_tenant_and_forwarded_token() {
        let url = serve_echo().await;
        let store = HttpStore::new(&StoreOptions {
            timeout: Duration::from_secs(5),
            tenant_id: Some("netobserv".into()),
            forward_user_token: true,
            ..StoreOptions::default()
        })
        .unwrap();
        let response = store.get(&url, Some("Bearer user")).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.text(), "netobserv|Bearer user");
    }

    #[tokio::test]
    async fn falls_back_to_service_token() {
        let url = serve_echo().await;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sa-token").unwrap();
        let store = HttpStore::new(&StoreOptions {
            token_path: Some(file.path().to_path_buf()),
            ..StoreOptions::default()
        })
        .unwrap();
        let response = store.get(&url, Some("Bearer user")).await.unwrap();
        assert_eq!(response.text(), "-|Bearer sa-token");
    }
}
