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

use std::time::Instant;

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, Request},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use chrono::Utc;
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::{
    config::FrontendConfig,
    error::{AppError, DataSource},
    fanout::{StoreQuery, fetch_parallel},
    fields::{FLOW_DIRECTION, FLOW_LAYER},
    filters::{Match, MultiQueries, SingleQuery},
    logql::{FlowQueryBuilder, TopologyQueryBuilder},
    merger::{MatrixMerger, StreamMerger},
    model::AggregatedQueryResponse,
    prometheus,
    reporter::{Reporter, expand_reporters, restrict_reporter},
};

use super::{
    params::{
        DataSourceChoice, MatchMode, MetricsQuery, MetricsRequest, RecordsQuery, RecordsRequest,
    },
    responses::{CsvExport, Relayed, StatusResponse, records_csv},
    state::AppState,
};

const CSV_FORMAT: &str = "csv";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/frontend-config", get(frontend_config))
        .route("/api/loki/ready", get(loki_ready))
        .route("/api/loki/flow/records", get(flow_records))
        .route("/api/loki/flow/export", get(export_flows))
        .route("/api/flow/metrics", get(flow_metrics))
        .route("/api/alerts/rules", get(alert_rules))
        .route("/api/alerts/silences", get(alert_silences))
        .with_state(state)
        .layer(middleware::from_fn(log_requests))
}

async fn status() -> Json<StatusResponse> {
    Json(StatusResponse { status: "OK" })
}

async fn frontend_config(State(state): State<AppState>) -> Json<FrontendConfig> {
    Json(state.config().frontend.clone())
}

async fn loki_ready(State(state): State<AppState>) -> Result<String, AppError> {
    let caller = state.stores().caller(DataSource::Loki)?;
    let url = format!(
        "{}/ready",
        state.config().loki.status_url().trim_end_matches('/')
    );
    let response = caller
        .get(&url, None)
        .await
        .map_err(|err| err.into_app_error(DataSource::Loki))?;
    let text = response.text();
    if response.is_success() && text.contains("ready") {
        Ok(text)
    } else {
        Err(AppError::ServiceUnavailable(format!(
            "loki is not ready ({}): {}",
            response.status,
            text.trim()
        )))
    }
}

async fn flow_records(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RecordsQuery>,
) -> Result<Json<AggregatedQueryResponse>, AppError> {
    let token = state.authorize(&headers)?;
    let request = query.resolve(current_time_seconds())?;
    let response = fetch_records(&state, token.as_deref(), &request).await?;
    Ok(Json(response))
}

async fn export_flows(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RecordsQuery>,
) -> Result<CsvExport, AppError> {
    let token = state.authorize(&headers)?;
    match query.format.as_deref() {
        Some(CSV_FORMAT) => {}
        other => {
            return Err(AppError::BadRequest(format!(
                "unsupported export format `{}`",
                other.unwrap_or_default()
            )));
        }
    }
    let request = query.resolve(current_time_seconds())?;
    let response = fetch_records(&state, token.as_deref(), &request).await?;
    let columns = query.columns();
    Ok(CsvExport(records_csv(&response.result, columns.as_deref())))
}

async fn fetch_records(
    state: &AppState,
    token: Option<&str>,
    request: &RecordsRequest,
) -> Result<AggregatedQueryResponse, AppError> {
    let queries = plan_records(state, request)?;
    let limit = request.options.limit.unwrap_or(super::params::DEFAULT_LIMIT);
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    fetch_parallel(&cancel, state.stores(), token, queries, StreamMerger::new(limit)).await
}

fn plan_records(state: &AppState, request: &RecordsRequest) -> Result<Vec<StoreQuery>, AppError> {
    let loki_url = state.loki_url()?;
    let mut queries = Vec::with_capacity(request.filters.len());
    for group in &request.filters {
        let mut builder =
            FlowQueryBuilder::with_group(state.catalog(), loki_url, request.options.clone(), group)?;
        if request.match_mode == MatchMode::Any {
            builder = builder.into_any_match();
        }
        let url = builder.build()?;
        debug!("records query: {url}");
        queries.push(StoreQuery::Loki(url));
    }
    Ok(queries)
}

async fn flow_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<AggregatedQueryResponse>, AppError> {
    let token = state.authorize(&headers)?;
    let request = query.resolve(current_time_seconds())?;
    let queries = plan_metrics(&state, &request)?;
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let response = fetch_parallel(
        &cancel,
        state.stores(),
        token.as_deref(),
        queries,
        MatrixMerger::new(request.topology.top),
    )
    .await?;
    Ok(Json(response))
}

fn plan_metrics(state: &AppState, request: &MetricsRequest) -> Result<Vec<StoreQuery>, AppError> {
    if request.data_source == DataSourceChoice::Prom && !state.prom_enabled() {
        return Err(AppError::BadRequest(
            "prometheus datasource is disabled".into(),
        ));
    }

    let mut filters = request.filters.clone();
    if let Some(layer) = request.layer {
        let layer = [SingleQuery::new(vec![Match::new(FLOW_LAYER, layer.value())])];
        filters = filters.distribute(&layer, |_| false);
    }
    let filters = apply_reporter(state, request, filters);

    let mut queries = Vec::with_capacity(filters.len());
    for group in &filters {
        queries.push(plan_metric_group(state, request, group)?);
    }
    Ok(queries)
}

fn apply_reporter(state: &AppState, request: &MetricsRequest, filters: MultiQueries) -> MultiQueries {
    match request.reporter {
        Reporter::Both => {
            let merged = state.config().frontend.deduper.merge;
            if merged || !state.catalog().is_label(FLOW_DIRECTION) {
                return filters;
            }
            expand_reporters(&filters, request.namespace.as_deref(), |group| {
                prom_metric(state, request, group).is_some()
            })
        }
        reporter => restrict_reporter(&filters, reporter),
    }
}

fn prom_metric<'a>(
    state: &'a AppState,
    request: &MetricsRequest,
    group: &SingleQuery,
) -> Option<&'a prometheus::MetricInfo> {
    if request.data_source == DataSourceChoice::Loki || !state.prom_enabled() {
        return None;
    }
    prometheus::plan(state.inventory(), group, &request.topology)
}

fn plan_metric_group(
    state: &AppState,
    request: &MetricsRequest,
    group: &SingleQuery,
) -> Result<StoreQuery, AppError> {
    if let Some(metric) = prom_metric(state, request, group) {
        let url = prometheus::build_query(
            &state.config().prometheus.url,
            metric,
            group,
            &request.topology,
            request.prom_window,
        )?;
        debug!("metrics query (prometheus {}): {url}", metric.name);
        return Ok(StoreQuery::Prom(url));
    }

    if request.data_source == DataSourceChoice::Prom {
        let candidates = prometheus::disabled_candidates(state.inventory(), group, &request.topology);
        let message = if candidates.is_empty() {
            format!("no prometheus metric can answer filters `{group}`")
        } else {
            format!(
                "filters `{group}` require one of these metrics to be enabled: {}",
                candidates.join(", ")
            )
        };
        return Err(AppError::BadRequest(message));
    }

    let loki_url = state.loki_url()?;
    let url = TopologyQueryBuilder::with_group(
        state.catalog(),
        loki_url,
        request.flow.clone(),
        request.topology.clone(),
        group,
    )?
    .build()?;
    debug!("metrics query (loki): {url}");
    Ok(StoreQuery::Loki(url))
}

async fn alert_rules(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Relayed, AppError> {
    let token = state.authorize(&headers)?;
    let caller = state.stores().prom.clone().ok_or_else(|| {
        AppError::ServiceUnavailable("prometheus datasource is disabled".into())
    })?;
    let url = format!(
        "{}/api/v1/rules",
        state.config().prometheus.url.trim_end_matches('/')
    );
    let response = caller
        .get(&url, token.as_deref())
        .await
        .map_err(|err| err.into_app_error(DataSource::Prom))?;
    Ok(Relayed(response))
}

async fn alert_silences(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Relayed, AppError> {
    let token = state.authorize(&headers)?;
    let caller = state
        .alert_manager()
        .cloned()
        .ok_or_else(|| AppError::ServiceUnavailable("alertmanager is not configured".into()))?;
    let url = format!(
        "{}/api/v2/silences",
        state
            .config()
            .prometheus
            .alert_manager
            .url
            .trim_end_matches('/')
    );
    let response = caller
        .get(&url, token.as_deref())
        .await
        .map_err(|err| err.into_app_error(DataSource::Prom))?;
    Ok(Relayed(response))
}

fn current_time_seconds() -> i64 {
    Utc::now().timestamp()
}

async fn log_requests(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();
    let response = next.run(req).await;
    let status = response.status();
    let elapsed = start.elapsed();
    log::info!(
        "method={} path={} status={} duration_ms={:.3}",
        method,
        uri.path(),
        status.as_u16(),
        elapsed.as_secs_f64() * 1000.0
    );
    response
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::{
        http::{HeaderValue, StatusCode, header::AUTHORIZATION},
        response::IntoResponse,
    };
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::Config,
        fanout::Stores,
        model::ResultValue,
        store::{StoreCaller, StoreError, StoreResponse},
    };

    const LOKI_URL: &str = "http://loki:3100";
    const STREAMS: &str = r#"{"status":"success","data":{"resultType":"streams","result":[{"stream":{"app":"netobserv-flowcollector"},"values":[["1700000000000000000","{\"Proto\":6,\"SrcAddr\":\"10.0.0.1\"}"]]}],"stats":{}}}"#;
    const MATRIX: &str = r#"{"status":"success","data":{"resultType":"matrix","result":[{"metric":{"SrcK8S_Namespace":"a"},"values":[[1700000000,"5"]]}]}}"#;

    struct Recorder {
        body: &'static str,
        calls: Mutex<Vec<(String, Option<String>)>>,
    }

    impl Recorder {
        fn new(body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                body,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn urls(&self) -> Vec<String> {
            let mut urls: Vec<String> = self
                .calls
                .lock()
                .unwrap()
                .iter()
                .map(|(url, _)| url.clone())
                .collect();
            urls.sort();
            urls
        }
    }

    #[async_trait]
    impl StoreCaller for Recorder {
        async fn get(&self, url: &str, token: Option<&str>) -> Result<StoreResponse, StoreError> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), token.map(str::to_string)));
            Ok(StoreResponse {
                status: 200,
                body: Bytes::from_static(self.body.as_bytes()),
            })
        }
    }

    fn config(extra: &str) -> Config {
        Config::from_yaml(&format!(
            "loki:\n  url: {LOKI_URL}\n  labels: [SrcK8S_Namespace, DstK8S_Namespace, FlowDirection]\n{extra}"
        ))
        .unwrap()
    }

    fn state(config: Config, loki: Arc<Recorder>, prom: Option<Arc<Recorder>>) -> AppState {
        AppState::with_stores(
            config,
            Stores {
                loki: Some(loki as Arc<dyn StoreCaller>),
                prom: prom.map(|p| p as Arc<dyn StoreCaller>),
            },
            None,
        )
    }

    fn records(filters: &str) -> RecordsQuery {
        RecordsQuery {
            filters: Some(filters.to_string()),
            ..RecordsQuery::default()
        }
    }

    fn query_of(url: &str) -> &str {
        let start = url.find("?query=").unwrap() + "?query=".len();
        let end = url.find("&start=").or_else(|| url.find("&limit=")).unwrap();
        &url[start..end]
    }

    #[tokio::test]
    async fn records_fan_out_one_query_per_group() {
        let loki = Recorder::new(STREAMS);
        let state = state(config(""), loki.clone(), None);
        let Json(response) = flow_records(
            State(state),
            HeaderMap::new(),
            Query(records("Proto=6|SrcK8S_Name=test")),
        )
        .await
        .unwrap();

        assert_eq!(response.stats.num_queries, 2);
        assert_eq!(response.stats.duplicates, 1);
        let urls = loki.urls();
        let queries: Vec<&str> = urls.iter().map(|url| query_of(url)).collect();
        assert_eq!(
            queries,
            [
                "{app=\"netobserv-flowcollector\"}|~`Proto\":6[,}]`",
                "{app=\"netobserv-flowcollector\"}|~`SrcK8S_Name\":\"(?i)[^\"]*test.*\"`",
            ]
        );
        assert!(urls.iter().all(|url| url.starts_with(LOKI_URL)));
        assert!(urls.iter().all(|url| url.ends_with("&limit=100")));
    }

    #[tokio::test]
    async fn records_forward_token_and_enforce_auth() {
        let loki = Recorder::new(STREAMS);
        let state = state(
            config("  forwardUserToken: true\n"),
            loki.clone(),
            None,
        );
        let err = flow_records(State(state.clone()), HeaderMap::new(), Query(records("")))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        flow_records(State(state), headers, Query(records("")))
            .await
            .unwrap();
        let calls = loki.calls.lock().unwrap();
        assert_eq!(calls[0].1.as_deref(), Some("Bearer abc"));
    }

    #[tokio::test]
    async fn export_renders_csv() {
        let loki = Recorder::new(STREAMS);
        let state = state(config(""), loki, None);
        let query = RecordsQuery {
            format: Some("csv".into()),
            columns: Some("SrcAddr,Timestamp,Proto".into()),
            ..RecordsQuery::default()
        };
        let CsvExport(csv) = export_flows(State(state.clone()), HeaderMap::new(), Query(query))
            .await
            .unwrap();
        assert_eq!(csv, "Timestamp,SrcAddr,Proto\n2023-11-14T22:13:20Z,10.0.0.1,6\n");

        let query = RecordsQuery {
            format: Some("json".into()),
            ..RecordsQuery::default()
        };
        let err = export_flows(State(state), HeaderMap::new(), Query(query))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    fn metrics_query(filters: &str, data_source: &str) -> MetricsQuery {
        MetricsQuery {
            metric_type: Some("Bytes".into()),
            aggregate_by: Some("namespace".into()),
            filters: Some(filters.to_string()),
            data_source: Some(data_source.to_string()),
            dedup: Some("true".into()),
            limit: Some("50".into()),
            step: Some("10s".into()),
            ..MetricsQuery::default()
        }
    }

    const PROM: &str = "prometheus:\n  url: http://prom:9090\n  metrics:\n    - name: netobserv_namespace_egress_bytes_total\n      type: counter\n      valueField: Bytes\n      direction: Egress\n      labels: [SrcK8S_Namespace, DstK8S_Namespace]\n    - name: netobserv_namespace_ingress_bytes_total\n      enabled: false\n      type: counter\n      valueField: Bytes\n      direction: Ingress\n      labels: [SrcK8S_Namespace, DstK8S_Namespace]\n";

    #[tokio::test]
    async fn metrics_expand_reporters_on_loki() {
        let loki = Recorder::new(MATRIX);
        let state = state(config(""), loki.clone(), None);
        let Json(response) = flow_metrics(
            State(state),
            HeaderMap::new(),
            Query(metrics_query("", "auto")),
        )
        .await
        .unwrap();
        assert_eq!(response.result_type, "matrix");
        assert_eq!(response.stats.num_queries, 2);
        let urls = loki.urls();
        let received = urls
            .iter()
            .find(|url| url.contains("FlowDirection=~"))
            .unwrap();
        assert_eq!(
            query_of(received),
            "topk(50,sum by(SrcK8S_Namespace,DstK8S_Namespace)(rate({app=\"netobserv-flowcollector\",FlowDirection=~\"^0$|^2$\"}!~`Duplicate\":true`|json|unwrap Bytes|__error__=\"\"[2m])))"
        );
        assert!(received.ends_with("&limit=50&step=10s"));
        let sent = urls.iter().find(|url| url.contains("FlowDirection=\"1\"")).unwrap();
        assert!(sent.contains("|json|DstK8S_Type=~\"^$|^Service$\"|unwrap Bytes"));
    }

    #[tokio::test]
    async fn metrics_use_prometheus_when_a_metric_matches() {
        let loki = Recorder::new(MATRIX);
        let prom = Recorder::new(MATRIX);
        let state = state(config(PROM), loki.clone(), Some(prom.clone()));
        let query = MetricsQuery {
            reporter: Some("source".into()),
            ..metrics_query("SrcK8S_Namespace=\"a\"", "auto")
        };
        flow_metrics(State(state), HeaderMap::new(), Query(query))
            .await
            .unwrap();
        assert!(loki.urls().is_empty());
        let urls = prom.urls();
        assert_eq!(urls.len(), 1);
        assert!(urls[0].starts_with(
            "http://prom:9090/api/v1/query_range?query=topk(50,sum by(SrcK8S_Namespace,DstK8S_Namespace)(rate(netobserv_namespace_egress_bytes_total{SrcK8S_Namespace=\"a\"}[2m])))"
        ));
    }

    #[tokio::test]
    async fn explicit_prometheus_lists_disabled_candidates() {
        let loki = Recorder::new(MATRIX);
        let prom = Recorder::new(MATRIX);
        let state = state(config(PROM), loki, Some(prom));
        let query = MetricsQuery {
            reporter: Some("destination".into()),
            ..metrics_query("", "prom")
        };
        let err = flow_metrics(State(state), HeaderMap::new(), Query(query))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(
            err.to_string().contains("namespace_ingress_bytes_total"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn metrics_merge_matrix_results() {
        let loki = Recorder::new(MATRIX);
        let state = state(config(""), loki, None);
        let Json(response) = flow_metrics(
            State(state),
            HeaderMap::new(),
            Query(metrics_query("Proto=6|Proto=17", "loki")),
        )
        .await
        .unwrap();
        let ResultValue::Matrix(matrix) = response.result else {
            panic!("expected matrix");
        };
        assert_eq!(matrix.len(), 1);
        assert_eq!(response.stats.num_queries, 4);
        assert_eq!(response.stats.duplicates, 3);
    }

    #[tokio::test]
    async fn ready_checks_upstream_text() {
        let ready = Recorder::new("ready");
        let state = state(
            config("  statusUrl: http://loki-status:3100/\n"),
            ready.clone(),
            None,
        );
        assert_eq!(loki_ready(State(state)).await.unwrap(), "ready");
        assert_eq!(ready.urls(), ["http://loki-status:3100/ready"]);

        let starting = Recorder::new("waiting for ingester");
        let state = self::state(config(""), starting, None);
        let err = loki_ready(State(state)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn status_and_frontend_config() {
        let Json(status) = status().await;
        assert_eq!(status.status, "OK");
        let state = state(
            config("frontend:\n  buildVersion: v1\n"),
            Recorder::new(STREAMS),
            None,
        );
        let Json(frontend) = frontend_config(State(state)).await;
        assert_eq!(frontend.extra["buildVersion"], "v1");
    }

    #[tokio::test]
    async fn alerts_need_prometheus() {
        let state = state(config(""), Recorder::new(STREAMS), None);
        let err = alert_rules(State(state), HeaderMap::new()).await.err().unwrap();
        assert_eq!(
            err.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
