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

//! Parallel execution of the queries of one console request.

use std::sync::Arc;

use log::{debug, warn};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{AppError, DataSource},
    merger::Merger,
    model::{AggregatedQueryResponse, QueryResponseData},
    store::{StoreCaller, StoreError, StoreResponse},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreQuery {
    Loki(String),
    Prom(String),
}

impl StoreQuery {
    pub fn datasource(&self) -> DataSource {
        match self {
            StoreQuery::Loki(_) => DataSource::Loki,
            StoreQuery::Prom(_) => DataSource::Prom,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            StoreQuery::Loki(url) | StoreQuery::Prom(url) => url,
        }
    }
}

/// Callers of the configured stores. A `None` store is disabled.
#[derive(Clone, Default)]
pub struct Stores {
    pub loki: Option<Arc<dyn StoreCaller>>,
    pub prom: Option<Arc<dyn StoreCaller>>,
}

impl Stores {
    pub fn caller(&self, datasource: DataSource) -> Result<Arc<dyn StoreCaller>, AppError> {
        let caller = match datasource {
            DataSource::Loki => self.loki.clone(),
            DataSource::Prom => self.prom.clone(),
        };
        caller.ok_or_else(|| {
            AppError::BadRequest(format!("{datasource} datasource is not configured"))
        })
    }
}

/// Runs every query concurrently and merges the results in query order.
/// The first failure cancels the queries still in flight and is returned
/// alone; nothing is merged unless all queries succeed.
pub async fn fetch_parallel<M: Merger>(
    cancel: &CancellationToken,
    stores: &Stores,
    token: Option<&str>,
    queries: Vec<StoreQuery>,
    mut merger: M,
) -> Result<AggregatedQueryResponse, AppError> {
    if queries.is_empty() {
        return Err(AppError::BadRequest("no queries could be executed".into()));
    }

    let scope = cancel.child_token();
    let mut tasks = JoinSet::new();
    let count = queries.len();
    for (index, query) in queries.into_iter().enumerate() {
        let datasource = query.datasource();
        let caller = stores.caller(datasource)?;
        let scope = scope.clone();
        let token = token.map(str::to_string);
        debug!("{datasource} query #{index}: {}", query.url());
        tasks.spawn(async move {
            let result = tokio::select! {
                _ = scope.cancelled() => {
                    Err(AppError::ServiceUnavailable("request cancelled".into()))
                }
                response = caller.get(query.url(), token.as_deref()) => {
                    decode(datasource, response)
                }
            };
            (index, result)
        });
    }

    let mut results: Vec<Option<QueryResponseData>> = vec![None; count];
    while let Some(joined) = tasks.join_next().await {
        let outcome = match joined {
            Ok((index, Ok(data))) => {
                results[index] = Some(data);
                continue;
            }
            Ok((_, Err(err))) => err,
            Err(err) => AppError::Internal(format!("query task failed: {err}")),
        };
        warn!("query failed, cancelling {} pending: {outcome}", tasks.len());
        scope.cancel();
        tasks.abort_all();
        return Err(outcome);
    }

    for data in results.into_iter().flatten() {
        merger.add(data)?;
    }
    Ok(merger.into_response())
}

fn decode(
    datasource: DataSource,
    response: Result<StoreResponse, StoreError>,
) -> Result<QueryResponseData, AppError> {
    let response = response.map_err(|err| err.into_app_error(datasource))?;
    if !response.is_success() {
        return Err(AppError::Upstream {
            datasource,
            status: response.status,
            message: response.text(),
        });
    }
    QueryResponseData::from_slice(&response.body)
        .map_err(|err| AppError::Internal(format!("cannot decode {datasource} response: {err}")))
}
