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

use std::sync::Arc;

use axum::http::{HeaderMap, header::AUTHORIZATION};
use log::info;

use crate::{
    config::Config,
    error::AppError,
    fanout::Stores,
    fields::FieldCatalog,
    prometheus::MetricInventory,
    store::{HttpStore, StoreCaller, StoreError},
};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<StateInner>,
}

struct StateInner {
    config: Config,
    catalog: FieldCatalog,
    inventory: MetricInventory,
    stores: Stores,
    alert_manager: Option<Arc<dyn StoreCaller>>,
}

impl AppState {
    pub fn bootstrap(config: Config) -> Result<Self, AppError> {
        let setup = |err: StoreError| AppError::Config(err.to_string());
        let loki = if config.loki.is_enabled() {
            info!("loki datasource at {}", config.loki.url);
            Some(Arc::new(HttpStore::new(&config.loki.store_options()).map_err(setup)?)
                as Arc<dyn StoreCaller>)
        } else {
            info!("loki datasource disabled");
            None
        };
        let prom = if config.prometheus.is_enabled() {
            info!("prometheus datasource at {}", config.prometheus.url);
            Some(
                Arc::new(HttpStore::new(&config.prometheus.store_options()).map_err(setup)?)
                    as Arc<dyn StoreCaller>,
            )
        } else {
            info!("prometheus datasource disabled");
            None
        };
        let alert_manager = if config.prometheus.alert_manager.url.is_empty() {
            None
        } else {
            info!("alertmanager at {}", config.prometheus.alert_manager.url);
            Some(
                Arc::new(HttpStore::new(&config.prometheus.store_options()).map_err(setup)?)
                    as Arc<dyn StoreCaller>,
            )
        };
        Ok(Self::with_stores(config, Stores { loki, prom }, alert_manager))
    }

    pub fn with_stores(
        config: Config,
        stores: Stores,
        alert_manager: Option<Arc<dyn StoreCaller>>,
    ) -> Self {
        let catalog = config.catalog();
        let inventory = config.inventory();
        info!(
            "{} loki labels, {} prometheus metrics configured",
            config.loki.labels.len(),
            inventory.metrics().len()
        );
        Self {
            inner: Arc::new(StateInner {
                config,
                catalog,
                inventory,
                stores,
                alert_manager,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.inner.catalog
    }

    pub fn inventory(&self) -> &MetricInventory {
        &self.inner.inventory
    }

    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    pub fn alert_manager(&self) -> Option<&Arc<dyn StoreCaller>> {
        self.inner.alert_manager.as_ref()
    }

    /// Base URL of Loki, failing when the datasource is off.
    pub fn loki_url(&self) -> Result<&str, AppError> {
        if self.inner.stores.loki.is_none() {
            return Err(AppError::BadRequest("loki datasource is disabled".into()));
        }
        Ok(&self.inner.config.loki.url)
    }

    pub fn prom_enabled(&self) -> bool {
        self.inner.stores.prom.is_some()
    }

    /// Returns the `Authorization` header to forward, enforcing the
    /// configured auth check.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<Option<String>, AppError> {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        if token.is_none() && self.inner.config.loki.requires_token() {
            return Err(AppError::ServiceUnavailable(
                "user is not authenticated".into(),
            ));
        }
        Ok(token)
    }
}
