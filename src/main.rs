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

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    process::ExitCode,
};

use app::{AppState, router};
use clap::Parser;
use config::Config;
use error::AppError;
use log::{LevelFilter, error, info};

mod app;
mod config;
mod duration;
mod error;
mod fanout;
mod fields;
mod filters;
mod logql;
mod merger;
mod model;
mod prometheus;
mod reporter;
mod store;

#[derive(Debug, Parser)]
#[command(author, version, about, disable_help_subcommand = true)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long = "config", env = "NETOBSERV_CONFIG", default_value = "config.yaml")]
    config: PathBuf,
    /// Log level of this service when RUST_LOG is not set
    #[arg(long = "loglevel", env = "LOGLEVEL", default_value = "info")]
    loglevel: LevelFilter,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.loglevel);
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    info!("loading configuration from {}", args.config.display());
    let config = Config::load(&args.config)?;
    let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.server.port));
    let state = AppState::bootstrap(config)?;
    let app = router(state);

    info!("binding TCP listener on {bind}");
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind listener: {err}")))?;
    info!("netobserv-console-backend listening on {bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("cannot listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn init_logging(level: LevelFilter) {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::Builder::from_default_env().init();
    } else {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Warn)
            .filter_module("netobserv_console_backend", level)
            .init();
    }
}
