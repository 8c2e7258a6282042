// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

use as4_engine::{Engine, Settings};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use std::process::ExitCode;

const DEFAULT_SETTINGS: &str = "settings.yaml";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SETTINGS.to_owned());
    let engine = match Settings::load(&path).and_then(|settings| Engine::from_settings(&settings)) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Can not start engine from {}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let token = CancellationToken::new();
    let stop = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down.");
        }
        stop.cancel();
    });

    match engine.run(token).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Engine stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}
