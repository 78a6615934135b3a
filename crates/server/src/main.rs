//! Server entry point

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use eca_config::{load_settings, Settings};
use eca_pipeline::{DeliveryHub, TurnController};
use eca_server::{create_router, init_metrics, AppState};
use eca_stages::EngineSet;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Env vars > config/{env}.toml > config/default.toml > defaults
    let env = std::env::var("ECA_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing is not up yet
            eprintln!("warning: failed to load config ({}), using defaults", e);
            Settings::default()
        }
    };

    init_tracing(&settings);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?settings.environment,
        config_env = env.as_deref().unwrap_or("default"),
        "starting eca-server"
    );

    if settings.observability.metrics_enabled {
        init_metrics();
    }

    let state_store = eca_state::build_store(&settings.database).await?;
    let artifacts = eca_artifacts::build_store(&settings.artifacts);
    let engines = EngineSet::from_config(&settings.engines)?;
    let delivery = Arc::new(DeliveryHub::new());

    let controller = Arc::new(TurnController::new(
        engines,
        artifacts.clone(),
        state_store.clone(),
        delivery.clone(),
        settings.pipeline.clone(),
    ));

    let bind_addr = settings.server.bind_addr.clone();
    let state = AppState::new(settings, controller, artifacts, state_store, delivery);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.observability.log_level.clone()));

    if settings.observability.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install shutdown handler");
    }
    tracing::info!("shutdown signal received");
}
