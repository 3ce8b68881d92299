use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod repository;
pub mod service;
pub mod store;

use crate::config::ServerConfig;
use crate::service::pipeline_service;
use crate::store::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel_server=debug,keel_runner=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Keel Server...");

    let config = ServerConfig::from_env()?;

    let pipelines = pipeline_service::load_pipelines(&config.pipeline_dir)
        .with_context(|| format!("Failed to load pipelines from {}", config.pipeline_dir.display()))?;
    tracing::info!(
        "Loaded {} pipeline(s) from {}",
        pipelines.len(),
        config.pipeline_dir.display()
    );

    let state = AppState::new(&config, pipelines)?;
    let app = api::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
