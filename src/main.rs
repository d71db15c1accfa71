// src/main.rs
use anyhow::Context;
use axum::serve;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use livemap_core::{build_router, AppState, Config, PersistenceManager, Tracker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("failed to load config")?;

    // A state file that exists but cannot be read is fatal; a missing one is a first run.
    let persistence = PersistenceManager::new(&config.state_file, &config.tmp_dir);
    let registry = persistence
        .load()
        .with_context(|| format!("failed to load users from {}", config.state_file.display()))?;
    info!(users = registry.count().await, "users loaded");

    let tracker = Tracker::new(registry, Some(persistence))
        .with_fanout_config(config.fanout)
        .with_max_status(config.max_status);
    let app_state = Arc::new(AppState { tracker });
    let app = build_router(app_state);

    let listener = TcpListener::bind(config.listen).await?;
    info!("Server running on {}", config.listen);
    serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
