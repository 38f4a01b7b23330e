//! glance-gw - Image Analysis Gateway
//!
//! Fans a single image out to a roster of independent ML analyzer
//! endpoints, collects whatever predictions return within a bounded
//! window, and synthesizes a ranked emoji consensus with grouped spatial
//! instances and caption scores.

use anyhow::Result;
use glance_common::config::Config;
use glance_gw::{build_router, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_env("GLANCE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting glance-gw (Image Analysis Gateway)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(None)?;
    let port = config.settings.port;

    tokio::fs::create_dir_all(&config.settings.upload_dir).await?;
    info!("Upload directory: {}", config.settings.upload_dir.display());

    let state = AppState::new(config);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Listening on http://0.0.0.0:{}", port);
    info!("Health check: http://localhost:{}/health", port);

    axum::serve(listener, app).await?;

    Ok(())
}
