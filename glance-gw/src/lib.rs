//! glance-gw library interface
//!
//! Exposes the gateway's internals for integration testing: the HTTP
//! router, the analyzer clients, the fan-out orchestrator and the
//! clustering/voting pipeline.

pub mod api;
pub mod error;
pub mod pipeline;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use glance_common::config::Config;
use std::sync::Arc;

use crate::services::{AnalyzerClient, HealthTracker, SimilarityClient};

/// Application state shared across handlers.
///
/// Everything in here is either immutable after startup (config, clients)
/// or safe for concurrent use (reqwest pool, health tracker).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http: reqwest::Client,
    pub clients: Arc<Vec<AnalyzerClient>>,
    pub similarity: Arc<Option<SimilarityClient>>,
    pub health: Arc<HealthTracker>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let http = reqwest::Client::new();
        let clients: Vec<AnalyzerClient> = config
            .analyzers
            .iter()
            .map(|spec| AnalyzerClient::new(spec.clone(), http.clone(), &config.settings))
            .collect();
        let similarity = SimilarityClient::from_config(&config, http.clone());

        Self {
            config: Arc::new(config),
            http,
            clients: Arc::new(clients),
            similarity: Arc::new(similarity),
            health: Arc::new(HealthTracker::new()),
            startup_time: Utc::now(),
        }
    }
}

/// Build the application router.
///
/// - `GET  /analyze?url=` / `GET /analyze?file=` - analyze by reference
/// - `POST /analyze` - multipart upload
/// - `GET  /uploads/:name` - serve stored images to distributed analyzers
/// - `GET  /health` - gateway health
/// - `GET  /services/health` - per-analyzer health
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::analyze_routes(&state))
        .merge(api::health_routes())
        .with_state(state)
}
