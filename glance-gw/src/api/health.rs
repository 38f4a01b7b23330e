//! Health endpoints
//!
//! `GET /health` is the gateway roll-up; `GET /services/health` reports
//! every analyzer individually. Both probe the roster live and refresh
//! the cached tracker used for `last_check` reporting.

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::services::health_probe::{overall_status, HealthProber, ServiceHealth};
use crate::AppState;

/// GET /health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy`, `degraded` or `critical`
    pub status: String,
    /// `n/m` healthy analyzers
    pub healthy_services: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub uptime_seconds: u64,
    pub version: String,
}

/// GET /services/health response
#[derive(Debug, Serialize)]
pub struct ServicesHealthResponse {
    pub status: String,
    pub services: BTreeMap<String, ServiceHealth>,
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let prober = HealthProber::new(
        state.http.clone(),
        state.config.settings.health_timeout(),
    );
    let results = prober.probe_all(&state.config.analyzers).await;
    for (id, health) in &results {
        state.health.record(id, health.clone());
    }

    let healthy = results.iter().filter(|(_, h)| h.is_healthy()).count();
    let total = results.len();
    let uptime = Utc::now().signed_duration_since(state.startup_time);

    Json(HealthResponse {
        status: overall_status(healthy, total).to_string(),
        healthy_services: format!("{}/{}", healthy, total),
        timestamp: Utc::now(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /services/health
async fn services_health(State(state): State<AppState>) -> Json<ServicesHealthResponse> {
    let prober = HealthProber::new(
        state.http.clone(),
        state.config.settings.health_timeout(),
    );
    let results = prober.probe_all(&state.config.analyzers).await;

    let mut services = BTreeMap::new();
    for (id, health) in results {
        state.health.record(&id, health.clone());
        services.insert(id, health);
    }

    let healthy = services.values().filter(|h| h.is_healthy()).count();
    Json(ServicesHealthResponse {
        status: overall_status(healthy, services.len()).to_string(),
        services,
    })
}

/// Build the health routes.
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/services/health", get(services_health))
}
