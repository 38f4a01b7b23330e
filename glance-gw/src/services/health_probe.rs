//! Analyzer health probing
//!
//! Queries each analyzer's `/health` endpoint concurrently under a short
//! deadline and rolls the per-service outcomes up into an overall status.
//! The latest probe per service is cached in a [`HealthTracker`] so the
//! `/services/health` endpoint can report `last_check` times.

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use glance_common::config::AnalyzerSpec;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Health of one analyzer as last probed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub name: String,
    /// `healthy`, `offline` or `error`
    pub status: String,
    pub response_time_ms: u64,
    pub last_check: DateTime<Utc>,
}

impl ServiceHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Cache of the most recent probe per service.
#[derive(Default)]
pub struct HealthTracker {
    inner: RwLock<HashMap<String, ServiceHealth>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, id: &str, health: ServiceHealth) {
        self.inner.write().insert(id.to_string(), health);
    }

    pub fn snapshot(&self) -> HashMap<String, ServiceHealth> {
        self.inner.read().clone()
    }
}

/// Probes the whole roster concurrently.
pub struct HealthProber {
    http: reqwest::Client,
    timeout: Duration,
}

impl HealthProber {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// Probe every analyzer; results come back in roster order.
    pub async fn probe_all(&self, roster: &[AnalyzerSpec]) -> Vec<(String, ServiceHealth)> {
        let mut tasks = FuturesUnordered::new();
        for spec in roster {
            tasks.push(async move {
                let health = self.probe_one(spec).await;
                (spec.id.clone(), health)
            });
        }

        let mut results: Vec<(String, ServiceHealth)> = Vec::with_capacity(roster.len());
        while let Some(entry) = tasks.next().await {
            results.push(entry);
        }
        // Completion order is nondeterministic; restore roster order.
        results.sort_by_key(|(id, _)| {
            roster
                .iter()
                .position(|s| &s.id == id)
                .unwrap_or(usize::MAX)
        });
        results
    }

    async fn probe_one(&self, spec: &AnalyzerSpec) -> ServiceHealth {
        let url = format!("{}/health", spec.base_url());
        let started = Instant::now();

        let status = match self.http.get(&url).timeout(self.timeout).send().await {
            Ok(response) if response.status().is_success() => "healthy",
            Ok(response) => {
                debug!(service = %spec.id, status = %response.status(), "Health probe error");
                "error"
            }
            Err(e) if e.is_connect() => "offline",
            Err(e) if e.is_timeout() => "offline",
            Err(e) => {
                debug!(service = %spec.id, error = %e, "Health probe failed");
                "error"
            }
        };

        ServiceHealth {
            name: spec.name.clone(),
            status: status.to_string(),
            response_time_ms: started.elapsed().as_millis() as u64,
            last_check: Utc::now(),
        }
    }
}

/// Overall status word for a set of per-service outcomes.
///
/// All healthy → `healthy`; at least half → `degraded`; some but fewer
/// than half → `critical`; none (of a non-empty roster) → `critical`.
pub fn overall_status(healthy: usize, total: usize) -> &'static str {
    if total == 0 || healthy == total {
        "healthy"
    } else if healthy * 2 >= total {
        "degraded"
    } else {
        "critical"
    }
}
