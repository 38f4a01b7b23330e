//! Per-request fan-out orchestrator
//!
//! Starts every analyzer call concurrently under a single global budget,
//! collects whatever finishes, and synthesizes `timeout` results for the
//! rest. An individual analyzer failure never fails the request; callers
//! get partial results plus a degradation summary.

use futures::stream::{FuturesUnordered, StreamExt};
use glance_common::types::{
    AnalysisResult, ErrorKind, ServiceHealthSummary, ServiceStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::services::analyzer_client::{AnalyzerClient, ImageRef};

/// How the image reached the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    FileUpload,
    ExternalUrlDownloaded,
    DirectFileAccess,
}

/// One image to analyze, always backed by a local file.
///
/// When `local_url` is set (the image was uploaded or downloaded into the
/// gateway's store), analyzers are handed that URL so distributed
/// analyzers can fetch the bytes over HTTP. Otherwise the file path is
/// passed through unchanged (zero-copy mode).
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub method: ProcessingMethod,
    pub local_path: PathBuf,
    pub local_url: Option<String>,
    pub original_url: Option<String>,
}

impl ImageInput {
    pub fn direct_file(path: PathBuf) -> Self {
        Self {
            method: ProcessingMethod::DirectFileAccess,
            local_path: path,
            local_url: None,
            original_url: None,
        }
    }

    pub fn downloaded(path: PathBuf, local_url: String, original_url: String) -> Self {
        Self {
            method: ProcessingMethod::ExternalUrlDownloaded,
            local_path: path,
            local_url: Some(local_url),
            original_url: Some(original_url),
        }
    }

    pub fn uploaded(path: PathBuf) -> Self {
        Self {
            method: ProcessingMethod::FileUpload,
            local_path: path,
            local_url: None,
            original_url: None,
        }
    }
}

/// Everything the pipeline needs from one fan-out pass.
#[derive(Debug)]
pub struct AnalysisRun {
    /// Per-service results, keyed by service id (sorted)
    pub results: BTreeMap<String, AnalysisResult>,
    /// Per-service status rows, sorted by service id
    pub statuses: Vec<ServiceStatus>,
    /// Original image dimensions, when measurable
    pub dimensions: Option<(u32, u32)>,
    /// Present iff any analyzer was not successful
    pub health_summary: Option<ServiceHealthSummary>,
}

impl AnalysisRun {
    pub fn all_successful(&self) -> bool {
        self.health_summary.is_none()
    }
}

/// Fans one image out to the whole roster.
pub struct Orchestrator {
    clients: Arc<Vec<AnalyzerClient>>,
    budget: Duration,
}

impl Orchestrator {
    pub fn new(clients: Arc<Vec<AnalyzerClient>>, budget: Duration) -> Self {
        Self { clients, budget }
    }

    /// Run the fan-out. Never fails; degraded analyzers are reported in
    /// the run's statuses and health summary.
    pub async fn run(&self, input: &ImageInput) -> AnalysisRun {
        let dimensions = measure_dimensions(&input.local_path).await;
        let deadline = Instant::now() + self.budget;

        let mut tasks = FuturesUnordered::new();
        for client in self.clients.iter() {
            let input = input.clone();
            tasks.push(async move {
                let result = tokio::select! {
                    result = dispatch(client, &input, deadline) => result,
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                        AnalysisResult::failure(
                            ErrorKind::Timeout,
                            "Global request deadline exceeded",
                            self.budget.as_secs_f64(),
                        )
                    }
                };
                (client.id().to_string(), result)
            });
        }

        let mut results = BTreeMap::new();
        while let Some((id, result)) = tasks.next().await {
            debug!(service = %id, ok = result.ok, "Analyzer finished");
            results.insert(id, result);
        }

        let statuses = build_statuses(&results);
        let health_summary = build_health_summary(&results);

        if let Some(summary) = &health_summary {
            warn!(
                failed = summary.failed_count,
                total = summary.total_services,
                degraded = ?summary.degraded_services,
                "Analysis degraded"
            );
        } else {
            info!(services = results.len(), "All analyzers responded");
        }

        AnalysisRun {
            results,
            statuses,
            dimensions,
            health_summary,
        }
    }
}

/// Pick url= or file= per the input selection rule.
async fn dispatch(
    client: &AnalyzerClient,
    input: &ImageInput,
    deadline: Instant,
) -> AnalysisResult {
    match &input.local_url {
        Some(url) => client.analyze_url(url, deadline).await,
        None => client.analyze_file(&input.local_path, deadline).await,
    }
}

/// Measure image dimensions once, centrally, from the local bytes.
/// Failure is tolerated: rescaling simply becomes a no-op.
async fn measure_dimensions(path: &std::path::Path) -> Option<(u32, u32)> {
    let path = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || image::image_dimensions(&path)).await;
    match result {
        Ok(Ok(dims)) => Some(dims),
        Ok(Err(e)) => {
            warn!(error = %e, "Cannot measure image dimensions, bbox rescaling disabled");
            None
        }
        Err(e) => {
            warn!(error = %e, "Dimension measurement task failed");
            None
        }
    }
}

fn build_statuses(results: &BTreeMap<String, AnalysisResult>) -> Vec<ServiceStatus> {
    results
        .iter()
        .map(|(id, result)| {
            let status = if result.ok {
                "success".to_string()
            } else {
                result
                    .error_kind
                    .map(|k| k.status_word().to_string())
                    .unwrap_or_else(|| "error".to_string())
            };
            ServiceStatus {
                service_id: id.clone(),
                status,
                processing_time_ms: (result.processing_time_seconds * 1000.0).round() as u64,
                prediction_count: result.predictions.len(),
                error_message: result.error_message.clone(),
            }
        })
        .collect()
}

fn build_health_summary(
    results: &BTreeMap<String, AnalysisResult>,
) -> Option<ServiceHealthSummary> {
    let degraded: Vec<String> = results
        .iter()
        .filter(|(_, r)| !r.ok)
        .map(|(id, _)| id.clone())
        .collect();
    if degraded.is_empty() {
        return None;
    }
    Some(ServiceHealthSummary {
        failed_count: degraded.len(),
        total_services: results.len(),
        degraded_services: degraded,
    })
}
