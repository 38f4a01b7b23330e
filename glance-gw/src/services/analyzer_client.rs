//! Single-analyzer HTTP client
//!
//! One instance per roster entry. Issues a single GET against the
//! analyzer's endpoint with either `url=` or `file=`, bounded by a
//! per-call deadline, and parses the unified response envelope. Transport
//! failures and deadline expiry are retried a small, configurable number
//! of times with a fixed backoff; an analyzer-reported error payload is
//! never retried.

use glance_common::config::{AnalyzerSpec, Settings};
use glance_common::types::{AnalysisResult, ErrorKind, Prediction};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Fixed delay between retry attempts
const RETRY_BACKOFF: Duration = Duration::from_secs(1);
/// Retries are abandoned once less than this remains before the deadline
const RETRY_HEADROOM: Duration = Duration::from_secs(1);

/// Analyzer client errors
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// Connection refused or name resolution failure
    #[error("Analyzer offline: {0}")]
    Offline(String),

    /// Per-call deadline expired or the connection was reset mid-read
    #[error("Analyzer call timed out")]
    Timeout,

    /// Response did not match the wire contract
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The analyzer reported `status == "error"`
    #[error("Analyzer error: {0}")]
    Service(String),
}

impl AnalyzerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalyzerError::Offline(_) => ErrorKind::Offline,
            AnalyzerError::Timeout => ErrorKind::Timeout,
            AnalyzerError::Protocol(_) => ErrorKind::Protocol,
            AnalyzerError::Service(_) => ErrorKind::Service,
        }
    }

    /// Only transport-level failures are worth retrying.
    fn retryable(&self) -> bool {
        matches!(self, AnalyzerError::Offline(_) | AnalyzerError::Timeout)
    }
}

/// The image handed to an analyzer: a fetchable URL or a local path.
#[derive(Debug, Clone, Copy)]
pub enum ImageRef<'a> {
    Url(&'a str),
    File(&'a Path),
}

/// Raw analyzer response envelope
#[derive(Debug, Deserialize)]
struct RawResponse {
    #[allow(dead_code)]
    service: Option<String>,
    status: String,
    #[serde(default)]
    predictions: Vec<Value>,
    #[serde(default)]
    metadata: Map<String, Value>,
    error: Option<RawError>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    #[allow(dead_code)]
    code: Option<String>,
    message: Option<String>,
}

/// HTTP client for one analyzer endpoint
#[derive(Clone)]
pub struct AnalyzerClient {
    spec: AnalyzerSpec,
    http: reqwest::Client,
    call_timeout: Duration,
    max_retries: u32,
    image_root: Option<PathBuf>,
}

impl AnalyzerClient {
    pub fn new(spec: AnalyzerSpec, http: reqwest::Client, settings: &Settings) -> Self {
        Self {
            spec,
            http,
            call_timeout: settings.analyzer_timeout(),
            max_retries: settings.max_retries,
            image_root: settings.image_root.clone(),
        }
    }

    pub fn spec(&self) -> &AnalyzerSpec {
        &self.spec
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// Analyze an image reachable over HTTP.
    pub async fn analyze_url(&self, url: &str, deadline: Instant) -> AnalysisResult {
        self.analyze(ImageRef::Url(url), deadline).await
    }

    /// Analyze a local file, substituting a pre-sized variant when the
    /// analyzer prefers one and it exists.
    pub async fn analyze_file(&self, path: &Path, deadline: Instant) -> AnalysisResult {
        let resolved = self.resolve_variant(path).await;
        self.analyze(ImageRef::File(&resolved), deadline).await
    }

    /// Run the call with retries, classifying the outcome.
    pub async fn analyze(&self, image: ImageRef<'_>, deadline: Instant) -> AnalysisResult {
        let started = Instant::now();
        let mut last_error = AnalyzerError::Timeout;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Backoff, but never sleep into (or past) the deadline.
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining <= RETRY_BACKOFF + RETRY_HEADROOM {
                    debug!(service = %self.spec.id, "Deadline too close, abandoning retries");
                    break;
                }
                tokio::time::sleep(RETRY_BACKOFF).await;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                last_error = AnalyzerError::Timeout;
                break;
            }
            let per_call = self.call_timeout.min(remaining);

            match self.attempt(image, per_call).await {
                Ok(raw) => return self.finish(raw, started),
                Err(e) if e.retryable() && attempt < self.max_retries => {
                    warn!(
                        service = %self.spec.id,
                        attempt = attempt + 1,
                        error = %e,
                        "Analyzer call failed, will retry"
                    );
                    last_error = e;
                }
                Err(e) => {
                    last_error = e;
                    break;
                }
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        debug!(
            service = %self.spec.id,
            error = %last_error,
            elapsed_seconds = elapsed,
            "Analyzer call failed"
        );
        AnalysisResult::failure(last_error.kind(), last_error.to_string(), elapsed)
    }

    /// One GET against the analyzer, bounded by `per_call`.
    async fn attempt(
        &self,
        image: ImageRef<'_>,
        per_call: Duration,
    ) -> Result<RawResponse, AnalyzerError> {
        let mut request = self
            .http
            .get(self.spec.analyze_url())
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(per_call);

        request = match image {
            ImageRef::Url(url) => request.query(&[("url", url)]),
            ImageRef::File(path) => request.query(&[("file", &path.to_string_lossy())]),
        };

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            return Err(AnalyzerError::Protocol(format!(
                "HTTP {} from {}",
                status.as_u16(),
                self.spec.id
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| AnalyzerError::Protocol(format!("Malformed response: {}", e)))
    }

    /// Turn a parsed envelope into an `AnalysisResult`.
    fn finish(&self, raw: RawResponse, started: Instant) -> AnalysisResult {
        let elapsed = started.elapsed().as_secs_f64();

        if raw.status != "success" {
            let message = raw
                .error
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("status {:?}", raw.status));
            return AnalysisResult::failure(ErrorKind::Service, message, elapsed);
        }

        // Parse predictions one by one so a single unknown tag doesn't
        // poison the whole result.
        let mut predictions = Vec::with_capacity(raw.predictions.len());
        for value in raw.predictions {
            match serde_json::from_value::<Prediction>(value) {
                Ok(p) => predictions.push(p),
                Err(e) => warn!(
                    service = %self.spec.id,
                    error = %e,
                    "Dropping prediction with unknown or malformed type"
                ),
            }
        }

        debug!(
            service = %self.spec.id,
            predictions = predictions.len(),
            elapsed_seconds = elapsed,
            "Analyzer call complete"
        );
        AnalysisResult::success(predictions, elapsed, raw.metadata)
    }

    /// Resolve the path actually sent to the analyzer.
    ///
    /// Analyzers with a preferred size get
    /// `<root>/variants/<size>/<stem>.jpg` when such a file exists. The
    /// lookup is read-only; absence just means the original is used.
    async fn resolve_variant(&self, original: &Path) -> PathBuf {
        if !self.spec.wants_variant() {
            return original.to_path_buf();
        }

        let root = self
            .image_root
            .clone()
            .or_else(|| original.parent().map(Path::to_path_buf));
        let (Some(root), Some(stem)) = (root, original.file_stem()) else {
            return original.to_path_buf();
        };

        let candidate = root
            .join("variants")
            .join(&self.spec.optimal_size)
            .join(format!("{}.jpg", stem.to_string_lossy()));

        match tokio::fs::try_exists(&candidate).await {
            Ok(true) => {
                debug!(
                    service = %self.spec.id,
                    variant = %candidate.display(),
                    "Using pre-sized variant"
                );
                candidate
            }
            _ => original.to_path_buf(),
        }
    }
}

/// Map a reqwest failure onto the analyzer error taxonomy.
fn classify_transport(e: reqwest::Error) -> AnalyzerError {
    if e.is_timeout() {
        AnalyzerError::Timeout
    } else if e.is_connect() {
        AnalyzerError::Offline(e.to_string())
    } else if e.is_request() || e.is_body() {
        // Reset mid-transfer behaves like a timeout for the caller
        AnalyzerError::Timeout
    } else {
        AnalyzerError::Protocol(e.to_string())
    }
}
