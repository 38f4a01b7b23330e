//! Caption→image similarity scoring client
//!
//! Delegates similarity scoring to the CLIP analyzer's `/v3/score`
//! endpoint. Scoring is best-effort enrichment: a failure here never
//! fails the caption, it just leaves the score empty.

use glance_common::config::Config;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::services::analyzer_client::{AnalyzerError, ImageRef};

const SCORE_PATH: &str = "/v3/score";

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    status: String,
    similarity_score: Option<f64>,
}

/// Client for the similarity-scoring endpoint
#[derive(Clone)]
pub struct SimilarityClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl SimilarityClient {
    /// Build from the roster's `clip` entry, when one is configured.
    pub fn from_config(config: &Config, http: reqwest::Client) -> Option<Self> {
        let clip = config.analyzer("clip")?;
        Some(Self {
            http,
            base_url: clip.base_url(),
            timeout: config.settings.analyzer_timeout(),
        })
    }

    pub fn new(base_url: String, http: reqwest::Client, timeout: Duration) -> Self {
        Self {
            http,
            base_url,
            timeout,
        }
    }

    /// Score how well `caption` describes the image, in [0,1].
    pub async fn score(
        &self,
        image: ImageRef<'_>,
        caption: &str,
    ) -> Result<f64, AnalyzerError> {
        let mut request = self
            .http
            .get(format!("{}{}", self.base_url, SCORE_PATH))
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timeout)
            .query(&[("caption", caption)]);

        request = match image {
            ImageRef::Url(url) => request.query(&[("url", url)]),
            ImageRef::File(path) => request.query(&[("file", &path.to_string_lossy())]),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AnalyzerError::Timeout
            } else if e.is_connect() {
                AnalyzerError::Offline(e.to_string())
            } else {
                AnalyzerError::Protocol(e.to_string())
            }
        })?;

        let parsed: ScoreResponse = response
            .json()
            .await
            .map_err(|e| AnalyzerError::Protocol(format!("Malformed score response: {}", e)))?;

        if parsed.status != "success" {
            warn!(status = %parsed.status, "Similarity scoring reported failure");
            return Err(AnalyzerError::Service(format!(
                "status {:?}",
                parsed.status
            )));
        }

        let score = parsed
            .similarity_score
            .ok_or_else(|| AnalyzerError::Protocol("Missing similarity_score".to_string()))?
            .clamp(0.0, 1.0);

        debug!(caption_len = caption.len(), score, "Caption scored");
        Ok(score)
    }
}
