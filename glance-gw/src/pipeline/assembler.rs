//! Response assembly
//!
//! Merges the voting outcome, clustered instances, captions and
//! per-service statuses into the single document returned to callers.
//! The top-level `success` flag is the fail-fast signal: it goes false
//! whenever any analyzer degraded, without discarding the partial data.

use glance_common::types::{Prediction, ServiceHealthSummary};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::pipeline::captions::CaptionRecord;
use crate::pipeline::voting::{SpecialDetections, VotingOutcome};
use crate::services::orchestrator::{AnalysisRun, ImageInput, ProcessingMethod};

#[derive(Debug, Clone, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Where the image came from and what we know about it.
#[derive(Debug, Clone, Serialize)]
pub struct ImageData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
    pub processing_method: ProcessingMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
}

/// Compact per-service result retained in the response.
#[derive(Debug, Clone, Serialize)]
pub struct CompactResult {
    pub ok: bool,
    pub status: String,
    pub predictions: Vec<Prediction>,
    pub processing_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VotesBlock {
    pub consensus: Vec<crate::pipeline::voting::ConsensusItem>,
    pub total_services_responding: usize,
}

/// The complete analysis response document.
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub image_id: Uuid,
    pub analysis_time_seconds: f64,
    pub image_data: ImageData,
    pub votes: VotesBlock,
    pub special: SpecialDetections,
    pub captions: Vec<CaptionRecord>,
    /// Per-service compact results, keyed (and therefore sorted) by id
    pub results: BTreeMap<String, CompactResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_health_summary: Option<ServiceHealthSummary>,
}

/// Merge one request's worth of outputs into the response document.
pub fn assemble(
    run: &AnalysisRun,
    voting: VotingOutcome,
    captions: Vec<CaptionRecord>,
    input: &ImageInput,
    analysis_time_seconds: f64,
) -> AnalyzeResponse {
    let status_by_id: BTreeMap<&str, &str> = run
        .statuses
        .iter()
        .map(|s| (s.service_id.as_str(), s.status.as_str()))
        .collect();

    let results: BTreeMap<String, CompactResult> = run
        .results
        .iter()
        .map(|(id, result)| {
            (
                id.clone(),
                CompactResult {
                    ok: result.ok,
                    status: status_by_id
                        .get(id.as_str())
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "error".to_string()),
                    predictions: result.predictions.clone(),
                    processing_time: result.processing_time_seconds,
                    error_message: result.error_message.clone(),
                },
            )
        })
        .collect();

    let responding = run.results.values().filter(|r| r.ok).count();

    AnalyzeResponse {
        success: run.all_successful(),
        image_id: Uuid::new_v4(),
        analysis_time_seconds,
        image_data: ImageData {
            dimensions: run.dimensions.map(|(width, height)| Dimensions {
                width,
                height,
            }),
            processing_method: input.method,
            image_url: input.local_url.clone(),
            file_path: Some(input.local_path.display().to_string()),
            original_url: input.original_url.clone(),
        },
        votes: VotesBlock {
            consensus: voting.consensus,
            total_services_responding: responding,
        },
        special: voting.special,
        captions,
        results,
        service_health_summary: run.health_summary.clone(),
    }
}
