//! Caption aggregation
//!
//! Each caption-producing analyzer contributes its first caption, which
//! is optionally scored against the image by the similarity analyzer.
//! Scoring is best-effort: when it fails the caption is still emitted
//! with a null score. Captions are ordered best-first: higher similarity,
//! ties broken by fewer meaningful words.

use glance_common::config::AnalyzerSpec;
use glance_common::types::{AnalysisResult, AnalyzerCategory, Prediction};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::services::analyzer_client::ImageRef;
use crate::services::similarity_client::SimilarityClient;

/// Words too common to count toward caption substance.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "on", "in", "at", "by", "to", "with", "and", "or", "is", "are",
    "was", "were", "be", "been", "it", "its", "this", "that", "there", "some", "very",
];

/// One aggregated caption.
#[derive(Debug, Clone, Serialize)]
pub struct CaptionRecord {
    pub service: String,
    pub original: String,
    /// Count of non-stopword words
    pub words: usize,
    /// Similarity of caption to image in [0,1]; null when scoring failed
    pub clip_similarity: Option<f64>,
}

/// Collect, score and order captions from the result map.
///
/// `similarity` may be absent (no scoring analyzer configured) and
/// `image` is whatever reference the analyzers themselves received.
pub async fn aggregate_captions(
    results: &BTreeMap<String, AnalysisResult>,
    roster: &[AnalyzerSpec],
    similarity: Option<&SimilarityClient>,
    image: ImageRef<'_>,
) -> Vec<CaptionRecord> {
    let mut captions = Vec::new();

    for spec in roster {
        if spec.category != AnalyzerCategory::Semantic {
            continue;
        }
        let Some(result) = results.get(&spec.id) else {
            continue;
        };
        if !result.ok {
            continue;
        }
        let Some(text) = first_caption(&result.predictions) else {
            continue;
        };

        let clip_similarity = match similarity {
            Some(client) => match client.score(image, text).await {
                Ok(score) => Some(score),
                Err(e) => {
                    warn!(service = %spec.id, error = %e, "Caption similarity scoring failed");
                    None
                }
            },
            None => None,
        };

        debug!(
            service = %spec.id,
            words = meaningful_word_count(text),
            similarity = ?clip_similarity,
            "Caption aggregated"
        );

        captions.push(CaptionRecord {
            service: spec.id.clone(),
            original: text.to_string(),
            words: meaningful_word_count(text),
            clip_similarity,
        });
    }

    // Best caption first: highest similarity, then the tighter phrasing.
    captions.sort_by(|a, b| {
        let sa = a.clip_similarity.unwrap_or(-1.0);
        let sb = b.clip_similarity.unwrap_or(-1.0);
        sb.total_cmp(&sa).then(a.words.cmp(&b.words))
    });

    captions
}

fn first_caption(predictions: &[Prediction]) -> Option<&str> {
    predictions
        .iter()
        .find(|p| p.type_tag() == "caption")
        .and_then(|p| p.common().text.as_deref())
}

/// Word count with stopwords excluded.
pub fn meaningful_word_count(caption: &str) -> usize {
    caption
        .split_whitespace()
        .filter(|w| {
            let cleaned: String = w
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            !cleaned.is_empty() && !STOPWORDS.contains(&cleaned.as_str())
        })
        .count()
}
