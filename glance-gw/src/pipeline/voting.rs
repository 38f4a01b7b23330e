//! Emoji consensus voting engine
//!
//! Every analyzer gets one democratic vote per emoji it mentions; the
//! clustering engine's instances fold in as spatial corroboration without
//! voting themselves. Groups are ranked by votes, then by an evidence
//! weight that rewards multiple detectors agreeing on one physical
//! location and multiple caption sources agreeing on one concept.
//! Curation rules then validate or penalize specific emojis using
//! cross-emoji evidence, and face/NSFW/text findings are reported
//! out-of-competition as special detections.

use glance_common::config::AnalyzerSpec;
use glance_common::emoji;
use glance_common::types::{AnalysisResult, AnalyzerCategory, BoundingBox};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::pipeline::clustering::SpatialIndex;

/// Confidence assigned to votes that carry none of their own
pub const DEFAULT_CONFIDENCE: f64 = 0.75;

/// Service name under which clustering instances enter the vote stream.
/// Sentinels contribute evidence, never votes.
pub const SENTINEL_SERVICE: &str = "spatial_clustering";

/// An emoji needs this many distinct voting services to be emitted.
pub const MIN_VOTES: usize = 2;

/// Category of signal backing a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    Spatial,
    Semantic,
    Specialized,
    Classification,
    Other,
}

fn evidence_for(category: AnalyzerCategory) -> EvidenceType {
    match category {
        AnalyzerCategory::Spatial => EvidenceType::Spatial,
        AnalyzerCategory::Semantic => EvidenceType::Semantic,
        AnalyzerCategory::Specialized => EvidenceType::Specialized,
        AnalyzerCategory::Classification => EvidenceType::Classification,
        AnalyzerCategory::Other => EvidenceType::Other,
    }
}

/// Cluster summary carried by a sentinel vote.
#[derive(Debug, Clone, Serialize)]
pub struct SpatialVoteData {
    pub cluster_id: String,
    pub detection_count: usize,
    pub avg_confidence: f64,
    pub merged_bbox: BoundingBox,
}

/// One vote in the stream, before grouping.
#[derive(Debug, Clone)]
struct Vote {
    service: String,
    emoji: String,
    evidence: EvidenceType,
    confidence: f64,
    word: Option<String>,
    shiny: bool,
    spatial: Option<SpatialVoteData>,
    specialized_props: Option<Map<String, Value>>,
}

impl Vote {
    fn is_sentinel(&self) -> bool {
        self.service == SENTINEL_SERVICE
    }
}

/// Spatial evidence summary for one emoji.
#[derive(Debug, Clone, Serialize)]
pub struct SpatialEvidence {
    pub service_count: usize,
    pub max_detection_count: usize,
    pub avg_confidence: f64,
    pub total_instances: usize,
}

/// Semantic (caption) evidence summary for one emoji.
#[derive(Debug, Clone, Serialize)]
pub struct SemanticEvidence {
    pub service_count: usize,
    pub words: Vec<String>,
    pub sources: Vec<String>,
}

/// Classification evidence summary. No analyzer ships in this category;
/// the path activates when one is configured into the roster.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationEvidence {
    pub service_count: usize,
    pub sources: Vec<String>,
}

/// All evidence backing one emoji.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Evidence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spatial: Option<SpatialEvidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic: Option<SemanticEvidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationEvidence>,
    /// Specialized service id → properties of its contributing detections
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub specialized: BTreeMap<String, Vec<Map<String, Value>>>,
}

/// One emoji's full voting state, pre-emission.
#[derive(Debug)]
struct EmojiGroup {
    emoji: String,
    voting_services: Vec<String>,
    total_votes: usize,
    evidence: Evidence,
    evidence_weight: f64,
    final_score: f64,
    validation: Vec<String>,
    shiny: bool,
    bounding_boxes: Vec<SpatialVoteData>,
}

/// Instance roll-up attached to every consensus entry.
#[derive(Debug, Clone, Serialize)]
pub struct InstancesSummary {
    pub count: usize,
    pub total_detections: usize,
    pub max_detection_count: usize,
}

/// Final ranked entry for one emoji.
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusItem {
    pub emoji: String,
    pub votes: usize,
    /// Rounded to 2 decimals
    pub evidence_weight: f64,
    /// Rounded to 2 decimals
    pub final_score: f64,
    pub instances_summary: InstancesSummary,
    pub services: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_boxes: Option<Vec<SpatialVoteData>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validation: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub shiny: bool,
}

/// Out-of-competition sidecar for one specialized signal.
#[derive(Debug, Clone, Serialize)]
pub struct SpecialDetection {
    pub detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pose: Option<String>,
}

impl SpecialDetection {
    fn absent() -> Self {
        Self {
            detected: false,
            emoji: None,
            confidence: None,
            content: None,
            pose: None,
        }
    }
}

/// The three specialized sidecars.
#[derive(Debug, Clone, Serialize)]
pub struct SpecialDetections {
    pub text: SpecialDetection,
    pub face: SpecialDetection,
    pub nsfw: SpecialDetection,
}

/// Counters exposed for debugging and tests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VotingDebug {
    pub total_groups: usize,
    pub emitted: usize,
    pub suppressed_single_votes: usize,
}

/// Complete output of the voting engine.
#[derive(Debug)]
pub struct VotingOutcome {
    pub consensus: Vec<ConsensusItem>,
    pub special: SpecialDetections,
    pub debug: VotingDebug,
}

/// Run the voting engine over the raw result map and the clustering
/// engine's instances.
pub fn run_voting(
    results: &BTreeMap<String, AnalysisResult>,
    roster: &[AnalyzerSpec],
    index: &SpatialIndex,
) -> VotingOutcome {
    let votes = extract_votes(results, roster, index);
    let mut groups = group_votes(votes);
    curate(&mut groups);

    let total_groups = groups.len();
    let suppressed = groups
        .iter()
        .filter(|g| g.total_votes < MIN_VOTES)
        .count();

    // Democratic floor, then ranked emission.
    groups.retain(|g| g.total_votes >= MIN_VOTES);
    groups.sort_by(|a, b| {
        b.total_votes
            .cmp(&a.total_votes)
            .then(b.evidence_weight.total_cmp(&a.evidence_weight))
    });

    let consensus: Vec<ConsensusItem> = groups.into_iter().map(emit).collect();
    let emitted = consensus.len();

    debug!(
        groups = total_groups,
        emitted,
        suppressed_single_votes = suppressed,
        "Voting complete"
    );

    VotingOutcome {
        consensus,
        special: special_detections(results, roster),
        debug: VotingDebug {
            total_groups,
            emitted,
            suppressed_single_votes: suppressed,
        },
    }
}

/// Walk analyzers in roster order and emit the vote stream, then fold in
/// one sentinel per clustered instance.
fn extract_votes(
    results: &BTreeMap<String, AnalysisResult>,
    roster: &[AnalyzerSpec],
    index: &SpatialIndex,
) -> Vec<Vote> {
    let mut votes = Vec::new();

    for spec in roster {
        let Some(result) = results.get(&spec.id) else {
            continue;
        };
        if !result.ok {
            continue;
        }

        // One vote per emoji per analyzer.
        let mut seen: HashSet<String> = HashSet::new();

        for prediction in &result.predictions {
            let mappings = prediction.emoji_mappings();
            if !mappings.is_empty() {
                for mapping in mappings {
                    let key = emoji::normalize(&mapping.emoji);
                    if !seen.insert(key.clone()) {
                        continue;
                    }
                    votes.push(Vote {
                        service: spec.id.clone(),
                        emoji: key,
                        evidence: EvidenceType::Semantic,
                        confidence: DEFAULT_CONFIDENCE,
                        word: Some(mapping.word.clone()),
                        shiny: mapping.shiny,
                        spatial: None,
                        specialized_props: None,
                    });
                }
                continue;
            }

            // Color palette emojis describe hue, not content.
            if prediction.type_tag() == "color_analysis" {
                continue;
            }
            let common = prediction.common();
            let Some(raw) = &common.emoji else {
                continue;
            };
            let key = emoji::normalize(raw);
            if !seen.insert(key.clone()) {
                continue;
            }

            let evidence = evidence_for(spec.category);
            votes.push(Vote {
                service: spec.id.clone(),
                emoji: key,
                evidence,
                confidence: common.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                word: None,
                shiny: false,
                spatial: None,
                specialized_props: (evidence == EvidenceType::Specialized)
                    .then(|| common.properties.clone()),
            });
        }
    }

    for group in index.groups.values() {
        for instance in &group.instances {
            votes.push(Vote {
                service: SENTINEL_SERVICE.to_string(),
                emoji: instance.emoji.clone(),
                evidence: EvidenceType::Spatial,
                confidence: instance.avg_confidence,
                word: None,
                shiny: false,
                spatial: Some(SpatialVoteData {
                    cluster_id: instance.cluster_id.clone(),
                    detection_count: instance.detection_count,
                    avg_confidence: instance.avg_confidence,
                    merged_bbox: instance.merged_bbox,
                }),
                specialized_props: None,
            });
        }
    }

    votes
}

/// Group the vote stream by emoji (first-seen order) and compute each
/// group's evidence summary and pre-curation scores.
fn group_votes(votes: Vec<Vote>) -> Vec<EmojiGroup> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: BTreeMap<String, Vec<Vote>> = BTreeMap::new();
    for vote in votes {
        if !buckets.contains_key(&vote.emoji) {
            order.push(vote.emoji.clone());
        }
        buckets.entry(vote.emoji.clone()).or_default().push(vote);
    }

    order
        .into_iter()
        .map(|emoji| {
            let votes = buckets.remove(&emoji).unwrap_or_default();
            build_group(emoji, votes)
        })
        .collect()
}

fn build_group(emoji: String, votes: Vec<Vote>) -> EmojiGroup {
    let mut voting_services: Vec<String> = Vec::new();
    for v in &votes {
        if !v.is_sentinel() && !voting_services.contains(&v.service) {
            voting_services.push(v.service.clone());
        }
    }
    let total_votes = voting_services.len();

    let spatial_votes: Vec<&Vote> = votes
        .iter()
        .filter(|v| v.evidence == EvidenceType::Spatial)
        .collect();
    let spatial = if spatial_votes.is_empty() {
        None
    } else {
        let sentinels: Vec<&&Vote> = spatial_votes.iter().filter(|v| v.is_sentinel()).collect();
        let max_detection_count = sentinels
            .iter()
            .filter_map(|v| v.spatial.as_ref())
            .map(|s| s.detection_count)
            .max()
            .unwrap_or(1);
        let avg_confidence = spatial_votes.iter().map(|v| v.confidence).sum::<f64>()
            / spatial_votes.len() as f64;
        Some(SpatialEvidence {
            service_count: spatial_votes
                .iter()
                .filter(|v| !v.is_sentinel())
                .map(|v| v.service.as_str())
                .collect::<HashSet<_>>()
                .len(),
            max_detection_count,
            avg_confidence: round3(avg_confidence),
            total_instances: sentinels.len(),
        })
    };

    let semantic_votes: Vec<&Vote> = votes
        .iter()
        .filter(|v| v.evidence == EvidenceType::Semantic)
        .collect();
    let semantic = if semantic_votes.is_empty() {
        None
    } else {
        Some(SemanticEvidence {
            service_count: semantic_votes
                .iter()
                .map(|v| v.service.as_str())
                .collect::<HashSet<_>>()
                .len(),
            words: semantic_votes
                .iter()
                .filter_map(|v| v.word.clone())
                .collect(),
            sources: dedup_preserving_order(
                semantic_votes.iter().map(|v| v.service.clone()),
            ),
        })
    };

    let classification_votes: Vec<&Vote> = votes
        .iter()
        .filter(|v| v.evidence == EvidenceType::Classification)
        .collect();
    let classification = if classification_votes.is_empty() {
        None
    } else {
        Some(ClassificationEvidence {
            service_count: classification_votes
                .iter()
                .map(|v| v.service.as_str())
                .collect::<HashSet<_>>()
                .len(),
            sources: dedup_preserving_order(
                classification_votes.iter().map(|v| v.service.clone()),
            ),
        })
    };

    let mut specialized: BTreeMap<String, Vec<Map<String, Value>>> = BTreeMap::new();
    for v in &votes {
        if v.evidence == EvidenceType::Specialized {
            specialized
                .entry(v.service.clone())
                .or_default()
                .push(v.specialized_props.clone().unwrap_or_default());
        }
    }

    // Evidence weight: democratic votes plus consensus bonuses. Extra
    // detectors agreeing on the same physical location add one each;
    // agreeing content sources add one per extra source.
    let spatial_bonus = spatial
        .as_ref()
        .map(|s| s.max_detection_count.saturating_sub(1) as f64)
        .unwrap_or(0.0);
    let content_sources = semantic.as_ref().map(|s| s.service_count).unwrap_or(0)
        + classification
            .as_ref()
            .map(|c| c.service_count)
            .unwrap_or(0);
    let content_bonus = if content_sources >= 2 {
        (content_sources - 1) as f64
    } else {
        0.0
    };

    let evidence_weight = total_votes as f64 + spatial_bonus + content_bonus;
    let final_score = total_votes as f64 + evidence_weight;

    let bounding_boxes: Vec<SpatialVoteData> = votes
        .iter()
        .filter_map(|v| v.spatial.clone())
        .collect();
    let shiny = votes.iter().any(|v| v.shiny);

    EmojiGroup {
        emoji,
        voting_services,
        total_votes,
        evidence: Evidence {
            spatial,
            semantic,
            classification,
            specialized,
        },
        evidence_weight,
        final_score,
        validation: Vec::new(),
        shiny,
        bounding_boxes,
    }
}

/// Cross-emoji curation: validate or penalize specific emojis using
/// evidence from the whole group set.
fn curate(groups: &mut [EmojiGroup]) {
    let person_present = groups.iter().any(|g| g.emoji == emoji::PERSON);
    let face_present = groups.iter().any(|g| g.emoji == emoji::FACE);
    let pose_present = groups.iter().any(|g| {
        g.evidence.specialized.values().flatten().any(|props| {
            props
                .get("pose")
                .map(|p| !p.is_null() && p.as_str() != Some(""))
                .unwrap_or(false)
        })
    });

    for group in groups.iter_mut() {
        if group.emoji == emoji::PERSON {
            if face_present {
                group.evidence_weight += 1.0;
                group.final_score += 1.0;
                group.validation.push("face_confirmed".to_string());
            }
            if pose_present {
                group.evidence_weight += 1.0;
                group.final_score += 1.0;
                group.validation.push("pose_confirmed".to_string());
            }
        }

        if group.emoji == emoji::NSFW {
            if person_present {
                group.evidence_weight += 1.0;
                group.final_score += 1.0;
                group.validation.push("human_context_confirmed".to_string());
            } else {
                group.evidence_weight -= 1.0;
                group.final_score -= 1.0;
                group.validation.push("suspicious_no_humans".to_string());
                group.evidence_weight = group.evidence_weight.max(0.0);
                group.final_score = group.final_score.max(0.0);
            }
        }
    }
}

fn emit(group: EmojiGroup) -> ConsensusItem {
    let instances_summary = InstancesSummary {
        count: group.bounding_boxes.len(),
        total_detections: group
            .bounding_boxes
            .iter()
            .map(|b| b.detection_count)
            .sum(),
        max_detection_count: group
            .bounding_boxes
            .iter()
            .map(|b| b.detection_count)
            .max()
            .unwrap_or(0),
    };

    ConsensusItem {
        emoji: group.emoji,
        votes: group.total_votes,
        evidence_weight: round2(group.evidence_weight),
        final_score: round2(group.final_score),
        instances_summary,
        services: group.voting_services,
        bounding_boxes: if group.evidence.spatial.is_some() && !group.bounding_boxes.is_empty()
        {
            Some(group.bounding_boxes)
        } else {
            None
        },
        validation: group.validation,
        shiny: group.shiny,
    }
}

/// Out-of-competition sidecars, independent of voting.
fn special_detections(
    results: &BTreeMap<String, AnalysisResult>,
    roster: &[AnalyzerSpec],
) -> SpecialDetections {
    let mut text = SpecialDetection::absent();
    let mut face = SpecialDetection::absent();
    let mut nsfw = SpecialDetection::absent();

    for spec in roster {
        if spec.category != AnalyzerCategory::Specialized {
            continue;
        }
        let Some(result) = results.get(&spec.id) else {
            continue;
        };

        for prediction in &result.predictions {
            let common = prediction.common();
            match prediction.type_tag() {
                "text_extraction" if !text.detected => {
                    let has_text = common
                        .properties
                        .get("has_text")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    if has_text {
                        text = SpecialDetection {
                            detected: true,
                            emoji: Some(emoji::TEXT.to_string()),
                            confidence: common.confidence,
                            content: common.text.clone(),
                            pose: None,
                        };
                    }
                }
                "face_detection" if !face.detected => {
                    let carries_face = common
                        .emoji
                        .as_deref()
                        .map(|e| emoji::same(e, emoji::FACE))
                        .unwrap_or(false);
                    if carries_face {
                        face = SpecialDetection {
                            detected: true,
                            emoji: Some(emoji::FACE.to_string()),
                            confidence: common.confidence,
                            content: None,
                            pose: common
                                .properties
                                .get("pose")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                        };
                    }
                }
                "content_moderation" if !nsfw.detected => {
                    let carries_nsfw = common
                        .emoji
                        .as_deref()
                        .map(|e| emoji::same(e, emoji::NSFW))
                        .unwrap_or(false);
                    if carries_nsfw {
                        nsfw = SpecialDetection {
                            detected: true,
                            emoji: Some(emoji::NSFW.to_string()),
                            confidence: common.confidence,
                            content: None,
                            pose: None,
                        };
                    }
                }
                _ => {}
            }
        }
    }

    SpecialDetections { text, face, nsfw }
}

fn dedup_preserving_order(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::clustering::cluster_detections;
    use glance_common::config::Config;
    use glance_common::types::Prediction;
    use serde_json::json;

    const CAT: &str = "\u{1F63A}";

    fn ok(preds: Vec<Prediction>) -> AnalysisResult {
        AnalysisResult::success(preds, 0.1, Map::new())
    }

    fn detection(label: &str, emoji: &str, confidence: f64, bbox: (i32, i32, i32, i32)) -> Prediction {
        serde_json::from_value(json!({
            "type": "object_detection",
            "label": label,
            "emoji": emoji,
            "confidence": confidence,
            "bbox": {"x": bbox.0, "y": bbox.1, "width": bbox.2, "height": bbox.3}
        }))
        .unwrap()
    }

    fn caption_with_mappings(text: &str, mappings: Vec<(&str, &str)>) -> Prediction {
        let mapped: Vec<Value> = mappings
            .into_iter()
            .map(|(word, emoji)| json!({"word": word, "emoji": emoji}))
            .collect();
        serde_json::from_value(json!({
            "type": "caption",
            "text": text,
            "confidence": 0.8,
            "emoji_mappings": mapped
        }))
        .unwrap()
    }

    fn classification(emoji: &str, confidence: f64) -> Prediction {
        serde_json::from_value(json!({
            "type": "classification",
            "label": "thing",
            "emoji": emoji,
            "confidence": confidence
        }))
        .unwrap()
    }

    fn run(results: Vec<(&str, AnalysisResult)>) -> VotingOutcome {
        let map: BTreeMap<String, AnalysisResult> = results
            .into_iter()
            .map(|(id, r)| (id.to_string(), r))
            .collect();
        let roster = Config::default_roster();
        let index = cluster_detections(&map, &roster, Some((640, 480)));
        run_voting(&map, &roster, &index)
    }

    #[test]
    fn test_two_detectors_plus_caption_three_votes() {
        let outcome = run(vec![
            ("yolo", ok(vec![detection("cat", CAT, 0.9, (0, 0, 100, 100))])),
            (
                "detectron2",
                ok(vec![detection("cat", CAT, 0.9, (0, 0, 100, 100))]),
            ),
            (
                "blip",
                ok(vec![caption_with_mappings("a cat", vec![("cat", CAT)])]),
            ),
        ]);

        assert_eq!(outcome.consensus.len(), 1);
        let item = &outcome.consensus[0];
        assert_eq!(item.emoji, CAT);
        assert_eq!(item.votes, 3);
        assert_eq!(item.services, vec!["yolo", "detectron2", "blip"]);
        // one instance from two agreeing detections
        assert_eq!(item.instances_summary.count, 1);
        assert_eq!(item.instances_summary.max_detection_count, 2);
        let boxes = item.bounding_boxes.as_ref().unwrap();
        assert_eq!(boxes[0].cluster_id, "cat_1");
        assert_eq!(boxes[0].merged_bbox, BoundingBox::new(0, 0, 100, 100));
        // weight = 3 votes + 1 spatial consensus bonus
        assert_eq!(item.evidence_weight, 4.0);
        assert_eq!(item.final_score, 7.0);
    }

    #[test]
    fn test_single_vote_never_emitted() {
        let outcome = run(vec![(
            "yolo",
            ok(vec![detection("cat", CAT, 0.95, (0, 0, 100, 100))]),
        )]);

        assert!(outcome.consensus.is_empty());
        assert_eq!(outcome.debug.suppressed_single_votes, 1);
    }

    #[test]
    fn test_two_votes_emitted() {
        let outcome = run(vec![
            ("yolo", ok(vec![detection("cat", CAT, 0.9, (0, 0, 100, 100))])),
            ("inception", ok(vec![classification(CAT, 0.8)])),
        ]);

        assert_eq!(outcome.consensus.len(), 1);
        assert_eq!(outcome.consensus[0].votes, 2);
    }

    #[test]
    fn test_sentinel_does_not_vote() {
        // Two detectors agree spatially; the sentinel adds evidence but
        // the vote count stays at the two real services.
        let outcome = run(vec![
            ("yolo", ok(vec![detection("cat", CAT, 0.9, (0, 0, 100, 100))])),
            (
                "detectron2",
                ok(vec![detection("cat", CAT, 0.9, (0, 0, 100, 100))]),
            ),
        ]);

        let item = &outcome.consensus[0];
        assert_eq!(item.votes, 2);
        assert!(!item.services.iter().any(|s| s == SENTINEL_SERVICE));
    }

    #[test]
    fn test_duplicate_emoji_within_analyzer_suppressed() {
        let outcome = run(vec![
            (
                "yolo",
                ok(vec![
                    detection("cat", CAT, 0.9, (0, 0, 100, 100)),
                    detection("cat", CAT, 0.8, (200, 200, 80, 80)),
                ]),
            ),
            ("inception", ok(vec![classification(CAT, 0.8)])),
        ]);

        assert_eq!(outcome.consensus[0].votes, 2);
    }

    #[test]
    fn test_content_consensus_bonus() {
        // Two semantic sources agreeing: bonus = (2 - 1) = 1.
        let outcome = run(vec![
            (
                "blip",
                ok(vec![caption_with_mappings("a cat", vec![("cat", CAT)])]),
            ),
            (
                "ollama",
                ok(vec![caption_with_mappings("feline", vec![("feline", CAT)])]),
            ),
        ]);

        let item = &outcome.consensus[0];
        assert_eq!(item.votes, 2);
        assert_eq!(item.evidence_weight, 3.0);
        assert_eq!(item.final_score, 5.0);
    }

    #[test]
    fn test_shiny_propagates() {
        let shiny_caption: Prediction = serde_json::from_value(json!({
            "type": "caption",
            "text": "sparkly cat",
            "emoji_mappings": [{"word": "cat", "emoji": CAT, "shiny": true}]
        }))
        .unwrap();

        let outcome = run(vec![
            ("blip", ok(vec![shiny_caption])),
            ("yolo", ok(vec![detection("cat", CAT, 0.9, (0, 0, 50, 50))])),
        ]);

        assert!(outcome.consensus[0].shiny);
    }

    #[test]
    fn test_nsfw_without_person_penalized_and_clamped() {
        let nsfw_pred: Prediction = serde_json::from_value(json!({
            "type": "content_moderation",
            "emoji": emoji::NSFW,
            "confidence": 0.9
        }))
        .unwrap();
        let nsfw_class = classification(emoji::NSFW, 0.7);

        let outcome = run(vec![
            ("nsfw", ok(vec![nsfw_pred])),
            ("inception", ok(vec![nsfw_class])),
        ]);

        // special sidecar fires regardless of voting
        assert!(outcome.special.nsfw.detected);
        assert_eq!(outcome.special.nsfw.confidence, Some(0.9));

        let item = &outcome.consensus[0];
        assert_eq!(item.votes, 2);
        assert_eq!(item.validation, vec!["suspicious_no_humans"]);
        // 2 votes + 0 bonus - 1 penalty = 1; still >= 0
        assert_eq!(item.evidence_weight, 1.0);
        assert!(item.evidence_weight >= 0.0 && item.final_score >= 0.0);
    }

    #[test]
    fn test_nsfw_single_vote_absent_from_consensus_but_special() {
        let nsfw_pred: Prediction = serde_json::from_value(json!({
            "type": "content_moderation",
            "emoji": emoji::NSFW,
            "confidence": 0.9
        }))
        .unwrap();

        let outcome = run(vec![("nsfw", ok(vec![nsfw_pred]))]);
        assert!(outcome.consensus.is_empty());
        assert!(outcome.special.nsfw.detected);
    }

    #[test]
    fn test_nsfw_with_person_confirmed() {
        let nsfw_pred: Prediction = serde_json::from_value(json!({
            "type": "content_moderation",
            "emoji": emoji::NSFW,
            "confidence": 0.9
        }))
        .unwrap();

        let outcome = run(vec![
            ("nsfw", ok(vec![nsfw_pred])),
            ("inception", ok(vec![classification(emoji::NSFW, 0.7)])),
            ("yolo", ok(vec![detection("person", emoji::PERSON, 0.9, (0, 0, 50, 150))])),
            ("detectron2", ok(vec![detection("person", emoji::PERSON, 0.9, (0, 0, 52, 148))])),
        ]);

        let nsfw_item = outcome
            .consensus
            .iter()
            .find(|c| c.emoji == emoji::NSFW)
            .unwrap();
        assert_eq!(nsfw_item.validation, vec!["human_context_confirmed"]);
        // 2 votes + 1 confirmation
        assert_eq!(nsfw_item.evidence_weight, 3.0);
    }

    #[test]
    fn test_person_confirmed_by_face_and_pose() {
        let face_pred: Prediction = serde_json::from_value(json!({
            "type": "face_detection",
            "emoji": emoji::FACE,
            "confidence": 0.96,
            "bbox": {"x": 10, "y": 10, "width": 40, "height": 40},
            "properties": {"pose": "standing"}
        }))
        .unwrap();

        let outcome = run(vec![
            ("yolo", ok(vec![detection("person", emoji::PERSON, 0.9, (0, 0, 60, 160))])),
            ("detectron2", ok(vec![detection("person", emoji::PERSON, 0.88, (2, 0, 58, 158))])),
            ("face", ok(vec![face_pred.clone()])),
            ("nsfw", ok(vec![face_pred])), // second face vote so 🙂 passes the floor
        ]);

        let person = outcome
            .consensus
            .iter()
            .find(|c| c.emoji == emoji::PERSON)
            .unwrap();
        assert!(person.validation.contains(&"face_confirmed".to_string()));
        assert!(person.validation.contains(&"pose_confirmed".to_string()));
        assert!(outcome.special.face.detected);
        assert_eq!(outcome.special.face.pose.as_deref(), Some("standing"));
    }

    #[test]
    fn test_text_special_requires_has_text() {
        let with_text: Prediction = serde_json::from_value(json!({
            "type": "text_extraction",
            "text": "STOP",
            "confidence": 0.88,
            "properties": {"has_text": true}
        }))
        .unwrap();
        let without: Prediction = serde_json::from_value(json!({
            "type": "text_extraction",
            "properties": {"has_text": false}
        }))
        .unwrap();

        let outcome = run(vec![("ocr", ok(vec![without, with_text]))]);
        assert!(outcome.special.text.detected);
        assert_eq!(outcome.special.text.content.as_deref(), Some("STOP"));

        let outcome = run(vec![]);
        assert!(!outcome.special.text.detected);
        assert!(!outcome.special.face.detected);
        assert!(!outcome.special.nsfw.detected);
    }

    #[test]
    fn test_empty_results_empty_consensus() {
        let outcome = run(vec![]);
        assert!(outcome.consensus.is_empty());
        assert_eq!(outcome.debug.total_groups, 0);
    }

    #[test]
    fn test_ranking_votes_then_weight() {
        const DOG: &str = "\u{1F436}";
        // CAT: 3 votes. DOG: 2 votes but strong spatial consensus.
        let outcome = run(vec![
            ("yolo", ok(vec![
                detection("cat", CAT, 0.9, (0, 0, 100, 100)),
                detection("dog", DOG, 0.9, (300, 300, 100, 100)),
            ])),
            ("detectron2", ok(vec![
                detection("cat", CAT, 0.9, (0, 0, 100, 100)),
                detection("dog", DOG, 0.9, (300, 300, 100, 100)),
            ])),
            ("rtdetr", ok(vec![
                detection("dog", DOG, 0.9, (300, 300, 100, 100)),
            ])),
            ("blip", ok(vec![caption_with_mappings("a cat", vec![("cat", CAT)])])),
        ]);

        // dog: 3 votes, weight 3+2=5; cat: 3 votes, weight 3+1=4
        assert_eq!(outcome.consensus[0].emoji, DOG);
        assert_eq!(outcome.consensus[1].emoji, CAT);
        assert_eq!(outcome.consensus[0].evidence_weight, 5.0);
    }

    #[test]
    fn test_normalization_coalesces_equivalent_emoji() {
        // é composed vs decomposed stand in for equivalent sequences
        let a = classification("\u{00E9}", 0.8);
        let b = classification("e\u{0301}", 0.8);
        let outcome = run(vec![("inception", ok(vec![a])), ("clip", ok(vec![b]))]);
        assert_eq!(outcome.consensus.len(), 1);
        assert_eq!(outcome.consensus[0].votes, 2);
    }
}
