//! Cross-service bounding-box clustering
//!
//! Different analyzers see the same physical object; this module finds
//! those agreements. Detections are rescaled into the original image's
//! coordinate space, grouped per emoji (NFC-normalized), clustered by IoU
//! against the cluster anchor, cleaned of same-service duplicates, and
//! filtered of low-confidence singletons. Each surviving cluster becomes
//! one reported instance.
//!
//! The whole module is a pure function of `(result map, dimensions)`;
//! the voting engine consumes its output alongside the raw results.

use glance_common::config::AnalyzerSpec;
use glance_common::types::{AnalysisResult, AnalyzerCategory, BoundingBox};
use glance_common::emoji;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Two detections describe the same object when IoU against the cluster
/// anchor strictly exceeds this.
pub const IOU_THRESHOLD: f64 = 0.30;

/// A cluster of one keeps its spot only at or above this confidence.
pub const SINGLETON_CONFIDENCE: f64 = 0.85;

/// One bbox-bearing prediction after rescaling.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub service_id: String,
    pub label: String,
    /// NFC-normalized
    pub emoji: String,
    /// Wire type tag of the source prediction
    pub kind: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
    pub original_bbox: BoundingBox,
}

/// Per-service contribution to an instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceMember {
    pub service: String,
    pub confidence: f64,
}

/// One physical object, as agreed on by one or more services.
#[derive(Debug, Clone, Serialize)]
pub struct Instance {
    /// `<label>_<rank>`, rank 1-based by cluster score
    pub cluster_id: String,
    pub emoji: String,
    pub label: String,
    /// Axis-aligned union of all member boxes
    pub merged_bbox: BoundingBox,
    pub detection_count: usize,
    /// Rounded to 3 decimals
    pub avg_confidence: f64,
    pub detections: Vec<InstanceMember>,
}

/// All surviving detections and instances for one emoji key.
#[derive(Debug, Clone, Serialize)]
pub struct GroupedEmoji {
    pub label: String,
    pub emoji: String,
    pub kind: String,
    pub detections: Vec<Detection>,
    pub instances: Vec<Instance>,
}

/// Output of the clustering engine.
#[derive(Debug, Default)]
pub struct SpatialIndex {
    /// Keyed by `face` for face detections, the NFC emoji otherwise
    pub groups: BTreeMap<String, GroupedEmoji>,
    /// Every detection that survived cleaning, across all groups
    pub all_detections: Vec<Detection>,
}

/// Cluster all spatial predictions across services.
///
/// `dimensions` is the original image size; `None` disables rescaling.
/// Analyzers are walked in roster order so clustering is reproducible for
/// a given input regardless of completion order.
pub fn cluster_detections(
    results: &BTreeMap<String, AnalysisResult>,
    roster: &[AnalyzerSpec],
    dimensions: Option<(u32, u32)>,
) -> SpatialIndex {
    let detections = extract_detections(results, roster, dimensions);

    // Partition by grouping key, preserving extraction order within a key.
    let mut by_key: BTreeMap<String, Vec<Detection>> = BTreeMap::new();
    for d in detections {
        by_key.entry(group_key(&d)).or_default().push(d);
    }

    let mut index = SpatialIndex::default();
    for (key, group) in by_key {
        let clusters = cluster_group(group);
        if clusters.is_empty() {
            continue;
        }

        let instances = rank_clusters(&clusters);
        let survivors: Vec<Detection> = clusters.into_iter().flatten().collect();
        let first = &survivors[0];

        debug!(
            key = %key,
            detections = survivors.len(),
            instances = instances.len(),
            "Spatial group clustered"
        );

        index.all_detections.extend(survivors.iter().cloned());
        index.groups.insert(
            key,
            GroupedEmoji {
                label: first.label.clone(),
                emoji: first.emoji.clone(),
                kind: first.kind.clone(),
                detections: survivors,
                instances,
            },
        );
    }

    index
}

/// Pull every bbox-bearing prediction out of the result map, rescaled.
fn extract_detections(
    results: &BTreeMap<String, AnalysisResult>,
    roster: &[AnalyzerSpec],
    dimensions: Option<(u32, u32)>,
) -> Vec<Detection> {
    let mut detections = Vec::new();

    for spec in roster {
        if !matches!(
            spec.category,
            AnalyzerCategory::Spatial | AnalyzerCategory::Specialized
        ) {
            continue;
        }
        let Some(result) = results.get(&spec.id) else {
            continue;
        };
        if !result.ok {
            continue;
        }

        let scale = rescale_factors(dimensions, result.processing_dimensions());

        for prediction in &result.predictions {
            if !prediction.is_spatial() {
                continue;
            }
            let common = prediction.common();
            let Some(original_bbox) = common.bbox else {
                continue;
            };

            let is_face = prediction.type_tag() == "face_detection";
            let raw_emoji = match (&common.emoji, is_face) {
                (Some(e), _) => e.clone(),
                (None, true) => emoji::FACE.to_string(),
                (None, false) => continue,
            };

            let label = common
                .label
                .clone()
                .unwrap_or_else(|| if is_face { "face".into() } else { "object".into() });

            detections.push(Detection {
                service_id: spec.id.clone(),
                label,
                emoji: emoji::normalize(&raw_emoji),
                kind: prediction.type_tag().to_string(),
                confidence: common.confidence.unwrap_or(crate::pipeline::voting::DEFAULT_CONFIDENCE),
                bbox: apply_scale(original_bbox, scale),
                original_bbox,
            });
        }
    }

    detections
}

/// Grouping key: `face` for face detections, the emoji otherwise.
fn group_key(d: &Detection) -> String {
    if d.kind == "face_detection" {
        "face".to_string()
    } else {
        d.emoji.clone()
    }
}

/// Ratio pair for mapping analyzer coordinates onto the display image.
///
/// Identity unless the analyzer reported its own processing resolution.
fn rescale_factors(
    display: Option<(u32, u32)>,
    processing: Option<(u32, u32)>,
) -> (f64, f64) {
    match (display, processing) {
        (Some((dw, dh)), Some((pw, ph))) if pw > 0 && ph > 0 => {
            (dw as f64 / pw as f64, dh as f64 / ph as f64)
        }
        _ => (1.0, 1.0),
    }
}

fn apply_scale(bbox: BoundingBox, (sx, sy): (f64, f64)) -> BoundingBox {
    if sx == 1.0 && sy == 1.0 {
        return bbox;
    }
    BoundingBox {
        x: (bbox.x as f64 * sx).round() as i32,
        y: (bbox.y as f64 * sy).round() as i32,
        width: (bbox.width as f64 * sx).round() as i32,
        height: (bbox.height as f64 * sy).round() as i32,
    }
}

/// Initial-anchor clustering over one emoji group, then cleaning.
///
/// Walks detections in input order; every unused detection starts a new
/// cluster and pulls in each later unused detection whose IoU against the
/// *anchor* (never another member) strictly exceeds the threshold. The
/// anchor-only rule stops transitive drift: A-B-C chains where A and C
/// never overlap.
fn cluster_group(detections: Vec<Detection>) -> Vec<Vec<Detection>> {
    let mut used = vec![false; detections.len()];
    let mut clusters = Vec::new();

    for i in 0..detections.len() {
        if used[i] {
            continue;
        }
        used[i] = true;
        let mut members = vec![i];

        for j in (i + 1)..detections.len() {
            if used[j] {
                continue;
            }
            if detections[i].bbox.iou(&detections[j].bbox) > IOU_THRESHOLD {
                used[j] = true;
                members.push(j);
            }
        }

        clusters.push(members);
    }

    clusters
        .into_iter()
        .filter_map(|members| clean_cluster(&detections, members))
        .collect()
}

/// Same-service dedup followed by the singleton consensus rule.
fn clean_cluster(detections: &[Detection], members: Vec<usize>) -> Option<Vec<Detection>> {
    // One vote per service inside a cluster: keep the service's most
    // confident detection.
    let mut kept: Vec<usize> = Vec::with_capacity(members.len());
    for &idx in &members {
        let d = &detections[idx];
        match kept
            .iter()
            .position(|&k| detections[k].service_id == d.service_id)
        {
            Some(pos) => {
                warn!(
                    service = %d.service_id,
                    label = %d.label,
                    "Duplicate detection from one service in a cluster, keeping best"
                );
                if d.confidence > detections[kept[pos]].confidence {
                    kept[pos] = idx;
                }
            }
            None => kept.push(idx),
        }
    }

    // Democratic consensus: a lone detection must shout to be heard.
    if kept.len() == 1 && detections[kept[0]].confidence < SINGLETON_CONFIDENCE {
        debug!(
            service = %detections[kept[0]].service_id,
            label = %detections[kept[0]].label,
            confidence = detections[kept[0]].confidence,
            "Dropping unconfirmed low-confidence singleton"
        );
        return None;
    }

    Some(kept.into_iter().map(|i| detections[i].clone()).collect())
}

/// Score clusters, order them, and emit instances.
///
/// Score rewards corroboration first, confidence second, and nudges
/// larger objects ahead of incidental ones.
fn rank_clusters(clusters: &[Vec<Detection>]) -> Vec<Instance> {
    let mut scored: Vec<(f64, &Vec<Detection>)> = clusters
        .iter()
        .map(|members| (cluster_score(members), members))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    scored
        .into_iter()
        .enumerate()
        .map(|(rank, (_, members))| {
            let merged_bbox = members[1..]
                .iter()
                .fold(members[0].bbox, |acc, d| acc.union(&d.bbox));
            let avg_confidence = members.iter().map(|d| d.confidence).sum::<f64>()
                / members.len() as f64;

            Instance {
                cluster_id: format!("{}_{}", sanitize_label(&members[0].label), rank + 1),
                emoji: members[0].emoji.clone(),
                label: members[0].label.clone(),
                merged_bbox,
                detection_count: members.len(),
                avg_confidence: round3(avg_confidence),
                detections: members
                    .iter()
                    .map(|d| InstanceMember {
                        service: d.service_id.clone(),
                        confidence: d.confidence,
                    })
                    .collect(),
            }
        })
        .collect()
}

fn cluster_score(members: &[Detection]) -> f64 {
    let n = members.len() as f64;
    let avg_confidence = members.iter().map(|d| d.confidence).sum::<f64>() / n;
    let avg_area = members.iter().map(|d| d.bbox.area()).sum::<f64>() / n;
    2.0 * n + 3.0 * avg_confidence + avg_area.max(1.0).log10()
}

fn sanitize_label(label: &str) -> String {
    label
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use glance_common::config::Config;
    use glance_common::types::Prediction;
    use serde_json::json;

    const CAT: &str = "\u{1F63A}";
    const CHAIR: &str = "\u{1FA91}";

    fn detection_prediction(
        label: &str,
        emoji: &str,
        confidence: f64,
        bbox: (i32, i32, i32, i32),
    ) -> Prediction {
        serde_json::from_value(json!({
            "type": "object_detection",
            "label": label,
            "emoji": emoji,
            "confidence": confidence,
            "bbox": {"x": bbox.0, "y": bbox.1, "width": bbox.2, "height": bbox.3}
        }))
        .unwrap()
    }

    fn run(results: Vec<(&str, Vec<Prediction>)>) -> SpatialIndex {
        let map: BTreeMap<String, AnalysisResult> = results
            .into_iter()
            .map(|(id, preds)| {
                (
                    id.to_string(),
                    AnalysisResult::success(preds, 0.1, serde_json::Map::new()),
                )
            })
            .collect();
        cluster_detections(&map, &Config::default_roster(), Some((640, 480)))
    }

    #[test]
    fn test_agreeing_detectors_form_one_instance() {
        let index = run(vec![
            (
                "yolo",
                vec![detection_prediction("cat", CAT, 0.9, (0, 0, 100, 100))],
            ),
            (
                "detectron2",
                vec![detection_prediction("cat", CAT, 0.9, (0, 0, 100, 100))],
            ),
        ]);

        let group = &index.groups[CAT];
        assert_eq!(group.instances.len(), 1);
        let instance = &group.instances[0];
        assert_eq!(instance.cluster_id, "cat_1");
        assert_eq!(instance.detection_count, 2);
        assert_eq!(instance.merged_bbox, BoundingBox::new(0, 0, 100, 100));
        assert_eq!(instance.avg_confidence, 0.9);
        assert_eq!(index.all_detections.len(), 2);
    }

    #[test]
    fn test_low_confidence_singleton_dropped_everywhere() {
        let index = run(vec![(
            "yolo",
            vec![detection_prediction("chair", CHAIR, 0.5, (0, 0, 100, 100))],
        )]);

        assert!(index.groups.is_empty());
        assert!(index.all_detections.is_empty());
    }

    #[test]
    fn test_singleton_at_threshold_kept() {
        let index = run(vec![(
            "yolo",
            vec![detection_prediction("chair", CHAIR, 0.85, (0, 0, 100, 100))],
        )]);

        assert_eq!(index.groups[CHAIR].instances.len(), 1);

        let index = run(vec![(
            "yolo",
            vec![detection_prediction("chair", CHAIR, 0.8499, (0, 0, 100, 100))],
        )]);
        assert!(index.groups.is_empty());
    }

    #[test]
    fn test_non_overlapping_boxes_stay_separate() {
        // IoU of these two is ~0.02, far below the threshold.
        let index = run(vec![
            (
                "yolo",
                vec![detection_prediction("chair", CHAIR, 0.9, (0, 0, 100, 100))],
            ),
            (
                "detectron2",
                vec![detection_prediction("chair", CHAIR, 0.85, (80, 80, 100, 100))],
            ),
        ]);

        let group = &index.groups[CHAIR];
        assert_eq!(group.instances.len(), 2);
        assert_eq!(group.instances[0].cluster_id, "chair_1");
        assert_eq!(group.instances[1].cluster_id, "chair_2");
        // higher-confidence cluster ranks first
        assert_eq!(group.instances[0].detections[0].service, "yolo");
    }

    #[test]
    fn test_non_overlapping_low_confidence_second_dropped() {
        let index = run(vec![
            (
                "yolo",
                vec![detection_prediction("chair", CHAIR, 0.9, (0, 0, 100, 100))],
            ),
            (
                "detectron2",
                vec![detection_prediction("chair", CHAIR, 0.6, (80, 80, 100, 100))],
            ),
        ]);

        let group = &index.groups[CHAIR];
        assert_eq!(group.instances.len(), 1);
        assert_eq!(group.instances[0].cluster_id, "chair_1");
    }

    #[test]
    fn test_iou_exactly_at_threshold_not_clustered() {
        // 30x100 inside 100x100: intersection 3000, union 10000, IoU 0.30
        let a = BoundingBox::new(0, 0, 100, 100);
        let b = BoundingBox::new(0, 0, 30, 100);
        assert!((a.iou(&b) - IOU_THRESHOLD).abs() < 1e-12);

        let index = run(vec![
            (
                "yolo",
                vec![detection_prediction("chair", CHAIR, 0.9, (0, 0, 100, 100))],
            ),
            (
                "detectron2",
                vec![detection_prediction("chair", CHAIR, 0.9, (0, 0, 30, 100))],
            ),
        ]);
        assert_eq!(index.groups[CHAIR].instances.len(), 2);
    }

    #[test]
    fn test_anchor_only_rule_prevents_chaining() {
        // b overlaps a heavily, c overlaps b but barely touches a.
        let index = run(vec![
            (
                "yolo",
                vec![detection_prediction("chair", CHAIR, 0.9, (0, 0, 100, 100))],
            ),
            (
                "detectron2",
                vec![detection_prediction("chair", CHAIR, 0.9, (40, 0, 100, 100))],
            ),
            (
                "rtdetr",
                vec![detection_prediction("chair", CHAIR, 0.9, (95, 0, 100, 100))],
            ),
        ]);

        let group = &index.groups[CHAIR];
        // a+b cluster; c measured against anchor a only, stays alone.
        assert_eq!(group.instances.len(), 2);
        let by_count: Vec<usize> = group.instances.iter().map(|i| i.detection_count).collect();
        assert_eq!(by_count, vec![2, 1]);
    }

    #[test]
    fn test_same_service_dedup_keeps_best() {
        let index = run(vec![(
            "yolo",
            vec![
                detection_prediction("cat", CAT, 0.7, (0, 0, 100, 100)),
                detection_prediction("cat", CAT, 0.95, (5, 5, 95, 95)),
            ],
        )]);

        let group = &index.groups[CAT];
        assert_eq!(group.instances.len(), 1);
        let instance = &group.instances[0];
        assert_eq!(instance.detection_count, 1);
        assert_eq!(instance.detections[0].confidence, 0.95);
        // multi-member invariant: contributing services are distinct
        let mut services: Vec<_> = instance.detections.iter().map(|m| &m.service).collect();
        services.dedup();
        assert_eq!(services.len(), instance.detections.len());
    }

    #[test]
    fn test_rescaling_applies_processing_dims() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("processing_width".into(), 320u64.into());
        metadata.insert("processing_height".into(), 240u64.into());
        let result = AnalysisResult::success(
            vec![detection_prediction("cat", CAT, 0.9, (10, 10, 100, 50))],
            0.1,
            metadata,
        );
        let mut map = BTreeMap::new();
        map.insert("yolo".to_string(), result);

        let index = cluster_detections(&map, &Config::default_roster(), Some((640, 480)));
        let d = &index.all_detections[0];
        assert_eq!(d.bbox, BoundingBox::new(20, 20, 200, 100));
        assert_eq!(d.original_bbox, BoundingBox::new(10, 10, 100, 50));
    }

    #[test]
    fn test_rescaling_identity_without_dims() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("processing_width".into(), 320u64.into());
        metadata.insert("processing_height".into(), 240u64.into());
        let result = AnalysisResult::success(
            vec![detection_prediction("cat", CAT, 0.9, (10, 10, 100, 50))],
            0.1,
            metadata,
        );
        let mut map = BTreeMap::new();
        map.insert("yolo".to_string(), result);

        // no display dimensions: rescaling is a no-op
        let index = cluster_detections(&map, &Config::default_roster(), None);
        assert_eq!(
            index.all_detections[0].bbox,
            BoundingBox::new(10, 10, 100, 50)
        );
    }

    #[test]
    fn test_equal_processing_and_display_dims_identity() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("processing_width".into(), 640u64.into());
        metadata.insert("processing_height".into(), 480u64.into());
        let result = AnalysisResult::success(
            vec![detection_prediction("cat", CAT, 0.9, (10, 10, 100, 50))],
            0.1,
            metadata,
        );
        let mut map = BTreeMap::new();
        map.insert("yolo".to_string(), result);

        let index = cluster_detections(&map, &Config::default_roster(), Some((640, 480)));
        assert_eq!(
            index.all_detections[0].bbox,
            BoundingBox::new(10, 10, 100, 50)
        );
    }

    #[test]
    fn test_face_detections_group_under_face_key() {
        let face: Prediction = serde_json::from_value(json!({
            "type": "face_detection",
            "confidence": 0.97,
            "bbox": {"x": 10, "y": 10, "width": 50, "height": 50}
        }))
        .unwrap();
        let mut map = BTreeMap::new();
        map.insert(
            "face".to_string(),
            AnalysisResult::success(vec![face], 0.1, serde_json::Map::new()),
        );

        let index = cluster_detections(&map, &Config::default_roster(), Some((640, 480)));
        let group = &index.groups["face"];
        assert_eq!(group.kind, "face_detection");
        assert_eq!(group.emoji, glance_common::emoji::FACE);
        assert_eq!(group.instances.len(), 1);
    }

    #[test]
    fn test_failed_results_contribute_nothing() {
        let mut map = BTreeMap::new();
        map.insert(
            "yolo".to_string(),
            AnalysisResult::failure(glance_common::types::ErrorKind::Timeout, "deadline", 15.0),
        );
        let index = cluster_detections(&map, &Config::default_roster(), Some((640, 480)));
        assert!(index.groups.is_empty());
    }

    #[test]
    fn test_union_contains_all_members() {
        let index = run(vec![
            (
                "yolo",
                vec![detection_prediction("cat", CAT, 0.9, (0, 0, 100, 100))],
            ),
            (
                "detectron2",
                vec![detection_prediction("cat", CAT, 0.9, (20, 30, 100, 100))],
            ),
        ]);

        let instance = &index.groups[CAT].instances[0];
        assert_eq!(instance.detection_count, 2);
        let union = instance.merged_bbox;
        for d in &index.all_detections {
            assert!(union.x <= d.bbox.x);
            assert!(union.y <= d.bbox.y);
            assert!(union.x + union.width >= d.bbox.x + d.bbox.width);
            assert!(union.y + union.height >= d.bbox.y + d.bbox.height);
        }
    }
}
