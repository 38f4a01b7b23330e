//! Analyzer wire contract and shared result types
//!
//! Analyzers return a unified envelope: `{service, status, predictions[],
//! metadata{}, error?}`. Predictions are a tagged sum type discriminated by
//! `type`; shared fields live in [`PredictionCommon`], type-specific payloads
//! on the variant. Unknown tags are rejected at the client boundary, not
//! here, so a single bad prediction never poisons a whole response.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Axis-aligned bounding box in integer pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        (self.width.max(0) as f64) * (self.height.max(0) as f64)
    }

    /// Intersection-over-union with another box. Zero when disjoint or
    /// when either box is degenerate.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = ((x2 - x1) as f64) * ((y2 - y1) as f64);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// Smallest box covering both `self` and `other`.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        BoundingBox {
            x,
            y,
            width: right - x,
            height: bottom - y,
        }
    }
}

/// Evidence category an analyzer contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerCategory {
    /// Object detectors and image-level classifiers with spatial output
    Spatial,
    /// Caption producers
    Semantic,
    /// Face / NSFW / OCR sidecars
    Specialized,
    /// Image-level classification evidence (no analyzer ships in this
    /// category today; the roster accepts it so one can be configured in)
    Classification,
    /// Everything else (colors, metadata)
    Other,
}

/// Fields shared by every prediction variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictionCommon {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    /// Confidence in [0,1]; absent for predictions that have no natural
    /// confidence (e.g. metadata extraction)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

/// One word→emoji mapping attached to a caption prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmojiMapping {
    pub word: String,
    pub emoji: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub shiny: bool,
}

/// A single analyzer prediction, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Prediction {
    ObjectDetection {
        #[serde(flatten)]
        common: PredictionCommon,
    },
    Classification {
        #[serde(flatten)]
        common: PredictionCommon,
    },
    Caption {
        #[serde(flatten)]
        common: PredictionCommon,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        emoji_mappings: Vec<EmojiMapping>,
    },
    ColorAnalysis {
        #[serde(flatten)]
        common: PredictionCommon,
    },
    FaceDetection {
        #[serde(flatten)]
        common: PredictionCommon,
    },
    ContentModeration {
        #[serde(flatten)]
        common: PredictionCommon,
    },
    TextExtraction {
        #[serde(flatten)]
        common: PredictionCommon,
    },
    MetadataExtraction {
        #[serde(flatten)]
        common: PredictionCommon,
    },
}

impl Prediction {
    pub fn common(&self) -> &PredictionCommon {
        match self {
            Prediction::ObjectDetection { common }
            | Prediction::Classification { common }
            | Prediction::ColorAnalysis { common }
            | Prediction::FaceDetection { common }
            | Prediction::ContentModeration { common }
            | Prediction::TextExtraction { common }
            | Prediction::MetadataExtraction { common }
            | Prediction::Caption { common, .. } => common,
        }
    }

    /// The wire discriminant for this variant.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Prediction::ObjectDetection { .. } => "object_detection",
            Prediction::Classification { .. } => "classification",
            Prediction::Caption { .. } => "caption",
            Prediction::ColorAnalysis { .. } => "color_analysis",
            Prediction::FaceDetection { .. } => "face_detection",
            Prediction::ContentModeration { .. } => "content_moderation",
            Prediction::TextExtraction { .. } => "text_extraction",
            Prediction::MetadataExtraction { .. } => "metadata_extraction",
        }
    }

    pub fn emoji_mappings(&self) -> &[EmojiMapping] {
        match self {
            Prediction::Caption { emoji_mappings, .. } => emoji_mappings,
            _ => &[],
        }
    }

    /// Variants that may legitimately carry a bounding box.
    pub fn is_spatial(&self) -> bool {
        matches!(
            self,
            Prediction::ObjectDetection { .. } | Prediction::FaceDetection { .. }
        )
    }
}

/// How an analyzer call failed, when it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection refused or DNS failure
    Offline,
    /// Deadline expired or the read was reset
    Timeout,
    /// Response did not match the wire contract
    Protocol,
    /// The analyzer itself reported `status == "error"`
    Service,
}

impl ErrorKind {
    /// Status word used in per-service reporting.
    pub fn status_word(&self) -> &'static str {
        match self {
            ErrorKind::Offline => "offline",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Protocol | ErrorKind::Service => "error",
        }
    }
}

/// Per-analyzer outcome for one image.
///
/// Invariant: `ok == false` implies `predictions` is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub ok: bool,
    pub predictions: Vec<Prediction>,
    pub processing_time_seconds: f64,
    /// Analyzer-reported metadata, kept verbatim (may carry the analyzer's
    /// own processing resolution, used for coordinate rescaling)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AnalysisResult {
    pub fn success(
        predictions: Vec<Prediction>,
        processing_time_seconds: f64,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            ok: true,
            predictions,
            processing_time_seconds,
            metadata,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>, elapsed_seconds: f64) -> Self {
        Self {
            ok: false,
            predictions: Vec::new(),
            processing_time_seconds: elapsed_seconds,
            metadata: Map::new(),
            error_kind: Some(kind),
            error_message: Some(message.into()),
        }
    }

    /// The analyzer's own processing resolution, when it reported one.
    pub fn processing_dimensions(&self) -> Option<(u32, u32)> {
        let w = self.metadata.get("processing_width")?.as_u64()?;
        let h = self.metadata.get("processing_height")?.as_u64()?;
        if w == 0 || h == 0 {
            return None;
        }
        Some((w as u32, h as u32))
    }
}

/// Per-service status row in the final response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service_id: String,
    /// `success`, `timeout`, `offline` or `error`
    pub status: String,
    pub processing_time_ms: u64,
    pub prediction_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Roll-up included in the response whenever any analyzer degraded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealthSummary {
    pub degraded_services: Vec<String>,
    pub failed_count: usize,
    pub total_services: usize,
}
