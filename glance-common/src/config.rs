//! Configuration loading for the glance gateway
//!
//! The analyzer roster comes from a JSON file resolved in priority order:
//!
//! 1. Explicit path handed to [`Config::load`]
//! 2. `GLANCE_CONFIG` environment variable
//! 3. `<config dir>/glance/analyzers.json`
//! 4. Compiled-in default roster
//!
//! Per-analyzer host/port can be overridden through `GLANCE_<ID>_HOST` /
//! `GLANCE_<ID>_PORT` regardless of where the roster came from. Global
//! settings are environment-driven with compiled defaults. The resulting
//! [`Config`] is built once at startup and immutable afterwards.

use crate::types::AnalyzerCategory;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// One analyzer endpoint, constructed at startup and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerSpec {
    /// Stable lowercase tag, e.g. `yolo`, `blip`
    pub id: String,
    /// Human-readable name
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Analysis path on the analyzer, e.g. `/analyze`
    pub endpoint: String,
    /// Preferred input resolution; `original` disables variant lookup
    #[serde(default = "default_optimal_size")]
    pub optimal_size: String,
    pub category: AnalyzerCategory,
}

fn default_optimal_size() -> String {
    "original".to_string()
}

impl AnalyzerSpec {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn analyze_url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.endpoint)
    }

    pub fn wants_variant(&self) -> bool {
        self.optimal_size != "original"
    }
}

/// Global gateway settings, environment-driven with compiled defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Listen port (`GLANCE_PORT`)
    pub port: u16,
    /// Directory for uploads and downloaded images (`GLANCE_UPLOAD_DIR`)
    pub upload_dir: PathBuf,
    /// Maximum accepted upload size in bytes (`GLANCE_MAX_UPLOAD_BYTES`)
    pub max_upload_bytes: u64,
    /// Per-analyzer-call deadline in seconds (`GLANCE_TIMEOUT_SECS`)
    pub analyzer_timeout_secs: u64,
    /// Transport-level retries per analyzer call (`GLANCE_MAX_RETRIES`)
    pub max_retries: u32,
    /// Slack added to the per-call deadline to form the per-request budget
    pub request_slack_secs: u64,
    /// Deadline for health probes in seconds
    pub health_timeout_secs: u64,
    /// Public URL prefix analyzers use to fetch locally stored images
    /// (`GLANCE_PUBLIC_URL`)
    pub public_url: String,
    /// Root directory for pre-sized image variants (`GLANCE_IMAGE_ROOT`);
    /// when unset, variants are looked up next to the original file
    pub image_root: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 8088,
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: 10 * 1024 * 1024,
            analyzer_timeout_secs: 15,
            max_retries: 2,
            request_slack_secs: 5,
            health_timeout_secs: 5,
            public_url: String::new(),
            image_root: None,
        }
    }
}

impl Settings {
    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_secs(self.analyzer_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    /// Global per-request budget: per-call deadline plus slack.
    pub fn request_budget(&self) -> Duration {
        Duration::from_secs(self.analyzer_timeout_secs + self.request_slack_secs)
    }

    /// Read settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut s = Settings::default();

        if let Some(port) = parse_var(&lookup, "GLANCE_PORT") {
            s.port = port;
        }
        if let Some(dir) = lookup("GLANCE_UPLOAD_DIR") {
            s.upload_dir = PathBuf::from(dir);
        }
        if let Some(bytes) = parse_var(&lookup, "GLANCE_MAX_UPLOAD_BYTES") {
            s.max_upload_bytes = bytes;
        }
        if let Some(secs) = parse_var(&lookup, "GLANCE_TIMEOUT_SECS") {
            s.analyzer_timeout_secs = secs;
        }
        if let Some(n) = parse_var(&lookup, "GLANCE_MAX_RETRIES") {
            s.max_retries = n;
        }
        if let Some(root) = lookup("GLANCE_IMAGE_ROOT") {
            s.image_root = Some(PathBuf::from(root));
        }
        s.public_url = lookup("GLANCE_PUBLIC_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", s.port));

        s
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = lookup(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring unparseable {}={:?}", name, raw);
            None
        }
    }
}

/// Shape of the roster file.
#[derive(Debug, Deserialize)]
struct RosterFile {
    analyzers: Vec<AnalyzerSpec>,
}

/// Complete startup configuration: global settings plus the analyzer roster.
///
/// Roster order is configuration order; the orchestrator and voting engine
/// iterate it as-is so tie resolution is reproducible.
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    pub analyzers: Vec<AnalyzerSpec>,
}

impl Config {
    /// Load configuration. An explicitly given roster path must exist and
    /// parse; the fallback locations are optional.
    pub fn load(explicit_roster: Option<&Path>) -> Result<Self> {
        let settings = Settings::from_env();
        let mut analyzers = load_roster(explicit_roster)?;
        apply_host_overrides(&mut analyzers, |name| std::env::var(name).ok());
        validate_roster(&analyzers)?;

        info!(
            analyzers = analyzers.len(),
            port = settings.port,
            "Configuration loaded"
        );
        Ok(Self {
            settings,
            analyzers,
        })
    }

    pub fn analyzer(&self, id: &str) -> Option<&AnalyzerSpec> {
        self.analyzers.iter().find(|a| a.id == id)
    }

    /// Built-in roster used when no roster file is present.
    pub fn default_roster() -> Vec<AnalyzerSpec> {
        fn spec(
            id: &str,
            name: &str,
            port: u16,
            optimal_size: &str,
            category: AnalyzerCategory,
        ) -> AnalyzerSpec {
            AnalyzerSpec {
                id: id.to_string(),
                name: name.to_string(),
                host: "localhost".to_string(),
                port,
                endpoint: "/analyze".to_string(),
                optimal_size: optimal_size.to_string(),
                category,
            }
        }

        use AnalyzerCategory::*;
        vec![
            spec("yolo", "YOLO", 5001, "original", Spatial),
            spec("detectron2", "Detectron2", 5002, "original", Spatial),
            spec("rtdetr", "RT-DETR", 5003, "original", Spatial),
            spec("yolo_365", "YOLO Objects365", 5004, "original", Spatial),
            spec("yolo_oi7", "YOLO OpenImages v7", 5005, "original", Spatial),
            spec("clip", "CLIP", 5006, "512", Spatial),
            spec("inception", "Inception v3", 5007, "512", Spatial),
            spec("blip", "BLIP", 5008, "original", Semantic),
            spec("ollama", "Ollama Vision", 5009, "original", Semantic),
            spec("face", "Face Analysis", 5010, "original", Specialized),
            spec("nsfw", "Content Moderation", 5011, "original", Specialized),
            spec("ocr", "OCR", 5012, "original", Specialized),
            spec("colors", "Color Analysis", 5013, "original", Other),
            spec("metadata", "Metadata", 5014, "original", Other),
        ]
    }
}

fn load_roster(explicit: Option<&Path>) -> Result<Vec<AnalyzerSpec>> {
    if let Some(path) = explicit {
        return parse_roster_file(path);
    }

    if let Ok(path) = std::env::var("GLANCE_CONFIG") {
        return parse_roster_file(Path::new(&path));
    }

    if let Some(dir) = dirs::config_dir() {
        let path = dir.join("glance").join("analyzers.json");
        if path.exists() {
            return parse_roster_file(&path);
        }
    }

    info!("No roster file found, using built-in analyzer roster");
    Ok(Config::default_roster())
}

fn parse_roster_file(path: &Path) -> Result<Vec<AnalyzerSpec>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Cannot read roster {}: {}", path.display(), e)))?;
    let file: RosterFile = serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Cannot parse roster {}: {}", path.display(), e)))?;
    info!(
        path = %path.display(),
        analyzers = file.analyzers.len(),
        "Analyzer roster loaded"
    );
    Ok(file.analyzers)
}

/// Apply `GLANCE_<ID>_HOST` / `GLANCE_<ID>_PORT` overrides to a roster.
fn apply_host_overrides(
    analyzers: &mut [AnalyzerSpec],
    lookup: impl Fn(&str) -> Option<String>,
) {
    for spec in analyzers.iter_mut() {
        let key = spec.id.to_uppercase();
        if let Some(host) = lookup(&format!("GLANCE_{}_HOST", key)) {
            spec.host = host;
        }
        if let Some(port) = lookup(&format!("GLANCE_{}_PORT", key)) {
            match port.parse() {
                Ok(p) => spec.port = p,
                Err(_) => warn!(
                    service = %spec.id,
                    "Ignoring unparseable port override {:?}",
                    port
                ),
            }
        }
    }
}

fn validate_roster(analyzers: &[AnalyzerSpec]) -> Result<()> {
    for (i, a) in analyzers.iter().enumerate() {
        if a.id.is_empty() {
            return Err(Error::Config(format!("Analyzer #{} has an empty id", i)));
        }
        if analyzers[..i].iter().any(|b| b.id == a.id) {
            return Err(Error::Config(format!("Duplicate analyzer id {:?}", a.id)));
        }
        if !a.endpoint.starts_with('/') {
            return Err(Error::Config(format!(
                "Analyzer {:?} endpoint must start with '/': {:?}",
                a.id, a.endpoint
            )));
        }
    }
    Ok(())
}
