//! Service clients and orchestration for the analyzer roster

pub mod analyzer_client;
pub mod health_probe;
pub mod orchestrator;
pub mod similarity_client;

pub use analyzer_client::{AnalyzerClient, AnalyzerError, ImageRef};
pub use health_probe::{HealthProber, HealthTracker, ServiceHealth};
pub use orchestrator::{AnalysisRun, ImageInput, Orchestrator, ProcessingMethod};
pub use similarity_client::SimilarityClient;
