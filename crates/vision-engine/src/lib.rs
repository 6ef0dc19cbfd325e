pub mod caption;
pub mod config;
pub mod credentials;
pub mod error;
mod http;
pub mod insight;
pub mod panel;
pub mod pipeline;
pub mod samples;
pub mod selection;

pub use caption::{CaptionClient, CaptionService};
pub use config::EngineConfig;
pub use credentials::{CredentialStore, Credentials};
pub use error::{AnalysisError, MissingField, Service};
pub use insight::{InsightClient, InsightService};
pub use panel::OutputPanel;
pub use pipeline::{
    AnalysisObserver, AnalysisPipeline, AnalysisRequest, AnalysisResult, AnalyzeControl,
    PipelineState, StatusTone,
};
pub use selection::{ImageSelection, MemoryPreviews, PreviewStore, SelectedImage, TempFilePreviews};
