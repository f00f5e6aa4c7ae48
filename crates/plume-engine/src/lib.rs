//! Caption generation engine.
//!
//! [`CaptionPipeline`] turns an image, an existing caption, or a theme into
//! platform-compliant caption variants. Provider adapters live in
//! [`provider`]; [`runtime::build_pipeline`] wires them from a
//! [`PipelineConfig`] and the model registry.

pub mod config;
pub mod error;
pub mod extract;
pub mod facts;
pub mod fallback;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod ranker;
pub mod runtime;
pub mod sink;

#[cfg(test)]
mod testing;

pub use config::{ModelConfig, PipelineConfig};
pub use error::{
    ConfigError, FactExtractionError, InvalidImageError, PipelineError, ProviderError,
    ProviderErrorKind,
};
pub use facts::{FactExtractor, ImageFetcher, VisionFactExtractor};
pub use fallback::{ComplianceDefaults, FallbackDefaults, StaticComplianceDefaults};
pub use pipeline::{
    CaptionPipeline, CaptionPipelineBuilder, ImageCaptionInput, RewriteInput, TextCaptionInput,
    TierAdapter,
};
pub use provider::{default_provider_registry, CaptionProvider, RegisteredProvider};
pub use runtime::build_pipeline;
pub use sink::{JsonlSink, PersistedRun, PersistenceSink};
