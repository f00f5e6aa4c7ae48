//! Data contracts shared by the caption pipeline engine and its front ends.
//!
//! Everything in this crate is synchronous and provider-agnostic: request and
//! variant types, the variant parser, the deduplicator, platform rules and
//! validation, fact coverage, model selection, and the append-only run logs.

pub mod events;
pub mod facts;
pub mod models;
pub mod platforms;
pub mod providers;
pub mod request;
pub mod results;
pub mod runs;
pub mod variants;

pub use facts::{batch_coverage, check_coverage, BatchCoverage, FactCoverage, ImageFacts};
pub use platforms::{Platform, PlatformRules, RuleTable, UnsupportedPlatform};
pub use request::{Flavor, GenerationRequest};
pub use results::{PipelineResult, ProviderTier, RankingResult};
pub use variants::{parse_variants, Deduplicator, ParseError, SafetyLevel, Variant};
pub use events::{EventWriter, PipelineEvent};
pub use runs::{CaptionHistory, ChoiceRecord, ChoiceWriter, InvocationReceipt};
