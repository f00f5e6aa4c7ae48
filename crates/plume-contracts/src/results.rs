use std::fmt;

use serde::{Deserialize, Serialize};

use crate::variants::Variant;

/// Which backend tier ultimately produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderTier {
    Primary,
    Secondary,
    DeterministicFallback,
}

impl ProviderTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderTier::Primary => "primary",
            ProviderTier::Secondary => "secondary",
            ProviderTier::DeterministicFallback => "deterministic-fallback",
        }
    }
}

impl fmt::Display for ProviderTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingResult {
    pub winner_index: usize,
    /// One score per ranked variant, in the same order.
    pub scores: Vec<f64>,
    pub reason: String,
    #[serde(rename = "final")]
    pub final_variant: Variant,
    /// True when the provider's answer was unusable and index 0 was chosen.
    #[serde(default)]
    pub defaulted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub invocation_id: String,
    pub provider: ProviderTier,
    pub provider_name: String,
    #[serde(rename = "final")]
    pub final_variant: Variant,
    pub variants: Vec<Variant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub titles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranking: Option<RankingResult>,
    #[serde(default)]
    pub fallback_reasons: Vec<String>,
}
