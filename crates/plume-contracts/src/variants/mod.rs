mod dedup;
mod parser;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use dedup::{normalize_text, similarity, Deduplicator, DEFAULT_SIMILARITY_THRESHOLD};
pub use parser::{parse_variants, strip_code_fence, ParseError};

/// Variants requested per generation call.
pub const VARIANTS_PER_BATCH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    #[default]
    Normal,
    Suggestive,
    Explicit,
}

impl SafetyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyLevel::Normal => "normal",
            SafetyLevel::Suggestive => "suggestive",
            SafetyLevel::Explicit => "explicit",
        }
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SafetyLevel {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "normal" | "safe" => Ok(SafetyLevel::Normal),
            "suggestive" => Ok(SafetyLevel::Suggestive),
            "explicit" => Ok(SafetyLevel::Explicit),
            _ => Err(()),
        }
    }
}

/// One candidate caption bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub caption: String,
    pub alt: String,
    pub hashtags: Vec<String>,
    pub cta: String,
    pub mood: String,
    pub style: String,
    pub safety_level: SafetyLevel,
    pub nsfw: bool,
}

impl Variant {
    /// Caption followed by its hashtags, as it would be posted.
    pub fn rendered_text(&self) -> String {
        let caption = self.caption.trim();
        if self.hashtags.is_empty() {
            return caption.to_string();
        }
        format!("{caption} {}", self.hashtags.join(" "))
    }
}
