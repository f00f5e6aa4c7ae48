mod validator;

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use validator::{
    rendered_length, validate, validate_batch, BatchValidation, RuleId, ValidationResult,
    Violation,
};

/// Target network for a caption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    X,
    Bluesky,
    Threads,
    Instagram,
    Tiktok,
    Facebook,
    Linkedin,
    Reddit,
    Onlyfans,
    Fansly,
}

impl Platform {
    pub const ALL: [Platform; 10] = [
        Platform::X,
        Platform::Bluesky,
        Platform::Threads,
        Platform::Instagram,
        Platform::Tiktok,
        Platform::Facebook,
        Platform::Linkedin,
        Platform::Reddit,
        Platform::Onlyfans,
        Platform::Fansly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::X => "x",
            Platform::Bluesky => "bluesky",
            Platform::Threads => "threads",
            Platform::Instagram => "instagram",
            Platform::Tiktok => "tiktok",
            Platform::Facebook => "facebook",
            Platform::Linkedin => "linkedin",
            Platform::Reddit => "reddit",
            Platform::Onlyfans => "onlyfans",
            Platform::Fansly => "fansly",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported platform `{0}`")]
pub struct UnsupportedPlatform(pub String);

impl FromStr for Platform {
    type Err = UnsupportedPlatform;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', '_', ' '], "");
        let platform = match normalized.as_str() {
            "x" | "twitter" | "x.com" => Platform::X,
            "bluesky" | "bsky" => Platform::Bluesky,
            "threads" => Platform::Threads,
            "instagram" | "ig" => Platform::Instagram,
            "tiktok" => Platform::Tiktok,
            "facebook" | "fb" => Platform::Facebook,
            "linkedin" => Platform::Linkedin,
            "reddit" => Platform::Reddit,
            "onlyfans" | "of" => Platform::Onlyfans,
            "fansly" => Platform::Fansly,
            _ => return Err(UnsupportedPlatform(raw.trim().to_string())),
        };
        Ok(platform)
    }
}

/// Structural limits a variant must satisfy on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRules {
    pub platform: Platform,
    /// Ceiling over the caption plus its hashtag suffix, in characters.
    pub max_caption_chars: usize,
    pub max_hashtags: usize,
    pub banned_substrings: Vec<String>,
    pub require_alt: bool,
    pub allow_explicit: bool,
    pub forbid_markdown: bool,
}

/// Partial override of one platform's rules, as read from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleOverride {
    pub max_caption_chars: Option<usize>,
    pub max_hashtags: Option<usize>,
    pub banned_substrings: Option<Vec<String>>,
    pub require_alt: Option<bool>,
    pub allow_explicit: Option<bool>,
    pub forbid_markdown: Option<bool>,
}

const COMMON_BANNED: &[&str] = &[
    "lorem ipsum",
    "as an ai",
    "[insert",
    "{{",
    "caption here",
];

#[derive(Debug, Clone, PartialEq)]
pub struct RuleTable {
    rules: IndexMap<Platform, PlatformRules>,
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RuleTable {
    pub fn new(rules: Option<IndexMap<Platform, PlatformRules>>) -> Self {
        Self {
            rules: rules.unwrap_or_else(default_rules),
        }
    }

    pub fn get(&self, platform: Platform) -> Option<&PlatformRules> {
        self.rules.get(&platform)
    }

    pub fn list(&self) -> impl Iterator<Item = &PlatformRules> {
        self.rules.values()
    }

    pub fn apply_overrides(&mut self, overrides: &IndexMap<Platform, RuleOverride>) {
        for (platform, patch) in overrides {
            let Some(rules) = self.rules.get_mut(platform) else {
                continue;
            };
            if let Some(value) = patch.max_caption_chars {
                rules.max_caption_chars = value.max(1);
            }
            if let Some(value) = patch.max_hashtags {
                rules.max_hashtags = value;
            }
            if let Some(values) = &patch.banned_substrings {
                rules.banned_substrings = values
                    .iter()
                    .map(|value| value.trim().to_lowercase())
                    .filter(|value| !value.is_empty())
                    .collect();
            }
            if let Some(value) = patch.require_alt {
                rules.require_alt = value;
            }
            if let Some(value) = patch.allow_explicit {
                rules.allow_explicit = value;
            }
            if let Some(value) = patch.forbid_markdown {
                rules.forbid_markdown = value;
            }
        }
    }
}

fn default_rules() -> IndexMap<Platform, PlatformRules> {
    let mut map = IndexMap::new();

    let mut insert = |platform: Platform,
                      max_caption_chars: usize,
                      max_hashtags: usize,
                      extra_banned: &[&str],
                      allow_explicit: bool| {
        map.insert(
            platform,
            PlatformRules {
                platform,
                max_caption_chars,
                max_hashtags,
                banned_substrings: COMMON_BANNED
                    .iter()
                    .chain(extra_banned.iter())
                    .map(|item| (*item).to_string())
                    .collect(),
                require_alt: true,
                allow_explicit,
                forbid_markdown: true,
            },
        );
    };

    insert(Platform::X, 280, 3, &[], false);
    insert(Platform::Bluesky, 300, 3, &[], false);
    insert(Platform::Threads, 500, 5, &[], false);
    insert(Platform::Instagram, 2200, 30, &[], false);
    insert(Platform::Tiktok, 2200, 10, &[], false);
    insert(Platform::Facebook, 5000, 10, &[], false);
    insert(Platform::Linkedin, 3000, 5, &[], false);
    insert(Platform::Reddit, 300, 0, &["upvote if", "upvote this"], true);
    insert(Platform::Onlyfans, 1000, 5, &[], true);
    insert(Platform::Fansly, 1000, 10, &[], true);

    map
}
