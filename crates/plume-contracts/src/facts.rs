use serde::{Deserialize, Serialize};

use crate::variants::Variant;

/// Objects beyond this many are passed to the prompt but not required.
pub const MAX_REQUIRED_OBJECTS: usize = 3;

/// Attributes extracted from a source image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFacts {
    #[serde(default)]
    pub objects: Vec<String>,
    #[serde(default)]
    pub setting: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
}

impl ImageFacts {
    pub fn is_empty(&self) -> bool {
        self.objects.iter().all(|item| item.trim().is_empty())
            && self.setting.as_deref().map_or(true, |s| s.trim().is_empty())
            && self.mood.as_deref().map_or(true, |m| m.trim().is_empty())
    }

    /// Facts a caption is expected to reference. Mood is descriptive only.
    pub fn required_facts(&self) -> Vec<String> {
        let mut facts: Vec<String> = self
            .objects
            .iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .take(MAX_REQUIRED_OBJECTS)
            .collect();
        if let Some(setting) = self.setting.as_deref().map(str::trim) {
            if !setting.is_empty() {
                facts.push(setting.to_string());
            }
        }
        facts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FactCoverage {
    pub ok: bool,
    pub missing: Vec<String>,
}

pub fn check_coverage(facts: &ImageFacts, variant: &Variant) -> FactCoverage {
    let haystack = tokens(&format!("{} {}", variant.caption, variant.alt));
    let missing: Vec<String> = facts
        .required_facts()
        .into_iter()
        .filter(|fact| !mentions(&haystack, fact))
        .collect();
    FactCoverage {
        ok: missing.is_empty(),
        missing,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchCoverage {
    pub per_variant: Vec<FactCoverage>,
}

impl BatchCoverage {
    /// A batch fails only when every variant misses at least one fact.
    pub fn passed(&self) -> bool {
        self.per_variant.is_empty() || self.per_variant.iter().any(|coverage| coverage.ok)
    }

    /// Facts to name in a fix hint: those no variant referenced, or, when
    /// each fact was covered somewhere, every fact some variant missed.
    pub fn missing_facts(&self) -> Vec<String> {
        let mut everywhere: Vec<String> = Vec::new();
        let mut anywhere: Vec<String> = Vec::new();
        for coverage in &self.per_variant {
            for fact in &coverage.missing {
                if !anywhere.contains(fact) {
                    anywhere.push(fact.clone());
                }
            }
        }
        for fact in &anywhere {
            if self
                .per_variant
                .iter()
                .all(|coverage| coverage.missing.contains(fact))
            {
                everywhere.push(fact.clone());
            }
        }
        if everywhere.is_empty() {
            anywhere
        } else {
            everywhere
        }
    }
}

pub fn batch_coverage(facts: &ImageFacts, variants: &[Variant]) -> BatchCoverage {
    BatchCoverage {
        per_variant: variants
            .iter()
            .map(|variant| check_coverage(facts, variant))
            .collect(),
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn stem(word: &str) -> &str {
    if word.len() > 3 {
        word.strip_suffix("es")
            .filter(|rest| rest.ends_with('s') || rest.ends_with('x') || rest.ends_with("ch"))
            .or_else(|| word.strip_suffix('s'))
            .unwrap_or(word)
    } else {
        word
    }
}

fn mentions(haystack: &[String], fact: &str) -> bool {
    let words = tokens(fact);
    if words.is_empty() {
        return true;
    }
    let joined = format!(" {} ", haystack.join(" "));
    if joined.contains(&format!(" {} ", words.join(" "))) {
        return true;
    }
    let significant: Vec<&String> = words.iter().filter(|word| word.len() >= 3).collect();
    if significant.is_empty() {
        return false;
    }
    significant
        .iter()
        .all(|word| haystack.iter().any(|token| stem(token) == stem(word)))
}
