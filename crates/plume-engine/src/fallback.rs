use plume_contracts::platforms::{rendered_length, validate, PlatformRules};
use plume_contracts::request::GenerationRequest;
use plume_contracts::variants::{SafetyLevel, Variant};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

const BUILTIN_CAPTION: &str = "New post is up. Take a look.";
const BUILTIN_HASHTAG: &str = "#update";
const BUILTIN_CTA: &str = "Follow along for more.";
const BUILTIN_ALT: &str = "Image shared with this post.";

/// Configured filler content for the deterministic tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackDefaults {
    pub caption: String,
    pub hashtags: Vec<String>,
    pub cta: String,
    pub alt: String,
}

impl Default for FallbackDefaults {
    fn default() -> Self {
        Self {
            caption: BUILTIN_CAPTION.to_string(),
            hashtags: vec![BUILTIN_HASHTAG.to_string()],
            cta: BUILTIN_CTA.to_string(),
            alt: BUILTIN_ALT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialFields {
    pub caption: Option<String>,
    pub hashtags: Option<Vec<String>>,
    pub cta: Option<String>,
    pub alt: Option<String>,
}

/// Output of [`ComplianceDefaults::ensure`]: every field is non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompliantFields {
    pub caption: String,
    pub hashtags: Vec<String>,
    pub cta: String,
    pub alt: String,
}

pub trait ComplianceDefaults: Send + Sync {
    fn ensure(&self, partial: PartialFields) -> CompliantFields;
}

#[derive(Debug, Clone, Default)]
pub struct StaticComplianceDefaults {
    defaults: FallbackDefaults,
}

impl StaticComplianceDefaults {
    pub fn new(defaults: FallbackDefaults) -> Self {
        Self { defaults }
    }
}

impl ComplianceDefaults for StaticComplianceDefaults {
    fn ensure(&self, partial: PartialFields) -> CompliantFields {
        let pick = |value: Option<String>, configured: &str, builtin: &str| {
            value
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty())
                .or_else(|| Some(configured.trim().to_string()).filter(|text| !text.is_empty()))
                .unwrap_or_else(|| builtin.to_string())
        };
        let hashtags = partial
            .hashtags
            .map(|tags| normalize_tags(&tags))
            .filter(|tags| !tags.is_empty())
            .or_else(|| Some(normalize_tags(&self.defaults.hashtags)).filter(|t| !t.is_empty()))
            .unwrap_or_else(|| vec![BUILTIN_HASHTAG.to_string()]);

        CompliantFields {
            caption: pick(partial.caption, &self.defaults.caption, BUILTIN_CAPTION),
            hashtags,
            cta: pick(partial.cta, &self.defaults.cta, BUILTIN_CTA),
            alt: pick(partial.alt, &self.defaults.alt, BUILTIN_ALT),
        }
    }
}

/// Builds the last-resort variant and clamps it to `rules`.
///
/// Banned phrases are cut from the caption, CTA and alt text, so the result
/// passes the validator for `rules` unless the banned list consumes the
/// built-in filler itself. If configured content cannot be made to pass,
/// the built-in filler is used instead.
pub fn deterministic_variant(
    request: &GenerationRequest,
    rules: &PlatformRules,
    defaults: &dyn ComplianceDefaults,
) -> Variant {
    let fields = defaults.ensure(PartialFields {
        caption: request.existing_caption().map(str::to_string),
        ..PartialFields::default()
    });
    let variant = clamp_to_rules(request, rules, fields);
    if validate(&variant, rules).passed {
        return variant;
    }
    clamp_to_rules(
        request,
        rules,
        CompliantFields {
            caption: BUILTIN_CAPTION.to_string(),
            hashtags: vec![BUILTIN_HASHTAG.to_string()],
            cta: BUILTIN_CTA.to_string(),
            alt: BUILTIN_ALT.to_string(),
        },
    )
}

fn clamp_to_rules(
    request: &GenerationRequest,
    rules: &PlatformRules,
    fields: CompliantFields,
) -> Variant {
    let mut hashtags: Vec<String> = fields
        .hashtags
        .into_iter()
        .take(rules.max_hashtags)
        .collect();
    let banned = &rules.banned_substrings;
    let mut caption = strip_banned(&strip_markup(&fields.caption), banned);
    let max = rules.max_caption_chars.max(1);

    let suffix = |tags: &[String]| -> usize {
        tags.iter().map(|tag| tag.chars().count() + 1).sum()
    };
    while !hashtags.is_empty() && suffix(&hashtags) + 1 > max {
        hashtags.pop();
    }
    let budget = max - suffix(&hashtags);
    caption = truncate_words(&caption, budget);
    if caption.is_empty() {
        caption = truncate_words(&strip_banned(BUILTIN_CAPTION, banned), budget);
    }
    let mut alt = strip_banned(&fields.alt, banned);
    if alt.is_empty() {
        alt = strip_banned(BUILTIN_ALT, banned);
    }

    let variant = Variant {
        caption,
        alt,
        hashtags,
        cta: strip_banned(&fields.cta, banned),
        mood: request.mood().to_string(),
        style: request.style().to_string(),
        safety_level: SafetyLevel::Normal,
        nsfw: false,
    };
    debug_assert!(rendered_length(&variant) <= max);
    variant
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let body: String = tag
            .chars()
            .filter(|ch| ch.is_alphanumeric() || *ch == '_')
            .collect();
        if body.is_empty() {
            continue;
        }
        let tag = format!("#{body}");
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

fn strip_markup(text: &str) -> String {
    text.replace("```", "")
        .replace("**", "")
        .replace("__", "")
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .trim_start_matches('#')
        .trim()
        .to_string()
}

/// Removes every case-insensitive occurrence of each banned phrase, repeating
/// until a pass removes nothing, then collapses whitespace.
fn strip_banned(text: &str, banned: &[String]) -> String {
    let patterns: Vec<regex::Regex> = banned
        .iter()
        .filter(|phrase| !phrase.is_empty())
        .filter_map(|phrase| {
            RegexBuilder::new(&regex::escape(phrase))
                .case_insensitive(true)
                .build()
                .ok()
        })
        .collect();
    let mut out = text.to_string();
    loop {
        let mut next = out.clone();
        for pattern in &patterns {
            next = pattern.replace_all(&next, "").into_owned();
        }
        if next == out {
            break;
        }
        out = next;
    }
    out.split_whitespace().collect::<Vec<&str>>().join(" ")
}

fn truncate_words(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    if let Some((head, _)) = cut.rsplit_once(' ') {
        if !head.trim().is_empty() {
            cut = head.to_string();
        }
    }
    cut.trim().to_string()
}

#[cfg(test)]
mod tests {
    use plume_contracts::platforms::{validate, Platform, RuleTable};
    use plume_contracts::request::{Flavor, GenerationRequest};

    use super::{
        deterministic_variant, ComplianceDefaults, FallbackDefaults, PartialFields,
        StaticComplianceDefaults,
    };

    fn request(platform: Platform) -> GenerationRequest {
        GenerationRequest::new(Flavor::Text, platform, "friendly", "minimal", "calm")
    }

    #[test]
    fn ensure_fills_blank_fields() {
        let defaults = StaticComplianceDefaults::new(FallbackDefaults {
            caption: "  ".to_string(),
            hashtags: vec!["###".to_string()],
            cta: "Shop now".to_string(),
            alt: String::new(),
        });
        let fields = defaults.ensure(PartialFields {
            alt: Some("A red kite".to_string()),
            ..PartialFields::default()
        });
        assert!(!fields.caption.is_empty());
        assert_eq!(fields.hashtags, vec!["#update"]);
        assert_eq!(fields.cta, "Shop now");
        assert_eq!(fields.alt, "A red kite");
    }

    #[test]
    fn filler_passes_every_platform_even_with_oversized_defaults() {
        let defaults = StaticComplianceDefaults::new(FallbackDefaults {
            caption: "word ".repeat(2000),
            hashtags: (0..40).map(|i| format!("tag number {i}")).collect(),
            cta: "Read more".to_string(),
            alt: "Product photo".to_string(),
        });
        let table = RuleTable::default();
        for rules in table.list() {
            let variant = deterministic_variant(&request(rules.platform), rules, &defaults);
            let result = validate(&variant, rules);
            assert!(result.passed, "{}: {:?}", rules.platform, result.violations);
            assert!(!variant.caption.is_empty());
            assert_eq!(variant.style, "minimal");
            assert_eq!(variant.mood, "calm");
        }
    }

    #[test]
    fn banned_configured_caption_falls_back_to_builtin() {
        let defaults = StaticComplianceDefaults::new(FallbackDefaults {
            caption: "Caption here, lorem ipsum".to_string(),
            ..FallbackDefaults::default()
        });
        let table = RuleTable::default();
        let Some(rules) = table.get(Platform::X) else {
            panic!("x rules missing");
        };
        let variant = deterministic_variant(&request(Platform::X), rules, &defaults);
        assert!(validate(&variant, rules).passed);
        assert!(!variant.caption.to_lowercase().contains("lorem"));
    }

    #[test]
    fn banned_phrases_are_cut_from_the_builtin_filler() {
        let table = RuleTable::default();
        let Some(rules) = table.get(Platform::X) else {
            panic!("x rules missing");
        };
        let mut rules = rules.clone();
        rules.banned_substrings = vec![
            "POST".to_string(),
            "follow".to_string(),
            "image".to_string(),
        ];

        let variant = deterministic_variant(
            &request(Platform::X),
            &rules,
            &StaticComplianceDefaults::default(),
        );
        let result = validate(&variant, &rules);
        assert!(result.passed, "{:?}", result.violations);
        assert_eq!(variant.caption, "New is up. Take a look.");
        assert_eq!(variant.cta, "along for more.");
        assert_eq!(variant.alt, "shared with this .");
    }

    #[test]
    fn rewrite_filler_keeps_the_existing_caption() {
        let req = GenerationRequest::new(Flavor::Rewrite, Platform::Threads, "v", "s", "m")
            .with_existing_caption("Our spring menu is live");
        let table = RuleTable::default();
        let Some(rules) = table.get(Platform::Threads) else {
            panic!("threads rules missing");
        };
        let variant = deterministic_variant(&req, rules, &StaticComplianceDefaults::default());
        assert_eq!(variant.caption, "Our spring menu is live");
    }
}
