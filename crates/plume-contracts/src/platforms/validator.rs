use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::PlatformRules;
use crate::variants::{SafetyLevel, Variant};

static HASHTAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[\p{L}\p{N}_]+$").expect("hashtag pattern compiles"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    EmptyCaption,
    CaptionTooLong,
    TooManyHashtags,
    HashtagFormat,
    BannedSubstring,
    MissingAlt,
    ExplicitNotAllowed,
    Markdown,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::EmptyCaption => "empty_caption",
            RuleId::CaptionTooLong => "caption_too_long",
            RuleId::TooManyHashtags => "too_many_hashtags",
            RuleId::HashtagFormat => "hashtag_format",
            RuleId::BannedSubstring => "banned_substring",
            RuleId::MissingAlt => "missing_alt",
            RuleId::ExplicitNotAllowed => "explicit_not_allowed",
            RuleId::Markdown => "markdown",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: RuleId,
    pub reason: String,
}

impl Violation {
    fn new(rule: RuleId, reason: String) -> Self {
        Self { rule, reason }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationResult {
    pub passed: bool,
    pub violations: Vec<Violation>,
}

/// Validation of a whole batch. Passes only if every variant passes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchValidation {
    pub results: Vec<ValidationResult>,
}

impl BatchValidation {
    pub fn passed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|result| result.passed)
    }

    pub fn compliant_indices(&self) -> Vec<usize> {
        self.results
            .iter()
            .enumerate()
            .filter(|(_, result)| result.passed)
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn violation_count(&self) -> usize {
        self.results.iter().map(|result| result.violations.len()).sum()
    }
}

/// Length the network counts: caption plus the space-joined hashtag suffix.
pub fn rendered_length(variant: &Variant) -> usize {
    let caption = variant.caption.trim().chars().count();
    if variant.hashtags.is_empty() {
        return caption;
    }
    let tags: usize = variant.hashtags.iter().map(|tag| tag.chars().count()).sum();
    caption + variant.hashtags.len() + tags
}

pub fn validate(variant: &Variant, rules: &PlatformRules) -> ValidationResult {
    let mut violations = Vec::new();
    let platform = rules.platform;

    if variant.caption.trim().is_empty() {
        violations.push(Violation::new(
            RuleId::EmptyCaption,
            format!("caption was empty on platform {platform}"),
        ));
    }

    let length = rendered_length(variant);
    if length > rules.max_caption_chars {
        violations.push(Violation::new(
            RuleId::CaptionTooLong,
            format!(
                "caption exceeded {} characters on platform {platform} ({length} including hashtags)",
                rules.max_caption_chars
            ),
        ));
    }

    if variant.hashtags.len() > rules.max_hashtags {
        let reason = if rules.max_hashtags == 0 {
            format!("hashtags are not allowed on platform {platform}")
        } else {
            format!(
                "used {} hashtags; platform {platform} allows at most {}",
                variant.hashtags.len(),
                rules.max_hashtags
            )
        };
        violations.push(Violation::new(RuleId::TooManyHashtags, reason));
    }

    for tag in &variant.hashtags {
        if !HASHTAG_PATTERN.is_match(tag) {
            violations.push(Violation::new(
                RuleId::HashtagFormat,
                format!("hashtag `{tag}` must be a single #word without spaces or punctuation"),
            ));
        }
    }

    let haystack = format!("{}\n{}\n{}", variant.caption, variant.cta, variant.alt).to_lowercase();
    for banned in &rules.banned_substrings {
        let needle = banned.to_lowercase();
        if !needle.is_empty() && haystack.contains(&needle) {
            violations.push(Violation::new(
                RuleId::BannedSubstring,
                format!("contained banned phrase `{banned}`"),
            ));
        }
    }

    if rules.require_alt && variant.alt.trim().is_empty() {
        violations.push(Violation::new(
            RuleId::MissingAlt,
            "alt text was empty".to_string(),
        ));
    }

    if !rules.allow_explicit && variant.safety_level == SafetyLevel::Explicit {
        violations.push(Violation::new(
            RuleId::ExplicitNotAllowed,
            format!("explicit content is not allowed on platform {platform}"),
        ));
    }

    if rules.forbid_markdown && looks_like_markdown(&variant.caption) {
        violations.push(Violation::new(
            RuleId::Markdown,
            "caption used markdown formatting; plain text only".to_string(),
        ));
    }

    ValidationResult {
        passed: violations.is_empty(),
        violations,
    }
}

pub fn validate_batch(variants: &[Variant], rules: &PlatformRules) -> BatchValidation {
    BatchValidation {
        results: variants
            .iter()
            .map(|variant| validate(variant, rules))
            .collect(),
    }
}

fn looks_like_markdown(text: &str) -> bool {
    if text.contains("**") || text.contains("__") || text.contains("```") {
        return true;
    }
    text.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with("# ") || trimmed.starts_with("## ") || trimmed.starts_with("- [")
    })
}

#[cfg(test)]
mod tests {
    use super::{rendered_length, validate, validate_batch, RuleId};
    use crate::platforms::{Platform, RuleTable};
    use crate::variants::{SafetyLevel, Variant};

    fn variant(caption: &str, hashtags: &[&str]) -> Variant {
        Variant {
            caption: caption.to_string(),
            alt: "A mug of coffee on a desk".to_string(),
            hashtags: hashtags.iter().map(|tag| (*tag).to_string()).collect(),
            cta: "Order today".to_string(),
            mood: "calm".to_string(),
            style: "minimal".to_string(),
            safety_level: SafetyLevel::Normal,
            nsfw: false,
        }
    }

    fn rules(platform: Platform) -> crate::platforms::PlatformRules {
        RuleTable::default()
            .get(platform)
            .cloned()
            .unwrap_or_else(|| panic!("missing rules for {platform}"))
    }

    #[test]
    fn compliant_variant_passes() {
        let result = validate(&variant("Morning fuel.", &["#coffee"]), &rules(Platform::X));
        assert!(result.passed);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn length_counts_hashtag_suffix() {
        let caption = "a".repeat(270);
        let item = variant(&caption, &["#coffee", "#morning"]);
        assert_eq!(rendered_length(&item), 270 + 2 + 7 + 8);

        let result = validate(&item, &rules(Platform::X));
        assert!(!result.passed);
        assert_eq!(result.violations[0].rule, RuleId::CaptionTooLong);
        assert!(result.violations[0]
            .reason
            .starts_with("caption exceeded 280 characters on platform x"));
    }

    #[test]
    fn hashtag_rules_cover_count_and_format() {
        let item = variant("Short.", &["#one", "#two", "#three", "#not valid"]);
        let result = validate(&item, &rules(Platform::X));
        let ids: Vec<RuleId> = result.violations.iter().map(|v| v.rule).collect();
        assert!(ids.contains(&RuleId::TooManyHashtags));
        assert!(ids.contains(&RuleId::HashtagFormat));

        let reddit = validate(&variant("Short.", &["#one"]), &rules(Platform::Reddit));
        assert_eq!(reddit.violations[0].reason, "hashtags are not allowed on platform reddit");
    }

    #[test]
    fn banned_alt_explicit_and_markdown_rules() {
        let mut item = variant("**Lorem ipsum** launch", &[]);
        item.alt = "  ".to_string();
        item.safety_level = SafetyLevel::Explicit;
        let result = validate(&item, &rules(Platform::Instagram));
        let ids: Vec<RuleId> = result.violations.iter().map(|v| v.rule).collect();
        assert!(ids.contains(&RuleId::BannedSubstring));
        assert!(ids.contains(&RuleId::MissingAlt));
        assert!(ids.contains(&RuleId::ExplicitNotAllowed));
        assert!(ids.contains(&RuleId::Markdown));

        let mut adult = variant("New set is up", &["#new"]);
        adult.safety_level = SafetyLevel::Explicit;
        assert!(validate(&adult, &rules(Platform::Onlyfans)).passed);
    }

    #[test]
    fn one_bad_variant_fails_the_batch() {
        let batch = vec![
            variant("Fine.", &[]),
            variant(&"b".repeat(400), &[]),
            variant("Also fine.", &[]),
        ];
        let validation = validate_batch(&batch, &rules(Platform::X));
        assert!(!validation.passed());
        assert_eq!(validation.compliant_indices(), vec![0, 2]);
        assert_eq!(validation.violation_count(), 1);
    }

    #[test]
    fn empty_batch_never_passes() {
        assert!(!validate_batch(&[], &rules(Platform::X)).passed());
    }
}
