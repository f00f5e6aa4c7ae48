use std::fmt;

use plume_contracts::platforms::{Platform, PlatformRules, ValidationResult};
use plume_contracts::request::{Flavor, GenerationRequest};
use plume_contracts::variants::{ParseError, Variant, VARIANTS_PER_BATCH};
use serde_json::{json, Map, Value};

pub const MAX_FIX_HINT_LINES: usize = 6;
pub const MAX_TITLES: usize = 3;

const CAPTION_SYSTEM: &str = "You write social media captions. You follow platform limits \
exactly and answer with JSON only, no commentary.";
const RANKING_SYSTEM: &str = "You are a social media editor choosing the strongest caption. \
Answer with JSON only.";
const FACTS_SYSTEM: &str = "You describe photos factually for caption writers. Answer with JSON only.";

/// Text and structured context for one provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptPayload {
    pub system: String,
    pub prompt: String,
    pub metadata: Map<String, Value>,
}

pub struct PromptBuilder;

impl PromptBuilder {
    pub fn variants(request: &GenerationRequest, rules: &PlatformRules) -> PromptPayload {
        let platform = request.platform();
        let mut lines = vec![format!(
            "Write {VARIANTS_PER_BATCH} distinct caption variants for {platform}. {}",
            flavor_instruction(request.flavor())
        )];
        lines.extend(tone_lines(request));
        if let Some(theme) = request.theme() {
            lines.push(format!("THEME: {theme}"));
        }
        if let Some(context) = request.context() {
            lines.push(format!("CONTEXT: {context}"));
        }
        if let Some(caption) = request.existing_caption() {
            lines.push(format!("ORIGINAL CAPTION: {caption}"));
        }
        if let Some(facts) = request.image_facts() {
            lines.push(String::new());
            lines.push("IMAGE FACTS:".to_string());
            if !facts.objects.is_empty() {
                lines.push(format!("- objects: {}", facts.objects.join(", ")));
            }
            if let Some(setting) = facts.setting.as_deref() {
                lines.push(format!("- setting: {setting}"));
            }
            if let Some(mood) = facts.mood.as_deref() {
                lines.push(format!("- mood: {mood}"));
            }
            lines.push(
                "Name the main objects and the setting in each caption or its alt text."
                    .to_string(),
            );
        }

        lines.push(String::new());
        lines.push("CONSTRAINTS:".to_string());
        lines.push(format!(
            "- caption plus space-separated hashtags must fit in {} characters",
            rules.max_caption_chars
        ));
        if rules.max_hashtags == 0 {
            lines.push("- no hashtags; return an empty hashtags array".to_string());
        } else {
            lines.push(format!(
                "- at most {} hashtags, each a single #word",
                rules.max_hashtags
            ));
        }
        if rules.require_alt {
            lines.push("- alt text describing the image is required".to_string());
        }
        if rules.forbid_markdown {
            lines.push("- plain text only, no markdown".to_string());
        }
        if !rules.allow_explicit || !request.nsfw() {
            lines.push("- safety_level must not be explicit".to_string());
        }
        if !rules.banned_substrings.is_empty() {
            lines.push(format!("- never use: {}", rules.banned_substrings.join(", ")));
        }
        lines.push(String::new());
        lines.push(
            "Return ONLY a JSON array of objects with keys: caption, alt, hashtags (array), \
cta, mood, style, safety_level (normal|suggestive|explicit), nsfw (boolean)."
                .to_string(),
        );
        if let Some(hint) = request.fix_hint() {
            lines.push(String::new());
            lines.push("Fix:".to_string());
            lines.push(hint.to_string());
        }

        let mut metadata = base_metadata(request, "variants");
        metadata.insert(
            "max_caption_chars".to_string(),
            json!(rules.max_caption_chars),
        );
        metadata.insert("max_hashtags".to_string(), json!(rules.max_hashtags));
        metadata.insert("allow_explicit".to_string(), json!(rules.allow_explicit));
        metadata.insert("require_alt".to_string(), json!(rules.require_alt));
        metadata.insert("count".to_string(), json!(VARIANTS_PER_BATCH));
        if let Some(hint) = request.fix_hint() {
            metadata.insert("fix_hint".to_string(), json!(hint));
        }

        PromptPayload {
            system: CAPTION_SYSTEM.to_string(),
            prompt: lines.join("\n"),
            metadata,
        }
    }

    pub fn ranking(request: &GenerationRequest, variants: &[Variant]) -> PromptPayload {
        let mut lines = vec![format!(
            "Rank these {} caption variants for {}.",
            variants.len(),
            request.platform()
        )];
        lines.extend(tone_lines(request));
        lines.push(String::new());
        for (index, variant) in variants.iter().enumerate() {
            lines.push(format!("{index}: {}", variant.rendered_text()));
        }
        lines.push(String::new());
        lines.push(format!(
            "Return ONLY a JSON object: {{\"winner_index\": <0-{}>, \"scores\": [{} numbers from 0 to 10 in the same order], \"reason\": \"<one sentence>\"}}.",
            variants.len().saturating_sub(1),
            variants.len()
        ));

        let mut metadata = base_metadata(request, "ranking");
        metadata.insert("count".to_string(), json!(variants.len()));
        PromptPayload {
            system: RANKING_SYSTEM.to_string(),
            prompt: lines.join("\n"),
            metadata,
        }
    }

    pub fn titles(request: &GenerationRequest, chosen: &Variant) -> PromptPayload {
        let mut lines = vec![format!(
            "Suggest up to {MAX_TITLES} short titles (under 60 characters) for a {} post with this caption:",
            request.platform()
        )];
        lines.push(chosen.caption.clone());
        lines.extend(tone_lines(request));
        lines.push("Return ONLY a JSON object: {\"titles\": [\"...\"]}.".to_string());

        let mut metadata = base_metadata(request, "titles");
        metadata.insert("caption".to_string(), json!(chosen.caption));
        PromptPayload {
            system: CAPTION_SYSTEM.to_string(),
            prompt: lines.join("\n"),
            metadata,
        }
    }

    pub fn facts() -> PromptPayload {
        let mut metadata = Map::new();
        metadata.insert("purpose".to_string(), json!("facts"));
        PromptPayload {
            system: FACTS_SYSTEM.to_string(),
            prompt: "List what this image shows. Return ONLY a JSON object: \
{\"objects\": [up to 6 concrete nouns, most prominent first], \"setting\": \"<where>\", \"mood\": \"<one or two words>\"}."
                .to_string(),
            metadata,
        }
    }
}

fn flavor_instruction(flavor: Flavor) -> &'static str {
    match flavor {
        Flavor::Image => "Describe the photo below for the post.",
        Flavor::Rewrite => "Rewrite the original caption; keep its meaning.",
        Flavor::Text => "Write from the theme and context below.",
    }
}

/// Tone block. Emitted identically on the first attempt and on the retry.
fn tone_lines(request: &GenerationRequest) -> Vec<String> {
    vec![
        format!("VOICE: {}", request.voice()),
        format!("STYLE: {}", request.style()),
        format!("MOOD: {}", request.mood()),
    ]
}

fn base_metadata(request: &GenerationRequest, purpose: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("purpose".to_string(), json!(purpose));
    metadata.insert("flavor".to_string(), json!(request.flavor()));
    metadata.insert("platform".to_string(), json!(request.platform()));
    metadata.insert("voice".to_string(), json!(request.voice()));
    metadata.insert("style".to_string(), json!(request.style()));
    metadata.insert("mood".to_string(), json!(request.mood()));
    metadata.insert("nsfw".to_string(), json!(request.nsfw()));
    if let Some(theme) = request.theme() {
        metadata.insert("theme".to_string(), json!(theme));
    }
    if let Some(caption) = request.existing_caption() {
        metadata.insert("existing_caption".to_string(), json!(caption));
    }
    if let Some(facts) = request.image_facts() {
        metadata.insert("facts".to_string(), json!(facts));
    }
    metadata
}

/// Corrective feedback appended to a retry prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixHint {
    lines: Vec<String>,
}

impl FixHint {
    /// Distinct violations across the batch, most frequent first.
    pub fn from_validation(platform: Platform, results: &[ValidationResult]) -> Self {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for result in results {
            let mut seen_here: Vec<String> = Vec::new();
            for violation in &result.violations {
                let reason = violation
                    .reason
                    .split(" (")
                    .next()
                    .unwrap_or(&violation.reason)
                    .trim()
                    .to_string();
                if seen_here.contains(&reason) {
                    continue;
                }
                seen_here.push(reason.clone());
                match counts.iter_mut().find(|(existing, _)| *existing == reason) {
                    Some((_, count)) => *count += 1,
                    None => counts.push((reason, 1)),
                }
            }
        }
        counts.sort_by(|left, right| right.1.cmp(&left.1));

        let total = results.len();
        let mut lines = vec![format!(
            "The previous batch broke the {platform} rules. Correct these problems:"
        )];
        lines.extend(
            counts
                .into_iter()
                .take(MAX_FIX_HINT_LINES)
                .map(|(reason, count)| format!("- {reason} ({count} of {total} variants)")),
        );
        Self { lines }
    }

    pub fn from_parse_error(err: &ParseError) -> Self {
        Self {
            lines: vec![
                format!("The previous answer could not be used: {err}."),
                format!(
                    "- reply with ONLY a JSON array of {VARIANTS_PER_BATCH} objects and every required key"
                ),
            ],
        }
    }

    pub fn from_missing_facts(missing: &[String]) -> Self {
        let mut lines = vec![
            "The previous captions ignored what the photo shows. Mention these image details by name:"
                .to_string(),
        ];
        lines.extend(
            missing
                .iter()
                .take(MAX_FIX_HINT_LINES)
                .map(|fact| format!("- {fact}")),
        );
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl fmt::Display for FixHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use plume_contracts::facts::ImageFacts;
    use plume_contracts::platforms::{validate, Platform, RuleTable};
    use plume_contracts::request::{Flavor, GenerationRequest};
    use plume_contracts::variants::{ParseError, SafetyLevel, Variant};

    use super::{FixHint, PromptBuilder, MAX_FIX_HINT_LINES};

    fn variant(caption: &str, hashtags: &[&str]) -> Variant {
        Variant {
            caption: caption.to_string(),
            alt: "alt".to_string(),
            hashtags: hashtags.iter().map(|tag| tag.to_string()).collect(),
            cta: String::new(),
            mood: "calm".to_string(),
            style: "minimal".to_string(),
            safety_level: SafetyLevel::Normal,
            nsfw: false,
        }
    }

    fn tone_block(prompt: &str) -> Vec<&str> {
        prompt
            .lines()
            .filter(|line| {
                ["VOICE:", "STYLE:", "MOOD:"]
                    .iter()
                    .any(|label| line.starts_with(label))
            })
            .collect()
    }

    #[test]
    fn retry_prompt_keeps_tone_lines_and_adds_fix_section() {
        let table = RuleTable::default();
        let Some(rules) = table.get(Platform::X) else {
            panic!("x rules missing");
        };
        let request = GenerationRequest::new(
            Flavor::Text,
            Platform::X,
            "wry, first person",
            "minimal  lowercase",
            "bittersweet",
        )
        .with_theme("last day at the studio");
        let first = PromptBuilder::variants(&request, rules);
        assert!(!first.prompt.contains("Fix:"));

        let long = variant(&"a".repeat(300), &[]);
        let hint = FixHint::from_validation(Platform::X, &[validate(&long, rules)]);
        let retry = PromptBuilder::variants(&request.with_fix_hint(hint.to_string()), rules);

        assert_eq!(tone_block(&first.prompt), tone_block(&retry.prompt));
        assert!(tone_block(&retry.prompt).contains(&"STYLE: minimal  lowercase"));
        assert!(retry.prompt.contains("\nFix:\n"));
        assert!(retry
            .prompt
            .contains("caption exceeded 280 characters on platform x"));
        assert_eq!(retry.metadata["style"], first.metadata["style"]);
    }

    #[test]
    fn image_prompt_lists_facts_not_bytes() {
        let table = RuleTable::default();
        let Some(rules) = table.get(Platform::Instagram) else {
            panic!("instagram rules missing");
        };
        let request = GenerationRequest::new(Flavor::Image, Platform::Instagram, "v", "s", "m")
            .with_image_facts(ImageFacts {
                objects: vec!["espresso cup".to_string(), "croissant".to_string()],
                setting: Some("cafe terrace".to_string()),
                mood: Some("cozy".to_string()),
            });
        let payload = PromptBuilder::variants(&request, rules);
        assert!(payload.prompt.contains("IMAGE FACTS:"));
        assert!(payload.prompt.contains("- objects: espresso cup, croissant"));
        assert!(payload.prompt.contains("- setting: cafe terrace"));
        assert_eq!(payload.metadata["facts"]["setting"], "cafe terrace");
    }

    #[test]
    fn validation_hint_orders_by_frequency_and_caps_lines() {
        let table = RuleTable::default();
        let Some(rules) = table.get(Platform::Reddit) else {
            panic!("reddit rules missing");
        };
        let mut results = Vec::new();
        for i in 0..5 {
            let tags: Vec<String> = (0..=i).map(|n| format!("bad tag{n}")).collect();
            let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
            results.push(validate(
                &variant(&format!("{} upvote if you agree **now**", "x".repeat(400)), &tags),
                rules,
            ));
        }
        let hint = FixHint::from_validation(Platform::Reddit, &results);
        let lines = hint.lines();
        assert!(lines.len() <= MAX_FIX_HINT_LINES + 1);
        assert!(lines[1].starts_with("- caption exceeded 300 characters on platform reddit"));
        assert!(lines[1].ends_with("(5 of 5 variants)"));
    }

    #[test]
    fn parse_and_fact_hints_are_worded_differently() {
        let parse = FixHint::from_parse_error(&ParseError::NotAnArray).to_string();
        let facts = FixHint::from_missing_facts(&["red bench".to_string()]).to_string();
        assert!(parse.contains("JSON array"));
        assert!(facts.contains("- red bench"));
        assert!(!facts.contains("characters"));
        assert_ne!(parse, facts);
    }
}
