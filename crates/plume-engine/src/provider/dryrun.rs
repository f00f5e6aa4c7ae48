use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use super::{CallPurpose, CaptionProvider, ProviderRequest, RawResponse};
use crate::error::ProviderError;

const OPENERS: [&str; 5] = [
    "{base}.",
    "Today: {base}. Feeling {mood}.",
    "{mood} energy only. {base}!",
    "Quick note from us: {base}.",
    "If you needed a sign, this is it. {base}.",
];

/// Offline adapter that answers every purpose with well-formed JSON derived
/// from the request metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunProvider;

#[async_trait]
impl CaptionProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<RawResponse, ProviderError> {
        let payload = match request.purpose {
            CallPurpose::Variants => variants_payload(&request.metadata),
            CallPurpose::Ranking => ranking_payload(&request.metadata),
            CallPurpose::Titles => titles_payload(&request.metadata),
            CallPurpose::Facts => json!({
                "objects": ["subject"],
                "setting": "indoors",
                "mood": "neutral",
            }),
        };
        let text = serde_json::to_string(&payload)
            .map_err(|err| ProviderError::transport("dryrun", err.to_string()))?;
        RawResponse::from_text("dryrun", text, Some(request.model.clone()))
    }
}

fn meta_str<'a>(metadata: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn meta_usize(metadata: &Map<String, Value>, key: &str, default: usize) -> usize {
    metadata
        .get(key)
        .and_then(Value::as_u64)
        .map(|value| value as usize)
        .unwrap_or(default)
}

fn variants_payload(metadata: &Map<String, Value>) -> Value {
    let max_chars = meta_usize(metadata, "max_caption_chars", 280).max(1);
    let max_hashtags = meta_usize(metadata, "max_hashtags", 3);
    let count = meta_usize(metadata, "count", 5).max(1);
    let style = meta_str(metadata, "style").unwrap_or("plain");
    let mood = meta_str(metadata, "mood").unwrap_or("upbeat");

    let facts = metadata.get("facts").cloned().unwrap_or(Value::Null);
    let objects: Vec<String> = facts
        .get("objects")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let setting = facts.get("setting").and_then(Value::as_str);

    let base = if !objects.is_empty() {
        let mut text = objects.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
        if let Some(setting) = setting {
            text = format!("{text} at the {setting}");
        }
        text
    } else {
        meta_str(metadata, "existing_caption")
            .or_else(|| meta_str(metadata, "theme"))
            .unwrap_or("something new is coming")
            .to_string()
    };
    let alt = if objects.is_empty() {
        format!("Illustration for: {base}")
    } else {
        format!(
            "Photo of {}{}",
            objects.join(", "),
            setting.map(|s| format!(" in the {s}")).unwrap_or_default()
        )
    };

    let hashtags: Vec<String> = [style, mood]
        .iter()
        .map(|word| {
            word.chars()
                .filter(|ch| ch.is_alphanumeric())
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .map(|word| format!("#{word}"))
        .take(max_hashtags.min(2))
        .collect();
    let suffix: usize = hashtags.iter().map(|tag| tag.chars().count() + 1).sum();
    let budget = max_chars.saturating_sub(suffix).max(1);

    let rows: Vec<Value> = OPENERS
        .iter()
        .cycle()
        .take(count)
        .map(|template| {
            let caption = template
                .replace("{base}", &capitalize(&base))
                .replace("{mood}", mood);
            json!({
                "caption": clamp_chars(&capitalize(&caption), budget),
                "alt": alt,
                "hashtags": hashtags,
                "cta": "Tell us what you think.",
                "mood": mood,
                "style": style,
                "safety_level": "normal",
                "nsfw": false,
            })
        })
        .collect();
    Value::Array(rows)
}

fn ranking_payload(metadata: &Map<String, Value>) -> Value {
    let count = meta_usize(metadata, "count", 1).max(1);
    let scores: Vec<f64> = (0..count).map(|idx| 9.0 - idx as f64 * 0.5).collect();
    json!({
        "winner_index": 0,
        "scores": scores,
        "reason": "dryrun ranks variants in generation order",
    })
}

fn titles_payload(metadata: &Map<String, Value>) -> Value {
    let caption = meta_str(metadata, "caption").unwrap_or("Untitled");
    let words: Vec<&str> = caption.split_whitespace().take(5).collect();
    let short = words.join(" ");
    json!({
        "titles": [
            clamp_chars(&short, 60),
            format!("{} #{}", clamp_chars(&short, 50), short_id(caption)),
        ]
    })
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn clamp_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect::<String>().trim().to_string()
}

fn short_id(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(&hasher.finalize()[..2])
}
