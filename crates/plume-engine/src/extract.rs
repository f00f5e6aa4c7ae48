use plume_contracts::variants::strip_code_fence;
use serde_json::{Map, Value};

/// First JSON object in model text: the whole (unfenced) text, or the span
/// between the first `{` and the last `}`.
pub fn extract_json_object_from_text(text: &str) -> Option<Map<String, Value>> {
    let raw = strip_code_fence(text);
    if raw.trim().is_empty() {
        return None;
    }
    let mut candidates = vec![raw.clone()];
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            candidates.push(raw[start..=end].to_string());
        }
    }
    for candidate in candidates {
        if let Ok(parsed) = serde_json::from_str::<Value>(&candidate) {
            if let Some(object) = parsed.as_object() {
                return Some(object.clone());
            }
        }
    }
    None
}

/// Clean list of short strings from an array or a comma separated string.
pub fn coerce_text_list(value: Option<&Value>, max_items: usize, max_chars: usize) -> Vec<String> {
    let Some(value) = value else {
        return Vec::new();
    };
    let mut raw_items: Vec<String> = Vec::new();
    match value {
        Value::Array(rows) => {
            for row in rows {
                if let Some(text) = row.as_str() {
                    raw_items.push(text.to_string());
                }
            }
        }
        Value::String(text) => {
            raw_items.extend(text.split(',').map(str::to_string));
        }
        _ => {}
    }

    let mut cleaned: Vec<String> = Vec::new();
    for row in raw_items {
        let mut text = row.split_whitespace().collect::<Vec<&str>>().join(" ");
        if text.is_empty() {
            continue;
        }
        if text.chars().count() > max_chars {
            text = text
                .chars()
                .take(max_chars)
                .collect::<String>()
                .trim()
                .to_string();
        }
        if cleaned
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(&text))
        {
            continue;
        }
        cleaned.push(text);
        if cleaned.len() >= max_items {
            break;
        }
    }
    cleaned
}

/// Single whitespace-collapsed string field, `None` when blank.
pub fn coerce_text(value: Option<&Value>, max_chars: usize) -> Option<String> {
    let text = value
        .and_then(Value::as_str)?
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ");
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(max_chars).collect::<String>().trim().to_string())
}
