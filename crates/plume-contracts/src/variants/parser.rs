use serde_json::{Map, Value};
use thiserror::Error;

use super::{SafetyLevel, Variant, VARIANTS_PER_BATCH};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("provider output is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("provider output is not a JSON array of variants")]
    NotAnArray,
    #[error("provider returned an empty variant array")]
    Empty,
    #[error("variant {index} is missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },
    #[error("variant {index} has an invalid `{field}` value")]
    InvalidField { index: usize, field: &'static str },
}

/// Parse raw provider text into variants.
///
/// Accepts a bare JSON array, the same array inside a markdown code fence,
/// an object carrying the array under `variants`, or an array embedded in
/// surrounding prose. At most [`VARIANTS_PER_BATCH`] variants are kept; a
/// shorter array is returned as-is.
pub fn parse_variants(text: &str) -> Result<Vec<Variant>, ParseError> {
    let rows = match parse_json_payload(text)? {
        Value::Array(rows) => rows,
        Value::Object(mut obj) => match obj.remove("variants") {
            Some(Value::Array(rows)) => rows,
            _ => return Err(ParseError::NotAnArray),
        },
        _ => return Err(ParseError::NotAnArray),
    };
    if rows.is_empty() {
        return Err(ParseError::Empty);
    }
    rows.iter()
        .take(VARIANTS_PER_BATCH)
        .enumerate()
        .map(|(index, row)| parse_variant(index, row))
        .collect()
}

pub fn strip_code_fence(text: &str) -> String {
    let raw = text.trim();
    if !(raw.starts_with("```") && raw.ends_with("```")) {
        return raw.to_string();
    }
    let lines: Vec<&str> = raw.lines().collect();
    if lines.len() < 2 {
        return raw.to_string();
    }
    let mut body = lines[1..lines.len() - 1].join("\n").trim().to_string();
    if body.to_ascii_lowercase().starts_with("json") {
        body = body[4..].trim().to_string();
    }
    body
}

fn parse_json_payload(text: &str) -> Result<Value, ParseError> {
    let raw = strip_code_fence(text);
    let first_error = match serde_json::from_str::<Value>(&raw) {
        Ok(value) => return Ok(value),
        Err(err) => err.to_string(),
    };
    if let (Some(start), Some(end)) = (raw.find('['), raw.rfind(']')) {
        if end > start {
            if let Ok(value) = serde_json::from_str::<Value>(&raw[start..=end]) {
                return Ok(value);
            }
        }
    }
    Err(ParseError::InvalidJson(first_error))
}

fn parse_variant(index: usize, row: &Value) -> Result<Variant, ParseError> {
    let Some(obj) = row.as_object() else {
        return Err(ParseError::InvalidField {
            index,
            field: "variant",
        });
    };

    let safety_raw = required_str(obj, index, "safety_level")?;
    let safety_level = safety_raw
        .parse::<SafetyLevel>()
        .map_err(|_| ParseError::InvalidField {
            index,
            field: "safety_level",
        })?;

    Ok(Variant {
        caption: required_str(obj, index, "caption")?.trim().to_string(),
        alt: required_str(obj, index, "alt")?.trim().to_string(),
        hashtags: parse_hashtags(obj, index)?,
        cta: required_str(obj, index, "cta")?.trim().to_string(),
        mood: required_str(obj, index, "mood")?.trim().to_string(),
        style: required_str(obj, index, "style")?.trim().to_string(),
        safety_level,
        nsfw: parse_flag(obj, index, "nsfw")?,
    })
}

fn required_str<'a>(
    obj: &'a Map<String, Value>,
    index: usize,
    field: &'static str,
) -> Result<&'a str, ParseError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(ParseError::MissingField { index, field }),
        Some(Value::String(text)) => Ok(text.as_str()),
        Some(_) => Err(ParseError::InvalidField { index, field }),
    }
}

fn parse_flag(
    obj: &Map<String, Value>,
    index: usize,
    field: &'static str,
) -> Result<bool, ParseError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(ParseError::MissingField { index, field }),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Ok(true),
            "false" | "no" => Ok(false),
            _ => Err(ParseError::InvalidField { index, field }),
        },
        Some(_) => Err(ParseError::InvalidField { index, field }),
    }
}

fn parse_hashtags(obj: &Map<String, Value>, index: usize) -> Result<Vec<String>, ParseError> {
    let field = "hashtags";
    let raw_items: Vec<String> = match obj.get(field) {
        None | Some(Value::Null) => return Err(ParseError::MissingField { index, field }),
        Some(Value::Array(rows)) => {
            let mut items = Vec::with_capacity(rows.len());
            for row in rows {
                let Some(text) = row.as_str() else {
                    return Err(ParseError::InvalidField { index, field });
                };
                items.push(text.to_string());
            }
            items
        }
        Some(Value::String(text)) => text
            .split(|ch: char| ch == ',' || ch.is_whitespace())
            .map(str::to_string)
            .collect(),
        Some(_) => return Err(ParseError::InvalidField { index, field }),
    };

    let mut tags = Vec::new();
    for item in raw_items {
        let body = item.trim().trim_start_matches('#').trim();
        if body.is_empty() {
            continue;
        }
        tags.push(format!("#{body}"));
    }
    Ok(tags)
}
