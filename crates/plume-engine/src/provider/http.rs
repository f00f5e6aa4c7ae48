use std::env;

use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;

use crate::error::ProviderError;

pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Body markers that mean the account is throttled or out of credit.
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "insufficient_quota",
    "resource_exhausted",
    "quota",
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "usage limit",
];

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn first_non_empty_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| non_empty_env(key))
}

pub fn api_base(keys: &[&str], default: &str) -> String {
    first_non_empty_env(keys)
        .map(|value| value.trim_end_matches('/').to_string())
        .unwrap_or_else(|| default.to_string())
}

pub fn is_rate_limit_error(status: u16, body: &str) -> bool {
    if status == STATUS_TOO_MANY_REQUESTS {
        return true;
    }
    let lower = body.to_lowercase();
    RATE_LIMIT_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

/// Sends `request` and returns the JSON body of a 2xx answer.
pub async fn send_json(provider: &str, request: RequestBuilder) -> Result<Value, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|err| ProviderError::transport(provider, format!("request failed: {err}")))?;
    let status = response.status();
    let body = response.text().await.map_err(|err| {
        ProviderError::transport(provider, format!("response body read failed: {err}"))
    })?;
    response_json_or_error(provider, status, &body)
}

pub fn response_json_or_error(
    provider: &str,
    status: StatusCode,
    body: &str,
) -> Result<Value, ProviderError> {
    let code = status.as_u16();
    if !status.is_success() {
        let message = format!("request failed ({code}): {}", truncate_text(body, 512));
        if is_rate_limit_error(code, body) {
            return Err(ProviderError::quota(provider, message));
        }
        return Err(ProviderError::transport(provider, message));
    }
    serde_json::from_str(body).map_err(|err| {
        ProviderError::transport(provider, format!("returned invalid JSON payload: {err}"))
    })
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
