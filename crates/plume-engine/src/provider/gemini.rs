use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::http::{api_base, first_non_empty_env, send_json};
use super::{CaptionProvider, ProviderRequest, RawResponse};
use crate::error::ProviderError;

const GEMINI_DEFAULT_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    api_base: String,
    http: Client,
}

impl GeminiProvider {
    pub fn new(http: Client) -> Self {
        Self {
            api_base: api_base(&["GEMINI_API_BASE"], GEMINI_DEFAULT_BASE),
            http,
        }
    }

    fn api_key() -> Option<String> {
        first_non_empty_env(&["GEMINI_API_KEY", "GOOGLE_API_KEY"])
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn payload(request: &ProviderRequest) -> Value {
        let mut parts = Vec::new();
        if let Some(image) = request.image.as_ref() {
            parts.push(json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": image.base64(),
                }
            }));
        }
        parts.push(json!({ "text": request.prompt }));
        json!({
            "systemInstruction": {"parts": [{"text": request.system}]},
            "contents": [{"role": "user", "parts": parts}],
            "generationConfig": {
                "maxOutputTokens": request.max_output_tokens,
                "responseMimeType": "application/json",
            },
        })
    }
}

#[async_trait]
impl CaptionProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<RawResponse, ProviderError> {
        let Some(api_key) = Self::api_key() else {
            return Err(ProviderError::not_configured("gemini", "GEMINI_API_KEY"));
        };
        let endpoint = self.endpoint_for_model(&request.model);
        tracing::debug!(
            purpose = %request.purpose,
            model = %request.model,
            "sending gemini request"
        );
        let response = send_json(
            "gemini",
            self.http
                .post(endpoint)
                .query(&[("key", api_key)])
                .json(&Self::payload(request)),
        )
        .await?;
        if let Some(reason) = blocked_reason(&response) {
            return Err(ProviderError::transport(
                "gemini",
                format!("prompt blocked: {reason}"),
            ));
        }
        RawResponse::from_text("gemini", extract_text(&response), Some(request.model.clone()))
    }
}

fn blocked_reason(response: &Value) -> Option<String> {
    response
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn extract_text(response: &Value) -> String {
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut out = Vec::new();
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    out.push(text.trim().to_string());
                }
            }
        }
        if !out.is_empty() {
            break;
        }
    }
    out.join("\n")
}
