use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::http::{api_base, first_non_empty_env, non_empty_env, send_json};
use super::{CaptionProvider, ProviderRequest, RawResponse};
use crate::error::ProviderError;

const OPENAI_DEFAULT_BASE: &str = "https://api.openai.com/v1";
const XAI_DEFAULT_BASE: &str = "https://api.x.ai/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Api {
    Responses,
    ChatCompletions,
}

/// OpenAI Responses API adapter, or Chat Completions for compatible backends.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    name: String,
    api_base: String,
    key_env: String,
    api: Api,
    http: Client,
}

impl OpenAiProvider {
    pub fn new(http: Client) -> Self {
        Self {
            name: "openai".to_string(),
            api_base: api_base(&["OPENAI_API_BASE", "OPENAI_BASE_URL"], OPENAI_DEFAULT_BASE),
            key_env: "OPENAI_API_KEY".to_string(),
            api: Api::Responses,
            http,
        }
    }

    /// A Chat Completions backend reachable at `api_base`, keyed by `key_env`.
    pub fn compatible(
        http: Client,
        name: impl Into<String>,
        api_base: impl Into<String>,
        key_env: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            key_env: key_env.into(),
            api: Api::ChatCompletions,
            http,
        }
    }

    pub fn xai(http: Client) -> Self {
        Self::compatible(
            http,
            "xai",
            api_base(&["XAI_API_BASE"], XAI_DEFAULT_BASE),
            "XAI_API_KEY",
        )
    }

    fn api_key(&self) -> Option<String> {
        if self.api == Api::Responses {
            return first_non_empty_env(&[self.key_env.as_str(), "OPENAI_API_KEY_BACKUP"]);
        }
        non_empty_env(&self.key_env)
    }

    fn responses_payload(request: &ProviderRequest) -> Value {
        let mut content = vec![json!({"type": "input_text", "text": request.prompt})];
        if let Some(image) = request.image.as_ref() {
            content.push(json!({"type": "input_image", "image_url": image.data_url()}));
        }
        json!({
            "model": request.model,
            "instructions": request.system,
            "input": [{"role": "user", "content": content}],
            "max_output_tokens": request.max_output_tokens,
        })
    }

    fn chat_payload(request: &ProviderRequest) -> Value {
        let user = match request.image.as_ref() {
            Some(image) => json!([
                {"type": "text", "text": request.prompt},
                {"type": "image_url", "image_url": {"url": image.data_url()}},
            ]),
            None => Value::String(request.prompt.clone()),
        };
        json!({
            "model": request.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": user},
            ],
            "max_tokens": request.max_output_tokens,
        })
    }
}

#[async_trait]
impl CaptionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<RawResponse, ProviderError> {
        let Some(api_key) = self.api_key() else {
            return Err(ProviderError::not_configured(&self.name, &self.key_env));
        };
        let (endpoint, payload) = match self.api {
            Api::Responses => (
                format!("{}/responses", self.api_base),
                Self::responses_payload(request),
            ),
            Api::ChatCompletions => (
                format!("{}/chat/completions", self.api_base),
                Self::chat_payload(request),
            ),
        };
        tracing::debug!(
            provider = %self.name,
            purpose = %request.purpose,
            model = %request.model,
            "sending generation request"
        );
        let response = send_json(
            &self.name,
            self.http.post(endpoint).bearer_auth(api_key).json(&payload),
        )
        .await?;
        let text = match self.api {
            Api::Responses => extract_responses_text(&response),
            Api::ChatCompletions => extract_chat_text(&response),
        };
        let model = response
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_string);
        RawResponse::from_text(&self.name, text, model)
    }
}

fn extract_responses_text(response: &Value) -> String {
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return text.trim().to_string();
        }
    }

    let mut parts: Vec<String> = Vec::new();
    let rows = response
        .get("output")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for row in rows {
        let Some(content) = row.get("content").and_then(Value::as_array) else {
            continue;
        };
        for part in content {
            let kind = part.get("type").and_then(Value::as_str).unwrap_or_default();
            if !matches!(kind, "output_text" | "text") {
                continue;
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    parts.push(text.trim().to_string());
                }
            }
        }
    }
    parts.join("\n")
}

fn extract_chat_text(response: &Value) -> String {
    let content = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"));
    match content {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect::<Vec<&str>>()
            .join("\n"),
        _ => String::new(),
    }
}
