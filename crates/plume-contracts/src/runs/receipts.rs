use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::platforms::{Platform, Violation};
use crate::request::{Flavor, GenerationRequest};
use crate::results::{PipelineResult, ProviderTier};
use crate::runs::ChoiceRecord;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptReceipt {
    pub attempt: u8,
    pub fix_hint: Option<String>,
    /// `passed`, `failed`, `parse_error` or `provider_error`.
    pub outcome: String,
    #[serde(default)]
    pub variants: usize,
    #[serde(default)]
    pub violations: Vec<Violation>,
    #[serde(default)]
    pub missing_facts: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierReceipt {
    pub tier: ProviderTier,
    pub provider: String,
    pub model: Option<String>,
    #[serde(default)]
    pub transitions: Vec<String>,
    #[serde(default)]
    pub attempts: Vec<AttemptReceipt>,
    pub failure: Option<String>,
}

impl TierReceipt {
    pub fn new(tier: ProviderTier, provider: impl Into<String>, model: Option<String>) -> Self {
        Self {
            tier,
            provider: provider.into(),
            model,
            transitions: Vec::new(),
            attempts: Vec::new(),
            failure: None,
        }
    }
}

/// Everything one invocation did, written once it finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationReceipt {
    pub schema_version: u64,
    pub invocation_id: String,
    pub flavor: Flavor,
    pub platform: Platform,
    pub request: GenerationRequest,
    #[serde(default)]
    pub tiers: Vec<TierReceipt>,
    pub result: Option<PipelineResult>,
    pub choice: Option<ChoiceRecord>,
    pub created_at: String,
}

impl InvocationReceipt {
    pub fn new(invocation_id: impl Into<String>, request: &GenerationRequest) -> Self {
        Self {
            schema_version: RECEIPT_SCHEMA_VERSION,
            invocation_id: invocation_id.into(),
            flavor: request.flavor(),
            platform: request.platform(),
            request: request.clone(),
            tiers: Vec::new(),
            result: None,
            choice: None,
            created_at: crate::events::now_utc_iso(),
        }
    }

    pub fn to_value(&self) -> Value {
        sanitize_payload(&serde_json::to_value(self).unwrap_or(Value::Null))
    }
}

pub fn write_receipt(path: &Path, receipt: &InvocationReceipt) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&receipt.to_value())?)
        .with_context(|| format!("write receipt {}", path.display()))?;
    Ok(())
}

fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "api_key" | "authorization" | "image_bytes" | "image_data"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}
