use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::platforms::{Platform, Violation};
use crate::request::Flavor;
use crate::results::ProviderTier;

/// Pipeline milestones recorded in `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    InvocationStarted {
        flavor: Flavor,
        platform: Platform,
        nsfw: bool,
    },
    AttemptCompleted {
        tier: ProviderTier,
        provider: String,
        attempt: u8,
        outcome: String,
        variants: usize,
        compliant: usize,
    },
    RetryScheduled {
        tier: ProviderTier,
        provider: String,
        fix_hint: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        violations: Vec<Violation>,
    },
    TierFailed {
        tier: ProviderTier,
        provider: String,
        reason: String,
    },
    RankingCompleted {
        tier: ProviderTier,
        provider: String,
        winner_index: usize,
        defaulted: bool,
    },
    InvocationFinished {
        tier: ProviderTier,
        provider: String,
        variants: usize,
        elapsed_ms: u64,
    },
}

/// Append-only writer for `events.jsonl`, shared across invocations.
///
/// Every line carries `type`, `invocation_id` and `ts` next to the event's
/// own fields, one compact JSON object per line.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn emit(&self, invocation_id: &str, event: &PipelineEvent) -> anyhow::Result<Value> {
        let fields = match serde_json::to_value(event)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let mut line = Map::new();
        if let Some(kind) = fields.get("type") {
            line.insert("type".to_string(), kind.clone());
        }
        line.insert(
            "invocation_id".to_string(),
            Value::String(invocation_id.to_string()),
        );
        line.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in fields {
            if key != "type" {
                line.insert(key, value);
            }
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }

        let encoded = serde_json::to_string(&line)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)
            .with_context(|| format!("open {}", self.inner.path.display()))?;
        file.write_all(encoded.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(line))
    }
}

pub(crate) fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
