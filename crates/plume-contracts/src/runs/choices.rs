use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::platforms::Platform;
use crate::results::ProviderTier;

/// Which variant an invocation settled on, and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceRecord {
    pub invocation_id: String,
    pub platform: Platform,
    pub provider: ProviderTier,
    pub chosen_index: usize,
    pub chosen_caption: String,
    pub time_to_choice_ms: u64,
    pub user_edited: bool,
    pub auto_selected: bool,
    pub ts: String,
}

impl ChoiceRecord {
    /// A selection made by the pipeline itself, stamped with the current time.
    pub fn auto(
        invocation_id: impl Into<String>,
        platform: Platform,
        provider: ProviderTier,
        chosen_index: usize,
        chosen_caption: impl Into<String>,
        time_to_choice_ms: u64,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            platform,
            provider,
            chosen_index,
            chosen_caption: chosen_caption.into(),
            time_to_choice_ms,
            user_edited: false,
            auto_selected: true,
            ts: crate::events::now_utc_iso(),
        }
    }
}

/// Append-only writer for `choices.jsonl`; clones share one lock.
#[derive(Debug, Clone)]
pub struct ChoiceWriter {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl ChoiceWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, choice: &ChoiceRecord) -> anyhow::Result<Value> {
        let payload = serde_json::to_value(choice)?;
        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        append_jsonl(&self.path, &payload)
            .with_context(|| format!("append choice to {}", self.path.display()))?;
        Ok(payload)
    }
}

fn append_jsonl(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let mut line = serde_json::to_string(payload)?;
    line.push('\n');
    file.write_all(line.as_bytes())?;
    Ok(())
}
