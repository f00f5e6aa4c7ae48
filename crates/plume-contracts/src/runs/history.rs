use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use anyhow::{bail, Context};
use serde_json::{Map, Value};

use crate::platforms::Platform;

/// One lock per history file, shared by every `CaptionHistory` in the process.
static WRITE_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Per-platform list of previously persisted captions in `history.json`.
///
/// Writers on the same path are serialized and replace the file by rename,
/// so readers only ever see a complete document.
#[derive(Debug, Clone)]
pub struct CaptionHistory {
    path: PathBuf,
    window: usize,
    lock: Arc<Mutex<()>>,
}

impl CaptionHistory {
    pub fn new(path: impl Into<PathBuf>, window: usize) -> Self {
        let path = path.into();
        let lock = WRITE_LOCKS
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(path.clone())
            .or_default()
            .clone();
        Self {
            path,
            window: window.max(1),
            lock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Most recent captions for `platform`, oldest first. A missing file is
    /// empty history; an unreadable one is an error.
    pub fn recent(&self, platform: Platform) -> anyhow::Result<Vec<String>> {
        let payload = read_json_object(&self.path)?;
        Ok(captions_for(&payload, platform))
    }

    pub fn record(&self, platform: Platform, captions: &[String]) -> anyhow::Result<()> {
        let fresh: Vec<&String> = captions
            .iter()
            .filter(|caption| !caption.trim().is_empty())
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }

        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut on_disk = read_json_object(&self.path)?;
        let mut rows = captions_for(&on_disk, platform);
        rows.extend(fresh.into_iter().cloned());
        if rows.len() > self.window {
            rows.drain(..rows.len() - self.window);
        }
        on_disk.insert(
            platform.as_str().to_string(),
            Value::Array(rows.into_iter().map(Value::String).collect()),
        );
        write_json_object(&self.path, &on_disk)
            .with_context(|| format!("write caption history {}", self.path.display()))
    }
}

fn captions_for(payload: &Map<String, Value>, platform: Platform) -> Vec<String> {
    payload
        .get(platform.as_str())
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn read_json_object(path: &Path) -> anyhow::Result<Map<String, Value>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("read caption history {}", path.display()))
        }
    };
    let parsed: Value = serde_json::from_str(&raw)
        .with_context(|| format!("parse caption history {}", path.display()))?;
    match parsed {
        Value::Object(map) => Ok(map),
        _ => bail!("caption history {} is not a JSON object", path.display()),
    }
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "history.json".to_string());
    let temp = path.with_file_name(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::write(
        &temp,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    if let Err(err) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(err.into());
    }
    Ok(())
}
