use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use indexmap::IndexMap;
use plume_contracts::platforms::{Platform, RuleOverride, RuleTable};
use plume_contracts::variants::{Deduplicator, DEFAULT_SIMILARITY_THRESHOLD};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::fallback::FallbackDefaults;

pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_HISTORY_WINDOW: usize = 50;

/// Requested model names per role. Unset roles fall back to the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub primary: Option<String>,
    pub secondary: Option<String>,
    pub nsfw: Option<String>,
    pub vision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub provider_timeout_secs: u64,
    pub similarity_threshold: f32,
    pub max_image_bytes: u64,
    pub history_window: usize,
    pub titles: bool,
    pub fallback: FallbackDefaults,
    pub rule_overrides: IndexMap<Platform, RuleOverride>,
    pub models: ModelConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            provider_timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            history_window: DEFAULT_HISTORY_WINDOW,
            titles: true,
            fallback: FallbackDefaults::default(),
            rule_overrides: IndexMap::new(),
            models: ModelConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Reads the optional JSON file, then applies `PLUME_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| {
            env::var(key)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = parse_var(&lookup, "PLUME_PROVIDER_TIMEOUT_SECS")? {
            self.provider_timeout_secs = value;
        }
        if let Some(value) = parse_var(&lookup, "PLUME_MAX_IMAGE_BYTES")? {
            self.max_image_bytes = value;
        }
        if let Some(value) = parse_var::<f32, _>(&lookup, "PLUME_SIMILARITY_THRESHOLD")? {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    key: "PLUME_SIMILARITY_THRESHOLD".to_string(),
                    value: value.to_string(),
                });
            }
            self.similarity_threshold = value;
        }
        if let Some(value) = lookup("PLUME_PRIMARY_MODEL") {
            self.models.primary = Some(value);
        }
        if let Some(value) = lookup("PLUME_SECONDARY_MODEL") {
            self.models.secondary = Some(value);
        }
        if let Some(value) = lookup("PLUME_NSFW_MODEL") {
            self.models.nsfw = Some(value);
        }
        if self.provider_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "provider_timeout_secs".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs.max(1))
    }

    pub fn rule_table(&self) -> RuleTable {
        let mut table = RuleTable::default();
        table.apply_overrides(&self.rule_overrides);
        table
    }

    pub fn deduplicator(&self) -> Deduplicator {
        Deduplicator::new(self.similarity_threshold)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use plume_contracts::platforms::Platform;

    use super::PipelineConfig;
    use crate::error::ConfigError;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn file_values_merge_with_defaults() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("plume.json");
        std::fs::write(
            &path,
            r#"{
                "provider_timeout_secs": 5,
                "rule_overrides": {"x": {"max_caption_chars": 200}},
                "models": {"secondary": "gemini-2.5-flash"}
            }"#,
        )?;

        let config = PipelineConfig::from_file(&path)?;
        assert_eq!(config.provider_timeout_secs, 5);
        assert_eq!(config.history_window, 50);
        assert!(config.titles);
        assert_eq!(config.models.secondary.as_deref(), Some("gemini-2.5-flash"));
        let x = config.rule_table().get(Platform::X).map(|r| r.max_caption_chars);
        assert_eq!(x, Some(200));
        Ok(())
    }

    #[test]
    fn environment_overrides_win_and_bad_values_are_rejected() -> anyhow::Result<()> {
        let mut config = PipelineConfig::default();
        config.apply_overrides(lookup(&[
            ("PLUME_PROVIDER_TIMEOUT_SECS", "12"),
            ("PLUME_NSFW_MODEL", "grok-4-fast"),
        ]))?;
        assert_eq!(config.provider_timeout_secs, 12);
        assert_eq!(config.models.nsfw.as_deref(), Some("grok-4-fast"));

        let err = PipelineConfig::default()
            .apply_overrides(lookup(&[("PLUME_MAX_IMAGE_BYTES", "lots")]))
            .err();
        assert!(matches!(
            err,
            Some(ConfigError::InvalidValue { ref key, .. }) if key == "PLUME_MAX_IMAGE_BYTES"
        ));

        let err = PipelineConfig::default()
            .apply_overrides(lookup(&[("PLUME_SIMILARITY_THRESHOLD", "1.5")]))
            .err();
        assert!(err.is_some());
        Ok(())
    }

    #[test]
    fn malformed_file_is_a_parse_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("broken.json");
        std::fs::write(&path, "{ not json")?;
        let err = PipelineConfig::from_file(&path).err();
        assert!(matches!(err, Some(ConfigError::Parse { .. })));
        Ok(())
    }
}
