use std::fmt;

use thiserror::Error;

use super::registry::{
    ModelRegistry, ModelSpec, CAPABILITY_NSFW, CAPABILITY_TEXT, CAPABILITY_VISION,
};

/// Slot a model fills in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelRole {
    Primary,
    Secondary,
    Nsfw,
    Vision,
}

impl ModelRole {
    pub fn capability(&self) -> &'static str {
        match self {
            ModelRole::Primary | ModelRole::Secondary => CAPABILITY_TEXT,
            ModelRole::Nsfw => CAPABILITY_NSFW,
            ModelRole::Vision => CAPABILITY_VISION,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::Primary => "primary",
            ModelRole::Secondary => "secondary",
            ModelRole::Nsfw => "nsfw",
            ModelRole::Vision => "vision",
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("No models available for capability '{0}'.")]
    NoModels(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, SelectionError> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            if let Some(model) = self.registry.ensure(requested_value, capability) {
                return Ok(ModelSelection {
                    model,
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            (
                Some(format!(
                    "Requested model '{requested_value}' unavailable for capability '{capability}'."
                )),
                Some(requested_value.to_string()),
            )
        } else {
            (Some("No model specified; using default.".to_string()), None)
        };

        let candidates = self.registry.by_capability(capability);
        let Some(model) = candidates.first().cloned() else {
            return Err(SelectionError::NoModels(capability.to_string()));
        };
        Ok(ModelSelection {
            model,
            requested: requested_text,
            fallback_reason,
        })
    }

    /// Resolve a role. Optional roles (secondary, nsfw) select nothing when
    /// no model was requested instead of falling back to a default.
    pub fn select_role(
        &self,
        role: ModelRole,
        requested: Option<&str>,
    ) -> Result<Option<ModelSelection>, SelectionError> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        if requested.is_none() && matches!(role, ModelRole::Secondary | ModelRole::Nsfw) {
            return Ok(None);
        }
        self.select(requested, role.capability()).map(Some)
    }
}
