use std::fmt;

use plume_contracts::models::SelectionError;
use plume_contracts::platforms::UnsupportedPlatform;
use plume_contracts::providers::UnknownProvider;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Network failure, non-2xx status, timeout, or missing credentials.
    Transport,
    /// HTTP 429 or a quota/rate-limit marker in the response body.
    Quota,
    /// The provider answered but the text was blank.
    EmptyResponse,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::Transport => "transport",
            ProviderErrorKind::Quota => "quota",
            ProviderErrorKind::EmptyResponse => "empty_response",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider} {kind} error: {message}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: ProviderErrorKind::Transport,
            message: message.into(),
        }
    }

    pub fn quota(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: ProviderErrorKind::Quota,
            message: message.into(),
        }
    }

    pub fn empty(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: ProviderErrorKind::EmptyResponse,
            message: "provider returned no text".to_string(),
        }
    }

    pub fn not_configured(provider: impl Into<String>, key_env: &str) -> Self {
        Self::transport(provider, format!("not configured: {key_env} is not set"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidImageError {
    #[error("image is {actual} bytes; the limit is {limit}")]
    TooLarge { limit: u64, actual: u64 },
    #[error("unsupported image content type `{0}`")]
    UnsupportedContentType(String),
    #[error("image fetch failed: {0}")]
    Fetch(String),
    #[error("image could not be decoded: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactExtractionError {
    #[error(transparent)]
    InvalidImage(#[from] InvalidImageError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("vision model returned unusable facts: {0}")]
    Unparseable(String),
}

/// Errors an entry point surfaces. Provider-side failures never appear here;
/// they are absorbed by the fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    UnsupportedPlatform(#[from] UnsupportedPlatform),
    #[error(transparent)]
    InvalidImage(#[from] InvalidImageError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invocation cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: `{value}`")]
    InvalidValue { key: String, value: String },
    #[error("a primary provider is required")]
    MissingPrimary,
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    UnknownProvider(#[from] UnknownProvider),
}
