//! Generation backends.
//!
//! Adapters turn a [`ProviderRequest`] into raw model text. They do not
//! retry, parse variants, or apply timeouts; the pipeline owns all of that.

mod dryrun;
mod gemini;
pub(crate) mod http;
mod openai;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use plume_contracts::providers::{NamedProvider, ProviderRegistry};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ProviderError;

pub use dryrun::DryrunProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallPurpose {
    Variants,
    Ranking,
    Titles,
    Facts,
}

impl CallPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallPurpose::Variants => "variants",
            CallPurpose::Ranking => "ranking",
            CallPurpose::Titles => "titles",
            CallPurpose::Facts => "facts",
        }
    }
}

impl fmt::Display for CallPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image bytes attached to a vision call.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageInput {
    pub fn base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }
}

impl fmt::Debug for ImageInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageInput")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub purpose: CallPurpose,
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub image: Option<ImageInput>,
    pub metadata: Map<String, Value>,
    pub max_output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub text: String,
    pub model: Option<String>,
}

impl RawResponse {
    /// Blank text after trimming is an [`ProviderErrorKind::EmptyResponse`].
    ///
    /// [`ProviderErrorKind::EmptyResponse`]: crate::error::ProviderErrorKind::EmptyResponse
    pub fn from_text(
        provider: &str,
        text: impl Into<String>,
        model: Option<String>,
    ) -> Result<Self, ProviderError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ProviderError::empty(provider));
        }
        Ok(Self {
            text: text.trim().to_string(),
            model,
        })
    }
}

#[async_trait]
pub trait CaptionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &ProviderRequest) -> Result<RawResponse, ProviderError>;
}

/// Shared handle to an adapter, as stored in a [`ProviderRegistry`].
#[derive(Clone)]
pub struct RegisteredProvider {
    inner: Arc<dyn CaptionProvider>,
}

impl RegisteredProvider {
    pub fn new(provider: Arc<dyn CaptionProvider>) -> Self {
        Self { inner: provider }
    }

    pub fn provider(&self) -> Arc<dyn CaptionProvider> {
        Arc::clone(&self.inner)
    }
}

impl NamedProvider for RegisteredProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }
}

impl fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RegisteredProvider")
            .field(&self.inner.name())
            .finish()
    }
}

/// Every built-in adapter, configured from the environment.
pub fn default_provider_registry() -> ProviderRegistry<RegisteredProvider> {
    let client = reqwest::Client::new();
    let mut registry = ProviderRegistry::default();
    registry.register(RegisteredProvider::new(Arc::new(DryrunProvider)));
    registry.register(RegisteredProvider::new(Arc::new(OpenAiProvider::new(
        client.clone(),
    ))));
    registry.register(RegisteredProvider::new(Arc::new(OpenAiProvider::xai(
        client.clone(),
    ))));
    registry.register(RegisteredProvider::new(Arc::new(GeminiProvider::new(
        client,
    ))));
    registry
}
