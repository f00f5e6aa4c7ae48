use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::ImageFormat;
use plume_contracts::facts::ImageFacts;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde_json::Map;

use crate::error::{FactExtractionError, InvalidImageError, ProviderError};
use crate::extract::{coerce_text, coerce_text_list, extract_json_object_from_text};
use crate::prompt::PromptBuilder;
use crate::provider::{CallPurpose, CaptionProvider, ImageInput, ProviderRequest};

pub const ACCEPTED_CONTENT_TYPES: &[&str] = &["image/png", "image/jpeg", "image/webp", "image/gif"];

const MAX_FACT_OBJECTS: usize = 6;
const MAX_FACT_CHARS: usize = 60;
const FACTS_MAX_OUTPUT_TOKENS: u64 = 512;

#[async_trait]
pub trait FactExtractor: Send + Sync {
    async fn extract_facts(&self, image_url: &str) -> Result<ImageFacts, FactExtractionError>;
}

/// Downloads source images with a hard size ceiling.
#[derive(Debug, Clone)]
pub struct ImageFetcher {
    http: Client,
    max_bytes: u64,
    timeout: Duration,
}

impl ImageFetcher {
    pub fn new(http: Client, max_bytes: u64, timeout: Duration) -> Self {
        Self {
            http,
            max_bytes,
            timeout,
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<ImageInput, InvalidImageError> {
        let parsed = reqwest::Url::parse(url.trim())
            .map_err(|err| InvalidImageError::Fetch(format!("invalid image url: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(InvalidImageError::Fetch(format!(
                "unsupported url scheme `{}`",
                parsed.scheme()
            )));
        }

        let mut response = self
            .http
            .get(parsed)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| InvalidImageError::Fetch(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(InvalidImageError::Fetch(format!(
                "image host answered {}",
                status.as_u16()
            )));
        }

        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| {
                value
                    .split(';')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_ascii_lowercase()
            })
            .filter(|value| !value.is_empty());
        if let Some(content_type) = declared.as_deref() {
            if !ACCEPTED_CONTENT_TYPES.contains(&content_type) {
                return Err(InvalidImageError::UnsupportedContentType(
                    content_type.to_string(),
                ));
            }
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(InvalidImageError::TooLarge {
                    limit: self.max_bytes,
                    actual: length,
                });
            }
        }

        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| InvalidImageError::Fetch(err.to_string()))?
        {
            let total = (bytes.len() + chunk.len()) as u64;
            if total > self.max_bytes {
                return Err(InvalidImageError::TooLarge {
                    limit: self.max_bytes,
                    actual: total,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        let mime_type = sniff_image(&bytes)?;
        Ok(ImageInput {
            mime_type: mime_type.to_string(),
            bytes,
        })
    }
}

/// Confirms the payload is a decodable image of an accepted format.
pub fn sniff_image(bytes: &[u8]) -> Result<&'static str, InvalidImageError> {
    if bytes.is_empty() {
        return Err(InvalidImageError::Decode("image body was empty".to_string()));
    }
    let format = image::guess_format(bytes)
        .map_err(|err| InvalidImageError::Decode(err.to_string()))?;
    let mime_type = match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Gif => "image/gif",
        other => {
            return Err(InvalidImageError::UnsupportedContentType(format!(
                "{other:?}"
            )))
        }
    };
    image::load_from_memory_with_format(bytes, format)
        .map_err(|err| InvalidImageError::Decode(err.to_string()))?;
    Ok(mime_type)
}

/// Fetches the image and asks a vision model for its objects, setting and mood.
pub struct VisionFactExtractor {
    fetcher: ImageFetcher,
    provider: Arc<dyn CaptionProvider>,
    model: String,
    timeout: Duration,
}

impl VisionFactExtractor {
    pub fn new(
        fetcher: ImageFetcher,
        provider: Arc<dyn CaptionProvider>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            provider,
            model: model.into(),
            timeout,
        }
    }
}

#[async_trait]
impl FactExtractor for VisionFactExtractor {
    async fn extract_facts(&self, image_url: &str) -> Result<ImageFacts, FactExtractionError> {
        let image = self.fetcher.fetch(image_url).await?;
        tracing::debug!(
            mime_type = %image.mime_type,
            bytes = image.bytes.len(),
            provider = self.provider.name(),
            "image fetched for fact extraction"
        );
        let payload = PromptBuilder::facts();
        let request = ProviderRequest {
            purpose: CallPurpose::Facts,
            model: self.model.clone(),
            system: payload.system,
            prompt: payload.prompt,
            image: Some(image),
            metadata: payload.metadata,
            max_output_tokens: FACTS_MAX_OUTPUT_TOKENS,
        };
        let response = tokio::time::timeout(self.timeout, self.provider.generate(&request))
            .await
            .map_err(|_| {
                ProviderError::transport(
                    self.provider.name(),
                    format!("fact extraction timed out after {}s", self.timeout.as_secs()),
                )
            })??;
        parse_facts(&response.text)
    }
}

pub fn parse_facts(text: &str) -> Result<ImageFacts, FactExtractionError> {
    let object = extract_json_object_from_text(text).unwrap_or_else(Map::new);
    let facts = ImageFacts {
        objects: coerce_text_list(object.get("objects"), MAX_FACT_OBJECTS, MAX_FACT_CHARS),
        setting: coerce_text(object.get("setting"), MAX_FACT_CHARS),
        mood: coerce_text(object.get("mood"), MAX_FACT_CHARS),
    };
    if facts.is_empty() {
        return Err(FactExtractionError::Unparseable(
            crate::provider::http::truncate_text(text, 120),
        ));
    }
    Ok(facts)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{parse_facts, FactExtractor, ImageFetcher, VisionFactExtractor};
    use crate::error::{FactExtractionError, InvalidImageError};
    use crate::provider::CallPurpose;
    use crate::testing::{png_bytes, serve_once, ScriptedProvider, StubResponse};

    fn fetcher(max_bytes: u64) -> ImageFetcher {
        ImageFetcher::new(reqwest::Client::new(), max_bytes, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn fetch_accepts_small_png() -> anyhow::Result<()> {
        let body = png_bytes();
        let url = serve_once(StubResponse::ok("image/png", body.clone())).await?;
        let image = fetcher(1024 * 1024).fetch(&url).await?;
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.bytes, body);
        Ok(())
    }

    #[tokio::test]
    async fn fetch_rejects_declared_oversize_before_reading_body() -> anyhow::Result<()> {
        let url = serve_once(StubResponse::ok("image/png", png_bytes()).declared_length(50_000_000))
            .await?;
        let err = fetcher(10 * 1024 * 1024).fetch(&url).await.err();
        assert_eq!(
            err,
            Some(InvalidImageError::TooLarge {
                limit: 10 * 1024 * 1024,
                actual: 50_000_000
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn fetch_enforces_limit_while_streaming() -> anyhow::Result<()> {
        let url = serve_once(StubResponse::ok("image/png", vec![0u8; 4096]).chunked()).await?;
        let err = fetcher(1024).fetch(&url).await.err();
        assert!(matches!(err, Some(InvalidImageError::TooLarge { limit: 1024, .. })));
        Ok(())
    }

    #[tokio::test]
    async fn fetch_rejects_unsupported_type_and_garbage() -> anyhow::Result<()> {
        let url = serve_once(StubResponse::ok("image/svg+xml", b"<svg/>".to_vec())).await?;
        let err = fetcher(1024).fetch(&url).await.err();
        assert_eq!(
            err,
            Some(InvalidImageError::UnsupportedContentType("image/svg+xml".to_string()))
        );

        let url = serve_once(StubResponse::ok("image/png", b"not an image".to_vec())).await?;
        let err = fetcher(1024).fetch(&url).await.err();
        assert!(matches!(err, Some(InvalidImageError::Decode(_))));

        let err = fetcher(1024).fetch("ftp://example.test/a.png").await.err();
        assert!(matches!(err, Some(InvalidImageError::Fetch(_))));
        Ok(())
    }

    #[tokio::test]
    async fn extractor_sends_image_to_vision_model() -> anyhow::Result<()> {
        let url = serve_once(StubResponse::ok("image/png", png_bytes())).await?;
        let answer = r#"{"objects": ["golden retriever", "tennis ball"], "setting": "park", "mood": "joyful"}"#;
        let vision = Arc::new(
            ScriptedProvider::new("vision").on(CallPurpose::Facts, vec![Ok(answer.to_string())]),
        );
        let extractor = VisionFactExtractor::new(
            fetcher(1024 * 1024),
            vision.clone(),
            "gpt-4o-mini",
            Duration::from_secs(5),
        );
        let facts = extractor.extract_facts(&url).await?;
        assert_eq!(facts.objects, vec!["golden retriever", "tennis ball"]);
        assert_eq!(facts.setting.as_deref(), Some("park"));
        assert_eq!(vision.calls(CallPurpose::Facts), 1);
        assert!(vision.saw_image(CallPurpose::Facts));
        Ok(())
    }

    #[test]
    fn unusable_fact_answers_are_errors() {
        assert!(matches!(
            parse_facts("I cannot see the image"),
            Err(FactExtractionError::Unparseable(_))
        ));
        let facts = parse_facts(r#"{"objects": "kite, lake", "setting": null}"#);
        assert_eq!(
            facts.map(|f| f.objects).ok(),
            Some(vec!["kite".to_string(), "lake".to_string()])
        );
    }
}
