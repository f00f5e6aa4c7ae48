use std::path::Path;
use std::sync::Arc;

use plume_contracts::models::{ModelRole, ModelSelection, ModelSelector};
use plume_contracts::providers::ProviderRegistry;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::facts::{ImageFetcher, VisionFactExtractor};
use crate::fallback::StaticComplianceDefaults;
use crate::pipeline::{CaptionPipeline, TierAdapter};
use crate::provider::RegisteredProvider;
use crate::sink::JsonlSink;

/// Wires a pipeline from config: models per role, the adapters serving
/// them, the vision fact extractor, and a file sink when `out_dir` is set.
pub fn build_pipeline(
    config: &PipelineConfig,
    selector: &ModelSelector,
    providers: &ProviderRegistry<RegisteredProvider>,
    out_dir: Option<&Path>,
) -> Result<CaptionPipeline, ConfigError> {
    let models = &config.models;
    let primary = selector
        .select_role(ModelRole::Primary, models.primary.as_deref())?
        .ok_or(ConfigError::MissingPrimary)?;
    let primary_adapter = adapter_for(ModelRole::Primary, &primary, providers)?;

    let mut builder = CaptionPipeline::builder()
        .config(config.clone())
        .compliance_defaults(Arc::new(StaticComplianceDefaults::new(
            config.fallback.clone(),
        )));

    let secondary = selector.select_role(ModelRole::Secondary, models.secondary.as_deref())?;
    if let Some(selection) = secondary {
        builder = builder.secondary(adapter_for(ModelRole::Secondary, &selection, providers)?);
    }
    if let Some(selection) = selector.select_role(ModelRole::Nsfw, models.nsfw.as_deref())? {
        builder = builder.nsfw(adapter_for(ModelRole::Nsfw, &selection, providers)?);
    }

    // The primary model doubles as the vision model when it can see.
    let vision_request = models.vision.clone().or_else(|| {
        primary
            .model
            .supports(ModelRole::Vision.capability())
            .then(|| primary.model.name.clone())
    });
    let vision = selector.select_role(ModelRole::Vision, vision_request.as_deref())?;
    if let Some(selection) = vision {
        let adapter = adapter_for(ModelRole::Vision, &selection, providers)?;
        let fetcher = ImageFetcher::new(
            reqwest::Client::new(),
            config.max_image_bytes,
            config.provider_timeout(),
        );
        builder = builder.fact_extractor(Arc::new(VisionFactExtractor::new(
            fetcher,
            adapter.provider,
            adapter.model,
            config.provider_timeout(),
        )));
    }

    if let Some(dir) = out_dir {
        builder = builder.sink(Arc::new(JsonlSink::new(dir, config.history_window)));
    }

    builder.primary(primary_adapter).build()
}

fn adapter_for(
    role: ModelRole,
    selection: &ModelSelection,
    providers: &ProviderRegistry<RegisteredProvider>,
) -> Result<TierAdapter, ConfigError> {
    if let Some(reason) = selection.fallback_reason.as_deref() {
        match selection.requested.as_deref() {
            Some(requested) => warn!(
                role = %role,
                requested,
                model = %selection.model.name,
                reason,
                "model fallback"
            ),
            None => info!(role = %role, model = %selection.model.name, reason, "model selected"),
        }
    }
    let provider = providers.require(&selection.model.provider)?.provider();
    Ok(TierAdapter::new(provider, selection.model.name.clone())
        .with_max_output_tokens(selection.model.max_output_tokens))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use plume_contracts::models::ModelSelector;
    use plume_contracts::platforms::Platform;
    use plume_contracts::providers::ProviderRegistry;
    use plume_contracts::results::ProviderTier;
    use tokio_util::sync::CancellationToken;

    use super::build_pipeline;
    use crate::config::PipelineConfig;
    use crate::error::ConfigError;
    use crate::pipeline::TextCaptionInput;
    use crate::provider::{DryrunProvider, RegisteredProvider};

    fn dryrun_only() -> ProviderRegistry<RegisteredProvider> {
        let mut registry = ProviderRegistry::default();
        registry.register(RegisteredProvider::new(Arc::new(DryrunProvider)));
        registry
    }

    fn input() -> TextCaptionInput {
        TextCaptionInput {
            platform: "bluesky".to_string(),
            voice: "wry".to_string(),
            theme: "first snow of the year".to_string(),
            context: None,
            style: "minimal".to_string(),
            mood: "cozy".to_string(),
            nsfw: false,
        }
    }

    #[tokio::test]
    async fn dryrun_pipeline_persists_to_out_dir() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut config = PipelineConfig::default();
        config.models.primary = Some("dryrun-text-1".to_string());
        let pipeline = build_pipeline(
            &config,
            &ModelSelector::default(),
            &dryrun_only(),
            Some(temp.path()),
        )?;

        let result = pipeline.text(input(), &CancellationToken::new()).await?;

        assert_eq!(result.provider, ProviderTier::Primary);
        assert_eq!(result.provider_name, "dryrun");
        assert!(temp.path().join("history.json").exists());
        assert!(temp.path().join("choices.jsonl").exists());
        assert!(temp
            .path()
            .join(format!("receipt-{}.json", result.invocation_id))
            .exists());
        let history: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(temp.path().join("history.json"))?)?;
        assert!(history[Platform::Bluesky.as_str()].is_array());
        Ok(())
    }

    #[test]
    fn unregistered_provider_is_a_config_error() {
        let mut config = PipelineConfig::default();
        config.models.primary = Some("gpt-5.2".to_string());
        let err = build_pipeline(&config, &ModelSelector::default(), &dryrun_only(), None).err();
        assert!(matches!(err, Some(ConfigError::UnknownProvider(_))));
    }
}
