//! The caption pipeline: generate, validate, retry once, rank, fall back.
//!
//! Each entry point builds a [`GenerationRequest`] and walks the configured
//! tiers in order. A tier makes at most two generation calls: the first
//! attempt and one retry carrying a fix hint. A tier is abandoned on a
//! provider error, a timeout, or a retry that yields nothing usable; when
//! every tier is abandoned the deterministic filler answers instead.

mod retry;

use std::sync::Arc;
use std::time::{Duration, Instant};

use plume_contracts::events::PipelineEvent;
use plume_contracts::facts::{batch_coverage, ImageFacts};
use plume_contracts::platforms::{
    validate_batch, BatchValidation, Platform, PlatformRules, RuleTable, UnsupportedPlatform,
    Violation,
};
use plume_contracts::request::{Flavor, GenerationRequest};
use plume_contracts::results::{PipelineResult, ProviderTier, RankingResult};
use plume_contracts::runs::{AttemptReceipt, ChoiceRecord, InvocationReceipt, TierReceipt};
use plume_contracts::variants::{parse_variants, Deduplicator, ParseError, Variant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use retry::{InvalidTransition, RetryController, RetryState};

use crate::config::PipelineConfig;
use crate::error::{ConfigError, FactExtractionError, PipelineError, ProviderError};
use crate::extract::{coerce_text_list, extract_json_object_from_text};
use crate::facts::FactExtractor;
use crate::fallback::{deterministic_variant, ComplianceDefaults, StaticComplianceDefaults};
use crate::prompt::{FixHint, PromptBuilder, PromptPayload, MAX_TITLES};
use crate::provider::{CallPurpose, CaptionProvider, ProviderRequest, RawResponse};
use crate::ranker::{parse_ranking, RankingVerdict};
use crate::sink::{PersistedRun, PersistenceSink};

pub const DEFAULT_MAX_OUTPUT_TOKENS: u64 = 2048;
const MAX_TITLE_CHARS: usize = 80;
const DETERMINISTIC_PROVIDER: &str = "deterministic";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageCaptionInput {
    pub platform: String,
    pub voice: String,
    pub style: String,
    pub mood: String,
    pub nsfw: bool,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteInput {
    pub platform: String,
    pub voice: String,
    pub style: String,
    pub mood: String,
    pub nsfw: bool,
    pub existing_caption: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextCaptionInput {
    pub platform: String,
    pub voice: String,
    pub theme: String,
    pub context: Option<String>,
    pub style: String,
    pub mood: String,
    pub nsfw: bool,
}

/// A provider bound to the model it should be asked for.
#[derive(Clone)]
pub struct TierAdapter {
    pub provider: Arc<dyn CaptionProvider>,
    pub model: String,
    pub max_output_tokens: u64,
}

impl TierAdapter {
    pub fn new(provider: Arc<dyn CaptionProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u64) -> Self {
        self.max_output_tokens = max_output_tokens.max(1);
        self
    }

    fn name(&self) -> &str {
        self.provider.name()
    }

    fn request(&self, purpose: CallPurpose, payload: PromptPayload) -> ProviderRequest {
        ProviderRequest {
            purpose,
            model: self.model.clone(),
            system: payload.system,
            prompt: payload.prompt,
            image: None,
            metadata: payload.metadata,
            max_output_tokens: self.max_output_tokens,
        }
    }
}

impl std::fmt::Debug for TierAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierAdapter")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

#[derive(Default)]
pub struct CaptionPipelineBuilder {
    config: PipelineConfig,
    primary: Option<TierAdapter>,
    secondary: Option<TierAdapter>,
    nsfw: Option<TierAdapter>,
    fact_extractor: Option<Arc<dyn FactExtractor>>,
    compliance: Option<Arc<dyn ComplianceDefaults>>,
    sink: Option<Arc<dyn PersistenceSink>>,
    provider_timeout: Option<Duration>,
}

impl CaptionPipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn primary(mut self, adapter: TierAdapter) -> Self {
        self.primary = Some(adapter);
        self
    }

    pub fn secondary(mut self, adapter: TierAdapter) -> Self {
        self.secondary = Some(adapter);
        self
    }

    /// Used in place of the primary tier for nsfw requests.
    pub fn nsfw(mut self, adapter: TierAdapter) -> Self {
        self.nsfw = Some(adapter);
        self
    }

    pub fn fact_extractor(mut self, extractor: Arc<dyn FactExtractor>) -> Self {
        self.fact_extractor = Some(extractor);
        self
    }

    pub fn compliance_defaults(mut self, defaults: Arc<dyn ComplianceDefaults>) -> Self {
        self.compliance = Some(defaults);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Overrides `provider_timeout_secs` from the config.
    pub fn provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<CaptionPipeline, ConfigError> {
        let primary = self.primary.ok_or(ConfigError::MissingPrimary)?;
        let compliance: Arc<dyn ComplianceDefaults> = match self.compliance {
            Some(compliance) => compliance,
            None => Arc::new(StaticComplianceDefaults::new(self.config.fallback.clone())),
        };
        Ok(CaptionPipeline {
            rules: self.config.rule_table(),
            dedup: self.config.deduplicator(),
            timeout: self
                .provider_timeout
                .unwrap_or_else(|| self.config.provider_timeout()),
            titles: self.config.titles,
            primary,
            secondary: self.secondary,
            nsfw: self.nsfw,
            fact_extractor: self.fact_extractor,
            compliance,
            sink: self.sink,
        })
    }
}

pub struct CaptionPipeline {
    primary: TierAdapter,
    secondary: Option<TierAdapter>,
    nsfw: Option<TierAdapter>,
    fact_extractor: Option<Arc<dyn FactExtractor>>,
    compliance: Arc<dyn ComplianceDefaults>,
    sink: Option<Arc<dyn PersistenceSink>>,
    rules: RuleTable,
    dedup: Deduplicator,
    timeout: Duration,
    titles: bool,
}

enum CallError {
    Cancelled,
    Provider(ProviderError),
}

enum TierFailure {
    Cancelled,
    Abandoned(String),
}

impl From<InvalidTransition> for TierFailure {
    fn from(err: InvalidTransition) -> Self {
        TierFailure::Abandoned(err.to_string())
    }
}

enum AttemptOutcome {
    Passed(Vec<Variant>),
    Failed {
        variants: Vec<Variant>,
        validation: BatchValidation,
        missing_facts: Vec<String>,
    },
    Unparseable(ParseError),
}

struct TierSuccess {
    variants: Vec<Variant>,
    ranking: RankingResult,
}

/// What one tier is working with for the length of an invocation.
struct TierContext<'a> {
    invocation_id: &'a str,
    tier: ProviderTier,
    adapter: &'a TierAdapter,
    rules: &'a PlatformRules,
    cancel: &'a CancellationToken,
}

impl CaptionPipeline {
    pub fn builder() -> CaptionPipelineBuilder {
        CaptionPipelineBuilder::default()
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Captions for a photo. With an `image_url`, facts are extracted first
    /// and every variant is checked for coverage of them.
    pub async fn image(
        &self,
        input: ImageCaptionInput,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        let platform = self.platform(&input.platform)?;
        let mut request =
            GenerationRequest::new(Flavor::Image, platform, input.voice, input.style, input.mood)
                .with_nsfw(input.nsfw);
        let url = input
            .image_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty());
        if let Some(url) = url {
            if let Some(facts) = self.extract_facts(url, cancel).await? {
                request = request.with_image_facts(facts);
            }
        }
        self.run(request, cancel).await
    }

    pub async fn rewrite(
        &self,
        input: RewriteInput,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        let platform = self.platform(&input.platform)?;
        if input.existing_caption.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "existing caption must not be empty".to_string(),
            ));
        }
        let request =
            GenerationRequest::new(Flavor::Rewrite, platform, input.voice, input.style, input.mood)
                .with_existing_caption(input.existing_caption)
                .with_nsfw(input.nsfw);
        self.run(request, cancel).await
    }

    pub async fn text(
        &self,
        input: TextCaptionInput,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        let platform = self.platform(&input.platform)?;
        if input.theme.trim().is_empty() {
            return Err(PipelineError::InvalidInput("theme must not be empty".to_string()));
        }
        let mut request =
            GenerationRequest::new(Flavor::Text, platform, input.voice, input.style, input.mood)
                .with_theme(input.theme)
                .with_nsfw(input.nsfw);
        if let Some(context) = input.context {
            request = request.with_context(context);
        }
        self.run(request, cancel).await
    }

    fn platform(&self, raw: &str) -> Result<Platform, PipelineError> {
        let platform: Platform = raw.parse()?;
        if self.rules.get(platform).is_none() {
            return Err(UnsupportedPlatform(raw.trim().to_string()).into());
        }
        Ok(platform)
    }

    async fn extract_facts(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ImageFacts>, PipelineError> {
        let Some(extractor) = self.fact_extractor.as_ref() else {
            warn!("image url given but no vision model is configured; skipping fact extraction");
            return Ok(None);
        };
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            outcome = extractor.extract_facts(url) => outcome,
        };
        match outcome {
            Ok(facts) => {
                debug!(objects = facts.objects.len(), "image facts extracted");
                Ok(Some(facts))
            }
            Err(FactExtractionError::InvalidImage(err)) => Err(err.into()),
            Err(err) => {
                warn!(error = %err, "fact extraction failed; continuing without image facts");
                Ok(None)
            }
        }
    }

    async fn run(
        &self,
        request: GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let started = Instant::now();
        let invocation_id = Uuid::new_v4().to_string();
        let platform = request.platform();
        let rules = self
            .rules
            .get(platform)
            .ok_or_else(|| UnsupportedPlatform(platform.to_string()))?;

        info!(
            invocation_id = %invocation_id,
            flavor = %request.flavor(),
            platform = %platform,
            nsfw = request.nsfw(),
            "caption invocation started"
        );
        self.emit(
            &invocation_id,
            PipelineEvent::InvocationStarted {
                flavor: request.flavor(),
                platform,
                nsfw: request.nsfw(),
            },
        )
        .await;

        let mut receipt = InvocationReceipt::new(&invocation_id, &request);
        let mut fallback_reasons: Vec<String> = Vec::new();
        let mut produced: Option<(ProviderTier, &TierAdapter, TierSuccess)> = None;

        for (tier, adapter) in self.tiers(request.nsfw()) {
            let ctx = TierContext {
                invocation_id: &invocation_id,
                tier,
                adapter,
                rules,
                cancel,
            };
            let mut tier_receipt =
                TierReceipt::new(tier, adapter.name(), Some(adapter.model.clone()));
            match self.run_tier(&ctx, &request, &mut tier_receipt).await {
                Ok(success) => {
                    receipt.tiers.push(tier_receipt);
                    produced = Some((tier, adapter, success));
                    break;
                }
                Err(TierFailure::Cancelled) => {
                    info!(invocation_id = %invocation_id, "caption invocation cancelled");
                    return Err(PipelineError::Cancelled);
                }
                Err(TierFailure::Abandoned(reason)) => {
                    warn!(
                        invocation_id = %invocation_id,
                        tier = %tier,
                        provider = adapter.name(),
                        reason = %reason,
                        "tier abandoned"
                    );
                    self.emit(
                        &invocation_id,
                        PipelineEvent::TierFailed {
                            tier,
                            provider: adapter.name().to_string(),
                            reason: reason.clone(),
                        },
                    )
                    .await;
                    fallback_reasons.push(format!("{tier} ({}): {reason}", adapter.name()));
                    tier_receipt.failure = Some(reason);
                    receipt.tiers.push(tier_receipt);
                }
            }
        }

        let result = match produced {
            Some((tier, adapter, success)) => {
                let (variants, ranking) = self
                    .dedup_against_history(platform, success.variants, success.ranking)
                    .await;
                let titles = if request.flavor() == Flavor::Image && self.titles {
                    self.titles(adapter, &request, &ranking.final_variant, cancel)
                        .await?
                } else {
                    None
                };
                PipelineResult {
                    invocation_id: invocation_id.clone(),
                    provider: tier,
                    provider_name: adapter.name().to_string(),
                    final_variant: ranking.final_variant.clone(),
                    variants,
                    titles,
                    ranking: Some(ranking),
                    fallback_reasons,
                }
            }
            None => {
                let variant = deterministic_variant(&request, rules, self.compliance.as_ref());
                info!(
                    invocation_id = %invocation_id,
                    platform = %platform,
                    "every tier failed; using deterministic fallback"
                );
                PipelineResult {
                    invocation_id: invocation_id.clone(),
                    provider: ProviderTier::DeterministicFallback,
                    provider_name: DETERMINISTIC_PROVIDER.to_string(),
                    final_variant: variant.clone(),
                    variants: vec![variant],
                    titles: None,
                    ranking: None,
                    fallback_reasons,
                }
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let chosen_index = result
            .ranking
            .as_ref()
            .map(|ranking| ranking.winner_index)
            .unwrap_or(0);
        let choice = ChoiceRecord::auto(
            &invocation_id,
            platform,
            result.provider,
            chosen_index,
            result.final_variant.caption.clone(),
            elapsed_ms,
        );
        receipt.result = Some(result.clone());
        receipt.choice = Some(choice.clone());
        self.persist(PersistedRun {
            invocation_id: invocation_id.clone(),
            platform,
            result: result.clone(),
            choice,
            receipt,
        })
        .await;
        self.emit(
            &invocation_id,
            PipelineEvent::InvocationFinished {
                tier: result.provider,
                provider: result.provider_name.clone(),
                variants: result.variants.len(),
                elapsed_ms,
            },
        )
        .await;
        info!(
            invocation_id = %invocation_id,
            tier = %result.provider,
            provider = %result.provider_name,
            variants = result.variants.len(),
            elapsed_ms,
            "caption invocation finished"
        );
        Ok(result)
    }

    fn tiers(&self, nsfw: bool) -> Vec<(ProviderTier, &TierAdapter)> {
        let primary = match (&self.nsfw, nsfw) {
            (Some(adapter), true) => adapter,
            _ => &self.primary,
        };
        let mut tiers = vec![(ProviderTier::Primary, primary)];
        if let Some(secondary) = self.secondary.as_ref() {
            tiers.push((ProviderTier::Secondary, secondary));
        }
        tiers
    }

    async fn run_tier(
        &self,
        ctx: &TierContext<'_>,
        request: &GenerationRequest,
        receipt: &mut TierReceipt,
    ) -> Result<TierSuccess, TierFailure> {
        let mut controller = RetryController::new();
        let outcome = self.drive_tier(ctx, request, &mut controller, receipt).await;
        if matches!(outcome, Err(TierFailure::Abandoned(_))) {
            let _ = controller.advance(RetryState::Abandoned);
        }
        receipt.transitions = controller.transitions();
        outcome
    }

    async fn drive_tier(
        &self,
        ctx: &TierContext<'_>,
        request: &GenerationRequest,
        controller: &mut RetryController,
        receipt: &mut TierReceipt,
    ) -> Result<TierSuccess, TierFailure> {
        controller.advance(RetryState::Validating)?;
        let survivors = match self.attempt(ctx, request, 1, receipt).await? {
            AttemptOutcome::Passed(variants) => {
                controller.advance(RetryState::Passed)?;
                variants
            }
            AttemptOutcome::Unparseable(err) => {
                let hint = FixHint::from_parse_error(&err);
                self.retry(ctx, request, hint, Vec::new(), controller, receipt)
                    .await?
            }
            AttemptOutcome::Failed {
                validation,
                missing_facts,
                ..
            } => {
                let (hint, violations) = if validation.passed() {
                    (FixHint::from_missing_facts(&missing_facts), Vec::new())
                } else {
                    (
                        FixHint::from_validation(request.platform(), &validation.results),
                        distinct_violations(&validation),
                    )
                };
                self.retry(ctx, request, hint, violations, controller, receipt)
                    .await?
            }
        };

        controller.advance(RetryState::Ranking)?;
        let ranking = self.rank(ctx, request, &survivors).await?;
        Ok(TierSuccess {
            variants: survivors,
            ranking,
        })
    }

    /// The single retry. Returns the variants eligible for ranking.
    async fn retry(
        &self,
        ctx: &TierContext<'_>,
        request: &GenerationRequest,
        hint: FixHint,
        violations: Vec<Violation>,
        controller: &mut RetryController,
        receipt: &mut TierReceipt,
    ) -> Result<Vec<Variant>, TierFailure> {
        controller.advance(RetryState::Failed)?;
        controller.advance(RetryState::Retrying)?;
        let hint = hint.to_string();
        info!(
            invocation_id = %ctx.invocation_id,
            tier = %ctx.tier,
            provider = ctx.adapter.name(),
            hint_lines = hint.lines().count(),
            "retrying with fix hint"
        );
        self.emit(
            ctx.invocation_id,
            PipelineEvent::RetryScheduled {
                tier: ctx.tier,
                provider: ctx.adapter.name().to_string(),
                fix_hint: hint.clone(),
                violations,
            },
        )
        .await;

        let retry_request = request.with_fix_hint(hint);
        controller.advance(RetryState::Validating)?;
        match self.attempt(ctx, &retry_request, 2, receipt).await? {
            AttemptOutcome::Passed(variants) => {
                controller.advance(RetryState::Passed)?;
                Ok(variants)
            }
            AttemptOutcome::Unparseable(err) => Err(TierFailure::Abandoned(format!(
                "retry output could not be parsed: {err}"
            ))),
            AttemptOutcome::Failed {
                variants,
                validation,
                ..
            } => {
                controller.advance(RetryState::Failed)?;
                let compliant: Vec<Variant> = validation
                    .compliant_indices()
                    .into_iter()
                    .filter_map(|idx| variants.get(idx).cloned())
                    .collect();
                if compliant.is_empty() {
                    return Err(TierFailure::Abandoned(
                        "no compliant variants after retry".to_string(),
                    ));
                }
                debug!(
                    invocation_id = %ctx.invocation_id,
                    compliant = compliant.len(),
                    of = variants.len(),
                    "ranking the compliant subset of the retry batch"
                );
                Ok(compliant)
            }
        }
    }

    async fn attempt(
        &self,
        ctx: &TierContext<'_>,
        request: &GenerationRequest,
        number: u8,
        receipt: &mut TierReceipt,
    ) -> Result<AttemptOutcome, TierFailure> {
        let call = ctx.adapter.request(
            CallPurpose::Variants,
            PromptBuilder::variants(request, ctx.rules),
        );
        let mut record = AttemptReceipt {
            attempt: number,
            fix_hint: request.fix_hint().map(str::to_string),
            outcome: String::new(),
            variants: 0,
            violations: Vec::new(),
            missing_facts: Vec::new(),
            error: None,
        };

        let raw = match self.call_provider(ctx.adapter, &call, ctx.cancel).await {
            Ok(raw) => raw,
            Err(CallError::Cancelled) => return Err(TierFailure::Cancelled),
            Err(CallError::Provider(err)) => {
                record.outcome = "provider_error".to_string();
                record.error = Some(err.to_string());
                self.finish_attempt(ctx, record, 0, receipt).await;
                return Err(TierFailure::Abandoned(err.to_string()));
            }
        };

        let variants = match parse_variants(&raw.text) {
            Ok(parsed) => self.dedup.dedup(&parsed),
            Err(err) => {
                debug!(
                    invocation_id = %ctx.invocation_id,
                    attempt = number,
                    error = %err,
                    "variant output could not be parsed"
                );
                record.outcome = "parse_error".to_string();
                record.error = Some(err.to_string());
                self.finish_attempt(ctx, record, 0, receipt).await;
                return Ok(AttemptOutcome::Unparseable(err));
            }
        };

        let validation = validate_batch(&variants, ctx.rules);
        let coverage = request
            .image_facts()
            .map(|facts| batch_coverage(facts, &variants));
        let missing_facts = coverage
            .as_ref()
            .filter(|coverage| !coverage.passed())
            .map(|coverage| coverage.missing_facts())
            .unwrap_or_default();
        let passed = validation.passed() && missing_facts.is_empty();

        record.outcome = if passed { "passed" } else { "failed" }.to_string();
        record.variants = variants.len();
        record.violations = distinct_violations(&validation);
        record.missing_facts = missing_facts.clone();
        let compliant = validation.compliant_indices().len();
        self.finish_attempt(ctx, record, compliant, receipt).await;

        Ok(if passed {
            AttemptOutcome::Passed(variants)
        } else {
            AttemptOutcome::Failed {
                variants,
                validation,
                missing_facts,
            }
        })
    }

    async fn finish_attempt(
        &self,
        ctx: &TierContext<'_>,
        record: AttemptReceipt,
        compliant: usize,
        receipt: &mut TierReceipt,
    ) {
        debug!(
            invocation_id = %ctx.invocation_id,
            tier = %ctx.tier,
            attempt = record.attempt,
            outcome = %record.outcome,
            variants = record.variants,
            compliant,
            "generation attempt completed"
        );
        self.emit(
            ctx.invocation_id,
            PipelineEvent::AttemptCompleted {
                tier: ctx.tier,
                provider: ctx.adapter.name().to_string(),
                attempt: record.attempt,
                outcome: record.outcome.clone(),
                variants: record.variants,
                compliant,
            },
        )
        .await;
        receipt.attempts.push(record);
    }

    async fn rank(
        &self,
        ctx: &TierContext<'_>,
        request: &GenerationRequest,
        variants: &[Variant],
    ) -> Result<RankingResult, TierFailure> {
        let verdict = if variants.len() == 1 {
            RankingVerdict {
                winner_index: 0,
                scores: vec![1.0],
                reason: "single compliant variant".to_string(),
                defaulted: false,
            }
        } else {
            let call = ctx
                .adapter
                .request(CallPurpose::Ranking, PromptBuilder::ranking(request, variants));
            match self.call_provider(ctx.adapter, &call, ctx.cancel).await {
                Ok(raw) => parse_ranking(&raw.text, variants.len()),
                Err(CallError::Cancelled) => return Err(TierFailure::Cancelled),
                Err(CallError::Provider(err)) => {
                    return Err(TierFailure::Abandoned(format!("ranking failed: {err}")))
                }
            }
        };
        if verdict.defaulted {
            warn!(
                invocation_id = %ctx.invocation_id,
                tier = %ctx.tier,
                reason = %verdict.reason,
                "ranking answer unusable; selecting the first variant"
            );
        }
        self.emit(
            ctx.invocation_id,
            PipelineEvent::RankingCompleted {
                tier: ctx.tier,
                provider: ctx.adapter.name().to_string(),
                winner_index: verdict.winner_index,
                defaulted: verdict.defaulted,
            },
        )
        .await;
        verdict
            .into_result(variants)
            .ok_or_else(|| TierFailure::Abandoned("ranking selected no variant".to_string()))
    }

    /// Best effort: failures leave the result without titles.
    async fn titles(
        &self,
        adapter: &TierAdapter,
        request: &GenerationRequest,
        chosen: &Variant,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<String>>, PipelineError> {
        let call = adapter.request(CallPurpose::Titles, PromptBuilder::titles(request, chosen));
        match self.call_provider(adapter, &call, cancel).await {
            Ok(raw) => {
                let titles = extract_json_object_from_text(&raw.text)
                    .map(|object| {
                        coerce_text_list(object.get("titles"), MAX_TITLES, MAX_TITLE_CHARS)
                    })
                    .unwrap_or_default();
                Ok(Some(titles).filter(|titles| !titles.is_empty()))
            }
            Err(CallError::Cancelled) => Err(PipelineError::Cancelled),
            Err(CallError::Provider(err)) => {
                warn!(error = %err, "title generation failed; continuing without titles");
                Ok(None)
            }
        }
    }

    /// Drops variants that repeat persisted history. The ranked winner is
    /// always kept and the ranking is re-indexed to the surviving list.
    async fn dedup_against_history(
        &self,
        platform: Platform,
        variants: Vec<Variant>,
        ranking: RankingResult,
    ) -> (Vec<Variant>, RankingResult) {
        let Some(sink) = self.sink.as_ref() else {
            return (variants, ranking);
        };
        let history = match sink.recent_captions(platform).await {
            Ok(history) => history,
            Err(err) => {
                warn!(error = %err, "caption history unavailable");
                return (variants, ranking);
            }
        };
        if history.is_empty() {
            return (variants, ranking);
        }

        let keep = self
            .dedup
            .dedup_against(&history, &variants, ranking.winner_index);
        if keep.len() == variants.len() {
            return (variants, ranking);
        }
        debug!(
            dropped = variants.len() - keep.len(),
            "variants dropped as repeats of recent captions"
        );

        let winner_index = keep
            .iter()
            .position(|idx| *idx == ranking.winner_index)
            .unwrap_or(0);
        let scores = if ranking.scores.len() == variants.len() {
            keep.iter().map(|idx| ranking.scores[*idx]).collect()
        } else {
            ranking.scores.clone()
        };
        let kept: Vec<Variant> = keep
            .into_iter()
            .filter_map(|idx| variants.get(idx).cloned())
            .collect();
        let ranking = RankingResult {
            winner_index,
            scores,
            ..ranking
        };
        (kept, ranking)
    }

    async fn call_provider(
        &self,
        adapter: &TierAdapter,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, CallError> {
        let name = adapter.name();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, adapter.provider.generate(request)) => {
                match outcome {
                    Ok(Ok(raw)) => RawResponse::from_text(name, raw.text, raw.model)
                        .map_err(CallError::Provider),
                    Ok(Err(err)) => Err(CallError::Provider(err)),
                    Err(_) => Err(CallError::Provider(ProviderError::transport(
                        name,
                        format!(
                            "{} call timed out after {}ms",
                            request.purpose,
                            self.timeout.as_millis()
                        ),
                    ))),
                }
            }
        }
    }

    async fn emit(&self, invocation_id: &str, event: PipelineEvent) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        if let Err(err) = sink.event(invocation_id, &event).await {
            warn!(error = %err, "failed to record pipeline event");
        }
    }

    async fn persist(&self, run: PersistedRun) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        if let Err(err) = sink.record(&run).await {
            warn!(
                invocation_id = %run.invocation_id,
                error = %err,
                "failed to persist caption run"
            );
        }
    }
}

fn distinct_violations(validation: &BatchValidation) -> Vec<Violation> {
    let mut seen: Vec<Violation> = Vec::new();
    for violation in validation
        .results
        .iter()
        .flat_map(|result| result.violations.iter())
    {
        if !seen.contains(violation) {
            seen.push(violation.clone());
        }
    }
    seen
}
