use std::path::{Path, PathBuf};

use async_trait::async_trait;
use plume_contracts::events::{EventWriter, PipelineEvent};
use plume_contracts::platforms::Platform;
use plume_contracts::results::PipelineResult;
use plume_contracts::runs::{
    write_receipt, CaptionHistory, ChoiceRecord, ChoiceWriter, InvocationReceipt,
};

/// Everything persisted for one finished invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRun {
    pub invocation_id: String,
    pub platform: Platform,
    pub result: PipelineResult,
    pub choice: ChoiceRecord,
    pub receipt: InvocationReceipt,
}

#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Captions previously persisted for `platform`, oldest first.
    async fn recent_captions(&self, platform: Platform) -> anyhow::Result<Vec<String>>;

    async fn record(&self, run: &PersistedRun) -> anyhow::Result<()>;

    async fn event(&self, _invocation_id: &str, _event: &PipelineEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// File-backed sink: `events.jsonl`, `choices.jsonl`, `history.json`, and
/// one `receipt-<invocation>.json` per run, all under one directory.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    dir: PathBuf,
    events: EventWriter,
    choices: ChoiceWriter,
    history: CaptionHistory,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>, history_window: usize) -> Self {
        let dir = dir.into();
        Self {
            events: EventWriter::new(dir.join("events.jsonl")),
            choices: ChoiceWriter::new(dir.join("choices.jsonl")),
            history: CaptionHistory::new(dir.join("history.json"), history_window),
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn receipt_path(&self, invocation_id: &str) -> PathBuf {
        self.dir.join(format!("receipt-{invocation_id}.json"))
    }
}

#[async_trait]
impl PersistenceSink for JsonlSink {
    async fn recent_captions(&self, platform: Platform) -> anyhow::Result<Vec<String>> {
        let history = self.history.clone();
        tokio::task::spawn_blocking(move || history.recent(platform)).await?
    }

    async fn record(&self, run: &PersistedRun) -> anyhow::Result<()> {
        let captions: Vec<String> = run
            .result
            .variants
            .iter()
            .map(|variant| variant.caption.clone())
            .collect();
        let history = self.history.clone();
        let choices = self.choices.clone();
        let receipt_path = self.receipt_path(&run.invocation_id);
        let platform = run.platform;
        let choice = run.choice.clone();
        let receipt = run.receipt.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            history.record(platform, &captions)?;
            choices.record(&choice)?;
            write_receipt(&receipt_path, &receipt)?;
            Ok(())
        })
        .await?
    }

    async fn event(&self, invocation_id: &str, event: &PipelineEvent) -> anyhow::Result<()> {
        let events = self.events.clone();
        let invocation_id = invocation_id.to_string();
        let event = event.clone();
        tokio::task::spawn_blocking(move || events.emit(&invocation_id, &event).map(|_| ()))
            .await?
    }
}

#[cfg(test)]
mod tests {
    use plume_contracts::events::PipelineEvent;
    use plume_contracts::platforms::Platform;
    use plume_contracts::request::{Flavor, GenerationRequest};
    use plume_contracts::results::{PipelineResult, ProviderTier};
    use plume_contracts::runs::{ChoiceRecord, InvocationReceipt};
    use plume_contracts::variants::{SafetyLevel, Variant};
    use serde_json::Value;

    use super::{JsonlSink, PersistedRun, PersistenceSink};

    fn variant(caption: &str) -> Variant {
        Variant {
            caption: caption.to_string(),
            alt: "alt".to_string(),
            hashtags: vec!["#tea".to_string()],
            cta: "Visit".to_string(),
            mood: "calm".to_string(),
            style: "plain".to_string(),
            safety_level: SafetyLevel::Normal,
            nsfw: false,
        }
    }

    fn run(invocation_id: &str, caption: &str) -> PersistedRun {
        let request = GenerationRequest::new(Flavor::Text, Platform::Threads, "v", "s", "m");
        let winner = variant(caption);
        let result = PipelineResult {
            invocation_id: invocation_id.to_string(),
            provider: ProviderTier::Primary,
            provider_name: "openai".to_string(),
            final_variant: winner.clone(),
            variants: vec![winner.clone()],
            titles: None,
            ranking: None,
            fallback_reasons: Vec::new(),
        };
        let choice = ChoiceRecord::auto(
            invocation_id,
            Platform::Threads,
            ProviderTier::Primary,
            0,
            winner.caption,
            5,
        );
        PersistedRun {
            invocation_id: invocation_id.to_string(),
            platform: Platform::Threads,
            receipt: InvocationReceipt::new(invocation_id, &request),
            result,
            choice,
        }
    }

    #[tokio::test]
    async fn jsonl_sink_writes_every_artifact() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let sink = JsonlSink::new(temp.path().join("runs"), 10);
        let request = GenerationRequest::new(Flavor::Text, Platform::Threads, "v", "s", "m");
        let winner = variant("Matcha and a slow morning");
        let result = PipelineResult {
            invocation_id: "inv-1".to_string(),
            provider: ProviderTier::Primary,
            provider_name: "openai".to_string(),
            final_variant: winner.clone(),
            variants: vec![winner.clone(), variant("Oolong for the afternoon")],
            titles: None,
            ranking: None,
            fallback_reasons: Vec::new(),
        };
        let choice = ChoiceRecord::auto(
            "inv-1",
            Platform::Threads,
            ProviderTier::Primary,
            0,
            winner.caption.clone(),
            12,
        );
        let mut receipt = InvocationReceipt::new("inv-1", &request);
        receipt.result = Some(result.clone());
        receipt.choice = Some(choice.clone());

        sink.event(
            "inv-1",
            &PipelineEvent::InvocationStarted {
                flavor: Flavor::Text,
                platform: Platform::Threads,
                nsfw: false,
            },
        )
        .await?;
        sink.record(&PersistedRun {
            invocation_id: "inv-1".to_string(),
            platform: Platform::Threads,
            result,
            choice,
            receipt,
        })
        .await?;

        assert_eq!(
            sink.recent_captions(Platform::Threads).await?,
            vec!["Matcha and a slow morning", "Oolong for the afternoon"]
        );
        assert!(sink.recent_captions(Platform::X).await?.is_empty());

        let dir = sink.dir();
        let events = std::fs::read_to_string(dir.join("events.jsonl"))?;
        assert_eq!(events.lines().count(), 1);
        let choices = std::fs::read_to_string(dir.join("choices.jsonl"))?;
        let choice: Value = serde_json::from_str(choices.lines().next().unwrap_or(""))?;
        assert_eq!(choice["auto_selected"], Value::Bool(true));

        let receipt: Value =
            serde_json::from_str(&std::fs::read_to_string(sink.receipt_path("inv-1"))?)?;
        assert_eq!(receipt["result"]["final"]["caption"], "Matcha and a slow morning");
        Ok(())
    }

    #[tokio::test]
    async fn shared_sink_keeps_history_under_parallel_invocations() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let sink = JsonlSink::new(temp.path(), 1000);
        let tasks: Vec<_> = (0..8)
            .map(|worker| {
                let sink = sink.clone();
                tokio::spawn(async move {
                    for round in 0..10 {
                        let id = format!("inv-{worker}-{round}");
                        sink.record(&run(&id, &format!("caption {worker}-{round}")))
                            .await?;
                    }
                    anyhow::Ok(())
                })
            })
            .collect();
        for task in tasks {
            task.await??;
        }

        assert_eq!(sink.recent_captions(Platform::Threads).await?.len(), 80);
        let choices = std::fs::read_to_string(temp.path().join("choices.jsonl"))?;
        assert_eq!(choices.lines().count(), 80);
        Ok(())
    }
}
