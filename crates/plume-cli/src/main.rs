use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use plume_contracts::models::ModelSelector;
use plume_contracts::results::PipelineResult;
use plume_engine::{
    build_pipeline, default_provider_registry, CaptionPipeline, ImageCaptionInput,
    PipelineConfig, PipelineError, RewriteInput, TextCaptionInput,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

const DEFAULT_LOG_FILTER: &str = "plume_engine=info,plume=info";

#[derive(Debug, Parser)]
#[command(name = "plume", version, about = "Platform-aware social caption generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Caption a photo, optionally grounded in facts read from `--image-url`.
    Image(ImageArgs),
    /// Rewrite an existing caption for a platform.
    Rewrite(RewriteArgs),
    /// Caption a text post from a theme.
    Text(TextArgs),
    /// Print the effective platform rule table.
    Platforms(PlatformsArgs),
}

#[derive(Debug, Args)]
struct CommonArgs {
    #[arg(long)]
    platform: String,
    #[arg(long, default_value = "friendly")]
    voice: String,
    #[arg(long, default_value = "conversational")]
    style: String,
    #[arg(long, default_value = "upbeat")]
    mood: String,
    #[arg(long)]
    nsfw: bool,
    /// Directory for events.jsonl, choices.jsonl, history.json and receipts.
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    primary_model: Option<String>,
    #[arg(long)]
    secondary_model: Option<String>,
    #[arg(long)]
    nsfw_model: Option<String>,
}

#[derive(Debug, Args)]
struct ImageArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long)]
    image_url: Option<String>,
}

#[derive(Debug, Args)]
struct RewriteArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long)]
    caption: String,
}

#[derive(Debug, Args)]
struct TextArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long)]
    theme: String,
    #[arg(long)]
    context: Option<String>,
}

#[derive(Debug, Args)]
struct PlatformsArgs {
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    init_tracing();
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("plume error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Image(args) => {
            let input = ImageCaptionInput {
                platform: args.common.platform.clone(),
                voice: args.common.voice.clone(),
                style: args.common.style.clone(),
                mood: args.common.mood.clone(),
                nsfw: args.common.nsfw,
                image_url: args.image_url,
            };
            let pipeline = pipeline_for(&args.common)?;
            invoke(|cancel| async move { pipeline.image(input, &cancel).await }).await
        }
        Command::Rewrite(args) => {
            let input = RewriteInput {
                platform: args.common.platform.clone(),
                voice: args.common.voice.clone(),
                style: args.common.style.clone(),
                mood: args.common.mood.clone(),
                nsfw: args.common.nsfw,
                existing_caption: args.caption,
            };
            let pipeline = pipeline_for(&args.common)?;
            invoke(|cancel| async move { pipeline.rewrite(input, &cancel).await }).await
        }
        Command::Text(args) => {
            let input = TextCaptionInput {
                platform: args.common.platform.clone(),
                voice: args.common.voice.clone(),
                theme: args.theme,
                context: args.context,
                style: args.common.style.clone(),
                mood: args.common.mood.clone(),
                nsfw: args.common.nsfw,
            };
            let pipeline = pipeline_for(&args.common)?;
            invoke(|cancel| async move { pipeline.text(input, &cancel).await }).await
        }
        Command::Platforms(args) => {
            let config = PipelineConfig::load(args.config.as_deref())
                .context("failed to load pipeline config")?;
            print_json(&platforms_payload(&config))?;
            Ok(0)
        }
    }
}

fn pipeline_for(common: &CommonArgs) -> Result<CaptionPipeline> {
    let mut config = PipelineConfig::load(common.config.as_deref())
        .context("failed to load pipeline config")?;
    if let Some(model) = common.primary_model.clone() {
        config.models.primary = Some(model);
    }
    if let Some(model) = common.secondary_model.clone() {
        config.models.secondary = Some(model);
    }
    if let Some(model) = common.nsfw_model.clone() {
        config.models.nsfw = Some(model);
    }
    if let Some(out) = common.out.as_deref() {
        std::fs::create_dir_all(out)
            .with_context(|| format!("failed to create output dir {}", out.display()))?;
    }
    build_pipeline(
        &config,
        &ModelSelector::default(),
        &default_provider_registry(),
        common.out.as_deref(),
    )
    .context("failed to build caption pipeline")
}

/// Runs one invocation with Ctrl-C wired to its cancellation token.
async fn invoke<F, Fut>(call: F) -> Result<i32>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: std::future::Future<Output = Result<PipelineResult, PipelineError>>,
{
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; cancelling invocation");
            on_interrupt.cancel();
        }
    });
    let outcome = call(cancel).await;
    watcher.abort();

    let result = outcome.context("caption invocation failed")?;
    print_json(&serde_json::to_value(&result)?)?;
    Ok(0)
}

fn platforms_payload(config: &PipelineConfig) -> Value {
    let rules: Vec<Value> = config
        .rule_table()
        .list()
        .map(|rules| {
            json!({
                "platform": rules.platform,
                "max_caption_chars": rules.max_caption_chars,
                "max_hashtags": rules.max_hashtags,
                "require_alt": rules.require_alt,
                "allow_explicit": rules.allow_explicit,
                "forbid_markdown": rules.forbid_markdown,
                "banned_substrings": rules.banned_substrings,
            })
        })
        .collect();
    Value::Array(rules)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
