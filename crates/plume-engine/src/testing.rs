//! Deterministic fakes shared by the engine's unit tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;

use async_trait::async_trait;
use plume_contracts::events::PipelineEvent;
use plume_contracts::platforms::Platform;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::error::ProviderError;
use crate::provider::{CallPurpose, CaptionProvider, ProviderRequest, RawResponse};
use crate::sink::{PersistedRun, PersistenceSink};

#[derive(Debug, Clone)]
enum Step {
    Reply(Result<String, ProviderError>),
    Hang,
}

/// Replays scripted answers per call purpose and records every request.
///
/// When a purpose's script runs out, its last step repeats. Unscripted
/// purposes fail with a transport error.
pub struct ScriptedProvider {
    name: String,
    scripts: Mutex<HashMap<CallPurpose, Vec<Step>>>,
    seen: Mutex<HashMap<CallPurpose, Vec<ProviderRequest>>>,
}

impl ScriptedProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scripts: Mutex::new(HashMap::new()),
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn on(self, purpose: CallPurpose, replies: Vec<Result<String, ProviderError>>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(purpose, replies.into_iter().map(Step::Reply).collect());
        }
        self
    }

    /// Calls for `purpose` never complete.
    pub fn hang(self, purpose: CallPurpose) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(purpose, vec![Step::Hang]);
        }
        self
    }

    pub fn calls(&self, purpose: CallPurpose) -> usize {
        self.requests(purpose).len()
    }

    pub fn total_calls(&self) -> usize {
        self.seen
            .lock()
            .map(|seen| seen.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn requests(&self, purpose: CallPurpose) -> Vec<ProviderRequest> {
        self.seen
            .lock()
            .ok()
            .and_then(|seen| seen.get(&purpose).cloned())
            .unwrap_or_default()
    }

    pub fn prompts(&self, purpose: CallPurpose) -> Vec<String> {
        self.requests(purpose)
            .into_iter()
            .map(|request| request.prompt)
            .collect()
    }

    pub fn saw_image(&self, purpose: CallPurpose) -> bool {
        self.requests(purpose)
            .iter()
            .any(|request| request.image.is_some())
    }

    fn next_step(&self, purpose: CallPurpose) -> Step {
        let Ok(mut scripts) = self.scripts.lock() else {
            return Step::Reply(Err(ProviderError::transport(&self.name, "script lock poisoned")));
        };
        match scripts.get_mut(&purpose) {
            Some(steps) if steps.len() > 1 => steps.remove(0),
            Some(steps) if steps.len() == 1 => steps[0].clone(),
            _ => Step::Reply(Err(ProviderError::transport(
                &self.name,
                format!("no script for {purpose}"),
            ))),
        }
    }
}

#[async_trait]
impl CaptionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<RawResponse, ProviderError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.entry(request.purpose).or_default().push(request.clone());
        }
        match self.next_step(request.purpose) {
            Step::Reply(Ok(text)) => RawResponse::from_text(&self.name, text, None),
            Step::Reply(Err(err)) => Err(err),
            Step::Hang => {
                std::future::pending::<()>().await;
                Err(ProviderError::transport(&self.name, "unreachable"))
            }
        }
    }
}

/// One JSON variant row as a provider would emit it.
pub fn variant_json(caption: &str, hashtags: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "caption": caption,
        "alt": "A photo accompanying the post",
        "hashtags": hashtags,
        "cta": "Link in bio",
        "mood": "bright",
        "style": "punchy",
        "safety_level": "normal",
        "nsfw": false,
    })
}

pub fn batch_text(captions: &[String], hashtags: &[&str]) -> String {
    serde_json::Value::Array(
        captions
            .iter()
            .map(|caption| variant_json(caption, hashtags))
            .collect(),
    )
    .to_string()
}

/// Five clearly different captions of roughly `len` characters.
pub fn distinct_captions(len: usize) -> Vec<String> {
    let seeds = [
        "Sunrise laps around the lake",
        "Fresh bread from the corner bakery",
        "Quiet studio hours with vinyl playing",
        "Mountain trail notes and muddy boots",
        "Late night ramen with old friends",
    ];
    seeds
        .iter()
        .map(|seed| {
            let mut caption = seed.to_string();
            while caption.chars().count() < len {
                caption.push_str(" and ");
                caption.push_str(&seed.to_lowercase());
            }
            caption.chars().take(len).collect::<String>().trim().to_string()
        })
        .collect()
}

/// Sink that keeps everything in memory.
#[derive(Default)]
pub struct MemorySink {
    pub history: Mutex<HashMap<Platform, Vec<String>>>,
    pub runs: Mutex<Vec<PersistedRun>>,
    pub events: Mutex<Vec<PipelineEvent>>,
}

impl MemorySink {
    pub fn with_history(platform: Platform, captions: Vec<String>) -> Self {
        let sink = Self::default();
        if let Ok(mut history) = sink.history.lock() {
            history.insert(platform, captions);
        }
        sink
    }

    pub fn runs(&self) -> Vec<PersistedRun> {
        self.runs.lock().map(|runs| runs.clone()).unwrap_or_default()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter_map(|event| {
                        serde_json::to_value(event)
                            .ok()
                            .and_then(|value| value["type"].as_str().map(str::to_string))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn recent_captions(&self, platform: Platform) -> anyhow::Result<Vec<String>> {
        Ok(self
            .history
            .lock()
            .map_err(|_| anyhow::anyhow!("history lock poisoned"))?
            .get(&platform)
            .cloned()
            .unwrap_or_default())
    }

    async fn record(&self, run: &PersistedRun) -> anyhow::Result<()> {
        self.runs
            .lock()
            .map_err(|_| anyhow::anyhow!("runs lock poisoned"))?
            .push(run.clone());
        Ok(())
    }

    async fn event(&self, _invocation_id: &str, event: &PipelineEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("events lock poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// Canned HTTP answer for [`serve_once`].
#[derive(Debug, Clone)]
pub struct StubResponse {
    status: u16,
    content_type: Option<String>,
    body: Vec<u8>,
    declared_length: Option<u64>,
    chunked: bool,
}

impl StubResponse {
    pub fn ok(content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: Some(content_type.to_string()),
            body,
            declared_length: None,
            chunked: false,
        }
    }

    pub fn declared_length(mut self, length: u64) -> Self {
        self.declared_length = Some(length);
        self
    }

    pub fn chunked(mut self) -> Self {
        self.chunked = true;
        self
    }
}

/// Serves a single HTTP response on a loopback port and returns its URL.
pub async fn serve_once(stub: StubResponse) -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut seen = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    seen.extend_from_slice(&buf[..n]);
                    if seen.windows(4).any(|window| window == b"\r\n\r\n") {
                        break;
                    }
                }
            }
        }

        let mut head = format!("HTTP/1.1 {} Stub\r\n", stub.status);
        if let Some(content_type) = &stub.content_type {
            head.push_str(&format!("Content-Type: {content_type}\r\n"));
        }
        if stub.chunked {
            head.push_str("Transfer-Encoding: chunked\r\n");
        } else {
            let length = stub.declared_length.unwrap_or(stub.body.len() as u64);
            head.push_str(&format!("Content-Length: {length}\r\n"));
        }
        head.push_str("Connection: close\r\n\r\n");
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        if stub.chunked {
            for chunk in stub.body.chunks(512) {
                let framed = [
                    format!("{:x}\r\n", chunk.len()).into_bytes(),
                    chunk.to_vec(),
                    b"\r\n".to_vec(),
                ]
                .concat();
                if socket.write_all(&framed).await.is_err() {
                    return;
                }
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
        } else {
            let _ = socket.write_all(&stub.body).await;
        }
        let _ = socket.shutdown().await;
    });
    Ok(format!("http://{addr}/photo"))
}

pub fn png_bytes() -> Vec<u8> {
    let image = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 120, 40]));
    let mut cursor = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .expect("encode test png");
    cursor.into_inner()
}
