//! Streaming chat-completions client
//!
//! The model is an opaque source of `{reasoning_content, content}` chunks.
//! [`SentenceBuffer`] turns that stream into whole sentences for chat relay.

use crate::config::LlmConfig;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use mc_agent_core::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;
use tracing::debug;

/// One streamed delta
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatChunk {
    pub reasoning_content: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

pub type ChunkStream = BoxStream<'static, Result<ChatChunk>>;

/// A streaming chat model
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<ChunkStream>;
}

/// OpenAI-compatible `/chat/completions` with `stream: true`
pub struct OpenAiChat {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BridgeError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<ChunkStream> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "temperature": self.temperature,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!("Calling chat model {}", self.model);
        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::Transport(format!("LLM request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BridgeError::Protocol(format!("LLM API returned {status}: {text}")));
        }

        Ok(decode_sse(Box::pin(response.bytes_stream())))
    }
}

enum SseEvent {
    Chunk(ChatChunk),
    Done,
}

/// Incremental `data:` line decoder
///
/// Buffers raw bytes and decodes only whole lines, so a multibyte character
/// split across network chunks survives.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw);
            let Some(data) = line.trim().strip_prefix("data:").map(str::trim) else {
                continue;
            };
            if data == "[DONE]" {
                events.push(SseEvent::Done);
                break;
            }
            match serde_json::from_str::<Value>(data) {
                Ok(value) => {
                    if let Some(chunk) = parse_delta(&value) {
                        events.push(SseEvent::Chunk(chunk));
                    }
                }
                Err(e) => debug!("Skipping undecodable stream line: {}", e),
            }
        }
        events
    }
}

fn parse_delta(value: &Value) -> Option<ChatChunk> {
    let delta = value.get("choices")?.get(0)?.get("delta")?;
    let text = |key: &str| {
        delta
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let chunk = ChatChunk {
        reasoning_content: text("reasoning_content"),
        content: text("content"),
    };
    (!chunk.reasoning_content.is_empty() || !chunk.content.is_empty()).then_some(chunk)
}

struct SseState<S> {
    bytes: S,
    decoder: SseDecoder,
    pending: VecDeque<ChatChunk>,
    done: bool,
}

/// Turn a byte stream of server-sent events into chat chunks, ending at `[DONE]`
fn decode_sse<S, B, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]>,
    E: Display,
{
    let state = SseState {
        bytes,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                return Some((Ok(chunk), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    for event in state.decoder.push(bytes.as_ref()) {
                        match event {
                            SseEvent::Chunk(chunk) => state.pending.push_back(chunk),
                            SseEvent::Done => state.done = true,
                        }
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    let err = BridgeError::Transport(format!("LLM stream interrupted: {e}"));
                    return Some((Err(err), state));
                }
                None => state.done = true,
            }
        }
    })
    .boxed()
}

const SENTENCE_ENDS: [char; 8] = ['。', '．', '.', '!', '?', '！', '？', '\n'];

/// Accumulates streamed text and releases complete sentences
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    pending: String,
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add text; returns every sentence completed by it
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.pending.push_str(text);

        let mut sentences = Vec::new();
        while let Some((idx, ch)) = self
            .pending
            .char_indices()
            .find(|(_, c)| SENTENCE_ENDS.contains(c))
        {
            let sentence: String = self.pending.drain(..idx + ch.len_utf8()).collect();
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
        }
        sentences
    }

    /// Whatever is left once the stream ends
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}
