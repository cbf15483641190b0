use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use common::{
    env_config::ProviderConfig,
    error::{AppError, Res},
};
use futures::{StreamExt, stream::BoxStream};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::provider::{ChatProvider, ChatRequest, TextStream};

const DONE: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct CompletionBody {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkBody {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Client for xAI's OpenAI-compatible `/chat/completions` endpoint.
pub struct XaiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl XaiClient {
    pub fn new(config: &ProviderConfig) -> Res<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(XaiClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn send(&self, req: &ChatRequest, stream: bool) -> Res<reqwest::Response> {
        let body = json!({
            "model": req.model,
            "messages": req.messages,
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
            "stream": stream,
        });

        log::debug!(
            "Sending completion request to {} (model {}, stream {})",
            self.base_url,
            req.model,
            stream
        );
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "no response body".to_string());
            return Err(AppError::Upstream(format!("{}: {}", status, message)));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for XaiClient {
    async fn complete(&self, req: &ChatRequest) -> Res<String> {
        let body = self.send(req, false).await?.json::<CompletionBody>().await?;
        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| AppError::Upstream("Completion without choices".to_string()))
    }

    async fn stream(&self, req: &ChatRequest) -> Res<TextStream> {
        let body = self.send(req, true).await?.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec()));
        Ok(Box::pin(sse_text(body.boxed())))
    }
}

/// Splits a byte stream into server-sent event `data:` payloads.
/// Lines may arrive split across chunks, including inside multi-byte characters.
#[derive(Debug, Default)]
pub struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(payload) = data_payload(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flushes a trailing line the upstream did not terminate.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.pending);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let payload = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?;
    let payload = payload.trim();
    (!payload.is_empty()).then(|| payload.to_string())
}

/// Extracts the text delta of one chunk payload. `Ok(None)` for chunks that
/// carry no content, such as the role preamble or the finish frame.
fn chunk_text(payload: &str) -> Res<Option<String>> {
    let chunk: ChunkBody = serde_json::from_str(payload)
        .map_err(|e| AppError::Upstream(format!("Malformed stream chunk: {}", e)))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|text| !text.is_empty()))
}

struct SseState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: SseBuffer,
    payloads: VecDeque<String>,
    finished: bool,
}

fn sse_text(
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
) -> impl futures::Stream<Item = Res<String>> + Send {
    let state = SseState {
        body,
        buffer: SseBuffer::default(),
        payloads: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(payload) = state.payloads.pop_front() {
                if payload == DONE {
                    return None;
                }
                match chunk_text(&payload) {
                    Ok(Some(text)) => return Some((Ok(text), state)),
                    Ok(None) => continue,
                    Err(e) => {
                        state.payloads.clear();
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
            }

            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let payloads = state.buffer.push(&bytes);
                    state.payloads.extend(payloads);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.finished = true;
                    state.payloads.extend(state.buffer.finish());
                }
            }
        }
    })
}
