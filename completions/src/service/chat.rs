use std::sync::Arc;

use actix_web::web::Bytes;
use api_keys::usage::{UsageReport, UsageReporter};
use chrono::Utc;
use common::error::{AppError, Res};
use futures::{Stream, StreamExt};
use serde_json::json;

use crate::{
    dtos::chat::{
        AssistantMessage, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
        ChunkChoice, ChunkDelta, CompletionChoice, TokenUsage,
    },
    models,
    provider::{ChatProvider, ChatRequest, TextStream},
};

/// Endpoint name recorded in the usage ledger.
pub const ENDPOINT: &str = "/chat/completions";

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 4000;

pub const SYSTEM_PROMPT: &str = "You are Grok 4, an advanced AI assistant created by xAI. \
You are curious, witty and a little rebellious.\n\n\
When a problem needs careful reasoning, think it through first inside a block:\n\
```thinking\n\
step-by-step analysis of the problem\n\
```\n\n\
Then give a clear, helpful and slightly witty answer. \
Say so honestly when you do not know something.";

const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> i64 {
    text.chars().count().div_ceil(4) as i64
}

/// Upstream request with defaults applied and the system prompt prepended.
#[derive(Debug)]
pub struct PreparedChat {
    pub request: ChatRequest,
    pub input_tokens: i64,
    pub stream: bool,
}

pub fn prepare(req: ChatCompletionRequest) -> Res<PreparedChat> {
    let messages = req
        .messages
        .filter(|messages| !messages.is_empty())
        .ok_or_else(|| AppError::BadRequest("Messages array is required".to_string()))?;

    let mut prompt = Vec::with_capacity(messages.len() + 1);
    prompt.push(json!({ "role": "system", "content": SYSTEM_PROMPT }));
    prompt.extend(messages);

    let input_tokens = serde_json::to_string(&prompt)
        .map(|serialized| estimate_tokens(&serialized))
        .map_err(|e| AppError::Internal(format!("Failed to serialize prompt: {}", e)))?;

    Ok(PreparedChat {
        request: ChatRequest {
            model: models::resolve(req.model.as_deref()).to_string(),
            messages: prompt,
            temperature: req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        },
        input_tokens,
        stream: req.stream,
    })
}

fn completion_id() -> String {
    format!("chatcmpl-{}", Utc::now().timestamp_millis())
}

fn upstream_failure(e: AppError) -> AppError {
    log::error!("Chat completion failed upstream: {}", e);
    AppError::Upstream("Failed to generate completion".to_string())
}

/// Runs a non-streaming completion and reports its usage once.
pub async fn complete(
    provider: &dyn ChatProvider,
    usage: &dyn UsageReporter,
    chat: PreparedChat,
) -> Res<ChatCompletionResponse> {
    let mut report = UsageReport {
        endpoint: Some(ENDPOINT.to_string()),
        model: Some(chat.request.model.clone()),
        input_tokens: chat.input_tokens,
        output_tokens: 0,
    };

    let text = match provider.complete(&chat.request).await {
        Ok(text) => text,
        Err(e) => {
            usage.log_usage(report).await;
            return Err(upstream_failure(e));
        }
    };

    let output_tokens = estimate_tokens(&text);
    report.output_tokens = output_tokens;
    usage.log_usage(report).await;

    Ok(ChatCompletionResponse {
        id: completion_id(),
        object: "chat.completion",
        created: Utc::now().timestamp(),
        model: chat.request.model,
        choices: vec![CompletionChoice {
            index: 0,
            message: AssistantMessage {
                role: "assistant",
                content: text,
            },
            finish_reason: "stop",
        }],
        usage: TokenUsage {
            prompt_tokens: chat.input_tokens,
            completion_tokens: output_tokens,
            total_tokens: chat.input_tokens + output_tokens,
        },
    })
}

/// Reports usage exactly once, when the response stream is dropped, whether
/// it ran to completion or the client went away.
struct UsageGuard {
    usage: Arc<dyn UsageReporter>,
    report: Option<UsageReport>,
    output_chars: usize,
}

impl UsageGuard {
    fn record(&mut self, text: &str) {
        self.output_chars += text.chars().count();
    }
}

impl Drop for UsageGuard {
    fn drop(&mut self) {
        let Some(mut report) = self.report.take() else {
            return;
        };
        report.output_tokens = self.output_chars.div_ceil(4) as i64;

        // dropped outside a runtime during shutdown
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!(
                "No runtime left to record {} input and {} output tokens of a stream",
                report.input_tokens,
                report.output_tokens
            );
            return;
        };
        let usage = Arc::clone(&self.usage);
        handle.spawn(async move {
            usage.log_usage(report).await;
        });
    }
}

enum Phase {
    Streaming,
    Finishing,
    Done,
}

struct ChunkState {
    upstream: TextStream,
    id: String,
    model: String,
    guard: UsageGuard,
    phase: Phase,
}

impl ChunkState {
    fn frame(&self, content: Option<String>, finish_reason: Option<&'static str>) -> Res<Bytes> {
        let chunk = ChatCompletionChunk {
            id: &self.id,
            object: "chat.completion.chunk",
            created: Utc::now().timestamp(),
            model: &self.model,
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta { content },
                finish_reason,
            }],
        };
        let json = serde_json::to_string(&chunk)
            .map_err(|e| AppError::Internal(format!("Failed to serialize chunk: {}", e)))?;
        Ok(Bytes::from(format!("data: {}\n\n", json)))
    }
}

/// Opens an upstream stream and re-frames it as `chat.completion.chunk`
/// server-sent events, terminated by a stop frame and `[DONE]`.
pub async fn stream(
    provider: &dyn ChatProvider,
    usage: Arc<dyn UsageReporter>,
    chat: PreparedChat,
) -> Res<impl Stream<Item = Res<Bytes>> + 'static> {
    let report = UsageReport {
        endpoint: Some(ENDPOINT.to_string()),
        model: Some(chat.request.model.clone()),
        input_tokens: chat.input_tokens,
        output_tokens: 0,
    };

    let upstream = match provider.stream(&chat.request).await {
        Ok(upstream) => upstream,
        Err(e) => {
            usage.log_usage(report).await;
            return Err(upstream_failure(e));
        }
    };

    let state = ChunkState {
        upstream,
        id: completion_id(),
        model: chat.request.model,
        guard: UsageGuard {
            usage,
            report: Some(report),
            output_chars: 0,
        },
        phase: Phase::Streaming,
    };

    Ok(futures::stream::unfold(state, |mut state| async move {
        match state.phase {
            Phase::Streaming => match state.upstream.next().await {
                Some(Ok(text)) => {
                    state.guard.record(&text);
                    let frame = state.frame(Some(text), None);
                    Some((frame, state))
                }
                Some(Err(e)) => {
                    state.phase = Phase::Done;
                    Some((Err(upstream_failure(e)), state))
                }
                None => {
                    state.phase = Phase::Finishing;
                    let frame = state.frame(None, Some("stop"));
                    Some((frame, state))
                }
            },
            Phase::Finishing => {
                state.phase = Phase::Done;
                Some((Ok(Bytes::from_static(DONE_FRAME)), state))
            }
            Phase::Done => None,
        }
    }))
}
