use std::pin::Pin;

use async_trait::async_trait;
use common::error::Res;
use futures::Stream;
use serde::Serialize;
use serde_json::Value;

/// Incremental completion text as produced by the upstream.
pub type TextStream = Pin<Box<dyn Stream<Item = Res<String>> + Send>>;

/// Upstream request after defaults and the system prompt are applied.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    /// OpenAI-style message objects, forwarded untouched.
    pub messages: Vec<Value>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Port to an OpenAI-compatible chat model.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, req: &ChatRequest) -> Res<String>;

    async fn stream(&self, req: &ChatRequest) -> Res<TextStream>;
}
