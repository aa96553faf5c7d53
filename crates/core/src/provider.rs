//! Provider trait: the Model Client contract.
//!
//! A Provider sends a conversation plus the available tool definitions to a
//! chat model and gets back an assistant [`Message`], either complete or as a
//! stream of token deltas ending with the aggregated message.
//!
//! The two forms are interchangeable: `complete()` is logically "drain
//! `stream()` and keep only the final message".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;

/// A single model invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model or deployment to use
    pub model: String,

    /// System instruction first, then the conversation
    pub messages: Vec<Message>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model may request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

fn default_temperature() -> f32 {
    0.1
}

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,

    pub description: String,

    /// JSON Schema describing the tool's arguments
    pub parameters: serde_json::Value,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Always `Message::Assistant`
    pub message: Message,

    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One item of a streaming response.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// A text delta, in generation order.
    Token(String),

    /// The model began emitting a tool call. Sent once per call index, as
    /// soon as the first fragment arrives.
    ToolCallStarted { index: u32 },

    /// Terminal chunk carrying the aggregated reply.
    Done(ProviderResponse),
}

/// Receiving half of a model stream. Bounded: the producer waits for the
/// consumer before sending the next delta.
pub type ChunkReceiver = mpsc::Receiver<Result<StreamChunk, ProviderError>>;

/// An embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub inputs: Vec<String>,
}

/// An embedding response, one vector per input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
}

/// The Model Client contract.
///
/// Implementations: Azure OpenAI / OpenAI-compatible HTTP, and scripted
/// providers in tests.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "azure-openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of chunks ending with `StreamChunk::Done`.
    ///
    /// Default implementation calls `complete()` and replays the result.
    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let tool_count = response.message.tool_calls().len();
        let (tx, rx) = mpsc::channel(tool_count + 2);

        for index in 0..tool_count {
            let _ = tx
                .send(Ok(StreamChunk::ToolCallStarted { index: index as u32 }))
                .await;
        }
        let content = response.message.content().to_string();
        if !content.is_empty() {
            let _ = tx.send(Ok(StreamChunk::Token(content))).await;
        }
        let _ = tx.send(Ok(StreamChunk::Done(response))).await;
        Ok(rx)
    }

    /// Generate embeddings for the given texts.
    async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        Err(ProviderError::NotConfigured(format!(
            "Provider '{}' does not support embeddings",
            self.name()
        )))
    }

    /// Can we reach the provider?
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}
