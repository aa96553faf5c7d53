//! Azure OpenAI provider implementation.
//!
//! Talks to a chat deployment at
//! `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version=...`
//! and, optionally, an embedding deployment on the same or another resource.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling
//! - Embeddings for the knowledge base

use async_trait::async_trait;
use futures::StreamExt;
use flavia_config::AppConfig;
use flavia_core::error::ProviderError;
use flavia_core::message::{Message, ToolCallRequest};
use flavia_core::provider::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Capacity of the chunk channel between the SSE reader and the consumer.
const STREAM_BUFFER: usize = 16;

/// An Azure OpenAI chat + embedding client.
pub struct AzureOpenAiProvider {
    endpoint: String,
    deployment: String,
    api_version: String,
    api_key: String,
    embedding_endpoint: String,
    embedding_deployment: Option<String>,
    client: reqwest::Client,
}

impl AzureOpenAiProvider {
    /// Create a provider for one chat deployment.
    pub fn new(
        endpoint: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Ok(Self {
            embedding_endpoint: endpoint.clone(),
            endpoint,
            deployment: deployment.into(),
            api_version: api_version.into(),
            api_key: api_key.into(),
            embedding_deployment: None,
            client,
        })
    }

    /// Enable embeddings. `endpoint` defaults to the chat resource.
    pub fn with_embeddings(mut self, endpoint: Option<&str>, deployment: impl Into<String>) -> Self {
        if let Some(endpoint) = endpoint {
            self.embedding_endpoint = endpoint.trim_end_matches('/').to_string();
        }
        self.embedding_deployment = Some(deployment.into());
        self
    }

    /// Build from the `[model]` and `[embedding]` config sections.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let endpoint = config
            .chat_endpoint()
            .map_err(|e| ProviderError::NotConfigured(e.to_string()))?;
        let api_key = config
            .api_key()
            .map_err(|e| ProviderError::NotConfigured(e.to_string()))?;

        let provider = Self::new(
            endpoint,
            &config.model.deployment,
            &config.model.api_version,
            api_key,
            Duration::from_secs(config.model.timeout_secs),
        )?;

        Ok(match &config.embedding.deployment {
            Some(deployment) => {
                provider.with_embeddings(config.embedding.endpoint.as_deref(), deployment)
            }
            None => provider,
        })
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    pub fn embedding_deployment(&self) -> Option<&str> {
        self.embedding_deployment.as_deref()
    }

    fn chat_url(&self, model: &str) -> String {
        let deployment = if model.is_empty() { &self.deployment } else { model };
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, deployment, self.api_version
        )
    }

    fn embeddings_url(&self, deployment: &str) -> String {
        format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            self.embedding_endpoint, deployment, self.api_version
        )
    }

    fn chat_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(url)
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response).await
    }

    /// Convert our Message types to the chat completions wire format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| match m {
                Message::System { content } => ApiMessage::text("system", content),
                Message::User { content } => ApiMessage::text("user", content),
                Message::Assistant {
                    content,
                    tool_calls,
                } if !tool_calls.is_empty() => ApiMessage {
                    role: "assistant".into(),
                    content: (!content.is_empty()).then(|| content.clone()),
                    tool_calls: Some(
                        tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    ),
                    tool_call_id: None,
                },
                Message::Assistant { content, .. } => ApiMessage::text("assistant", content),
                Message::ToolResult {
                    call_id, content, ..
                } => ApiMessage {
                    role: "tool".into(),
                    content: Some(content.clone()),
                    tool_calls: None,
                    tool_call_id: Some(call_id.clone()),
                },
            })
            .collect()
    }

    /// Convert tool definitions to the function-calling wire format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Map non-success statuses onto the provider error taxonomy.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    if !(200..300).contains(&status) {
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Azure OpenAI returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

#[async_trait]
impl Provider for AzureOpenAiProvider {
    fn name(&self) -> &str {
        "azure-openai"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = self.chat_url(&request.model);
        let body = Self::chat_body(&request, false);

        debug!(deployment = %request.model, messages = request.messages.len(), "Sending completion request");

        let response = self.post(&url, &body).await?;
        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

        let tool_calls: Vec<ToolCallRequest> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallRequest {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(ProviderResponse {
            message: Message::assistant_with_tools(choice.message.content.unwrap_or_default(), tool_calls),
            usage: api_response.usage.map(Usage::from),
            model: api_response.model,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let url = self.chat_url(&request.model);
        let body = Self::chat_body(&request, true);

        debug!(deployment = %request.model, messages = request.messages.len(), "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = check_status(response).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let model = request.model;

        // Read the SSE byte stream on its own task. Dropping the receiver
        // ends the task at its next send, which drops the HTTP response.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseLineBuffer::default();
            let mut assembler = StreamAssembler::new(model);

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for data in lines.push(&bytes) {
                    if data == "[DONE]" {
                        let _ = tx.send(Ok(StreamChunk::Done(assembler.finish()))).await;
                        return;
                    }

                    match serde_json::from_str::<StreamResponse>(&data) {
                        Ok(frame) => {
                            for chunk in assembler.apply(frame) {
                                if tx.send(Ok(chunk)).await.is_err() {
                                    trace!("Stream receiver dropped, abandoning response");
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                        }
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(StreamChunk::Done(assembler.finish()))).await;
        });

        Ok(rx)
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        let deployment = match (&self.embedding_deployment, request.model.as_str()) {
            (_, model) if !model.is_empty() => model.to_string(),
            (Some(deployment), _) => deployment.clone(),
            (None, _) => {
                return Err(ProviderError::NotConfigured(
                    "No embedding deployment configured".into(),
                ));
            }
        };
        let url = self.embeddings_url(&deployment);
        let body = serde_json::json!({
            "input": request.inputs,
            "encoding_format": "float",
        });

        debug!(deployment = %deployment, count = request.inputs.len(), "Sending embedding request");

        let response = self.post(&url, &body).await?;
        let api_resp: EmbeddingApiResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse embedding response: {e}"))
        })?;

        let mut data = api_resp.data;
        data.sort_by_key(|d| d.index);

        Ok(EmbeddingResponse {
            embeddings: data.into_iter().map(|d| d.embedding).collect(),
            model: api_resp.model.unwrap_or(deployment),
        })
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let request = ProviderRequest {
            model: self.deployment.clone(),
            messages: vec![Message::user("ping")],
            temperature: 0.0,
            max_tokens: Some(1),
            tools: vec![],
        };
        match self.complete(request).await {
            Ok(_) => Ok(true),
            Err(ProviderError::AuthenticationFailed(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

// --- SSE framing ---

/// Splits a byte stream into SSE `data:` payloads.
#[derive(Default)]
struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    /// Append bytes and return every complete `data:` payload.
    ///
    /// Bytes are only decoded once a whole line has arrived, so a character
    /// split across network chunks is reassembled before decoding.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let decoded = String::from_utf8_lossy(&raw[..line_end]);
            let line = decoded.trim_end_matches('\r');

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim().to_string());
            }
        }
        payloads
    }
}

/// Turns parsed SSE frames into [`StreamChunk`]s and assembles the final
/// assistant message.
struct StreamAssembler {
    model: String,
    content: String,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    usage: Option<Usage>,
}

impl StreamAssembler {
    fn new(model: String) -> Self {
        Self {
            model,
            content: String::new(),
            tool_calls: BTreeMap::new(),
            usage: None,
        }
    }

    fn apply(&mut self, frame: StreamResponse) -> Vec<StreamChunk> {
        let mut out = Vec::new();

        if let Some(model) = frame.model.filter(|m| !m.is_empty()) {
            self.model = model;
        }
        if let Some(usage) = frame.usage {
            self.usage = Some(usage.into());
        }

        for choice in frame.choices {
            let delta = choice.delta;

            for tc_delta in delta.tool_calls.unwrap_or_default() {
                let index = tc_delta.index;
                let acc = self.tool_calls.entry(index).or_insert_with(|| {
                    out.push(StreamChunk::ToolCallStarted { index });
                    ToolCallAccumulator::default()
                });

                if let Some(id) = tc_delta.id {
                    acc.id = id;
                }
                if let Some(func) = tc_delta.function {
                    if let Some(name) = func.name {
                        acc.name = name;
                    }
                    if let Some(args) = func.arguments {
                        acc.arguments.push_str(&args);
                    }
                }
            }

            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                self.content.push_str(&content);
                out.push(StreamChunk::Token(content));
            }
        }

        out
    }

    fn finish(self) -> ProviderResponse {
        let tool_calls = self
            .tool_calls
            .into_values()
            .map(ToolCallAccumulator::into_request)
            .collect();

        ProviderResponse {
            message: Message::assistant_with_tools(self.content, tool_calls),
            usage: self.usage,
            model: self.model,
        }
    }
}

/// Accumulates incremental tool call deltas into a complete request.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_request(self) -> ToolCallRequest {
        ToolCallRequest {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

// --- Chat completions API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` frame from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta, arriving incrementally across frames.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CHAT_PATH: &str = "/openai/deployments/gpt-4o/chat/completions";

    fn provider(uri: &str) -> AzureOpenAiProvider {
        AzureOpenAiProvider::new(uri, "gpt-4o", "2024-10-21", "test-key", Duration::from_secs(5))
            .unwrap()
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "gpt-4o".into(),
            messages: vec![
                Message::system("You are Flavia"),
                Message::user("Any flood warnings in Devon?"),
            ],
            temperature: 0.1,
            max_tokens: None,
            tools: vec![ToolDefinition {
                name: "flood_monitoring_tool".into(),
                description: "Live flood warnings".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
        }
    }

    async fn drain(mut rx: ChunkReceiver) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk.unwrap());
        }
        chunks
    }

    #[test]
    fn chat_url_uses_deployment_and_api_version() {
        let p = provider("https://flavia.openai.azure.com/");
        assert_eq!(
            p.chat_url("gpt-4o"),
            "https://flavia.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-10-21"
        );
        assert!(p.chat_url("").contains("/deployments/gpt-4o/"));
    }

    #[test]
    fn from_config_requires_endpoint() {
        let config = AppConfig::default();
        assert!(matches!(
            AzureOpenAiProvider::from_config(&config),
            Err(ProviderError::NotConfigured(_))
        ));
    }

    #[test]
    fn message_conversion() {
        let messages = vec![
            Message::system("persona"),
            Message::user("Hello"),
            Message::assistant_with_tools(
                "",
                vec![ToolCallRequest {
                    id: "call_1".into(),
                    name: "retriever_tool".into(),
                    arguments: r#"{"query":"sandbags"}"#.into(),
                }],
            ),
            Message::tool_result("call_1", "retriever_tool", "Document 1:\nUse sandbags"),
        ];
        let api = AzureOpenAiProvider::to_api_messages(&messages);
        assert_eq!(api[0].role, "system");
        assert_eq!(api[1].role, "user");
        assert_eq!(api[2].role, "assistant");
        assert!(api[2].content.is_none());
        assert_eq!(api[2].tool_calls.as_ref().unwrap()[0].function.name, "retriever_tool");
        assert_eq!(api[3].role, "tool");
        assert_eq!(api[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn tool_definition_conversion() {
        let api_tools = AzureOpenAiProvider::to_api_tools(&request().tools);
        assert_eq!(api_tools.len(), 1);
        assert_eq!(api_tools[0].function.name, "flood_monitoring_tool");
        assert_eq!(api_tools[0].r#type, "function");
    }

    // --- SSE framing and assembly ---

    #[test]
    fn line_buffer_handles_split_frames() {
        let mut lines = SseLineBuffer::default();
        assert!(lines.push(b"data: {\"a\"").is_empty());
        let out = lines.push(b":1}\r\n\r\n: keep-alive\ndata: [DONE]\n");
        assert_eq!(out, vec![r#"{"a":1}"#.to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn line_buffer_keeps_characters_split_across_chunks() {
        let frame = "data: £5 excess\n".as_bytes();
        let split = frame.iter().position(|&b| b == 0xC2).unwrap() + 1;

        let mut lines = SseLineBuffer::default();
        assert!(lines.push(&frame[..split]).is_empty());
        let out = lines.push(&frame[split..]);
        assert_eq!(out, vec!["£5 excess".to_string()]);
    }

    #[test]
    fn assembler_signals_tool_call_once_per_index() {
        let mut asm = StreamAssembler::new("gpt-4o".into());
        let first: StreamResponse = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"retriever_tool","arguments":""}}]}}]}"#,
        )
        .unwrap();
        let second: StreamResponse = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"query\":\"flood kit\"}"}}]}}]}"#,
        )
        .unwrap();

        let out = asm.apply(first);
        assert!(matches!(out.as_slice(), [StreamChunk::ToolCallStarted { index: 0 }]));
        assert!(asm.apply(second).is_empty());

        let response = asm.finish();
        let calls = response.message.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].arguments, r#"{"query":"flood kit"}"#);
    }

    #[test]
    fn assembler_orders_parallel_tool_calls_by_index() {
        let mut asm = StreamAssembler::new("gpt-4o".into());
        let frame: StreamResponse = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"flood_monitoring_tool","arguments":"{}"}},{"index":0,"id":"call_a","function":{"name":"retriever_tool","arguments":"{}"}}]}}]}"#,
        )
        .unwrap();
        assert_eq!(asm.apply(frame).len(), 2);
        let ids: Vec<String> = asm
            .finish()
            .message
            .tool_calls()
            .iter()
            .map(|c| c.id.clone())
            .collect();
        assert_eq!(ids, vec!["call_a", "call_b"]);
    }

    #[test]
    fn parse_stream_usage_frame() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let mut asm = StreamAssembler::new("gpt-4o".into());
        assert!(asm.apply(serde_json::from_str(data).unwrap()).is_empty());
        assert_eq!(asm.finish().usage.unwrap().total_tokens, 15);
    }

    // --- HTTP round trips ---

    #[tokio::test]
    async fn complete_parses_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .and(query_param("api-version", "2024-10-21"))
            .and(header("api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-4o",
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": { "name": "flood_monitoring_tool", "arguments": "{\"area_or_region\":\"Devon\"}" }
                        }]
                    }
                }],
                "usage": { "prompt_tokens": 50, "completion_tokens": 12, "total_tokens": 62 }
            })))
            .mount(&server)
            .await;

        let response = provider(&server.uri()).complete(request()).await.unwrap();
        assert_eq!(response.message.content(), "");
        assert_eq!(response.message.tool_calls()[0].name, "flood_monitoring_tool");
        assert_eq!(response.usage.unwrap().total_tokens, 62);
    }

    #[tokio::test]
    async fn stream_emits_tokens_then_done() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"model\":\"gpt-4o\",\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Move \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"upstairs.\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .and(header("accept", "text/event-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let rx = provider(&server.uri()).stream(request()).await.unwrap();
        let chunks = drain(rx).await;

        let tokens: Vec<&str> = chunks
            .iter()
            .filter_map(|c| match c {
                StreamChunk::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens, vec!["Move ", "upstairs."]);
        match chunks.last() {
            Some(StreamChunk::Done(resp)) => {
                assert_eq!(resp.message, Message::assistant("Move upstairs."));
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_with_tool_call_emits_no_tokens() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_9\",\"function\":{\"name\":\"retriever_tool\",\"arguments\":\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"query\\\":\\\"grab bag\\\"}\"}}]}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let chunks = drain(provider(&server.uri()).stream(request()).await.unwrap()).await;
        assert!(matches!(chunks[0], StreamChunk::ToolCallStarted { index: 0 }));
        assert!(!chunks.iter().any(|c| matches!(c, StreamChunk::Token(_))));
        match chunks.last() {
            Some(StreamChunk::Done(resp)) => {
                assert_eq!(resp.message.tool_calls()[0].arguments, r#"{"query":"grab bag"}"#);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unauthorized_maps_to_authentication_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = provider(&server.uri()).complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn rate_limit_reads_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
            .mount(&server)
            .await;

        let err = provider(&server.uri()).stream(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { retry_after_secs: 12 }));
    }

    #[tokio::test]
    async fn server_error_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = provider(&server.uri()).complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ApiError { status_code: 503, .. }));
    }

    #[tokio::test]
    async fn embed_uses_embedding_deployment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/text-embedding-3-small/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "embedding": [0.4, 0.5], "index": 1 },
                    { "embedding": [0.1, 0.2], "index": 0 }
                ],
                "model": "text-embedding-3-small"
            })))
            .mount(&server)
            .await;

        let p = provider(&server.uri()).with_embeddings(None, "text-embedding-3-small");
        let resp = p
            .embed(EmbeddingRequest {
                model: String::new(),
                inputs: vec!["first".into(), "second".into()],
            })
            .await
            .unwrap();
        assert_eq!(resp.embeddings, vec![vec![0.1, 0.2], vec![0.4, 0.5]]);
    }

    #[tokio::test]
    async fn embed_without_deployment_is_not_configured() {
        let err = provider("http://127.0.0.1:1")
            .embed(EmbeddingRequest {
                model: String::new(),
                inputs: vec!["flood".into()],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
