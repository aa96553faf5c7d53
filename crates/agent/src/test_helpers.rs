//! Shared test helpers for agent tests.

use async_trait::async_trait;
use flavia_core::error::{ProviderError, ToolError};
use flavia_core::message::{Message, ToolCallRequest};
use flavia_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use flavia_core::tool::{Tool, ToolRegistry};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// One scripted model invocation.
pub enum Script {
    Response(ProviderResponse),
    /// Explicit chunk sequence for `stream`; `complete` returns its `Done`.
    Stream(Vec<StreamChunk>),
    Fail(ProviderError),
    /// Sends one token and then never finishes.
    Hang(String),
}

impl Script {
    pub fn text(text: &str) -> Self {
        Self::Response(make_text_response(text))
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self::Response(make_tool_call_response(calls))
    }
}

/// A mock provider that plays back a queue of scripts and records every
/// request it receives.
///
/// Panics if more calls are made than scripts provided.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: ProviderRequest) -> Script {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request);
        self.scripts.lock().unwrap().pop_front().unwrap_or_else(|| {
            panic!("ScriptedProvider: no more scripts (call #{})", requests.len())
        })
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match self.next(request) {
            Script::Response(response) => Ok(response),
            Script::Stream(chunks) => chunks
                .into_iter()
                .find_map(|c| match c {
                    StreamChunk::Done(r) => Some(r),
                    _ => None,
                })
                .ok_or_else(|| ProviderError::StreamInterrupted("no final chunk".into())),
            Script::Fail(e) => Err(e),
            Script::Hang(_) => std::future::pending().await,
        }
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let chunks = match self.next(request) {
            Script::Response(response) => replay(response),
            Script::Stream(chunks) => chunks,
            Script::Fail(e) => return Err(e),
            Script::Hang(token) => {
                let (tx, rx) = mpsc::channel(4);
                tokio::spawn(async move {
                    let _ = tx.send(Ok(StreamChunk::Token(token))).await;
                    // Hold the sender open forever.
                    std::future::pending::<()>().await;
                    drop(tx);
                });
                return Ok(rx);
            }
        };

        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            tx.send(Ok(chunk)).await.unwrap();
        }
        Ok(rx)
    }
}

/// Chunks a real streaming provider would emit for `response`: the text
/// word by word, then the tool calls, then the final message.
pub fn replay(response: ProviderResponse) -> Vec<StreamChunk> {
    let mut chunks: Vec<StreamChunk> = response
        .message
        .content()
        .split_inclusive(' ')
        .map(|w| StreamChunk::Token(w.to_string()))
        .collect();
    for index in 0..response.message.tool_calls().len() {
        chunks.push(StreamChunk::ToolCallStarted {
            index: index as u32,
        });
    }
    chunks.push(StreamChunk::Done(response));
    chunks
}

fn usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: usage(),
        model: "gpt-4o".into(),
    }
}

/// Create a response that requests tools.
pub fn make_tool_call_response(calls: Vec<ToolCallRequest>) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_with_tools("", calls),
        usage: usage(),
        model: "gpt-4o".into(),
    }
}

pub fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCallRequest {
    ToolCallRequest {
        id: id.into(),
        name: name.into(),
        arguments: arguments.into(),
    }
}

#[derive(Deserialize)]
pub struct EchoArgs {
    text: String,
}

/// Returns its `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    type Args = EchoArgs;

    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes its input"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn call(&self, args: EchoArgs) -> Result<String, ToolError> {
        Ok(args.text)
    }
}

pub fn registry_with_echo() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool).unwrap();
    tools
}

#[derive(Deserialize)]
pub struct SleepyArgs {
    millis: u64,
    label: String,
}

/// Sleeps, then returns its label.
pub struct SleepyTool;

#[async_trait]
impl Tool for SleepyTool {
    type Args = SleepyArgs;

    fn name(&self) -> &str {
        "sleepy"
    }

    fn description(&self) -> &str {
        "Sleeps for a while"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn call(&self, args: SleepyArgs) -> Result<String, ToolError> {
        tokio::time::sleep(Duration::from_millis(args.millis)).await;
        Ok(args.label)
    }
}
