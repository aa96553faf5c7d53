//! The orchestration loop: a three-state machine over one user turn.
//!
//! ```text
//!   Model ──(assistant requested tools)──▶ Action ──▶ Model
//!     │
//!     └──(no tool calls)──▶ Done
//! ```
//!
//! The thread's state is loaded at the start of a turn and checkpointed only
//! when the turn reaches `Done`.

use std::sync::Arc;
use std::time::Instant;

use flavia_config::{AgentConfig, DEFAULT_STREAM_HOLDBACK_CHARS, OnIterationLimit};
use flavia_core::checkpoint::CheckpointStore;
use flavia_core::error::{Error, ProviderError};
use flavia_core::message::{ConversationState, Message, ThreadId, ToolCallRequest};
use flavia_core::provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
use flavia_core::tool::ToolRegistry;
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::prompt::system_instruction;
use crate::stream_event::AgentStreamEvent;
use crate::streaming::StreamGate;

/// Tool result text for a name the registry does not know.
pub const UNKNOWN_TOOL: &str =
    "Incorrect Tool Name, Please Retry and Select tool from List of Available tools.";

/// Final answer used when the iteration cap is hit under [`CapPolicy::Answer`].
pub const ITERATION_LIMIT_ANSWER: &str = "I've reached the maximum number of tool call iterations \
     without finishing. Please try rephrasing your question. If you are in immediate danger, call 999.";

/// Where the loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Model,
    Action,
    Done,
}

/// The transition rule applied after every Model state.
pub fn transition(state: &ConversationState) -> LoopState {
    if state.pending_tool_calls().is_empty() {
        LoopState::Done
    } else {
        LoopState::Action
    }
}

/// Behaviour when a turn uses up its model invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapPolicy {
    /// Close the turn with [`ITERATION_LIMIT_ANSWER`] and checkpoint it.
    #[default]
    Answer,
    /// Fail the turn with `Error::IterationLimit`; nothing is checkpointed.
    Error,
}

impl From<OnIterationLimit> for CapPolicy {
    fn from(value: OnIterationLimit) -> Self {
        match value {
            OnIterationLimit::Answer => Self::Answer,
            OnIterationLimit::Error => Self::Error,
        }
    }
}

/// Result of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub thread_id: ThreadId,
    pub answer: String,
    /// Model invocations made
    pub iterations: u32,
    pub tool_calls_made: usize,
    pub usage: Option<Usage>,
}

/// The core agent loop that orchestrates model calls and tool execution.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    tools: Arc<ToolRegistry>,
    checkpoints: Arc<dyn CheckpointStore>,
    system_prompt: Option<String>,
    max_iterations: u32,
    cap_policy: CapPolicy,
    parallel_tool_calls: bool,
    stream_holdback_chars: usize,
    stream_buffer: usize,
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.1,
            max_tokens: None,
            tools,
            checkpoints,
            system_prompt: None,
            max_iterations: 10,
            cap_policy: CapPolicy::Answer,
            parallel_tool_calls: true,
            stream_holdback_chars: DEFAULT_STREAM_HOLDBACK_CHARS,
            stream_buffer: 16,
        }
    }

    /// Apply the `[agent]` config section.
    pub fn with_config(mut self, config: &AgentConfig) -> Self {
        self.max_iterations = config.max_iterations;
        self.cap_policy = config.on_iteration_limit.into();
        self.parallel_tool_calls = config.parallel_tool_calls;
        self.system_prompt = config.system_prompt_override.clone();
        self.stream_holdback_chars = config.stream_holdback_chars;
        self.stream_buffer = config.stream_buffer.max(1);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: Option<u32>) -> Self {
        self.max_tokens = max;
        self
    }

    /// Set the maximum number of model invocations per turn.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_cap_policy(mut self, policy: CapPolicy) -> Self {
        self.cap_policy = policy;
        self
    }

    pub fn with_parallel_tool_calls(mut self, enabled: bool) -> Self {
        self.parallel_tool_calls = enabled;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_stream_holdback(mut self, chars: usize) -> Self {
        self.stream_holdback_chars = chars;
        self
    }

    pub fn stream_buffer(&self) -> usize {
        self.stream_buffer
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Answer one question without streaming.
    pub async fn process(&self, thread_id: &ThreadId, question: &str) -> Result<TurnOutcome, Error> {
        self.run_turn(thread_id, question, None).await
    }

    /// Run one user turn through the state machine.
    ///
    /// With a `sink`, model invocations stream and the answer is forwarded
    /// as `Chunk` events; a closed sink cancels the turn.
    pub async fn run_turn(
        &self,
        thread_id: &ThreadId,
        question: &str,
        sink: Option<&mpsc::Sender<AgentStreamEvent>>,
    ) -> Result<TurnOutcome, Error> {
        let mut state = match self.checkpoints.load(thread_id).await? {
            Some(state) => state,
            None => ConversationState::new(thread_id.clone()),
        };

        info!(
            thread_id = %thread_id,
            messages = state.len(),
            streaming = sink.is_some(),
            "Starting turn"
        );

        state.push(Message::user(question));

        let mut loop_state = LoopState::Model;
        let mut iterations = 0u32;
        let mut tool_calls_made = 0usize;
        let mut usage: Option<Usage> = None;

        loop {
            loop_state = match loop_state {
                LoopState::Model if iterations >= self.max_iterations => {
                    warn!(thread_id = %thread_id, limit = self.max_iterations, "Iteration cap reached");
                    match self.cap_policy {
                        CapPolicy::Error => {
                            return Err(Error::IterationLimit {
                                limit: self.max_iterations,
                            });
                        }
                        CapPolicy::Answer => {
                            if let Some(sink) = sink {
                                emit(sink, AgentStreamEvent::Chunk {
                                    content: ITERATION_LIMIT_ANSWER.to_string(),
                                })
                                .await?;
                            }
                            state.push(Message::assistant(ITERATION_LIMIT_ANSWER));
                            LoopState::Done
                        }
                    }
                }
                LoopState::Model => {
                    iterations += 1;
                    debug!(thread_id = %thread_id, iteration = iterations, "Invoking model");

                    let response = self.invoke_model(&state, sink).await?;
                    if let Some(u) = response.usage {
                        usage = Some(add_usage(usage, u));
                    }
                    state.push(response.message);
                    transition(&state)
                }
                LoopState::Action => {
                    let calls = state.pending_tool_calls().to_vec();
                    tool_calls_made += calls.len();

                    if let Some(sink) = sink {
                        for call in &calls {
                            emit(sink, AgentStreamEvent::ToolCall {
                                id: call.id.clone(),
                                name: call.name.clone(),
                                input: serde_json::from_str(&call.arguments)
                                    .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone())),
                            })
                            .await?;
                        }
                    }

                    let results = self.dispatch(&calls).await;

                    if let Some(sink) = sink {
                        for (message, success) in &results {
                            if let Message::ToolResult {
                                call_id,
                                tool_name,
                                content,
                            } = message
                            {
                                emit(sink, AgentStreamEvent::ToolResult {
                                    id: call_id.clone(),
                                    name: tool_name.clone(),
                                    output: content.clone(),
                                    success: *success,
                                })
                                .await?;
                            }
                        }
                    }

                    state.extend(results.into_iter().map(|(message, _)| message));
                    LoopState::Model
                }
                LoopState::Done => break,
            };
        }

        state.verify_causal_order()?;
        self.checkpoints.save(&state).await?;

        let answer = state
            .last_assistant()
            .map(|m| m.content().to_string())
            .unwrap_or_default();

        info!(
            thread_id = %thread_id,
            iterations,
            tool_calls_made,
            messages = state.len(),
            "Turn complete"
        );

        Ok(TurnOutcome {
            thread_id: thread_id.clone(),
            answer,
            iterations,
            tool_calls_made,
            usage,
        })
    }

    fn build_request(&self, state: &ConversationState) -> ProviderRequest {
        let mut messages = Vec::with_capacity(state.len() + 1);
        messages.push(system_instruction(self.system_prompt.as_deref()));
        messages.extend(state.messages.iter().cloned());

        ProviderRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: self.tools.definitions(),
        }
    }

    /// The Model state: one invocation, streamed when a sink is attached.
    async fn invoke_model(
        &self,
        state: &ConversationState,
        sink: Option<&mpsc::Sender<AgentStreamEvent>>,
    ) -> Result<ProviderResponse, Error> {
        let request = self.build_request(state);

        let Some(sink) = sink else {
            return Ok(self.provider.complete(request).await?);
        };

        let mut chunks = self.provider.stream(request).await?;
        let mut gate = StreamGate::new(self.stream_holdback_chars);

        while let Some(chunk) = chunks.recv().await {
            match chunk? {
                StreamChunk::Token(token) => {
                    if let Some(text) = gate.push(token) {
                        emit(sink, AgentStreamEvent::Chunk { content: text }).await?;
                    }
                }
                StreamChunk::ToolCallStarted { index } => {
                    let discarded = gate.suppress();
                    debug!(index, discarded, "Tool call started, suppressing content");
                }
                StreamChunk::Done(response) => {
                    if response.message.tool_calls().is_empty() {
                        if let Some(text) = gate.finish() {
                            emit(sink, AgentStreamEvent::Chunk { content: text }).await?;
                        }
                    }
                    return Ok(response);
                }
            }
        }

        Err(ProviderError::StreamInterrupted("stream ended without a final message".into()).into())
    }

    /// The Action state. Results come back in request order.
    async fn dispatch(&self, calls: &[ToolCallRequest]) -> Vec<(Message, bool)> {
        if self.parallel_tool_calls {
            join_all(calls.iter().map(|call| self.execute_one(call))).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute_one(call).await);
            }
            results
        }
    }

    /// Run one tool call. Every failure is contained as result text.
    async fn execute_one(&self, call: &ToolCallRequest) -> (Message, bool) {
        let tool = match self.tools.resolve(&call.name) {
            Ok(tool) => tool,
            Err(_) => {
                warn!(tool = %call.name, call_id = %call.id, "Model requested unknown tool");
                return (Message::tool_result(&call.id, &call.name, UNKNOWN_TOOL), false);
            }
        };

        let start = Instant::now();
        let result = tool.invoke(&call.arguments).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(text) => {
                debug!(tool = %call.name, duration_ms, "Tool executed");
                (Message::tool_result(&call.id, &call.name, text), true)
            }
            Err(e) => {
                warn!(tool = %call.name, duration_ms, error = %e, "Tool execution failed");
                (Message::tool_result(&call.id, &call.name, e.to_string()), false)
            }
        }
    }
}

async fn emit(sink: &mpsc::Sender<AgentStreamEvent>, event: AgentStreamEvent) -> Result<(), Error> {
    sink.send(event).await.map_err(|_| Error::Cancelled)
}

fn add_usage(total: Option<Usage>, next: Usage) -> Usage {
    match total {
        None => next,
        Some(t) => Usage {
            prompt_tokens: t.prompt_tokens + next.prompt_tokens,
            completion_tokens: t.completion_tokens + next.completion_tokens,
            total_tokens: t.total_tokens + next.total_tokens,
        },
    }
}
