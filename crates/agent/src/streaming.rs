//! Streaming adapter: runs one turn in the background and hands the caller
//! a channel of [`AgentStreamEvent`]s.
//!
//! Guarantees on the event channel:
//! - `Chunk` text arrives in generation order and only from model
//!   invocations that end without tool calls (subject to the holdback below);
//! - the last event is exactly one `Done` or one `Error`, unless the turn was
//!   cancelled, in which case the channel just closes;
//! - a cancelled turn never writes its checkpoint.

use std::sync::Arc;

use flavia_core::error::Error;
use flavia_core::message::ThreadId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::loop_runner::AgentLoop;
use crate::stream_event::AgentStreamEvent;

/// Decides which model tokens reach the caller within one invocation.
///
/// The first `holdback` characters are held back. If the model starts a
/// tool call before that, the held text is discarded and nothing more from
/// this invocation is forwarded. With a holdback of 0 tokens pass straight
/// through until a tool call starts, so lead-in prose before a tool call can
/// reach the caller.
#[derive(Debug, Default)]
pub struct StreamGate {
    holdback: usize,
    held: String,
    held_chars: usize,
    open: bool,
    suppressed: bool,
}

impl StreamGate {
    pub fn new(holdback: usize) -> Self {
        Self {
            holdback,
            open: holdback == 0,
            ..Self::default()
        }
    }

    /// Offer a token; returns text to forward now, if any.
    pub fn push(&mut self, token: String) -> Option<String> {
        if self.suppressed || token.is_empty() {
            return None;
        }
        if self.open {
            return Some(token);
        }

        self.held_chars += token.chars().count();
        self.held.push_str(&token);
        if self.held_chars >= self.holdback {
            self.open = true;
            self.held_chars = 0;
            return Some(std::mem::take(&mut self.held));
        }
        None
    }

    /// A tool call started: drop held text and close the gate for the rest
    /// of the invocation. Returns how many characters were discarded.
    pub fn suppress(&mut self) -> usize {
        self.suppressed = true;
        self.held.clear();
        std::mem::take(&mut self.held_chars)
    }

    /// The invocation ended without tool calls: release anything held.
    pub fn finish(&mut self) -> Option<String> {
        if self.suppressed || self.held.is_empty() {
            return None;
        }
        self.held_chars = 0;
        Some(std::mem::take(&mut self.held))
    }
}

/// A turn running in the background.
pub struct TurnStream {
    pub events: mpsc::Receiver<AgentStreamEvent>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TurnStream {
    /// Stop the turn. Its checkpoint is left untouched.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn recv(&mut self) -> Option<AgentStreamEvent> {
        self.events.recv().await
    }

    /// Split into the event receiver and a guard that cancels the turn
    /// when dropped.
    pub fn into_parts(self) -> (mpsc::Receiver<AgentStreamEvent>, tokio_util::sync::DropGuard) {
        (self.events, self.cancel.drop_guard())
    }

    /// Wait for the background task to finish.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

impl AgentLoop {
    /// Run one turn in the background, streaming its events.
    ///
    /// Dropping the returned receiver, or cancelling its token, aborts the
    /// turn at the next await point.
    pub fn run_stream(self: &Arc<Self>, thread_id: ThreadId, question: String) -> TurnStream {
        let (tx, rx) = mpsc::channel(self.stream_buffer());
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let agent = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::Cancelled),
                _ = tx.closed() => Err(Error::Cancelled),
                r = agent.run_turn(&thread_id, &question, Some(&tx)) => r,
            };

            match result {
                Ok(outcome) => {
                    let _ = tx
                        .send(AgentStreamEvent::Done {
                            thread_id: outcome.thread_id.to_string(),
                            usage: outcome.usage,
                            iterations: outcome.iterations,
                            tool_calls_made: outcome.tool_calls_made,
                        })
                        .await;
                }
                Err(Error::Cancelled) => {
                    info!(thread_id = %thread_id, "Turn cancelled, checkpoint left unchanged");
                }
                Err(e) => {
                    warn!(thread_id = %thread_id, error = %e, "Turn failed");
                    let _ = tx
                        .send(AgentStreamEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        });

        TurnStream {
            events: rx,
            cancel,
            handle,
        }
    }
}
