//! The Flavia orchestration loop.
//!
//! One user turn runs as a small state machine:
//!
//! 1. **Model**: send the system instruction plus the thread's history to
//!    the model client
//! 2. **Action**: if the reply requests tools, run them and append one
//!    result per request, then go back to Model
//! 3. **Done**: the reply has no tool calls; checkpoint the thread
//!
//! The turn ends at Done or when the iteration cap is reached.
//! [`streaming`] runs a turn in the background and exposes it as a channel
//! of [`AgentStreamEvent`]s for the gateway and the CLI.

pub mod loop_runner;
pub mod prompt;
pub mod stream_event;
pub mod streaming;

#[cfg(test)]
mod test_helpers;

pub use loop_runner::{AgentLoop, CapPolicy, LoopState, TurnOutcome, transition};
pub use prompt::FLAVIA_SYSTEM_PROMPT;
pub use stream_event::AgentStreamEvent;
pub use streaming::{StreamGate, TurnStream};
