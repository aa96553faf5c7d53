//! Checkpoint store: durable conversation state keyed by thread.
//!
//! The loop loads a thread's state at the start of a turn and saves it once
//! the turn reaches its final answer. A cancelled or failed turn saves
//! nothing, so the stored state is always the last completed turn.

use async_trait::async_trait;

use crate::error::MemoryError;
use crate::message::{ConversationState, ThreadId};

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load a thread's state, or `None` if the thread has never completed a turn.
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<ConversationState>, MemoryError>;

    /// Replace the stored state for `state.thread_id`.
    async fn save(&self, state: &ConversationState) -> Result<(), MemoryError>;

    /// Remove a thread. Removing an unknown thread is not an error.
    async fn delete(&self, thread_id: &ThreadId) -> Result<(), MemoryError>;

    /// All known thread ids.
    async fn list(&self) -> Result<Vec<ThreadId>, MemoryError>;
}
