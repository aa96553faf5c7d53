//! # Flavia Core
//!
//! Domain types, traits, and error definitions for the Flavia flood
//! assistant. This crate has **no framework dependencies**: it defines the
//! conversation model and the seams (model client, tools, knowledge base,
//! checkpoint store) that the other crates implement against.
//!
//! Every collaborator is a trait here. Implementations live in their own
//! crates and are wired together explicitly at process start, so tests can
//! substitute scripted providers, fake tools, and in-memory stores.

pub mod checkpoint;
pub mod error;
pub mod knowledge;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use checkpoint::CheckpointStore;
pub use error::{Error, Result};
pub use knowledge::{Document, KnowledgeBase};
pub use message::{ConversationState, Message, ThreadId, ToolCallRequest};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition};
pub use tool::{Tool, ToolRegistry};
