//! Message and conversation-state domain types.
//!
//! These are the value objects that flow through a turn:
//! caller question → `Message::User` → model reply (`Message::Assistant`,
//! possibly carrying tool call requests) → `Message::ToolResult` entries →
//! next model reply, until an assistant message arrives with no requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::Error;

/// Stable key identifying one persisted conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tool invocation requested by the model inside an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique within one assistant turn; correlates the eventual tool result
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as the raw JSON text the model produced
    pub arguments: String,
}

/// A single entry in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// Instructions for the model. Synthesized per invocation, never persisted.
    System { content: String },

    /// The end user's question.
    User { content: String },

    /// A model reply, optionally requesting tool calls.
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },

    /// The text outcome of one tool call. Failures are carried as text too.
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    /// An assistant message with no tool call requests.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
        }
    }

    /// The text content regardless of variant.
    pub fn content(&self) -> &str {
        match self {
            Self::System { content }
            | Self::User { content }
            | Self::Assistant { content, .. }
            | Self::ToolResult { content, .. } => content,
        }
    }

    /// Tool call requests carried by this message (empty unless assistant).
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant { .. })
    }
}

/// The persisted conversation for one thread.
///
/// Append-only within a turn. Message order is causal: tool results follow
/// the assistant message that requested them and precede the next model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub thread_id: ThreadId,

    pub messages: Vec<Message>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    /// Create an empty conversation for a thread.
    pub fn new(thread_id: ThreadId) -> Self {
        let now = Utc::now();
        Self {
            thread_id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.push(message);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recent assistant message, if any.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_assistant())
    }

    /// Tool calls requested by the latest message, when that message is an
    /// assistant reply. Empty once tool results have been appended after it.
    pub fn pending_tool_calls(&self) -> &[ToolCallRequest] {
        self.messages.last().map(Message::tool_calls).unwrap_or(&[])
    }

    /// Check the correlation invariant: every tool result answers exactly one
    /// request of the immediately preceding assistant message, no request is
    /// answered twice, and every request is answered before the conversation
    /// moves on.
    pub fn verify_causal_order(&self) -> Result<(), Error> {
        let mut requested: HashSet<&str> = HashSet::new();
        let mut answered: HashSet<&str> = HashSet::new();

        for (index, message) in self.messages.iter().enumerate() {
            match message {
                Message::System { .. } => {
                    return Err(Error::InvalidState(format!(
                        "system message persisted at position {index}"
                    )));
                }
                Message::User { .. } | Message::Assistant { .. } => {
                    if let Some(id) = first_unanswered(&requested, &answered) {
                        return Err(Error::InvalidState(format!(
                            "tool call '{id}' has no result before position {index}"
                        )));
                    }
                    requested.clear();
                    answered.clear();
                    for call in message.tool_calls() {
                        if !requested.insert(call.id.as_str()) {
                            return Err(Error::InvalidState(format!(
                                "duplicate tool call id '{}' at position {index}",
                                call.id
                            )));
                        }
                    }
                }
                Message::ToolResult { call_id, .. } => {
                    if !requested.contains(call_id.as_str()) {
                        return Err(Error::InvalidState(format!(
                            "orphaned tool result '{call_id}' at position {index}"
                        )));
                    }
                    if !answered.insert(call_id.as_str()) {
                        return Err(Error::InvalidState(format!(
                            "tool call '{call_id}' answered twice"
                        )));
                    }
                }
            }
        }

        match first_unanswered(&requested, &answered) {
            Some(id) => Err(Error::InvalidState(format!(
                "tool call '{id}' has no result"
            ))),
            None => Ok(()),
        }
    }
}

fn first_unanswered(requested: &HashSet<&str>, answered: &HashSet<&str>) -> Option<String> {
    requested
        .iter()
        .find(|id| !answered.contains(**id))
        .map(|id| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.into(),
            name: "retriever_tool".into(),
            arguments: r#"{"query":"sandbags"}"#.into(),
        }
    }

    #[test]
    fn message_serializes_with_role_tag() {
        let msg = Message::tool_result("call_1", "retriever_tool", "Document 1:\nText");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"tool_result""#));
        assert!(json.contains(r#""call_id":"call_1""#));
    }

    #[test]
    fn state_tracks_updates() {
        let mut state = ConversationState::new(ThreadId::from("t1"));
        let created = state.created_at;
        state.push(Message::user("Is my street at risk?"));
        assert_eq!(state.len(), 1);
        assert!(state.updated_at >= created);
    }

    #[test]
    fn pending_tool_calls_only_from_latest_message() {
        let mut state = ConversationState::new(ThreadId::from("t1"));
        state.push(Message::user("q"));
        state.push(Message::assistant_with_tools("", vec![call("a")]));
        assert_eq!(state.pending_tool_calls().len(), 1);

        state.push(Message::tool_result("a", "retriever_tool", "r"));
        assert!(state.pending_tool_calls().is_empty());
        assert!(state.last_assistant().is_some());
    }

    #[test]
    fn well_formed_state_passes_verification() {
        let mut state = ConversationState::new(ThreadId::from("t1"));
        state.push(Message::user("q"));
        state.push(Message::assistant_with_tools("", vec![call("a"), call("b")]));
        state.push(Message::tool_result("b", "retriever_tool", "r"));
        state.push(Message::tool_result("a", "retriever_tool", "r"));
        state.push(Message::assistant("answer"));
        assert!(state.verify_causal_order().is_ok());
    }

    #[test]
    fn orphaned_result_is_rejected() {
        let mut state = ConversationState::new(ThreadId::from("t1"));
        state.push(Message::user("q"));
        state.push(Message::assistant_with_tools("", vec![call("a")]));
        state.push(Message::tool_result("zzz", "retriever_tool", "r"));
        assert!(state.verify_causal_order().is_err());
    }

    #[test]
    fn result_after_next_model_message_is_rejected() {
        let mut state = ConversationState::new(ThreadId::from("t1"));
        state.push(Message::user("q"));
        state.push(Message::assistant_with_tools("", vec![call("a")]));
        state.push(Message::assistant("answer"));
        state.push(Message::tool_result("a", "retriever_tool", "r"));
        assert!(state.verify_causal_order().is_err());
    }

    #[test]
    fn duplicate_correlation_is_rejected() {
        let mut state = ConversationState::new(ThreadId::from("t1"));
        state.push(Message::user("q"));
        state.push(Message::assistant_with_tools("", vec![call("a")]));
        state.push(Message::tool_result("a", "retriever_tool", "r"));
        state.push(Message::tool_result("a", "retriever_tool", "r"));
        assert!(state.verify_causal_order().is_err());
    }

    #[test]
    fn persisted_system_message_is_rejected() {
        let mut state = ConversationState::new(ThreadId::from("t1"));
        state.push(Message::system("persona"));
        assert!(state.verify_causal_order().is_err());
    }
}
