//! Agent-level streaming events.
//!
//! `AgentStreamEvent` is what the streaming adapter hands to transports.
//! The gateway forwards only `Chunk` text (plus the in-band error marker);
//! the CLI uses the rest for its verbose trace.

use flavia_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// Events emitted while one user turn runs.
///
/// - `chunk`       : answer text, in order
/// - `tool_call`   : the loop is dispatching a tool
/// - `tool_result` : a tool finished
/// - `done`        : the turn completed and was checkpointed
/// - `error`       : the turn failed; always the last event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    Chunk { content: String },

    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    Done {
        thread_id: String,
        usage: Option<Usage>,
        iterations: u32,
        tool_calls_made: usize,
    },

    Error { message: String },
}

impl AgentStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_chunk() {
        let event = AgentStreamEvent::Chunk {
            content: "Move to higher ground".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"Move to higher ground""#));
    }

    #[test]
    fn event_serialization_done() {
        let event = AgentStreamEvent::Done {
            thread_id: "default".into(),
            usage: None,
            iterations: 2,
            tool_calls_made: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""iterations":2"#));
        assert!(event.is_terminal());
    }

    #[test]
    fn event_type_names() {
        assert_eq!(AgentStreamEvent::Chunk { content: "x".into() }.event_type(), "chunk");
        assert_eq!(AgentStreamEvent::Error { message: "x".into() }.event_type(), "error");
        assert!(!AgentStreamEvent::Chunk { content: "x".into() }.is_terminal());
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"tool_call","id":"call_1","name":"flood_monitoring_tool","input":{}}"#;
        let event: AgentStreamEvent = serde_json::from_str(json).unwrap();
        match event {
            AgentStreamEvent::ToolCall { name, .. } => assert_eq!(name, "flood_monitoring_tool"),
            _ => panic!("Wrong variant"),
        }
    }
}
