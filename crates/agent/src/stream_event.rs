//! Agent-level streaming events.
//!
//! `AgentStreamEvent` wraps provider-level stream chunks into higher-level
//! events a channel adapter can forward to the user while a run is in flight.

use serde::{Deserialize, Serialize};

use crate::loop_runner::RunUsage;

/// Events emitted by the agent during a streamed run.
///
/// - `chunk`       — partial text token from the LLM
/// - `tool_call`   — agent is invoking a tool
/// - `tool_result` — tool execution completed
/// - `notice`      — the loop injected a budget or continuation message
/// - `done`        — the run is complete
/// - `error`       — the run failed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial text token from the LLM.
    Chunk { content: String },

    /// The agent is calling a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// Text the loop added to the conversation on its own.
    Notice { content: String },

    /// The run is complete — final metadata.
    Done {
        run_id: String,
        usage: RunUsage,
        turns: u32,
        tool_calls_made: usize,
        stopped: bool,
    },

    /// The run failed. Carries the user-facing message, not the raw error.
    Error { message: String },
}

impl AgentStreamEvent {
    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Notice { .. } => "notice",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_chunk() {
        let event = AgentStreamEvent::Chunk {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn event_serialization_tool_call() {
        let event = AgentStreamEvent::ToolCall {
            id: "call_1".into(),
            name: "search".into(),
            input: serde_json::json!({"q": "rust"}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains(r#""name":"search""#));
    }

    #[test]
    fn event_serialization_done() {
        let event = AgentStreamEvent::Done {
            run_id: "abc".into(),
            usage: RunUsage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
                model_calls: 2,
            },
            turns: 2,
            tool_calls_made: 1,
            stopped: false,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""turns":2"#));
        assert!(json.contains(r#""model_calls":2"#));
    }

    #[test]
    fn event_type_names() {
        assert_eq!(AgentStreamEvent::Chunk { content: "x".into() }.event_type(), "chunk");
        assert_eq!(AgentStreamEvent::Notice { content: "x".into() }.event_type(), "notice");
        assert_eq!(AgentStreamEvent::Error { message: "x".into() }.event_type(), "error");
        assert_eq!(
            AgentStreamEvent::ToolResult {
                id: "a".into(),
                name: "b".into(),
                output: "c".into(),
                success: true
            }
            .event_type(),
            "tool_result"
        );
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"notice","content":"[Budget] 7/25 turns used"}"#;
        let event: AgentStreamEvent = serde_json::from_str(json).unwrap();
        match event {
            AgentStreamEvent::Notice { content } => assert!(content.starts_with("[Budget]")),
            _ => panic!("Wrong variant"),
        }
    }
}
