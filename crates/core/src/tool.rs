//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world. This crate
//! only defines the contract; the registry and dispatcher live in
//! `helmsman-tools`, and concrete tools are supplied by the host application.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ToolError;
use crate::guard::AccessLevel;
use crate::message::MessageToolCall;
use crate::provider::ToolDefinition;

/// A request to execute a tool, as issued by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Raw JSON argument text, parsed by the dispatcher
    pub arguments: String,
}

impl From<&MessageToolCall> for ToolCall {
    fn from(tc: &MessageToolCall) -> Self {
        Self {
            id: tc.id.clone(),
            name: tc.name.clone(),
            arguments: tc.arguments.clone(),
        }
    }
}

/// The result of a tool call, fed back to the model as a tool message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Name of the tool that was requested
    pub name: String,

    /// Text shown to the model
    pub content: String,

    /// Failure description, `None` on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// A successful result.
    pub fn success(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            error: None,
        }
    }

    /// A failed result. The model sees `content`; `error` keeps the raw reason.
    pub fn failure(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Who is asking for a tool call, threaded explicitly through every dispatch.
///
/// Never stored on shared dispatcher state: two runs sharing a dispatcher
/// each pass their own context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolContext {
    pub workspace_id: String,
    pub session_id: String,
    pub caller_id: String,
    pub access_level: AccessLevel,
}

impl ToolContext {
    pub fn new(
        workspace_id: impl Into<String>,
        session_id: impl Into<String>,
        caller_id: impl Into<String>,
        access_level: AccessLevel,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            session_id: session_id.into(),
            caller_id: caller_id.into(),
            access_level,
        }
    }
}

/// The core Tool trait.
///
/// Handlers return a JSON value: strings are passed to the model verbatim,
/// `null` becomes an "OK" marker, anything else is serialized.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "shell", "file_read").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with parsed arguments.
    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    /// Per-call timeout override for long-running tools.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}
