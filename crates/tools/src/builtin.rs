//! Built-in tools that need nothing from the host.

use async_trait::async_trait;
use helmsman_core::error::ToolError;
use helmsman_core::tool::{Tool, ToolContext};
use serde_json::Value;

/// Echoes back its `text` argument. Used for offline replays and smoke tests.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the input text"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Text to echo back" }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, arguments: Value) -> Result<Value, ToolError> {
        match arguments.get("text") {
            Some(Value::String(text)) => Ok(Value::String(text.clone())),
            Some(other) => Err(ToolError::InvalidArguments(format!("'text' must be a string, got {other}"))),
            None => Err(ToolError::InvalidArguments("missing 'text'".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsman_core::guard::AccessLevel;
    use serde_json::json;

    fn ctx() -> ToolContext {
        ToolContext::new("ws", "s", "u", AccessLevel::Guest)
    }

    #[tokio::test]
    async fn echoes_text() {
        let out = EchoTool.execute(&ctx(), json!({"text": "hello world"})).await.unwrap();
        assert_eq!(out, json!("hello world"));
    }

    #[tokio::test]
    async fn rejects_missing_text() {
        let err = EchoTool.execute(&ctx(), json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
