//! Closure-backed tools.
//!
//! Lets a host register a tool without writing a struct and trait impl:
//!
//! ```ignore
//! registry.register(Arc::new(FnTool::new(
//!     "echo",
//!     "Echoes back the input",
//!     json!({"type": "object", "properties": {"text": {"type": "string"}}}),
//!     |_ctx, args| async move { Ok(args["text"].clone()) },
//! )));
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use helmsman_core::error::ToolError;
use helmsman_core::tool::{Tool, ToolContext};
use serde_json::Value;

type Handler = Arc<dyn Fn(ToolContext, Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

/// A [`Tool`] whose behaviour is an async closure.
pub struct FnTool {
    name: String,
    description: String,
    parameters: Value,
    timeout: Option<Duration>,
    handler: Handler,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            timeout: None,
            handler: Arc::new(move |ctx, args| Box::pin(handler(ctx, args))),
        }
    }

    /// Override the dispatcher's timeout for this tool.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<Value, ToolError> {
        (self.handler)(ctx.clone(), arguments).await
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
