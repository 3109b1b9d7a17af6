//! Dispatcher — turns a batch of model tool calls into tool results.
//!
//! Never fails: every call produces exactly one [`ToolResult`], in the order
//! the calls were requested. Unknown tools, bad arguments, denials, timeouts
//! and cancellations all become error results the model can read.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use helmsman_config::DispatchConfig;
use helmsman_core::error::ToolError;
use helmsman_core::event::{DomainEvent, EventBus};
use helmsman_core::guard::{Guard, ToolAuditOutcome, ToolAuditRecord};
use helmsman_core::provider::ToolDefinition;
use helmsman_core::tool::{Tool, ToolCall, ToolContext, ToolResult};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::approval::ApprovalGate;
use crate::registry::ToolRegistry;

/// Render a tool's return value for the model.
///
/// Strings pass through, `null` becomes `OK`, anything else is compact JSON.
pub fn format_output(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "OK".to_string(),
        other => other.to_string(),
    }
}

/// Parse raw argument text; blank text means "no arguments".
fn parse_arguments(raw: &str) -> Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        Ok(Value::Object(serde_json::Map::new()))
    } else {
        serde_json::from_str(raw)
    }
}

/// Executes tool calls against a [`ToolRegistry`] under a [`Guard`].
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    guard: Arc<dyn Guard>,
    approvals: Option<Arc<ApprovalGate>>,
    config: DispatchConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, guard: Arc<dyn Guard>, config: DispatchConfig) -> Self {
        Self {
            registry,
            guard,
            approvals: None,
            config,
            event_bus: None,
        }
    }

    /// Route calls that need confirmation through `gate`. Without a gate
    /// such calls are denied.
    pub fn with_approval_gate(mut self, gate: Arc<ApprovalGate>) -> Self {
        self.approvals = Some(gate);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn approval_gate(&self) -> Option<&Arc<ApprovalGate>> {
        self.approvals.as_ref()
    }

    /// Definitions to advertise to the model.
    pub fn definitions(&self) -> Arc<Vec<ToolDefinition>> {
        self.registry.definitions()
    }

    /// Whether this batch may run concurrently.
    pub fn should_parallelize(&self, calls: &[ToolCall]) -> bool {
        self.config.parallel
            && calls.len() > 1
            && !calls.iter().any(|c| self.config.is_sequential(&c.name))
    }

    /// Execute a batch. Results line up index-for-index with `calls`.
    pub async fn execute(
        &self,
        ctx: &ToolContext,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Vec<ToolResult> {
        if !self.should_parallelize(calls) {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute_one(ctx, call, cancel).await);
            }
            return results;
        }

        let max_parallel = self.config.max_parallel.max(1);
        tracing::debug!(calls = calls.len(), max_parallel, "Dispatching tool batch in parallel");

        // Collected first: a stream mapped through a closure over borrowed calls is not `Send`.
        let pending: Vec<_> = calls
            .iter()
            .enumerate()
            .map(|(index, call)| {
                let result = self.execute_one(ctx, call, cancel);
                async move { (index, result.await) }
            })
            .collect();

        let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];
        let mut completed = futures::stream::iter(pending).buffer_unordered(max_parallel);
        while let Some((index, result)) = completed.next().await {
            slots[index] = Some(result);
        }

        slots
            .into_iter()
            .zip(calls)
            .map(|(slot, call)| {
                slot.unwrap_or_else(|| {
                    ToolResult::failure(&call.id, &call.name, "Error: tool call produced no result", "missing result")
                })
            })
            .collect()
    }

    async fn execute_one(&self, ctx: &ToolContext, call: &ToolCall, cancel: &CancellationToken) -> ToolResult {
        let start = Instant::now();

        let Some(tool) = self.registry.get(&call.name) else {
            tracing::warn!(tool = %call.name, "Model requested unknown tool");
            let result = ToolResult::failure(
                &call.id,
                &call.name,
                format!(
                    "Error: unknown tool '{}'. Available tools: {}",
                    call.name,
                    self.registry.names().join(", ")
                ),
                format!("unknown tool '{}'", call.name),
            );
            self.record(ctx, call, &Value::Null, &result, ToolAuditOutcome::Failed, start);
            return result;
        };

        let arguments = match parse_arguments(&call.arguments) {
            Ok(arguments) => arguments,
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "Malformed tool arguments");
                let err = ToolError::InvalidArguments(e.to_string());
                let result = ToolResult::failure(
                    &call.id,
                    &call.name,
                    format!("Error: arguments for '{}' are not valid JSON: {e}", call.name),
                    err.to_string(),
                );
                self.record(ctx, call, &Value::Null, &result, ToolAuditOutcome::Failed, start);
                return result;
            }
        };

        let verdict = self.guard.check(&call.name, ctx.access_level, &arguments).await;
        if !verdict.allowed {
            tracing::info!(tool = %call.name, caller = %ctx.caller_id, reason = %verdict.reason, "Tool call denied");
            let result = ToolResult::failure(
                &call.id,
                &call.name,
                format!("Permission denied: {}", verdict.reason),
                verdict.reason,
            );
            self.record(ctx, call, &arguments, &result, ToolAuditOutcome::Denied, start);
            return result;
        }

        if verdict.requires_confirmation {
            match &self.approvals {
                Some(gate) if gate.is_trusted(&ctx.session_id, &call.name) => {
                    tracing::debug!(tool = %call.name, session_id = %ctx.session_id, "Trusted tool, skipping confirmation");
                }
                Some(gate) => {
                    let ticket = gate.request_approval(ctx, tool, &call.name, arguments.clone());
                    let result = ToolResult::success(
                        &call.id,
                        &call.name,
                        format!(
                            "Approval required: '{}' is waiting for confirmation (approval id {}). \
                             The outcome will be sent to the user directly once resolved; \
                             continue without this result.",
                            call.name, ticket.id
                        ),
                    );
                    self.record(ctx, call, &arguments, &result, ToolAuditOutcome::PendingApproval, start);
                    return result;
                }
                None => {
                    let reason = format!("{} (no approver is configured)", verdict.reason);
                    let result = ToolResult::failure(
                        &call.id,
                        &call.name,
                        format!("Permission denied: {reason}"),
                        reason,
                    );
                    self.record(ctx, call, &arguments, &result, ToolAuditOutcome::Denied, start);
                    return result;
                }
            }
        }

        let limit = self.timeout_for(&call.name, tool.as_ref());
        tracing::debug!(tool = %call.name, timeout_secs = limit.as_secs(), "Executing tool");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolError::Cancelled(call.name.clone())),
            res = tokio::time::timeout(limit, tool.execute(ctx, arguments.clone())) => match res {
                Ok(res) => res,
                Err(_) => Err(ToolError::Timeout {
                    tool_name: call.name.clone(),
                    timeout_secs: limit.as_secs(),
                }),
            },
        };

        let (result, audit_outcome) = match outcome {
            Ok(value) => (
                ToolResult::success(&call.id, &call.name, format_output(&value)),
                ToolAuditOutcome::Executed,
            ),
            Err(ToolError::Cancelled(_)) => (
                ToolResult::failure(&call.id, &call.name, "Error: cancelled", "cancelled"),
                ToolAuditOutcome::Failed,
            ),
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "Tool execution failed");
                (
                    ToolResult::failure(&call.id, &call.name, format!("Error: {e}"), e.to_string()),
                    ToolAuditOutcome::Failed,
                )
            }
        };
        self.record(ctx, call, &arguments, &result, audit_outcome, start);
        result
    }

    fn timeout_for(&self, name: &str, tool: &dyn Tool) -> Duration {
        tool.timeout().unwrap_or_else(|| {
            if self.config.is_long_running(name) {
                self.config.long_running_timeout()
            } else {
                self.config.default_timeout()
            }
        })
    }

    fn record(
        &self,
        ctx: &ToolContext,
        call: &ToolCall,
        arguments: &Value,
        result: &ToolResult,
        outcome: ToolAuditOutcome,
        start: Instant,
    ) {
        let detail = result.error.as_deref().unwrap_or(&result.content);
        self.guard
            .audit(ToolAuditRecord::new(&call.name, ctx, arguments, outcome, detail));

        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ToolExecuted {
                tool_name: call.name.clone(),
                session_id: ctx.session_id.clone(),
                success: !result.is_error(),
                duration_ms: start.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            });
        }
    }
}
