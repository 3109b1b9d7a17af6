//! Approval gate — human confirmation for risky tool calls.
//!
//! A call that needs confirmation is parked here and the run moves on with a
//! placeholder result. A detached task then carries the approval through
//!
//! ```text
//! Created → Approved → Executing → Delivered
//! Created → Denied   → Reported
//! Created → TimedOut → Reported
//! ```
//!
//! and reports the outcome out-of-band through the [`Notifier`]. The task
//! does not observe the originating run's cancel token, so stopping a run
//! never aborts an approved execution.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use helmsman_config::ApprovalConfig;
use helmsman_core::event::{DomainEvent, EventBus};
use helmsman_core::guard::{Guard, ToolAuditOutcome, ToolAuditRecord, summarize};
use helmsman_core::notify::Notifier;
use helmsman_core::tool::{Tool, ToolContext};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::dispatcher::format_output;

/// Longest tool output quoted back to the approver.
const NOTIFY_OUTPUT_CHARS: usize = 2_000;

/// Where an approval is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Created,
    Approved,
    Denied,
    Executing,
}

/// Terminal outcome of an approval workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// Approved and executed; the result was delivered.
    Delivered { success: bool },
    Denied,
    TimedOut,
}

impl ApprovalOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalOutcome::Delivered { .. } => "delivered",
            ApprovalOutcome::Denied => "denied",
            ApprovalOutcome::TimedOut => "timed_out",
        }
    }
}

/// Snapshot of an open approval.
#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub id: Uuid,
    pub session_id: String,
    pub caller_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub created_at: DateTime<Utc>,
}

/// The approver's decision.
#[derive(Debug, Clone)]
pub struct ApprovalResolution {
    pub approved: bool,
    pub resolver_id: String,
    pub note: Option<String>,
}

/// Handle on a spawned approval workflow.
#[derive(Debug)]
pub struct ApprovalTicket {
    pub id: Uuid,
    /// Completes once the outcome has been reported. Dropping it detaches.
    pub task: JoinHandle<ApprovalOutcome>,
}

struct Entry {
    info: PendingApproval,
    status: ApprovalStatus,
    responder: Option<oneshot::Sender<ApprovalResolution>>,
}

/// Parks tool calls until a human approves or denies them.
pub struct ApprovalGate {
    config: ApprovalConfig,
    notifier: Arc<dyn Notifier>,
    guard: Arc<dyn Guard>,
    event_bus: Option<Arc<EventBus>>,
    entries: Mutex<HashMap<Uuid, Entry>>,
    /// (session_id, tool_name) pairs that skip confirmation.
    trusted: Mutex<HashSet<(String, String)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ApprovalGate {
    pub fn new(config: ApprovalConfig, notifier: Arc<dyn Notifier>, guard: Arc<dyn Guard>) -> Self {
        Self {
            config,
            notifier,
            guard,
            event_bus: None,
            entries: Mutex::new(HashMap::new()),
            trusted: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Park a call and start its workflow. Returns without waiting.
    pub fn request_approval(
        self: &Arc<Self>,
        ctx: &ToolContext,
        tool: Arc<dyn Tool>,
        tool_name: &str,
        arguments: Value,
    ) -> ApprovalTicket {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let info = PendingApproval {
            id,
            session_id: ctx.session_id.clone(),
            caller_id: ctx.caller_id.clone(),
            tool_name: tool_name.to_string(),
            arguments: arguments.clone(),
            created_at: Utc::now(),
        };
        lock(&self.entries).insert(
            id,
            Entry {
                info,
                status: ApprovalStatus::Created,
                responder: Some(tx),
            },
        );

        tracing::info!(
            approval_id = %id,
            session_id = %ctx.session_id,
            tool = tool_name,
            "Tool call awaiting approval"
        );
        self.publish(DomainEvent::ApprovalRequested {
            approval_id: id.to_string(),
            session_id: ctx.session_id.clone(),
            tool_name: tool_name.to_string(),
            timestamp: Utc::now(),
        });

        let gate = Arc::clone(self);
        let ctx = ctx.clone();
        let tool_name = tool_name.to_string();
        let task = tokio::spawn(async move { gate.run_workflow(id, ctx, tool, tool_name, arguments, rx).await });

        ApprovalTicket { id, task }
    }

    /// Record a decision. `true` only for the first resolution of a live approval.
    pub fn resolve(&self, id: Uuid, resolver_id: &str, approved: bool, note: Option<String>) -> bool {
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get_mut(&id) else {
            tracing::debug!(approval_id = %id, "Resolve for unknown or closed approval");
            return false;
        };
        let Some(responder) = entry.responder.take() else {
            return false;
        };
        entry.status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Denied
        };

        tracing::info!(approval_id = %id, resolver = resolver_id, approved, "Approval resolved");
        responder
            .send(ApprovalResolution {
                approved,
                resolver_id: resolver_id.to_string(),
                note,
            })
            .is_ok()
    }

    /// Let `tool_name` run in `session_id` without asking again.
    pub fn grant_trust(&self, session_id: &str, tool_name: &str) {
        lock(&self.trusted).insert((session_id.to_string(), tool_name.to_string()));
    }

    pub fn revoke_trust(&self, session_id: &str, tool_name: &str) -> bool {
        lock(&self.trusted).remove(&(session_id.to_string(), tool_name.to_string()))
    }

    pub fn is_trusted(&self, session_id: &str, tool_name: &str) -> bool {
        lock(&self.trusted).contains(&(session_id.to_string(), tool_name.to_string()))
    }

    /// Approvals in a session still waiting for a decision.
    pub fn pending(&self, session_id: &str) -> Vec<PendingApproval> {
        let mut pending: Vec<PendingApproval> = lock(&self.entries)
            .values()
            .filter(|e| e.status == ApprovalStatus::Created && e.info.session_id == session_id)
            .map(|e| e.info.clone())
            .collect();
        pending.sort_by_key(|p| p.created_at);
        pending
    }

    /// Current status, `None` once the workflow has finished.
    pub fn status(&self, id: Uuid) -> Option<ApprovalStatus> {
        lock(&self.entries).get(&id).map(|e| e.status)
    }

    async fn run_workflow(
        self: Arc<Self>,
        id: Uuid,
        ctx: ToolContext,
        tool: Arc<dyn Tool>,
        tool_name: String,
        arguments: Value,
        mut rx: oneshot::Receiver<ApprovalResolution>,
    ) -> ApprovalOutcome {
        let prompt = format!(
            "Approval needed: {} wants to run '{}' with arguments {}.\n\
             Approval id: {}. Reply approve or deny.",
            ctx.caller_id,
            tool_name,
            summarize(&arguments.to_string(), 200),
            id
        );
        self.notify(&ctx.session_id, &prompt).await;

        let wait = self.config.wait_timeout();
        let resolution = match tokio::time::timeout(wait, &mut rx).await {
            Ok(Ok(resolution)) => Some(resolution),
            Ok(Err(_)) => None,
            Err(_) => {
                // A resolve that won the race has already sent under the
                // entries lock, so once the entry is gone the value is either
                // in the channel or never coming.
                lock(&self.entries).remove(&id);
                rx.try_recv().ok()
            }
        };

        let outcome = match resolution {
            None => {
                lock(&self.entries).remove(&id);
                tracing::warn!(approval_id = %id, tool = %tool_name, "Approval timed out");
                self.audit(&ctx, &tool_name, &arguments, ToolAuditOutcome::TimedOut, "approval timed out");
                self.notify(
                    &ctx.session_id,
                    &format!(
                        "Approval for '{tool_name}' ({id}) timed out after {}s; the tool was not run.",
                        wait.as_secs()
                    ),
                )
                .await;
                ApprovalOutcome::TimedOut
            }
            Some(resolution) if !resolution.approved => {
                lock(&self.entries).remove(&id);
                let note = resolution.note.map(|n| format!(": {n}")).unwrap_or_default();
                self.audit(
                    &ctx,
                    &tool_name,
                    &arguments,
                    ToolAuditOutcome::Rejected,
                    &format!("denied by {}", resolution.resolver_id),
                );
                self.notify(
                    &ctx.session_id,
                    &format!("'{tool_name}' was denied by {}{note}.", resolution.resolver_id),
                )
                .await;
                ApprovalOutcome::Denied
            }
            Some(resolution) => {
                self.execute_approved(id, &ctx, tool, &tool_name, arguments, &resolution)
                    .await
            }
        };

        self.publish(DomainEvent::ApprovalResolved {
            approval_id: id.to_string(),
            session_id: ctx.session_id.clone(),
            tool_name,
            outcome: outcome.as_str().to_string(),
            timestamp: Utc::now(),
        });
        outcome
    }

    async fn execute_approved(
        &self,
        id: Uuid,
        ctx: &ToolContext,
        tool: Arc<dyn Tool>,
        tool_name: &str,
        arguments: Value,
        resolution: &ApprovalResolution,
    ) -> ApprovalOutcome {
        if let Some(entry) = lock(&self.entries).get_mut(&id) {
            entry.status = ApprovalStatus::Executing;
        }
        tracing::info!(approval_id = %id, tool = tool_name, resolver = %resolution.resolver_id, "Executing approved tool");

        let start = Instant::now();
        let limit = self.config.execution_timeout();
        let result = tokio::time::timeout(limit, tool.execute(ctx, arguments.clone())).await;
        lock(&self.entries).remove(&id);

        let (success, text) = match result {
            Ok(Ok(value)) => (true, format_output(&value)),
            Ok(Err(e)) => (false, e.to_string()),
            Err(_) => (false, format!("timed out after {}s", limit.as_secs())),
        };
        let outcome = if success {
            ToolAuditOutcome::Executed
        } else {
            ToolAuditOutcome::Failed
        };
        self.audit(ctx, tool_name, &arguments, outcome, &text);
        self.publish(DomainEvent::ToolExecuted {
            tool_name: tool_name.to_string(),
            session_id: ctx.session_id.clone(),
            success,
            duration_ms: start.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });

        let message = if success {
            format!(
                "Approved '{tool_name}' (by {}) completed:\n{}",
                resolution.resolver_id,
                summarize(&text, NOTIFY_OUTPUT_CHARS)
            )
        } else {
            format!("Approved '{tool_name}' (by {}) failed: {text}", resolution.resolver_id)
        };
        self.notify(&ctx.session_id, &message).await;

        ApprovalOutcome::Delivered { success }
    }

    async fn notify(&self, session_id: &str, text: &str) {
        if let Err(e) = self.notifier.send(session_id, text).await {
            tracing::warn!(session_id, error = %e, "Failed to deliver approval notification");
        }
    }

    fn audit(&self, ctx: &ToolContext, tool_name: &str, arguments: &Value, outcome: ToolAuditOutcome, detail: &str) {
        self.guard
            .audit(ToolAuditRecord::new(tool_name, ctx, arguments, outcome, detail));
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}
