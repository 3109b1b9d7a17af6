//! Audit logging — structured records of tool authorization and execution.
//!
//! Every tool call the dispatcher or approval gate handles ends up here,
//! whether it ran, failed, was denied, or is waiting on a human.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use helmsman_core::guard::{AccessLevel, ToolAuditOutcome, ToolAuditRecord};
use serde::{Deserialize, Serialize};

/// Entries kept in memory before the oldest are discarded.
const DEFAULT_CAPACITY: usize = 10_000;

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    /// Caller identity
    pub actor: String,
    pub access_level: AccessLevel,
    /// Session the call belongs to
    pub target: String,
    pub outcome: AuditOutcome,
    /// Argument summary
    pub arguments: String,
    /// Result or reason summary
    pub details: Option<String>,
}

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Tool handler ran (or failed while running)
    ToolExecution { tool_name: String },
    /// Guard refused the call
    ToolDenied { tool_name: String },
    /// Call parked for human confirmation
    ApprovalRequested { tool_name: String },
    /// Approver rejected the call or the approval timed out
    ApprovalClosed { tool_name: String },
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
    Pending,
    TimedOut,
}

impl From<ToolAuditRecord> for AuditEntry {
    fn from(record: ToolAuditRecord) -> Self {
        let tool_name = record.tool_name;
        let (event, outcome) = match record.outcome {
            ToolAuditOutcome::Executed => (AuditEvent::ToolExecution { tool_name }, AuditOutcome::Success),
            ToolAuditOutcome::Failed => (AuditEvent::ToolExecution { tool_name }, AuditOutcome::Failure),
            ToolAuditOutcome::Denied => (AuditEvent::ToolDenied { tool_name }, AuditOutcome::Denied),
            ToolAuditOutcome::PendingApproval => {
                (AuditEvent::ApprovalRequested { tool_name }, AuditOutcome::Pending)
            }
            ToolAuditOutcome::Rejected => (AuditEvent::ApprovalClosed { tool_name }, AuditOutcome::Denied),
            ToolAuditOutcome::TimedOut => (AuditEvent::ApprovalClosed { tool_name }, AuditOutcome::TimedOut),
        };
        Self {
            timestamp: Utc::now(),
            event,
            actor: record.caller_id,
            access_level: record.access_level,
            target: record.session_id,
            outcome,
            arguments: record.arguments_summary,
            details: (!record.result_summary.is_empty()).then_some(record.result_summary),
        }
    }
}

/// Trait for audit log sinks (where entries are written).
///
/// Called on the dispatch path, so implementations must not block.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Bounded in-memory audit logger that also forwards to sinks.
pub struct AuditLogger {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("capacity", &self.capacity)
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    /// Create a new audit logger with no sinks.
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    /// Create a new audit logger with the given sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: DEFAULT_CAPACITY,
            sinks,
        }
    }

    /// Limit how many entries stay in memory.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an entry.
    pub fn log(&self, entry: AuditEntry) {
        for sink in &self.sinks {
            sink.record(&entry);
        }

        let mut entries = self.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Record a tool audit record from the dispatcher or approval gate.
    pub fn log_tool(&self, record: ToolAuditRecord) {
        self.log(AuditEntry::from(record));
    }

    /// Get all recorded entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Get entries filtered by outcome.
    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| &e.outcome == outcome)
            .cloned()
            .collect()
    }

    /// Clear all stored entries.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Count of stored entries.
    pub fn count(&self) -> usize {
        self.lock().len()
    }
}

/// A tracing-based audit sink that logs entries via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            event = ?entry.event,
            actor = %entry.actor,
            level = %entry.access_level,
            target = %entry.target,
            outcome = ?entry.outcome,
            arguments = %entry.arguments,
            details = ?entry.details,
            "AUDIT"
        );
    }
}
