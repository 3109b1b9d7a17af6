//! Guard trait — the authorization policy consulted before any tool runs.
//!
//! The execution core treats the verdict as opaque: it never inspects why a
//! call was allowed or denied, it only routes on the three outcomes.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How much the caller is trusted. Ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Guest,
    #[default]
    User,
    Trusted,
    Admin,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Guest => "guest",
            AccessLevel::User => "user",
            AccessLevel::Trusted => "trusted",
            AccessLevel::Admin => "admin",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "guest" => Ok(AccessLevel::Guest),
            "user" => Ok(AccessLevel::User),
            "trusted" => Ok(AccessLevel::Trusted),
            "admin" => Ok(AccessLevel::Admin),
            other => Err(format!("unknown access level '{other}'")),
        }
    }
}

/// The Guard's decision for one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationVerdict {
    pub allowed: bool,
    pub requires_confirmation: bool,
    pub reason: String,
}

impl AuthorizationVerdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            requires_confirmation: false,
            reason: String::new(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            requires_confirmation: false,
            reason: reason.into(),
        }
    }

    /// Allowed, but only after a human confirms.
    pub fn confirm(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            requires_confirmation: true,
            reason: reason.into(),
        }
    }
}

/// Outcome recorded in a tool audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolAuditOutcome {
    /// Handler ran and returned a value
    Executed,
    /// Handler failed, timed out, or was cancelled
    Failed,
    /// Guard denied the call
    Denied,
    /// Handed to the approval gate
    PendingApproval,
    /// Approver rejected the call
    Rejected,
    /// Nobody resolved the approval in time
    TimedOut,
}

impl ToolAuditOutcome {
    /// Whether the call was allowed to proceed at this point.
    pub fn allowed(&self) -> bool {
        matches!(self, Self::Executed | Self::Failed | Self::PendingApproval)
    }
}

/// One audit record per tool call outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolAuditRecord {
    pub tool_name: String,
    pub caller_id: String,
    pub session_id: String,
    pub access_level: AccessLevel,
    /// Truncated argument JSON
    pub arguments_summary: String,
    pub outcome: ToolAuditOutcome,
    /// Truncated result text or denial reason
    pub result_summary: String,
}

const ARGUMENT_SUMMARY_CHARS: usize = 200;
const RESULT_SUMMARY_CHARS: usize = 500;

impl ToolAuditRecord {
    /// Build a record, truncating the argument and result summaries.
    pub fn new(
        tool_name: impl Into<String>,
        ctx: &crate::tool::ToolContext,
        arguments: &serde_json::Value,
        outcome: ToolAuditOutcome,
        result: &str,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            caller_id: ctx.caller_id.clone(),
            session_id: ctx.session_id.clone(),
            access_level: ctx.access_level,
            arguments_summary: summarize(&arguments.to_string(), ARGUMENT_SUMMARY_CHARS),
            outcome,
            result_summary: summarize(result, RESULT_SUMMARY_CHARS),
        }
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut with "...".
pub fn summarize(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_offset, _)) => format!("{}...", &text[..byte_offset]),
        None => text.to_string(),
    }
}

/// The authorization policy engine.
#[async_trait]
pub trait Guard: Send + Sync {
    /// Decide whether `tool_name` may run for a caller at `level` with `arguments`.
    async fn check(
        &self,
        tool_name: &str,
        level: AccessLevel,
        arguments: &serde_json::Value,
    ) -> AuthorizationVerdict;

    /// Record an audit entry. Fire-and-forget: must not block the caller.
    fn audit(&self, record: ToolAuditRecord);
}

/// Guard that allows everything and discards audit records.
///
/// Suitable for fully trusted automation and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllGuard;

#[async_trait]
impl Guard for AllowAllGuard {
    async fn check(
        &self,
        _tool_name: &str,
        _level: AccessLevel,
        _arguments: &serde_json::Value,
    ) -> AuthorizationVerdict {
        AuthorizationVerdict::allow()
    }

    fn audit(&self, record: ToolAuditRecord) {
        tracing::trace!(tool = %record.tool_name, outcome = ?record.outcome, "audit (allow-all guard)");
    }
}
