//! Config-driven tool authorization.
//!
//! Rules, checked in order:
//! - tool in `denied_tools` → denied
//! - caller below the tool's minimum level → denied
//! - tool in `confirm_tools` and caller below `confirm_exempt_level` → confirmation required
//! - otherwise → allowed

use std::sync::Arc;

use async_trait::async_trait;
use helmsman_config::PolicyConfig;
use helmsman_core::guard::{AccessLevel, AuthorizationVerdict, Guard, ToolAuditRecord};

use crate::audit::AuditLogger;

/// Reference [`Guard`] built from a [`PolicyConfig`].
pub struct PolicyGuard {
    policy: PolicyConfig,
    audit: Arc<AuditLogger>,
}

impl PolicyGuard {
    pub fn new(policy: PolicyConfig, audit: Arc<AuditLogger>) -> Self {
        Self { policy, audit }
    }

    pub fn audit_log(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// Minimum access level needed to call `tool_name`.
    pub fn required_level(&self, tool_name: &str) -> AccessLevel {
        self.policy
            .tool_levels
            .get(tool_name)
            .copied()
            .unwrap_or(AccessLevel::Guest)
    }

    fn evaluate(&self, tool_name: &str, level: AccessLevel) -> AuthorizationVerdict {
        if self.policy.denied_tools.iter().any(|t| t == tool_name) {
            return AuthorizationVerdict::deny(format!("tool '{tool_name}' is disabled by policy"));
        }

        let required = self.required_level(tool_name);
        if level < required {
            return AuthorizationVerdict::deny(format!(
                "tool '{tool_name}' requires {required} access (caller has {level})"
            ));
        }

        if self.policy.confirm_tools.iter().any(|t| t == tool_name)
            && level < self.policy.confirm_exempt_level
        {
            return AuthorizationVerdict::confirm(format!(
                "tool '{tool_name}' needs confirmation for {level} callers"
            ));
        }

        AuthorizationVerdict::allow()
    }
}

#[async_trait]
impl Guard for PolicyGuard {
    async fn check(
        &self,
        tool_name: &str,
        level: AccessLevel,
        _arguments: &serde_json::Value,
    ) -> AuthorizationVerdict {
        let verdict = self.evaluate(tool_name, level);
        tracing::debug!(
            tool = tool_name,
            %level,
            allowed = verdict.allowed,
            confirm = verdict.requires_confirmation,
            "Policy verdict"
        );
        verdict
    }

    fn audit(&self, record: ToolAuditRecord) {
        self.audit.log_tool(record);
    }
}
