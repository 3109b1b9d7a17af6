//! Security module for Helmsman — tool authorization and audit logging.
//!
//! Provides:
//! - **Policy**: a config-driven [`PolicyGuard`] implementing the core `Guard` trait
//! - **Audit logging**: structured records of every tool decision and outcome

pub mod audit;
pub mod policy;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use policy::PolicyGuard;
