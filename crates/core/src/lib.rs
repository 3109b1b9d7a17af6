//! # Helmsman Core
//!
//! Domain types, traits, and error definitions for the Helmsman agent
//! execution core. This crate has **zero framework dependencies**: it defines
//! the domain model that the dispatcher, approval gate and agent loop are
//! written against.
//!
//! ## Design Philosophy
//!
//! Every collaborator the execution core consumes is a trait here:
//! - [`Provider`]: the language-model client
//! - [`Tool`]: a named capability the model can invoke
//! - [`Guard`]: the authorization policy consulted before any tool runs
//! - [`Notifier`]: the out-of-band channel for progress and approval outcomes
//!
//! Implementations live in their respective crates (or in the host
//! application), which keeps the agent loop testable with scripted mocks.

pub mod error;
pub mod event;
pub mod guard;
pub mod message;
pub mod notify;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, NotifyError, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use guard::{AccessLevel, AllowAllGuard, AuthorizationVerdict, Guard, ToolAuditOutcome, ToolAuditRecord};
pub use message::{Message, MessageToolCall, Role};
pub use notify::{Notifier, NullNotifier};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage};
pub use tool::{Tool, ToolCall, ToolContext, ToolResult};
