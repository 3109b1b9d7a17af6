//! Tool execution for Helmsman.
//!
//! - [`ToolRegistry`]: the catalogue of callable tools with a cached definition list
//! - [`Dispatcher`]: runs a batch of model tool calls under the guard, in parallel
//!   when safe, always returning one result per call in request order
//! - [`ApprovalGate`]: parks calls that need a human and reports their outcome
//!   out-of-band
//! - [`FnTool`]: closure-backed tools for hosts and tests

pub mod approval;
pub mod builtin;
pub mod dispatcher;
pub mod fn_tool;
pub mod registry;

pub use approval::{ApprovalGate, ApprovalOutcome, ApprovalResolution, ApprovalStatus, ApprovalTicket, PendingApproval};
pub use builtin::EchoTool;
pub use dispatcher::{Dispatcher, format_output};
pub use fn_tool::FnTool;
pub use registry::{ToolRegistry, sanitize_tool_name};
