//! Error types for the Helmsman domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for a run.
///
/// Only model-transport failures and unrecoverable context overflow reach the
/// caller; tool and authorization failures are turned into tool results.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Overflow recovery exhausted ---
    #[error("overflow: could not fit within context after {attempts} compaction attempts")]
    ContextOverflow { attempts: u32 },

    // --- Run was stopped externally ---
    #[error("Run cancelled")]
    Cancelled,
}

impl Error {
    /// Short text a channel can show the end user instead of the raw error.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::ContextOverflow { .. } => {
                "Sorry, this conversation has grown too long for me to continue. Please start a new one."
            }
            Error::Provider(ProviderError::Timeout(_)) => {
                "Sorry, the model took too long to respond. Please try again."
            }
            Error::Provider(ProviderError::RateLimited { .. }) => {
                "Sorry, I'm being rate limited right now. Please try again in a moment."
            }
            Error::Cancelled => "Stopped.",
            _ => "Sorry, something went wrong while processing your request.",
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool call cancelled: {0}")]
    Cancelled(String),
}

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed for session {session_id}: {reason}")]
    DeliveryFailed { session_id: String, reason: String },

    #[error("Notifier not configured")]
    NotConfigured,
}
