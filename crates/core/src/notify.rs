//! Notifier trait — the out-of-band progress and approval channel.
//!
//! Used for messages that cannot go through the model-visible tool result
//! slot: approval prompts, delayed approval outcomes, long-running progress.

use async_trait::async_trait;

use crate::error::NotifyError;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text` to whoever is watching `session_id`.
    async fn send(&self, session_id: &str, text: &str) -> Result<(), NotifyError>;
}

/// Notifier that only logs. Used when no channel is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, session_id: &str, text: &str) -> Result<(), NotifyError> {
        tracing::debug!(session_id, chars = text.len(), "Dropping notification (no notifier configured)");
        Ok(())
    }
}
