//! Interrupt inbox — follow-up user messages delivered into a running loop.
//!
//! Each run owns one bounded inbox. Senders never wait: a full inbox is
//! reported back so the caller can queue the message elsewhere.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Messages an inbox holds before senders are turned away.
pub const INBOX_CAPACITY: usize = 10;

/// Marker prepended to every drained follow-up before the model sees it.
pub const FOLLOW_UP_PREFIX: &str = "[Follow-up from user while you were working]: ";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterruptError {
    #[error("interrupt inbox is full")]
    Full,

    #[error("run has already finished")]
    Closed,

    #[error("no active run for this session")]
    NoActiveRun,
}

/// Create a connected sender/inbox pair.
pub fn interrupt_channel() -> (InterruptSender, InterruptInbox) {
    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    (InterruptSender { tx }, InterruptInbox { rx })
}

/// Sending half, cloned freely by whoever routes user input.
#[derive(Debug, Clone)]
pub struct InterruptSender {
    tx: mpsc::Sender<String>,
}

impl InterruptSender {
    /// Queue a follow-up without blocking.
    pub fn send(&self, text: impl Into<String>) -> Result<(), InterruptError> {
        self.tx.try_send(text.into()).map_err(|e| match e {
            TrySendError::Full(_) => InterruptError::Full,
            TrySendError::Closed(_) => InterruptError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half, owned by exactly one run.
#[derive(Debug)]
pub struct InterruptInbox {
    rx: mpsc::Receiver<String>,
}

impl InterruptInbox {
    /// Take everything queued so far, oldest first. Never waits.
    pub fn drain_all(&mut self) -> Vec<String> {
        let mut drained = Vec::new();
        while let Ok(text) = self.rx.try_recv() {
            drained.push(text);
        }
        drained
    }
}

/// Render a drained message as the user turn the model sees.
pub fn format_follow_up(text: &str) -> String {
    format!("{FOLLOW_UP_PREFIX}{text}")
}
