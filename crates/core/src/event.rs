//! Domain event system — decoupled observation of runs.
//!
//! Events are published when something interesting happens in a run.
//! Dashboards, usage accounting and tests subscribe without coupling to the
//! agent loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A run started for a session
    RunStarted {
        run_id: String,
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The model answered one call
    ResponseGenerated {
        run_id: String,
        model: String,
        tokens_used: u32,
        tool_calls: usize,
        timestamp: DateTime<Utc>,
    },

    /// A tool call finished (successfully or not)
    ToolExecuted {
        tool_name: String,
        session_id: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool call was parked waiting for a human
    ApprovalRequested {
        approval_id: String,
        session_id: String,
        tool_name: String,
        timestamp: DateTime<Utc>,
    },

    /// A parked tool call reached a terminal state
    ApprovalResolved {
        approval_id: String,
        session_id: String,
        tool_name: String,
        /// "delivered", "denied" or "timed_out"
        outcome: String,
        timestamp: DateTime<Utc>,
    },

    /// Messages were dropped to recover from a context overflow
    ContextCompacted {
        run_id: String,
        attempt: u32,
        messages_before: usize,
        messages_after: usize,
        timestamp: DateTime<Utc>,
    },

    /// A run produced its final answer, failed, or was stopped
    RunFinished {
        run_id: String,
        session_id: String,
        turns: u32,
        total_tokens: u64,
        /// "completed", "stopped" or "failed"
        status: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ToolExecuted {
            tool_name: "shell".into(),
            session_id: "s1".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted { tool_name, success, .. } => {
                assert_eq!(tool_name, "shell");
                assert!(success);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::RunFinished {
            run_id: "r1".into(),
            session_id: "s1".into(),
            turns: 0,
            total_tokens: 0,
            status: "failed".into(),
            timestamp: Utc::now(),
        });
    }
}
