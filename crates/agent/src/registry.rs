//! Active-run registry keyed by workspace and session.
//!
//! Lets code outside a run stop it or feed it follow-up messages. An entry
//! exists exactly as long as its [`RunHandle`]; the map lock is only held
//! while the map itself is touched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use helmsman_core::tool::ToolContext;
use tokio_util::sync::CancellationToken;

use crate::inbox::{InterruptError, InterruptInbox, InterruptSender, interrupt_channel};
use crate::loop_runner::RunRequest;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunKey {
    pub workspace_id: String,
    pub session_id: String,
}

impl RunKey {
    pub fn new(workspace_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            session_id: session_id.into(),
        }
    }

    pub fn from_context(ctx: &ToolContext) -> Self {
        Self::new(&ctx.workspace_id, &ctx.session_id)
    }
}

impl std::fmt::Display for RunKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.workspace_id, self.session_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("a run is already active for {0}")]
    AlreadyActive(RunKey),
}

struct ActiveRun {
    generation: u64,
    cancel: CancellationToken,
    interrupts: InterruptSender,
}

type RunMap = HashMap<RunKey, ActiveRun>;

fn lock(runs: &Mutex<RunMap>) -> MutexGuard<'_, RunMap> {
    runs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared map of in-flight runs. Cheap to clone.
#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<Mutex<RunMap>>,
    next_generation: Arc<AtomicU64>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run for `key`.
    pub fn begin(&self, key: RunKey) -> Result<RunHandle, RegistryError> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (sender, inbox) = interrupt_channel();

        {
            let mut runs = lock(&self.runs);
            if runs.contains_key(&key) {
                return Err(RegistryError::AlreadyActive(key));
            }
            runs.insert(
                key.clone(),
                ActiveRun {
                    generation,
                    cancel: cancel.clone(),
                    interrupts: sender,
                },
            );
        }

        tracing::debug!(run = %key, generation, "Run registered");
        Ok(RunHandle {
            key,
            generation,
            cancel,
            inbox: Some(inbox),
            runs: Arc::clone(&self.runs),
        })
    }

    /// Cancel the active run for `key`. `false` if nothing was running.
    pub fn stop(&self, key: &RunKey) -> bool {
        let cancel = lock(&self.runs).get(key).map(|run| run.cancel.clone());
        match cancel {
            Some(cancel) => {
                tracing::info!(run = %key, "Stop requested");
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Deliver a follow-up message into the active run without waiting.
    pub fn interrupt(&self, key: &RunKey, text: impl Into<String>) -> Result<(), InterruptError> {
        let sender = lock(&self.runs)
            .get(key)
            .map(|run| run.interrupts.clone())
            .ok_or(InterruptError::NoActiveRun)?;
        sender.send(text)
    }

    pub fn is_active(&self, key: &RunKey) -> bool {
        lock(&self.runs).contains_key(key)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.runs).len()
    }
}

/// Ownership of one registered run. Dropping it deregisters the run.
pub struct RunHandle {
    key: RunKey,
    generation: u64,
    cancel: CancellationToken,
    inbox: Option<InterruptInbox>,
    runs: Arc<Mutex<RunMap>>,
}

impl RunHandle {
    pub fn key(&self) -> &RunKey {
        &self.key
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Attach this run's cancel token and inbox to `request`.
    ///
    /// The inbox moves into the first request bound; later requests only
    /// get the cancel token.
    pub fn bind(&mut self, request: RunRequest) -> RunRequest {
        let request = request.with_cancel(self.cancel.clone());
        match self.inbox.take() {
            Some(inbox) => request.with_interrupts(inbox),
            None => request,
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        let mut runs = lock(&self.runs);
        if runs.get(&self.key).is_some_and(|run| run.generation == self.generation) {
            runs.remove(&self.key);
            tracing::debug!(run = %self.key, generation = self.generation, "Run deregistered");
        }
    }
}
