//! The core agent loop — the heart of Helmsman.
//!
//! The agent follows a **call → act → observe** cycle:
//!
//! 1. **Receive** a user message with the system prompt and prior history
//! 2. **Send to LLM** with the registered tool definitions
//! 3. **If tool calls**: dispatch them, append results, loop back to step 2
//! 4. **If text response**: that is the run's answer
//!
//! Around that cycle the loop enforces turn and continuation budgets,
//! recovers from context overflows by compacting, merges follow-up messages
//! that arrive mid-run, and can be stopped from outside through the
//! [`RunRegistry`].

pub mod compaction;
pub mod inbox;
pub mod loop_runner;
pub mod registry;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use compaction::{CompactionPolicy, OverflowClassifier, PatternClassifier, compact, truncate_tool_outputs};
pub use inbox::{FOLLOW_UP_PREFIX, INBOX_CAPACITY, InterruptError, InterruptInbox, InterruptSender, interrupt_channel};
pub use loop_runner::{AgentLoop, RunOutput, RunRequest, RunUsage, STOPPED_TEXT, StreamCallback, UsageRecorder};
pub use registry::{RegistryError, RunHandle, RunKey, RunRegistry};
pub use stream_event::AgentStreamEvent;
