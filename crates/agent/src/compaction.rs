//! Context overflow recovery.
//!
//! When the model rejects a request as too large, the loop shrinks the
//! conversation and retries the same call. Detection is a pluggable
//! [`OverflowClassifier`] since every provider words the failure differently.

use helmsman_core::error::ProviderError;
use helmsman_core::message::{Message, Role};

/// Decides whether a provider failure means "the prompt did not fit".
pub trait OverflowClassifier: Send + Sync {
    fn is_overflow(&self, error: &ProviderError) -> bool;
}

/// Phrasings known to mean the context window was exceeded.
const DEFAULT_PATTERNS: &[&str] = &[
    "context length",
    "context_length_exceeded",
    "maximum context",
    "context window",
    "too many tokens",
    "prompt is too long",
    "request too large",
    "input is too long",
    "reduce the length",
];

/// Case-insensitive substring match over the error text.
///
/// Best effort: a provider may word an overflow in a way no pattern covers,
/// or use one of these phrases for something else.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    patterns: Vec<String>,
}

impl PatternClassifier {
    pub fn new() -> Self {
        Self {
            patterns: DEFAULT_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Also treat errors containing `pattern` as overflows.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into().to_lowercase());
        self
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl OverflowClassifier for PatternClassifier {
    fn is_overflow(&self, error: &ProviderError) -> bool {
        if matches!(error, ProviderError::ContextLengthExceeded(_)) {
            return true;
        }
        let text = error.to_string().to_lowercase();
        self.patterns.iter().any(|p| text.contains(p.as_str()))
    }
}

/// Keep the leading system message (if any) plus roughly the last
/// `keep_recent` messages of the rest.
///
/// A window that would open inside a batch of tool results is widened back
/// to the assistant message that requested them; results whose request is
/// already gone are dropped. If the window ends up without a user message,
/// the most recent earlier one is kept in front of it so the request itself
/// survives.
pub fn compact(messages: &[Message], keep_recent: usize) -> Vec<Message> {
    let (system, rest) = match messages.split_first() {
        Some((first, rest)) if first.role == Role::System => (Some(first), rest),
        _ => (None, messages),
    };

    let mut start = rest.len().saturating_sub(keep_recent);
    if rest.get(start).is_some_and(|m| m.role == Role::Tool) {
        let caller = rest[..start].iter().rposition(|m| m.role != Role::Tool);
        match caller {
            Some(i) if rest[i].has_tool_calls() => start = i,
            _ => {
                while rest.get(start).is_some_and(|m| m.role == Role::Tool) {
                    start += 1;
                }
            }
        }
    }
    let window = &rest[start..];

    let anchor = if window.iter().any(|m| m.role == Role::User) {
        None
    } else {
        rest[..start].iter().rev().find(|m| m.role == Role::User)
    };

    system.into_iter().chain(anchor).chain(window).cloned().collect()
}

/// Cut tool-role messages longer than `max_len` characters down to a prefix
/// and a marker. Returns how many messages were cut.
pub fn truncate_tool_outputs(messages: &mut [Message], max_len: usize) -> usize {
    let mut truncated = 0;
    for message in messages.iter_mut().filter(|m| m.role == Role::Tool) {
        let Some((cut, _)) = message.content.char_indices().nth(max_len) else {
            continue;
        };
        let dropped = message.content[cut..].chars().count();
        message.content = format!("{}\n... [truncated {dropped} chars]", &message.content[..cut]);
        truncated += 1;
    }
    truncated
}

/// How aggressively each successive retry compacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPolicy {
    /// Recent messages kept on the first retry
    pub initial_window: usize,
    /// Shrink per further retry
    pub window_step: usize,
    pub min_window: usize,
    /// Max characters per tool output after compaction
    pub tool_output_limit: usize,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            initial_window: 20,
            window_step: 5,
            min_window: 6,
            tool_output_limit: 2_000,
        }
    }
}

impl CompactionPolicy {
    /// Window for the 1-based `attempt`.
    pub fn window_for(&self, attempt: u32) -> usize {
        let shrink = self.window_step.saturating_mul(attempt.saturating_sub(1) as usize);
        self.initial_window.saturating_sub(shrink).max(self.min_window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsman_core::message::MessageToolCall;

    fn conversation(turns: usize) -> Vec<Message> {
        let mut messages = vec![Message::system("You are helpful.")];
        for i in 0..turns {
            messages.push(Message::user(format!("question {i}")));
            messages.push(Message::assistant(format!("answer {i}")));
        }
        messages
    }

    #[test]
    fn classifier_matches_known_phrasings() {
        let c = PatternClassifier::new();
        assert!(c.is_overflow(&ProviderError::ContextLengthExceeded("anything".into())));
        assert!(c.is_overflow(&ProviderError::ApiError {
            status_code: 400,
            message: "This model's Maximum Context length is 8192 tokens".into(),
        }));
        assert!(c.is_overflow(&ProviderError::ApiError {
            status_code: 400,
            message: "prompt is too long: 210000 tokens > 200000".into(),
        }));
        assert!(!c.is_overflow(&ProviderError::RateLimited { retry_after_secs: 5 }));
        assert!(!c.is_overflow(&ProviderError::Network("connection reset".into())));
    }

    #[test]
    fn classifier_accepts_extra_patterns() {
        let err = ProviderError::ApiError {
            status_code: 413,
            message: "Payload exceeds model budget".into(),
        };
        assert!(!PatternClassifier::new().is_overflow(&err));
        assert!(PatternClassifier::new().with_pattern("Exceeds Model Budget").is_overflow(&err));
    }

    #[test]
    fn compact_keeps_system_and_recent() {
        let messages = conversation(10);
        let compacted = compact(&messages, 4);
        assert_eq!(compacted.len(), 5);
        assert_eq!(compacted[0].role, Role::System);
        assert_eq!(compacted[1].content, "question 8");
        assert_eq!(compacted[4].content, "answer 9");
    }

    #[test]
    fn compact_never_grows() {
        let messages = conversation(2);
        for keep in [0, 1, 3, 4, 50] {
            let compacted = compact(&messages, keep);
            assert!(compacted.len() <= messages.len());
            assert_eq!(compacted[0].role, Role::System);
        }
    }

    #[test]
    fn compact_without_system_message() {
        let messages = vec![Message::user("a"), Message::assistant("b"), Message::user("c")];
        let compacted = compact(&messages, 2);
        assert_eq!(compacted.len(), 2);
        assert_eq!(compacted[0].content, "b");
    }

    fn search_call(id: &str) -> MessageToolCall {
        MessageToolCall {
            id: id.into(),
            name: "search".into(),
            arguments: "{}".into(),
        }
    }

    #[test]
    fn compact_keeps_tool_results_with_their_call() {
        let messages = vec![
            Message::system("sys"),
            Message::user("find it"),
            Message::assistant_with_tool_calls("", vec![search_call("c1")]),
            Message::tool_result("c1", "result"),
            Message::user("thanks"),
        ];
        let compacted = compact(&messages, 2);
        let roles: Vec<Role> = compacted.iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::System, Role::Assistant, Role::Tool, Role::User]);
        assert_eq!(compacted[3].content, "thanks");
    }

    #[test]
    fn compact_drops_results_without_a_call() {
        let messages = vec![
            Message::tool_result("c0", "stale"),
            Message::user("next"),
            Message::assistant("ok"),
        ];
        let compacted = compact(&messages, 3);
        assert_eq!(compacted.len(), 2);
        assert_eq!(compacted[0].content, "next");
    }

    #[test]
    fn compact_wide_batch_keeps_the_request() {
        let calls: Vec<MessageToolCall> = (0..25).map(|i| search_call(&format!("c{i}"))).collect();
        let mut messages = vec![
            Message::system("sys"),
            Message::user("research everything"),
            Message::assistant_with_tool_calls("", calls),
        ];
        messages.extend((0..25).map(|i| Message::tool_result(format!("c{i}"), format!("result {i}"))));

        for keep in [20, 6] {
            let compacted = compact(&messages, keep);
            assert!(compacted.len() <= messages.len());
            assert_eq!(compacted[0].role, Role::System);
            assert!(
                compacted.iter().any(|m| m.role == Role::User && m.content == "research everything"),
                "user request lost with window {keep}"
            );
            assert!(compacted.iter().any(|m| m.has_tool_calls()));
        }
    }

    #[test]
    fn compact_keeps_last_user_when_window_has_none() {
        let messages = vec![
            Message::system("sys"),
            Message::user("old"),
            Message::assistant("a"),
            Message::user("the question"),
            Message::assistant("b"),
            Message::assistant("c"),
        ];
        let compacted = compact(&messages, 2);
        let contents: Vec<&str> = compacted.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["sys", "the question", "b", "c"]);
    }

    #[test]
    fn truncation_marks_cut_outputs() {
        let mut messages = vec![
            Message::user("x".repeat(50)),
            Message::tool_result("c1", "é".repeat(30)),
            Message::tool_result("c2", "short"),
        ];
        let cut = truncate_tool_outputs(&mut messages, 10);
        assert_eq!(cut, 1);
        assert_eq!(messages[0].content.len(), 50, "user messages are untouched");
        assert_eq!(messages[1].content, format!("{}\n... [truncated 20 chars]", "é".repeat(10)));
        assert_eq!(messages[2].content, "short");
    }

    #[test]
    fn policy_window_shrinks_to_floor() {
        let policy = CompactionPolicy::default();
        assert_eq!(policy.window_for(1), 20);
        assert_eq!(policy.window_for(2), 15);
        assert_eq!(policy.window_for(3), 10);
        assert_eq!(policy.window_for(4), 6);
        assert_eq!(policy.window_for(40), 6);
    }
}
