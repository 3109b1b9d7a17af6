//! `helmsman replay` — Run the agent loop against a scripted model.
//!
//! The script is a JSON array of model turns. Each turn has optional
//! `content` text and optional `tool_calls`:
//!
//! ```json
//! [
//!   { "tool_calls": [{ "name": "echo", "arguments": { "text": "hi" } }] },
//!   { "content": "The tool said hi." }
//! ]
//! ```
//!
//! Everything else (dispatch, policy, approvals, budgets) is the real stack,
//! configured from `~/.helmsman/config.toml`.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use helmsman_agent::{AgentLoop, AgentStreamEvent, RunKey, RunOutput, RunRegistry, RunRequest};
use helmsman_config::AppConfig;
use helmsman_core::error::{Error, NotifyError, ProviderError};
use helmsman_core::guard::Guard;
use helmsman_core::message::{Message, MessageToolCall};
use helmsman_core::notify::Notifier;
use helmsman_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use helmsman_core::tool::ToolContext;
use helmsman_security::{AuditLogger, PolicyGuard, TracingSink};
use helmsman_tools::{ApprovalGate, Dispatcher, EchoTool, ToolRegistry};
use serde::Deserialize;

const WORKSPACE_ID: &str = "local";
const SESSION_ID: &str = "replay";

/// One scripted model turn.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptStep {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ScriptToolCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

pub fn parse_script(text: &str) -> Result<Vec<ScriptStep>, serde_json::Error> {
    serde_json::from_str(text)
}

/// Provider that answers each call with the next scripted step.
pub struct ReplayProvider {
    steps: Mutex<VecDeque<ScriptStep>>,
    next_call_id: AtomicUsize,
}

impl ReplayProvider {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            next_call_id: AtomicUsize::new(1),
        }
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Provider for ReplayProvider {
    fn name(&self) -> &str {
        "replay"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let step = self
            .steps
            .lock()
            .map_err(|_| ProviderError::NotConfigured("replay script lock poisoned".into()))?
            .pop_front()
            .ok_or_else(|| ProviderError::NotConfigured("replay script exhausted".into()))?;

        let tool_calls: Vec<MessageToolCall> = step
            .tool_calls
            .into_iter()
            .map(|call| {
                let n = self.next_call_id.fetch_add(1, Ordering::Relaxed);
                let arguments = if call.arguments.is_null() {
                    String::new()
                } else {
                    call.arguments.to_string()
                };
                MessageToolCall {
                    id: format!("call_{n}"),
                    name: call.name,
                    arguments,
                }
            })
            .collect();

        let prompt_tokens: usize = request.messages.iter().map(Message::estimated_tokens).sum();
        let completion_tokens = step.content.len() / 4;
        let prompt_tokens = u32::try_from(prompt_tokens).unwrap_or(u32::MAX);
        let completion_tokens = u32::try_from(completion_tokens).unwrap_or(u32::MAX);

        let finish_reason = if tool_calls.is_empty() { "stop" } else { "tool_calls" };
        let message = if tool_calls.is_empty() {
            Message::assistant(step.content)
        } else {
            Message::assistant_with_tool_calls(step.content, tool_calls)
        };

        Ok(ProviderResponse {
            message,
            usage: Some(Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens.saturating_add(completion_tokens),
            }),
            model: request.model,
            finish_reason: Some(finish_reason.into()),
            metadata: serde_json::Map::new(),
        })
    }
}

/// Prints notifications to the terminal.
struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send(&self, session_id: &str, text: &str) -> Result<(), NotifyError> {
        println!("\n📣 [{session_id}] {text}");
        Ok(())
    }
}

fn print_event(event: AgentStreamEvent) {
    match event {
        AgentStreamEvent::Chunk { content } => print!("{content}"),
        AgentStreamEvent::ToolCall { name, input, .. } => println!("🔧 {name}({input})"),
        AgentStreamEvent::ToolResult { name, output, success, .. } => {
            let mark = if success { "✅" } else { "❌" };
            println!("{mark} {name} → {output}");
        }
        AgentStreamEvent::Notice { content } => println!("ℹ️  {content}"),
        AgentStreamEvent::Done { .. } | AgentStreamEvent::Error { .. } => {}
    }
}

/// Log a failed run in full and hand the user only the short text.
fn settle(result: Result<RunOutput, Error>) -> Result<RunOutput, Box<dyn std::error::Error>> {
    result.map_err(|e| {
        tracing::error!(error = %e, "Replay run failed");
        println!();
        println!("❌ {}", e.user_message());
        e.user_message().into()
    })
}

pub async fn run(
    script: &Path,
    message: &str,
    system: &str,
    max_turns: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(max_turns) = max_turns {
        config.run.max_turns = max_turns;
        config.validate()?;
    }

    let text = std::fs::read_to_string(script)
        .map_err(|e| format!("Failed to read script {}: {e}", script.display()))?;
    let steps = parse_script(&text).map_err(|e| format!("Invalid script {}: {e}", script.display()))?;
    tracing::info!(steps = steps.len(), script = %script.display(), "Loaded replay script");

    let provider = Arc::new(ReplayProvider::new(steps));

    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(EchoTool));

    let audit = Arc::new(AuditLogger::with_sinks(vec![Box::new(TracingSink)]));
    let guard: Arc<dyn Guard> = Arc::new(PolicyGuard::new(config.policy.clone(), audit));
    let gate = Arc::new(ApprovalGate::new(
        config.approval.clone(),
        Arc::new(ConsoleNotifier),
        Arc::clone(&guard),
    ));
    let dispatcher = Arc::new(
        Dispatcher::new(registry, guard, config.dispatch.clone()).with_approval_gate(gate),
    );

    let agent = AgentLoop::from_config(provider.clone(), dispatcher, &config)
        .with_stream_callback(Arc::new(print_event));

    let runs = RunRegistry::new();
    let key = RunKey::new(WORKSPACE_ID, SESSION_ID);
    let mut handle = runs.begin(key.clone())?;

    let stopper = {
        let runs = runs.clone();
        let key = key.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                runs.stop(&key);
            }
        })
    };

    let ctx = ToolContext::new(WORKSPACE_ID, SESSION_ID, "local-user", config.policy.default_level);
    let request = handle.bind(RunRequest::new(system, message, ctx));
    let result = agent.run(request).await;
    stopper.abort();
    drop(handle);

    let output = settle(result)?;
    println!();
    println!("🤖 {}", output.text);
    println!();
    println!(
        "   Turns: {}  Model calls: {}  Tokens: {} ({} prompt / {} completion)",
        output.turns,
        output.usage.model_calls,
        output.usage.total_tokens,
        output.usage.prompt_tokens,
        output.usage.completion_tokens
    );
    if output.stopped {
        println!("   ⏹️  Run was stopped");
    }
    let unused = provider.remaining();
    if unused > 0 {
        println!("   ⚠️  {unused} scripted step(s) were not used");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "replay-model".into(),
            messages: vec![Message::user("hi")],
            temperature: 0.0,
            max_tokens: None,
            tools: Vec::new(),
            stream: false,
        }
    }

    #[test]
    fn parses_text_and_tool_steps() {
        let steps = parse_script(
            r#"[
                {"tool_calls": [{"name": "echo", "arguments": {"text": "hi"}}]},
                {"content": "done"}
            ]"#,
        )
        .unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].tool_calls[0].name, "echo");
        assert!(steps[0].content.is_empty());
        assert_eq!(steps[1].content, "done");
        assert!(steps[1].tool_calls.is_empty());
    }

    #[test]
    fn rejects_non_array_script() {
        assert!(parse_script(r#"{"content": "x"}"#).is_err());
    }

    #[tokio::test]
    async fn provider_plays_steps_in_order() {
        let provider = ReplayProvider::new(
            parse_script(
                r#"[
                    {"tool_calls": [{"name": "echo", "arguments": {"text": "a"}}, {"name": "echo"}]},
                    {"content": "final"}
                ]"#,
            )
            .unwrap(),
        );

        let first = provider.complete(request()).await.unwrap();
        let calls = &first.message.tool_calls;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[1].id, "call_2");
        assert_eq!(calls[0].arguments, r#"{"text":"a"}"#);
        assert_eq!(calls[1].arguments, "");
        assert_eq!(first.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(first.model, "replay-model");

        let second = provider.complete(request()).await.unwrap();
        assert_eq!(second.message.content, "final");
        assert_eq!(provider.remaining(), 0);
    }

    #[test]
    fn failed_run_shows_only_the_user_message() {
        let err = Error::Provider(ProviderError::Network("connection reset by 10.0.0.7".into()));
        let shown = settle(Err(err)).unwrap_err().to_string();
        assert!(shown.starts_with("Sorry"));
        assert!(!shown.contains("10.0.0.7"));

        let overflow = settle(Err(Error::ContextOverflow { attempts: 3 })).unwrap_err().to_string();
        assert!(overflow.contains("too long"));
    }

    #[tokio::test]
    async fn exhausted_script_is_an_error() {
        let provider = ReplayProvider::new(Vec::new());
        let err = provider.complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
