//! End-to-end integration tests for the Helmsman execution core.
//!
//! These tests wire the real crates together (config, policy guard, audit
//! log, registry, dispatcher, approval gate, agent loop, run registry) and
//! only script the model.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use helmsman_agent::{AgentLoop, FOLLOW_UP_PREFIX, RunKey, RunRegistry, RunRequest, STOPPED_TEXT};
use helmsman_config::AppConfig;
use helmsman_core::error::{NotifyError, ProviderError};
use helmsman_core::guard::{AccessLevel, Guard};
use helmsman_core::message::{Message, MessageToolCall, Role};
use helmsman_core::notify::Notifier;
use helmsman_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use helmsman_core::tool::ToolContext;
use helmsman_security::{AuditLogger, AuditOutcome, PolicyGuard};
use helmsman_tools::{ApprovalGate, Dispatcher, EchoTool, FnTool, ToolRegistry};
use serde_json::json;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence, then
/// repeats `fallback` if one is set.
struct ScriptedProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    fallback: Option<ProviderResponse>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ProviderRequest>>,
    /// Sent into the run registry during the first call
    interrupt: Option<(RunRegistry, RunKey, String)>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
            interrupt: None,
        }
    }

    fn repeating(response: ProviderResponse) -> Self {
        let mut provider = Self::new(Vec::new());
        provider.fallback = Some(response);
        provider
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, n: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[n].clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let first = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len() == 1
        };
        if first && let Some((runs, key, text)) = &self.interrupt {
            runs.interrupt(key, text.clone()).unwrap();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        match (next, &self.fallback) {
            (Some(response), _) => Ok(response),
            (None, Some(response)) => Ok(response.clone()),
            (None, None) => panic!("ScriptedProvider exhausted"),
        }
    }
}

fn usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: usage(),
        model: "mock-model".into(),
        finish_reason: Some("stop".into()),
        metadata: serde_json::Map::new(),
    }
}

fn tool_response(calls: Vec<MessageToolCall>) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_with_tool_calls("", calls),
        usage: usage(),
        model: "mock-model".into(),
        finish_reason: Some("tool_calls".into()),
        metadata: serde_json::Map::new(),
    }
}

fn call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: args.to_string(),
    }
}

// ── Recording Notifier ───────────────────────────────────────────────────

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, _session_id: &str, text: &str) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

// ── Stack ────────────────────────────────────────────────────────────────

struct Stack {
    agent: AgentLoop,
    audit: Arc<AuditLogger>,
    gate: Arc<ApprovalGate>,
    notifier: Arc<RecordingNotifier>,
}

fn build(provider: Arc<ScriptedProvider>, config: &AppConfig) -> Stack {
    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(EchoTool));
    registry.register(Arc::new(FnTool::new(
        "shell",
        "Runs a shell command",
        json!({"type": "object", "properties": {"cmd": {"type": "string"}}}),
        |_ctx, args| async move { Ok(json!(format!("ran {}", args["cmd"].as_str().unwrap_or("")))) },
    )));

    let audit = Arc::new(AuditLogger::new());
    let guard: Arc<dyn Guard> = Arc::new(PolicyGuard::new(config.policy.clone(), Arc::clone(&audit)));
    let notifier = Arc::new(RecordingNotifier::default());
    let gate = Arc::new(ApprovalGate::new(
        config.approval.clone(),
        notifier.clone(),
        Arc::clone(&guard),
    ));
    let dispatcher = Arc::new(
        Dispatcher::new(registry, guard, config.dispatch.clone()).with_approval_gate(Arc::clone(&gate)),
    );

    Stack {
        agent: AgentLoop::from_config(provider, dispatcher, config),
        audit,
        gate,
        notifier,
    }
}

fn ctx(level: AccessLevel) -> ToolContext {
    ToolContext::new("ws-1", "s1", "alice", level)
}

fn tool_messages(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.clone())
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_tool_round_trip_is_audited() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(vec![call("c1", "echo", json!({"text": "ping"}))]),
        text_response("The echo said ping."),
    ]));
    let stack = build(provider.clone(), &AppConfig::default());

    let output = stack
        .agent
        .run(RunRequest::new("sys", "echo ping", ctx(AccessLevel::User)))
        .await
        .unwrap();

    assert_eq!(output.text, "The echo said ping.");
    assert_eq!(output.turns, 2);
    assert_eq!(output.usage.total_tokens, 30);
    assert_eq!(tool_messages(&output.messages), ["ping"]);
    assert_eq!(provider.calls(), 2);
    assert!(provider.request(0).tools.iter().any(|t| t.name == "echo"));

    let executed = stack.audit.entries_by_outcome(&AuditOutcome::Success);
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].actor, "alice");
}

#[tokio::test]
async fn e2e_policy_denial_reaches_the_model() {
    let mut config = AppConfig::default();
    config.policy.denied_tools.push("echo".into());

    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(vec![
            call("c1", "echo", json!({"text": "hi"})),
            call("c2", "missing_tool", json!({})),
        ]),
        text_response("I could not do that."),
    ]));
    let stack = build(provider, &config);

    let output = stack
        .agent
        .run(RunRequest::new("sys", "try", ctx(AccessLevel::Admin)))
        .await
        .unwrap();

    let results = tool_messages(&output.messages);
    assert_eq!(results.len(), 2);
    assert!(results[0].starts_with("Permission denied:"), "got {}", results[0]);
    assert!(results[1].contains("unknown tool 'missing_tool'"));
    assert!(results[1].contains("echo"));
    assert_eq!(stack.audit.entries_by_outcome(&AuditOutcome::Denied).len(), 1);
}

#[tokio::test]
async fn e2e_confirmation_flow_reports_out_of_band() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(vec![call("c1", "shell", json!({"cmd": "ls"}))]),
        text_response("I asked for approval."),
    ]));
    let stack = build(provider, &AppConfig::default());

    let output = stack
        .agent
        .run(RunRequest::new("sys", "list files", ctx(AccessLevel::User)))
        .await
        .unwrap();

    assert_eq!(output.text, "I asked for approval.");
    let results = tool_messages(&output.messages);
    assert!(results[0].starts_with("Approval required: 'shell'"));
    assert_eq!(stack.audit.entries_by_outcome(&AuditOutcome::Pending).len(), 1);

    let pending = stack.gate.pending("s1");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].tool_name, "shell");
    assert!(stack.gate.resolve(pending[0].id, "bob", true, None));
    assert!(!stack.gate.resolve(pending[0].id, "bob", true, None));

    let mut delivered = false;
    for _ in 0..200 {
        if stack.notifier.messages().iter().any(|m| m.contains("ran ls")) {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(delivered, "notifications: {:?}", stack.notifier.messages());
    assert!(stack.notifier.messages()[0].contains("Approval needed"));
    assert!(stack.gate.pending("s1").is_empty());
}

#[tokio::test]
async fn e2e_admin_skips_confirmation() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(vec![call("c1", "shell", json!({"cmd": "pwd"}))]),
        text_response("done"),
    ]));
    let stack = build(provider, &AppConfig::default());

    let output = stack
        .agent
        .run(RunRequest::new("sys", "where am i", ctx(AccessLevel::Admin)))
        .await
        .unwrap();

    assert_eq!(tool_messages(&output.messages), ["ran pwd"]);
    assert!(stack.notifier.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn e2e_stop_through_run_registry() {
    let mut provider = ScriptedProvider::new(vec![text_response("too late")]);
    provider.delay = Some(Duration::from_secs(30));
    let provider = Arc::new(provider);
    let stack = build(provider, &AppConfig::default());
    let agent = Arc::new(stack.agent);

    let runs = RunRegistry::new();
    let key = RunKey::new("ws-1", "s1");
    let mut handle = runs.begin(key.clone()).unwrap();
    let request = handle.bind(RunRequest::new("sys", "slow question", ctx(AccessLevel::User)));

    let task = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move {
            let _handle = handle;
            agent.run(request).await
        })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(runs.stop(&key));

    let output = task.await.unwrap().unwrap();
    assert!(output.stopped);
    assert_eq!(output.text, STOPPED_TEXT);
    assert!(!runs.is_active(&key));
}

#[tokio::test]
async fn e2e_follow_up_is_injected_next_turn() {
    let runs = RunRegistry::new();
    let key = RunKey::new("ws-1", "s1");

    let mut provider = ScriptedProvider::new(vec![
        tool_response(vec![call("c1", "echo", json!({"text": "step one"}))]),
        text_response("Done, and noted."),
    ]);
    provider.interrupt = Some((runs.clone(), key.clone(), "also check the logs".into()));
    let provider = Arc::new(provider);
    let stack = build(provider.clone(), &AppConfig::default());

    let mut handle = runs.begin(key.clone()).unwrap();
    let request = handle.bind(RunRequest::new("sys", "do the thing", ctx(AccessLevel::User)));
    let output = stack.agent.run(request).await.unwrap();
    drop(handle);

    assert_eq!(output.text, "Done, and noted.");
    let expected = format!("{FOLLOW_UP_PREFIX}also check the logs");
    assert!(!provider.request(0).messages.iter().any(|m| m.content == expected));
    assert!(provider.request(1).messages.iter().any(|m| m.content == expected));
    assert_eq!(runs.active_count(), 0);
}

#[tokio::test]
async fn e2e_budget_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[run]\nmax_turns = 2\nmax_continuations = 0\n").unwrap();
    let config = AppConfig::load_from(&path).unwrap();
    assert_eq!(config.run.max_turns, 2);

    let provider = Arc::new(ScriptedProvider::repeating(tool_response(vec![call(
        "c1",
        "echo",
        json!({"text": "again"}),
    )])));
    let stack = build(provider.clone(), &config);

    let output = stack
        .agent
        .run(RunRequest::new("sys", "loop forever", ctx(AccessLevel::User)))
        .await
        .unwrap();

    // Two tool-enabled turns, then one forced summary without tools.
    assert_eq!(provider.calls(), 3);
    assert_eq!(output.turns, 3);
    assert!(!provider.request(1).tools.is_empty());
    assert!(provider.request(2).tools.is_empty());
}
