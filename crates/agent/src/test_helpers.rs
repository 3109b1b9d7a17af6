//! Shared test helpers for agent loop tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use helmsman_core::error::ProviderError;
use helmsman_core::message::{Message, MessageToolCall};
use helmsman_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};

/// A mock provider that plays back a script of responses.
///
/// Each call to `complete` returns the next scripted result and records the
/// request it was given. Once the script runs out the `repeat` response is
/// returned forever; without one, extra calls panic.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    repeat: Option<ProviderResponse>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self::from_results(responses.into_iter().map(Ok).collect())
    }

    pub fn from_results(results: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            repeat: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a provider that returns a single text response (no tool calls).
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    /// Create a provider that answers every call with `response`.
    pub fn repeating(response: ProviderResponse) -> Self {
        let mut provider = Self::new(Vec::new());
        provider.repeat = Some(response);
        provider
    }

    /// Sleep before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match (next, &self.repeat) {
            (Some(result), _) => result,
            (None, Some(response)) => Ok(response.clone()),
            (None, None) => panic!("ScriptedProvider: no more responses (call #{call})"),
        }
    }
}

fn mock_usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: mock_usage(),
        model: "mock-model".into(),
        finish_reason: Some("stop".into()),
        metadata: serde_json::Map::new(),
    }
}

/// Create a response with tool calls and optional accompanying text.
pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>, text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_with_tool_calls(text, tool_calls),
        usage: mock_usage(),
        model: "mock-model".into(),
        finish_reason: Some("tool_calls".into()),
        metadata: serde_json::Map::new(),
    }
}

/// Helper to create a tool call.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}
