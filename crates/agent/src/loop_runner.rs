//! The agent reasoning loop implementation.
//!
//! One call to [`AgentLoop::run`] drives a conversation from the user's
//! message to a final answer:
//!
//! 1. Call the model with the conversation and the tool definitions
//! 2. If it answers in text, that is the result
//! 3. Otherwise dispatch the requested tools, append the results, go to 1
//!
//! Turns are budgeted. When a cycle of `max_turns` runs out the loop may grant
//! a continuation; when those run out too it asks for a final answer without
//! tools. Overflowing the model's context triggers compaction and a retry.

use std::sync::Arc;

use chrono::Utc;
use helmsman_config::{AppConfig, RunConfig};
use helmsman_core::error::{Error, ProviderError};
use helmsman_core::event::{DomainEvent, EventBus};
use helmsman_core::message::{Message, MessageToolCall};
use helmsman_core::provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
use helmsman_core::tool::{ToolCall, ToolContext};
use helmsman_tools::Dispatcher;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::compaction::{CompactionPolicy, OverflowClassifier, PatternClassifier, compact, truncate_tool_outputs};
use crate::inbox::{InterruptInbox, format_follow_up};
use crate::stream_event::AgentStreamEvent;

/// Answer returned when a run is stopped from outside.
pub const STOPPED_TEXT: &str = "Stopped.";

const SUMMARY_INSTRUCTION: &str = "You have used your entire turn budget. Do not call any more tools. \
     Use what you have gathered so far to give the best final answer you can.";

/// Receives streamed events as they happen.
pub type StreamCallback = Arc<dyn Fn(AgentStreamEvent) + Send + Sync>;

/// Receives the usage of every successful model call along with the model name.
pub type UsageRecorder = Arc<dyn Fn(&Usage, &str) + Send + Sync>;

/// Token usage accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub model_calls: u32,
}

impl RunUsage {
    fn record(&mut self, usage: Option<&Usage>) {
        self.model_calls += 1;
        if let Some(usage) = usage {
            self.prompt_tokens += u64::from(usage.prompt_tokens);
            self.completion_tokens += u64::from(usage.completion_tokens);
            self.total_tokens += u64::from(usage.total_tokens);
        }
    }
}

/// Everything one run needs besides the loop's own configuration.
#[derive(Debug)]
pub struct RunRequest {
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub user_message: String,
    /// Who is asking; passed to every tool call of this run
    pub context: ToolContext,
    pub cancel: CancellationToken,
    pub interrupts: Option<InterruptInbox>,
}

impl RunRequest {
    pub fn new(system_prompt: impl Into<String>, user_message: impl Into<String>, context: ToolContext) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            history: Vec::new(),
            user_message: user_message.into(),
            context,
            cancel: CancellationToken::new(),
            interrupts: None,
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Let follow-up messages reach this run while it works.
    pub fn with_interrupts(mut self, inbox: InterruptInbox) -> Self {
        self.interrupts = Some(inbox);
        self
    }
}

/// Result of a run that did not fail.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub text: String,
    pub usage: RunUsage,
    /// Model turns taken, excluding overflow retries
    pub turns: u32,
    /// The run was cancelled; `text` is [`STOPPED_TEXT`]
    pub stopped: bool,
    /// Final conversation, including the system prompt
    pub messages: Vec<Message>,
}

/// Mutable state of a single run.
struct RunState {
    run_id: String,
    messages: Vec<Message>,
    usage: RunUsage,
    turns: u32,
    tool_calls_made: usize,
}

/// The core agent loop that orchestrates LLM calls and tool execution.
///
/// Holds no per-run state, so one loop can serve many concurrent runs.
pub struct AgentLoop {
    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// Executes the tools the model asks for
    dispatcher: Arc<Dispatcher>,

    /// The model to use
    model: String,

    /// Temperature setting
    temperature: f32,

    /// Default max tokens per response
    max_tokens: Option<u32>,

    /// Turn, continuation and compaction budgets
    config: RunConfig,

    classifier: Arc<dyn OverflowClassifier>,
    compaction: CompactionPolicy,

    /// Event bus for domain events
    event_bus: Option<Arc<EventBus>>,

    stream_callback: Option<StreamCallback>,
    usage_recorder: Option<UsageRecorder>,
}

impl AgentLoop {
    /// Create a new agent loop with default budgets.
    pub fn new(provider: Arc<dyn Provider>, dispatcher: Arc<Dispatcher>, model: impl Into<String>) -> Self {
        Self {
            provider,
            dispatcher,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            config: RunConfig::default(),
            classifier: Arc::new(PatternClassifier::new()),
            compaction: CompactionPolicy::default(),
            event_bus: None,
            stream_callback: None,
            usage_recorder: None,
        }
    }

    /// Create a loop using the model and run sections of `config`.
    pub fn from_config(provider: Arc<dyn Provider>, dispatcher: Arc<Dispatcher>, config: &AppConfig) -> Self {
        let mut agent = Self::new(provider, dispatcher, &config.model.name)
            .with_temperature(config.model.temperature)
            .with_run_config(config.run.clone());
        agent.max_tokens = config.model.max_tokens;
        agent
    }

    pub fn with_run_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the default max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Replace the overflow detector.
    pub fn with_classifier(mut self, classifier: Arc<dyn OverflowClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_compaction_policy(mut self, policy: CompactionPolicy) -> Self {
        self.compaction = policy;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Stream text deltas and progress events. Switches model calls to
    /// [`Provider::stream`].
    pub fn with_stream_callback(mut self, callback: StreamCallback) -> Self {
        self.stream_callback = Some(callback);
        self
    }

    pub fn with_usage_recorder(mut self, recorder: UsageRecorder) -> Self {
        self.usage_recorder = Some(recorder);
        self
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.config
    }

    /// Process a user message and generate a response.
    ///
    /// Model failures (after overflow recovery) are returned as errors. Tool
    /// failures never are: the model sees them and carries on. Cancellation
    /// is not an error either; the output is marked `stopped`.
    pub async fn run(&self, request: RunRequest) -> Result<RunOutput, Error> {
        let RunRequest {
            system_prompt,
            history,
            user_message,
            context,
            cancel,
            mut interrupts,
        } = request;

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system_prompt));
        messages.extend(history);
        messages.push(Message::user(user_message));

        let mut state = RunState {
            run_id: Uuid::new_v4().to_string(),
            messages,
            usage: RunUsage::default(),
            turns: 0,
            tool_calls_made: 0,
        };

        info!(
            run_id = %state.run_id,
            session_id = %context.session_id,
            messages = state.messages.len(),
            "Starting run"
        );
        self.publish(DomainEvent::RunStarted {
            run_id: state.run_id.clone(),
            session_id: context.session_id.clone(),
            timestamp: Utc::now(),
        });

        let result = self.drive(&mut state, &context, &cancel, interrupts.as_mut()).await;

        let (status, outcome) = match result {
            Ok(text) => ("completed", Ok((text, false))),
            Err(Error::Cancelled) => {
                info!(run_id = %state.run_id, turns = state.turns, "Run stopped");
                ("stopped", Ok((STOPPED_TEXT.to_string(), true)))
            }
            Err(e) => {
                error!(run_id = %state.run_id, turns = state.turns, error = %e, "Run failed");
                ("failed", Err(e))
            }
        };

        self.publish(DomainEvent::RunFinished {
            run_id: state.run_id.clone(),
            session_id: context.session_id.clone(),
            turns: state.turns,
            total_tokens: state.usage.total_tokens,
            status: status.to_string(),
            timestamp: Utc::now(),
        });

        match outcome {
            Ok((text, stopped)) => {
                self.emit(AgentStreamEvent::Done {
                    run_id: state.run_id.clone(),
                    usage: state.usage,
                    turns: state.turns,
                    tool_calls_made: state.tool_calls_made,
                    stopped,
                });
                info!(
                    run_id = %state.run_id,
                    turns = state.turns,
                    tokens = state.usage.total_tokens,
                    stopped,
                    "Run finished"
                );
                Ok(RunOutput {
                    text,
                    usage: state.usage,
                    turns: state.turns,
                    stopped,
                    messages: state.messages,
                })
            }
            Err(e) => {
                self.emit(AgentStreamEvent::Error {
                    message: e.user_message().to_string(),
                });
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        state: &mut RunState,
        ctx: &ToolContext,
        cancel: &CancellationToken,
        mut inbox: Option<&mut InterruptInbox>,
    ) -> Result<String, Error> {
        let tools = self.dispatcher.definitions();
        if tools.is_empty() {
            debug!(run_id = %state.run_id, "No tools registered, single model call");
            state.turns = 1;
            let response = self.call_with_recovery(state, &[], cancel).await?;
            return Ok(Self::finish_with(state, response));
        }

        let max_turns = self.config.max_turns;
        let mut continuations = 0;

        loop {
            for turn in 1..=max_turns {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                state.turns += 1;

                if state.turns > 1 {
                    self.drain_interrupts(state, inbox.as_deref_mut());
                }
                let interval = self.config.reflection_interval;
                if turn > 1 && interval > 0 && turn % interval == 0 {
                    let used = turn - 1;
                    self.push_notice(
                        state,
                        format!(
                            "[Budget] {used}/{max_turns} turns used, {} remaining. \
                             Wrap up as soon as you have what you need.",
                            max_turns - used
                        ),
                    );
                }

                debug!(run_id = %state.run_id, turn, total_turns = state.turns, "Agent loop iteration");
                let response = self.call_with_recovery(state, &tools, cancel).await?;

                if response.message.tool_calls.is_empty() {
                    return Ok(Self::finish_with(state, response));
                }

                self.run_tools(state, ctx, cancel, response.message).await;
            }

            if continuations >= self.config.max_continuations {
                break;
            }
            continuations += 1;
            warn!(
                run_id = %state.run_id,
                continuation = continuations,
                max_continuations = self.config.max_continuations,
                "Turn budget reached, continuing"
            );
            self.push_notice(
                state,
                format!(
                    "[Turn budget reached after {max_turns} turns. Continuation {continuations}/{}, continuing]",
                    self.config.max_continuations
                ),
            );
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        warn!(run_id = %state.run_id, turns = state.turns, "Budget exhausted, forcing a final answer");
        self.drain_interrupts(state, inbox.as_deref_mut());
        self.push_notice(state, SUMMARY_INSTRUCTION.to_string());
        state.turns += 1;

        let response = self.call_with_recovery(state, &[], cancel).await?;
        if response.message.has_tool_calls() {
            debug!(run_id = %state.run_id, "Ignoring tool calls in forced summary");
        }
        Ok(Self::finish_with(state, response))
    }

    /// Record the final assistant message and return its text.
    fn finish_with(state: &mut RunState, response: ProviderResponse) -> String {
        let text = response.message.content.clone();
        state.messages.push(Message::assistant(text.clone()));
        text
    }

    async fn run_tools(&self, state: &mut RunState, ctx: &ToolContext, cancel: &CancellationToken, message: Message) {
        let calls: Vec<ToolCall> = message.tool_calls.iter().map(ToolCall::from).collect();
        debug!(run_id = %state.run_id, tool_count = calls.len(), "Executing tool calls");

        for call in &message.tool_calls {
            self.emit(AgentStreamEvent::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                input: parse_input(call),
            });
        }
        state.messages.push(message);
        state.tool_calls_made += calls.len();

        let results = self.dispatcher.execute(ctx, &calls, cancel).await;
        for result in results {
            self.emit(AgentStreamEvent::ToolResult {
                id: result.call_id.clone(),
                name: result.name.clone(),
                output: result.content.clone(),
                success: !result.is_error(),
            });
            state.messages.push(Message::tool_result(result.call_id, result.content));
        }
    }

    fn drain_interrupts(&self, state: &mut RunState, inbox: Option<&mut InterruptInbox>) {
        let Some(inbox) = inbox else {
            return;
        };
        let drained = inbox.drain_all();
        if drained.is_empty() {
            return;
        }
        info!(run_id = %state.run_id, count = drained.len(), "Injecting follow-up messages");
        state
            .messages
            .extend(drained.iter().map(|text| Message::user(format_follow_up(text))));
    }

    fn push_notice(&self, state: &mut RunState, text: String) {
        self.emit(AgentStreamEvent::Notice { content: text.clone() });
        state.messages.push(Message::user(text));
    }

    /// Call the model, compacting and retrying while it reports an overflow.
    async fn call_with_recovery(
        &self,
        state: &mut RunState,
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, Error> {
        let mut attempts = 0;
        loop {
            match self.call_model(state, tools, cancel).await {
                Err(Error::Provider(e)) if self.classifier.is_overflow(&e) => {
                    attempts += 1;
                    warn!(run_id = %state.run_id, attempt = attempts, error = %e, "Context overflow");
                    if attempts >= self.config.max_compaction_attempts {
                        return Err(Error::ContextOverflow { attempts });
                    }
                    self.compact_state(state, attempts);
                }
                other => return other,
            }
        }
    }

    fn compact_state(&self, state: &mut RunState, attempt: u32) {
        let before = state.messages.len();
        let window = self.compaction.window_for(attempt);
        let mut compacted = compact(&state.messages, window);
        let truncated = truncate_tool_outputs(&mut compacted, self.compaction.tool_output_limit);
        state.messages = compacted;

        info!(
            run_id = %state.run_id,
            attempt,
            window,
            before,
            after = state.messages.len(),
            truncated,
            "Compacted conversation"
        );
        self.publish(DomainEvent::ContextCompacted {
            run_id: state.run_id.clone(),
            attempt,
            messages_before: before,
            messages_after: state.messages.len(),
            timestamp: Utc::now(),
        });
    }

    /// One model call under the turn timeout, racing the cancel token.
    async fn call_model(
        &self,
        state: &mut RunState,
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, Error> {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: state.messages.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: tools.to_vec(),
            stream: self.stream_callback.is_some(),
        };

        let call = async {
            match &self.stream_callback {
                Some(callback) => self.collect_stream(request, callback).await,
                None => self.provider.complete(request).await,
            }
        };

        let limit = self.config.turn_timeout();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            res = tokio::time::timeout(limit, call) => match res {
                Ok(res) => res?,
                Err(_) => {
                    return Err(ProviderError::Timeout(format!(
                        "model call exceeded {}s",
                        limit.as_secs()
                    ))
                    .into());
                }
            },
        };

        state.usage.record(response.usage.as_ref());
        if let Some(usage) = &response.usage
            && let Some(recorder) = &self.usage_recorder
        {
            recorder(usage, &response.model);
        }
        self.publish(DomainEvent::ResponseGenerated {
            run_id: state.run_id.clone(),
            model: response.model.clone(),
            tokens_used: response.usage.map(|u| u.total_tokens).unwrap_or(0),
            tool_calls: response.message.tool_calls.len(),
            timestamp: Utc::now(),
        });
        Ok(response)
    }

    /// Consume a provider stream, forwarding text deltas as they arrive.
    async fn collect_stream(
        &self,
        request: ProviderRequest,
        callback: &StreamCallback,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut rx = self.provider.stream(request).await?;
        let mut content = String::new();
        let mut tool_calls: Vec<MessageToolCall> = Vec::new();
        let mut usage = None;
        let mut finish_reason = None;

        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(delta) = chunk.content
                && !delta.is_empty()
            {
                callback(AgentStreamEvent::Chunk { content: delta.clone() });
                content.push_str(&delta);
            }
            tool_calls.extend(chunk.tool_calls);
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.finish_reason.is_some() {
                finish_reason = chunk.finish_reason;
            }
            if chunk.done {
                break;
            }
        }

        let message = if tool_calls.is_empty() {
            Message::assistant(content)
        } else {
            Message::assistant_with_tool_calls(content, tool_calls)
        };
        Ok(ProviderResponse {
            message,
            usage,
            model: self.model.clone(),
            finish_reason,
            metadata: serde_json::Map::new(),
        })
    }

    fn emit(&self, event: AgentStreamEvent) {
        if let Some(callback) = &self.stream_callback {
            callback(event);
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

/// Tool call arguments as JSON for display; raw text if they do not parse.
fn parse_input(call: &MessageToolCall) -> serde_json::Value {
    serde_json::from_str(&call.arguments).unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone()))
}
