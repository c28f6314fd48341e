//! The round loop.
//!
//! One turn = append the user message, then up to `max_rounds` rounds of:
//!
//! 1. **Maintain** the session's context budget (compress, maybe summarize)
//! 2. **Build** the request: system prompt + context log + tool schemas
//! 3. **Call** the model (blocking, or streamed through the multiplexer)
//! 4. **Append** the assistant message; **dispatch** its tool calls and
//!    append each result
//!
//! The turn ends when the model stops, when the round limit is hit, or on
//! the first model-call failure. Failures come back as diagnostic text, not
//! as errors, so the caller always gets something to show and the session
//! stays resumable.

use async_trait::async_trait;
use roundclaw_config::AppConfig;
use roundclaw_context::{ContextStore, Summarizer};
use roundclaw_core::{
    ChatRequest, LlmClient, LlmError, Message, SessionKey, StoreError, Thinking, ToolCall, ToolRegistry,
};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::multiplexer::{
    CHANNEL_CAPACITY, ContentFragment, StreamOutcome, ToolCallFragment, ToolCallHandler, multiplex,
};
use crate::outbox::{Outbox, send_or_cancel};
use crate::stream_event::{StreamContent, StreamToolCall};
use crate::summarizer::LlmSummarizer;

pub const DEFAULT_MAX_ROUNDS: usize = 30;

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model finished on its own.
    Stopped,
    /// The round limit was hit first; the text is marked as incomplete.
    MaxRoundsReached,
    /// A model call or request build failed; the text is the diagnostic.
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnResult {
    pub text: String,
    pub outcome: TurnOutcome,
    /// Model calls attempted in this turn
    pub rounds: usize,
}

impl TurnResult {
    fn stopped(text: String, rounds: usize) -> Self {
        Self {
            text,
            outcome: TurnOutcome::Stopped,
            rounds,
        }
    }

    fn errored(text: String, rounds: usize) -> Self {
        Self {
            text,
            outcome: TurnOutcome::Errored,
            rounds,
        }
    }

    fn max_rounds(last: Option<String>, rounds: usize) -> Self {
        let text = match last {
            Some(content) => format!("(max rounds reached, last response: {content})"),
            None => "(max rounds reached with no response)".to_string(),
        };
        Self {
            text,
            outcome: TurnOutcome::MaxRoundsReached,
            rounds,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome == TurnOutcome::Stopped
    }
}

fn llm_failure(e: &LlmError) -> String {
    format!("(failed to call llm: {e})")
}

fn build_failure(e: &StoreError) -> String {
    format!("(failed to build llm message request: {e})")
}

/// A running streamed turn.
///
/// Both channels close when the turn ends. `handle` yields the same result
/// a blocking turn would have returned.
pub struct AskStream {
    pub content: mpsc::Receiver<StreamContent>,
    pub tool_calls: mpsc::Receiver<StreamToolCall>,
    pub handle: JoinHandle<TurnResult>,
}

/// Drives conversation turns for any number of sessions.
pub struct Orchestrator {
    client: Arc<dyn LlmClient>,
    store: Arc<ContextStore>,
    tools: Arc<ToolRegistry>,
    summarizer: Arc<dyn Summarizer>,
    system_prompt: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    thinking: Option<Thinking>,
    max_rounds: usize,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn LlmClient>,
        store: Arc<ContextStore>,
        tools: Arc<ToolRegistry>,
        model: impl Into<String>,
    ) -> Self {
        let model = model.into();
        let summarizer: Arc<dyn Summarizer> = Arc::new(LlmSummarizer::new(Arc::clone(&client), model.clone()));
        Self {
            client,
            store,
            tools,
            summarizer,
            system_prompt: String::new(),
            model,
            temperature: None,
            max_tokens: None,
            thinking: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Build an orchestrator with model, sampling and round settings from `config`.
    pub fn from_config(
        config: &AppConfig,
        client: Arc<dyn LlmClient>,
        store: Arc<ContextStore>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let summarizer = Arc::new(
            LlmSummarizer::new(Arc::clone(&client), config.model.clone()).with_max_tokens(config.max_tokens),
        );
        Self::new(client, store, tools, config.model.clone())
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
            .with_thinking(config.thinking())
            .with_max_rounds(config.agent.max_rounds)
            .with_summarizer(summarizer)
    }

    /// Set the system prompt prepended to every request.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self.store.set_system_prompt(&self.system_prompt);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_thinking(mut self, thinking: Option<Thinking>) -> Self {
        self.thinking = thinking;
        self
    }

    /// Set the round limit. Values below 1 are raised to 1.
    pub fn with_max_rounds(mut self, max: usize) -> Self {
        self.max_rounds = max.max(1);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Estimated size of the session's next request, for status displays.
    pub async fn current_tokens(&self, key: &SessionKey) -> usize {
        self.store.set_tool_schemas(self.tools.definitions()).await;
        match self.store.estimate_tokens(key).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(session = %key, error = %e, "Token estimate failed");
                0
            }
        }
    }

    /// Run one blocking turn and return the final text.
    pub async fn ask(&self, key: &SessionKey, input: &str) -> String {
        self.ask_detailed(key, input, &CancellationToken::new()).await.text
    }

    /// Run one blocking turn.
    pub async fn ask_detailed(&self, key: &SessionKey, input: &str, cancel: &CancellationToken) -> TurnResult {
        info!(session = %key, "Turn started");
        self.record(key, Message::user(input)).await;

        let mut last_content = None;
        for round in 1..=self.max_rounds {
            debug!(session = %key, round, "Round started");

            let request = match self.build_request(key).await {
                Ok(request) => request,
                Err(e) => return TurnResult::errored(build_failure(&e), round),
            };

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(LlmError::Cancelled),
                response = self.client.chat_completion(request) => response,
            };
            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    warn!(session = %key, round, error = %e, "Model call failed");
                    return TurnResult::errored(llm_failure(&e), round);
                }
            };

            self.record(key, response.to_message()).await;
            // Results are appended even on `stop` so the log never holds
            // an unanswered tool call.
            for call in &response.tool_calls {
                let result = self.tools.dispatch(call).await;
                self.record(key, Message::tool_result(&call.id, result)).await;
            }

            // The blocking loop trusts the finish reason: a `stop` with tool
            // calls ends the turn here. The streaming loop decides on
            // dispatched calls instead, and that difference is intended.
            if response.finish_reason.is_stop() {
                info!(session = %key, rounds = round, "Turn finished");
                return TurnResult::stopped(response.content, round);
            }
            last_content = Some(response.content);
        }

        warn!(session = %key, max_rounds = self.max_rounds, "Round limit reached");
        TurnResult::max_rounds(last_content, self.max_rounds)
    }

    /// Start a streamed turn on a new task.
    pub fn ask_stream(self: &Arc<Self>, key: SessionKey, input: impl Into<String>, cancel: CancellationToken) -> AskStream {
        let (content_tx, content_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (tool_tx, tool_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let this = Arc::clone(self);
        let input = input.into();

        let handle = tokio::spawn(async move { this.run_stream(&key, input, cancel, content_tx, tool_tx).await });

        AskStream {
            content: content_rx,
            tool_calls: tool_rx,
            handle,
        }
    }

    async fn run_stream(
        &self,
        key: &SessionKey,
        input: String,
        cancel: CancellationToken,
        content_tx: mpsc::Sender<StreamContent>,
        tool_tx: mpsc::Sender<StreamToolCall>,
    ) -> TurnResult {
        info!(session = %key, "Streaming turn started");
        self.record(key, Message::user(input)).await;

        let mut last_content = None;
        for round in 1..=self.max_rounds {
            debug!(session = %key, round, "Round started");

            let request = match self.build_request(key).await {
                Ok(request) => request,
                Err(e) => return finish_with(&content_tx, &cancel, TurnResult::errored(build_failure(&e), round)).await,
            };

            let chunks = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(LlmError::Cancelled),
                chunks = self.client.chat_completion_stream(request) => chunks,
            };
            let chunks = match chunks {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!(session = %key, round, error = %e, "Model stream failed to start");
                    return finish_with(&content_tx, &cancel, TurnResult::errored(llm_failure(&e), round)).await;
                }
            };

            let collector = Arc::new(DispatchCollector::new(Arc::clone(&self.tools)));
            let pack = multiplex(chunks, cancel.clone(), collector.clone());
            let (outcome, (content, reasoning), ()) = tokio::join!(
                pack.task,
                forward_content(round, pack.content, &content_tx, &cancel),
                forward_tool_calls(round, pack.tool_calls, &tool_tx, &cancel),
            );
            let outcome = outcome.unwrap_or_else(|e| StreamOutcome::Failed(LlmError::StreamInterrupted(e.to_string())));
            let dispatched = collector.take().await;

            match outcome {
                StreamOutcome::Completed(finish) => {
                    debug!(session = %key, round, ?finish, tool_calls = dispatched.len(), "Round stream completed");
                }
                StreamOutcome::Failed(e) => {
                    warn!(session = %key, round, error = %e, "Model stream failed");
                    return finish_with(&content_tx, &cancel, TurnResult::errored(llm_failure(&e), round)).await;
                }
                StreamOutcome::Cancelled => {
                    // Tools that already ran keep their results in the log.
                    if !dispatched.is_empty() {
                        self.record_round(key, content, reasoning, dispatched).await;
                    }
                    info!(session = %key, round, "Streaming turn cancelled");
                    return finish_with(&content_tx, &cancel, TurnResult::errored(llm_failure(&LlmError::Cancelled), round))
                        .await;
                }
            }

            // Unlike the blocking loop, a streamed round ends the turn only
            // when nothing was dispatched, whatever the finish reason says.
            // Streamed results are only visible to the model on a next round.
            if dispatched.is_empty() {
                self.record(key, Message::assistant_with_tools(content.clone(), reasoning, Vec::new()))
                    .await;
                info!(session = %key, rounds = round, "Streaming turn finished");
                return TurnResult::stopped(content, round);
            }

            self.record_round(key, content.clone(), reasoning, dispatched).await;
            last_content = Some(content);
        }

        warn!(session = %key, max_rounds = self.max_rounds, "Round limit reached");
        finish_with(&content_tx, &cancel, TurnResult::max_rounds(last_content, self.max_rounds)).await
    }

    /// Maintain the budget, then assemble the next request.
    ///
    /// Maintenance problems are logged and skipped; only failing to read
    /// the context itself aborts the turn.
    async fn build_request(&self, key: &SessionKey) -> Result<ChatRequest, StoreError> {
        let definitions = self.tools.definitions();
        self.store.set_tool_schemas(definitions.clone()).await;

        if let Err(e) = self.store.maintain(key, self.summarizer.as_ref()).await {
            warn!(session = %key, error = %e, "Context maintenance failed");
        }

        let context = self.store.get_message_context(key).await?;
        let mut messages = Vec::with_capacity(context.len() + 1);
        if !self.system_prompt.is_empty() {
            messages.push(Message::system(self.system_prompt.clone()));
        }
        messages.extend(context);

        let mut request = ChatRequest::new(self.model.clone(), messages);
        request.tools = definitions;
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request.thinking = self.thinking;
        Ok(request)
    }

    /// Append the round's assistant message followed by its tool results.
    async fn record_round(
        &self,
        key: &SessionKey,
        content: String,
        reasoning: String,
        dispatched: Vec<(ToolCall, String)>,
    ) {
        let calls = dispatched.iter().map(|(call, _)| call.clone()).collect();
        self.record(key, Message::assistant_with_tools(content, reasoning, calls)).await;
        for (call, result) in dispatched {
            self.record(key, Message::tool_result(call.id, result)).await;
        }
    }

    /// Persist a message. Failures are logged and the turn goes on: the
    /// context log keeps the message in memory even when the disk write fails.
    async fn record(&self, key: &SessionKey, message: Message) {
        if let Err(e) = self.store.append(key, message).await {
            error!(session = %key, error = %e, "Failed to persist message");
        }
    }
}

/// Runs each completed tool call and keeps the results in call order.
struct DispatchCollector {
    tools: Arc<ToolRegistry>,
    dispatched: Mutex<Vec<(ToolCall, String)>>,
}

impl DispatchCollector {
    fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            dispatched: Mutex::new(Vec::new()),
        }
    }

    async fn take(&self) -> Vec<(ToolCall, String)> {
        std::mem::take(&mut *self.dispatched.lock().await)
    }
}

#[async_trait]
impl ToolCallHandler for DispatchCollector {
    async fn on_tool_call(&self, call: ToolCall) {
        let result = self.tools.dispatch(&call).await;
        self.dispatched.lock().await.push((call, result));
    }
}

/// Forward content fragments tagged with `round`; returns the accumulated
/// content and reasoning. The multiplexer is drained even when the caller
/// stops reading or goes away.
async fn forward_content(
    round: usize,
    mut rx: mpsc::Receiver<ContentFragment>,
    tx: &mpsc::Sender<StreamContent>,
    cancel: &CancellationToken,
) -> (String, String) {
    let mut outbox = Outbox::new(tx, cancel);
    let mut content = String::new();
    let mut reasoning = String::new();
    while let Some(fragment) = outbox.recv_from(&mut rx).await {
        content.push_str(&fragment.content);
        reasoning.push_str(&fragment.reasoning);
        outbox.push(StreamContent {
            round,
            content: fragment.content,
            reasoning: fragment.reasoning,
        });
    }
    outbox.flush().await;
    (content, reasoning)
}

/// Announce each tool call as it appears, then report every call with its
/// complete arguments once the round's stream is done.
async fn forward_tool_calls(
    round: usize,
    mut rx: mpsc::Receiver<ToolCallFragment>,
    tx: &mpsc::Sender<StreamToolCall>,
    cancel: &CancellationToken,
) {
    let mut outbox = Outbox::new(tx, cancel);
    let mut calls: Vec<(u32, String, String)> = Vec::new();
    while let Some(fragment) = outbox.recv_from(&mut rx).await {
        if fragment.first {
            outbox.push(StreamToolCall {
                round,
                name: fragment.name.clone(),
                arguments: String::new(),
            });
            calls.push((fragment.index, fragment.name, fragment.arguments));
        } else if let Some((_, name, arguments)) = calls.iter_mut().find(|(i, ..)| *i == fragment.index) {
            if name.is_empty() {
                *name = fragment.name;
            }
            arguments.push_str(&fragment.arguments);
        }
    }

    for (_, name, arguments) in calls {
        outbox.push(StreamToolCall { round, name, arguments });
    }
    outbox.flush().await;
}

/// Deliver a terminal diagnostic as the last content fragment.
async fn finish_with(tx: &mpsc::Sender<StreamContent>, cancel: &CancellationToken, result: TurnResult) -> TurnResult {
    send_or_cancel(tx, cancel, StreamContent::text(result.rounds, result.text.clone())).await;
    result
}
