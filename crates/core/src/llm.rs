//! LLM client trait: the abstraction over chat-completion backends.
//!
//! The runtime never speaks a vendor wire protocol itself. Whatever sits
//! behind [`LlmClient`] only has to answer a [`ChatRequest`] either as one
//! [`ChatResponse`] or as an ordered channel of [`StreamChunk`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::LlmError;
use crate::message::{Message, ToolCall};

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Extended reasoning toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Thinking {
    Enabled,
    Disabled,
}

/// A chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model to use (e.g., "kimi-k2.5", "gpt-4o-mini")
    pub model: String,

    /// The conversation messages, system prompt first
    pub messages: Vec<Message>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Sampling temperature; `None` keeps the model default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum output tokens; `None` keeps the model default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Thinking>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            temperature: None,
            max_tokens: None,
            thinking: None,
        }
    }
}

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
}

impl FinishReason {
    pub fn is_stop(self) -> bool {
        self == FinishReason::Stop
    }

    pub fn is_tool_calls(self) -> bool {
        self == FinishReason::ToolCalls
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete (non-streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub finish_reason: FinishReason,

    #[serde(default)]
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded
    #[serde(default)]
    pub model: String,
}

impl ChatResponse {
    /// A plain text response that finished with `stop`.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            finish_reason: FinishReason::Stop,
            content: content.into(),
            reasoning: None,
            tool_calls: Vec::new(),
            usage: None,
            model: String::new(),
        }
    }

    /// A response that asks for tool calls.
    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            finish_reason: FinishReason::ToolCalls,
            tool_calls,
            ..Self::text(content)
        }
    }

    /// The assistant message to persist for this response.
    pub fn to_message(&self) -> Message {
        Message::assistant_with_tools(
            self.content.clone(),
            self.reasoning.clone().unwrap_or_default(),
            self.tool_calls.clone(),
        )
    }
}

/// One fragment of a tool call inside a streamed response.
///
/// `id` and `name` are only guaranteed on the first fragment for a given
/// `index`; later fragments usually carry just more argument text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub arguments: String,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Partial reasoning delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    /// Partial tool call deltas
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,

    /// Set on the chunk that ends the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn tool_call(delta: ToolCallDelta) -> Self {
        Self {
            tool_calls: vec![delta],
            ..Self::default()
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Self::default()
        }
    }
}

/// The receiving side of a streamed response.
pub type ChunkReceiver = mpsc::Receiver<Result<StreamChunk, LlmError>>;

/// The LLM client contract consumed by the orchestrator.
///
/// Implementations own transport, retries and timeouts; the runtime calls
/// `chat_completion()` or `chat_completion_stream()` without knowing what is
/// behind them.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openai", "moonshot").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `chat_completion()` and replays the
    /// response as reasoning, content, one chunk per tool call, and a final
    /// chunk carrying the finish reason.
    async fn chat_completion_stream(&self, request: ChatRequest) -> Result<ChunkReceiver, LlmError> {
        let response = self.chat_completion(request).await?;
        let chunks = replay_as_chunks(response);

        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            // Capacity matches the chunk count, so this never fails for lack of room.
            let _ = tx.try_send(Ok(chunk));
        }
        Ok(rx)
    }
}

/// Split a complete response into the chunks a streaming backend would send.
pub fn replay_as_chunks(response: ChatResponse) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();
    if let Some(reasoning) = response.reasoning.filter(|r| !r.is_empty()) {
        chunks.push(StreamChunk::reasoning(reasoning));
    }
    if !response.content.is_empty() {
        chunks.push(StreamChunk::content(response.content));
    }
    for (index, tc) in response.tool_calls.into_iter().enumerate() {
        chunks.push(StreamChunk::tool_call(ToolCallDelta {
            index: index as u32,
            id: Some(tc.id),
            name: Some(tc.name),
            arguments: tc.arguments,
        }));
    }
    chunks.push(StreamChunk {
        finish_reason: Some(response.finish_reason),
        usage: response.usage,
        ..StreamChunk::default()
    });
    chunks
}
