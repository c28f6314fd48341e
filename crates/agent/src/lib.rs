//! The roundclaw turn engine.
//!
//! A turn follows a bounded **ask, act, observe** cycle:
//!
//! 1. **Receive** a user message for a session
//! 2. **Build context** (system prompt + context log, kept under budget)
//! 3. **Send to the LLM**, blocking or streamed
//! 4. **If tool calls**: dispatch them, append the results, loop back to 3
//! 5. **Otherwise**: the assistant text is the answer
//!
//! The loop never runs more than `max_rounds` model calls per turn.

pub mod multiplexer;
pub mod orchestrator;
mod outbox;
pub mod stream_event;
pub mod summarizer;

pub use multiplexer::{ContentFragment, StreamOutcome, StreamPack, ToolCallFragment, ToolCallHandler, multiplex};
pub use orchestrator::{AskStream, DEFAULT_MAX_ROUNDS, Orchestrator, TurnOutcome, TurnResult};
pub use stream_event::{StreamContent, StreamToolCall};
pub use summarizer::LlmSummarizer;
