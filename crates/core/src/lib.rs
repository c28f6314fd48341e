//! # roundclaw core
//!
//! Domain types, traits, and error definitions for the roundclaw agent
//! runtime. Everything here is free of I/O policy: the persistence layer,
//! the orchestrator and the CLI all depend inward on this crate.
//!
//! ## Design Philosophy
//!
//! The LLM client and tools are traits defined here; implementations live
//! elsewhere (or in the embedding application). This enables:
//! - Running the whole runtime against scripted mock clients in tests
//! - Swapping vendors without touching the orchestrator
//! - A clean dependency graph

pub mod error;
pub mod llm;
pub mod message;
pub mod prompt;
pub mod schema;
pub mod token;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, LlmError, Result, StoreError, ToolError};
pub use llm::{
    ChatRequest, ChatResponse, ChunkReceiver, FinishReason, LlmClient, StreamChunk, Thinking,
    ToolCallDelta, ToolDefinition, Usage,
};
pub use message::{Message, Role, SessionKey, ToolCall};
pub use prompt::SystemPrompt;
pub use schema::SchemaBuilder;
pub use tool::{FnTool, Tool, ToolRegistry};
