//! Turn-level streaming events.
//!
//! `ask_stream` hands out two channels. Content events carry the model's
//! visible text and reasoning; tool-call events report tool-call progress.
//! Both are tagged with the round that produced them so a consumer can tell
//! where one model call ends and the next begins.

use serde::{Deserialize, Serialize};

/// A content or reasoning fragment.
///
/// Diagnostics that end a turn early (a failed model call, the round limit)
/// arrive as a final `StreamContent` too, tagged with the round they ended.
/// Rounds are numbered from 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamContent {
    pub round: usize,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning: String,
}

impl StreamContent {
    pub fn text(round: usize, content: impl Into<String>) -> Self {
        Self {
            round,
            content: content.into(),
            reasoning: String::new(),
        }
    }
}

/// Tool-call progress.
///
/// Each call is announced with empty `arguments` while the model is still
/// producing them; once the round's stream is done every call is reported
/// again, in order, with its complete arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamToolCall {
    pub round: usize,
    pub name: String,
    pub arguments: String,
}

impl StreamToolCall {
    /// Whether this is the announcement sent while arguments are collected.
    pub fn is_announcement(&self) -> bool {
        self.arguments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_serialization_skips_empty_fields() {
        let event = StreamContent::text(2, "Hello");
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"round":2,"content":"Hello"}"#);
    }

    #[test]
    fn content_deserialization() {
        let json = r#"{"round":1,"reasoning":"thinking"}"#;
        let event: StreamContent = serde_json::from_str(json).unwrap();
        assert_eq!(event.round, 1);
        assert!(event.content.is_empty());
        assert_eq!(event.reasoning, "thinking");
    }

    #[test]
    fn tool_call_announcement() {
        let announce = StreamToolCall {
            round: 1,
            name: "calc".into(),
            arguments: String::new(),
        };
        assert!(announce.is_announcement());

        let done = StreamToolCall {
            arguments: r#"{"expr":"2+2"}"#.into(),
            ..announce
        };
        assert!(!done.is_announcement());
    }
}
