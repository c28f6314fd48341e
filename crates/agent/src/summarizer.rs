//! History summarizer backed by the configured LLM client.

use async_trait::async_trait;
use roundclaw_context::Summarizer;
use roundclaw_core::{ChatRequest, LlmClient, LlmError, Message};
use std::fmt::Write;
use std::sync::Arc;
use tracing::debug;

const SUMMARY_SYSTEM_PROMPT: &str = "\
You compress conversation history for an AI assistant.

Summarize the conversation below so the assistant can continue it without the original messages. \
Keep user goals and preferences, decisions made, facts learned, tool results that still matter \
(file names, paths, numbers, errors) and any unfinished work. Drop greetings, repetition and \
tool output that no longer matters.

Write plain prose or short bullet points in the language the user used. Do not address the user.";

/// Asks the model for a summary of a slice of messages.
pub struct LlmSummarizer {
    client: Arc<dyn LlmClient>,
    model: String,
    max_tokens: Option<u32>,
}

impl LlmSummarizer {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }
}

/// Render messages as a plain transcript for the summarizer prompt.
fn transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        match msg {
            Message::System { content } => {
                let _ = writeln!(out, "[system] {content}");
            }
            Message::User { content } => {
                let _ = writeln!(out, "[user] {content}");
            }
            Message::Assistant { content, tool_calls, .. } => {
                if let Some(text) = content.as_deref().filter(|t| !t.is_empty()) {
                    let _ = writeln!(out, "[assistant] {text}");
                }
                for tc in tool_calls {
                    let _ = writeln!(out, "[assistant called {}] {}", tc.name, tc.arguments);
                }
            }
            Message::Tool { tool_call_id, content } => {
                let _ = writeln!(out, "[tool result {tool_call_id}] {content}");
            }
        }
    }
    out
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String, LlmError> {
        let mut request = ChatRequest::new(
            self.model.clone(),
            vec![
                Message::system(SUMMARY_SYSTEM_PROMPT),
                Message::user(transcript(messages)),
            ],
        );
        request.max_tokens = self.max_tokens;

        debug!(messages = messages.len(), model = %self.model, "Requesting history summary");
        let response = self.client.chat_completion(request).await?;

        let summary = response.content.trim();
        if summary.is_empty() {
            return Err(LlmError::ApiError {
                status_code: 200,
                message: "summarizer returned an empty summary".into(),
            });
        }
        Ok(summary.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundclaw_core::{ChatResponse, ToolCall};
    use tokio::sync::Mutex;

    struct EchoClient {
        reply: String,
        seen: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl LlmClient for EchoClient {
        fn name(&self) -> &str {
            "echo"
        }

        async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.seen.lock().await.push(request);
            Ok(ChatResponse::text(self.reply.clone()))
        }
    }

    #[test]
    fn transcript_covers_every_role() {
        let text = transcript(&[
            Message::user("what's 2+2"),
            Message::assistant_with_tools("", "", vec![ToolCall::new("c1", "calc", r#"{"expr":"2+2"}"#)]),
            Message::tool_result("c1", "4"),
            Message::assistant("4"),
        ]);
        assert!(text.contains("[user] what's 2+2"));
        assert!(text.contains(r#"[assistant called calc] {"expr":"2+2"}"#));
        assert!(text.contains("[tool result c1] 4"));
        assert!(text.ends_with("[assistant] 4\n"));
    }

    #[tokio::test]
    async fn sends_dedicated_prompt_and_trims_reply() {
        let client = Arc::new(EchoClient {
            reply: "  user asked for math  \n".into(),
            seen: Mutex::new(Vec::new()),
        });
        let summarizer = LlmSummarizer::new(client.clone(), "summary-model").with_max_tokens(512);

        let summary = summarizer.summarize(&[Message::user("2+2?")]).await.unwrap();
        assert_eq!(summary, "user asked for math");

        let seen = client.seen.lock().await;
        assert_eq!(seen[0].model, "summary-model");
        assert_eq!(seen[0].max_tokens, Some(512));
        assert!(seen[0].messages[0].content().starts_with("You compress conversation history"));
        assert!(seen[0].tools.is_empty());
    }

    #[tokio::test]
    async fn empty_reply_is_an_error() {
        let client = Arc::new(EchoClient {
            reply: "   ".into(),
            seen: Mutex::new(Vec::new()),
        });
        let summarizer = LlmSummarizer::new(client, "m");
        assert!(summarizer.summarize(&[Message::user("x")]).await.is_err());
    }
}
