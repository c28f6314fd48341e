//! The Context Store: per-session dual logs behind one handle.
//!
//! ```text
//! <workspace>/sessions/<channel>/<chatId>/log.jsonl          AOF, append-only
//! <workspace>/sessions/<channel>/<chatId>/log.context.jsonl  working set, rewritable
//! <workspace>/refs/<id>                                      offloaded tool output
//! ```
//!
//! Sessions are opened lazily on first access and stay open for the life of
//! the store. Every append goes to the AOF first, then to the context log.

use async_trait::async_trait;
use roundclaw_config::{AppConfig, ContextSettings};
use roundclaw_core::token::{estimate_messages, estimate_text};
use roundclaw_core::{Error, LlmError, Message, SessionKey, StoreError, ToolDefinition};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::aof_log::{AOF_FILE, AofLog};
use crate::budget::{ContextBudget, MaintenanceReport};
use crate::compaction::{compress_tool_content, orphaned_tool_results, select_summary_span, wrap_summary};
use crate::context_log::{CONTEXT_FILE, ContextLog};
use crate::log_item::LogItem;
use crate::refs::ReferenceStore;

/// Condenses a run of messages into a short text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[Message]) -> Result<String, LlmError>;
}

/// One conversation's pair of logs.
pub struct Session {
    pub key: SessionKey,
    pub aof: AofLog,
    pub context: ContextLog,
}

pub struct ContextStore {
    sessions_dir: PathBuf,
    refs: ReferenceStore,
    settings: ContextSettings,
    budget: ContextBudget,
    aof_write_through: bool,
    sessions: RwLock<HashMap<SessionKey, Arc<Session>>>,
    tool_schemas: RwLock<Vec<ToolDefinition>>,
    system_prompt_tokens: AtomicUsize,
}

impl ContextStore {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_settings(
            &config.workspace,
            config.context.clone(),
            config.session.aof_write_through,
        )
    }

    pub fn with_settings(workspace: &Path, settings: ContextSettings, aof_write_through: bool) -> Self {
        Self {
            sessions_dir: workspace.join("sessions"),
            refs: ReferenceStore::new(workspace.join("refs")),
            budget: ContextBudget::from_settings(&settings),
            settings,
            aof_write_through,
            sessions: RwLock::new(HashMap::new()),
            tool_schemas: RwLock::new(Vec::new()),
            system_prompt_tokens: AtomicUsize::new(0),
        }
    }

    pub fn refs(&self) -> &ReferenceStore {
        &self.refs
    }

    pub fn budget(&self) -> &ContextBudget {
        &self.budget
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Cache the tool schemas counted by [`ContextStore::estimate_tokens`].
    pub async fn set_tool_schemas(&self, schemas: Vec<ToolDefinition>) {
        *self.tool_schemas.write().await = schemas;
    }

    /// Record the system prompt so estimates cover the whole request.
    pub fn set_system_prompt(&self, prompt: &str) {
        self.system_prompt_tokens
            .store(estimate_text(prompt), Ordering::Relaxed);
    }

    fn session_dir(&self, key: &SessionKey) -> PathBuf {
        self.sessions_dir.join(&key.channel).join(&key.chat_id)
    }

    /// Whether `key` has logs on disk or is already open.
    pub async fn session_exists(&self, key: &SessionKey) -> bool {
        self.sessions.read().await.contains_key(key) || has_logs(&self.session_dir(key))
    }

    /// Like [`ContextStore::session`], but never creates a new session.
    pub async fn existing_session(&self, key: &SessionKey) -> Result<Arc<Session>, StoreError> {
        if !self.session_exists(key).await {
            return Err(StoreError::SessionNotFound(key.to_string()));
        }
        self.session(key).await
    }

    /// Get the session for `key`, opening its logs on first access.
    pub async fn session(&self, key: &SessionKey) -> Result<Arc<Session>, StoreError> {
        if let Some(session) = self.sessions.read().await.get(key) {
            return Ok(Arc::clone(session));
        }

        // Files are opened outside the write lock; a racing opener wins below.
        let dir = self.session_dir(key);
        let aof = AofLog::open(dir.join(AOF_FILE), self.aof_write_through)?;
        let context_path = dir.join(CONTEXT_FILE);
        let seed = if context_is_empty(&context_path) {
            aof.read_all().await?
        } else {
            Vec::new()
        };
        let context = ContextLog::open(context_path, seed)?;

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(key) {
            return Ok(Arc::clone(existing));
        }
        let session = Arc::new(Session {
            key: key.clone(),
            aof,
            context,
        });
        sessions.insert(key.clone(), Arc::clone(&session));
        debug!(session = %key, "Session opened");
        Ok(session)
    }

    /// Append a message to both logs: AOF first, then the context log.
    ///
    /// The context log always receives the item, even when the AOF write
    /// failed, so the running turn still sees it. The AOF error is the one
    /// reported in that case.
    pub async fn append(&self, key: &SessionKey, message: Message) -> Result<(), StoreError> {
        let session = self.session(key).await?;
        let item = LogItem::new(message);
        let aof_result = session.aof.append(&item).await;
        let context_result = session.context.append(item).await;
        aof_result.and(context_result)
    }

    pub async fn append_user(&self, key: &SessionKey, content: impl Into<String>) -> Result<(), StoreError> {
        self.append(key, Message::user(content)).await
    }

    pub async fn append_assistant(&self, key: &SessionKey, message: Message) -> Result<(), StoreError> {
        debug_assert!(matches!(message, Message::Assistant { .. }));
        self.append(key, message).await
    }

    pub async fn append_tool_result(
        &self,
        key: &SessionKey,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), StoreError> {
        self.append(key, Message::tool_result(tool_call_id, content)).await
    }

    /// The context log's messages, oldest first. The system prompt is not
    /// part of it.
    pub async fn get_message_context(&self, key: &SessionKey) -> Result<Vec<Message>, StoreError> {
        Ok(self.session(key).await?.context.messages().await)
    }

    /// Every entry ever appended to the session, from the AOF.
    pub async fn history(&self, key: &SessionKey) -> Result<Vec<LogItem>, StoreError> {
        self.session(key).await?.aof.read_all().await
    }

    /// Reset the context log to a copy of the AOF. Returns the new length.
    pub async fn rebuild_context(&self, key: &SessionKey) -> Result<usize, StoreError> {
        let session = self.session(key).await?;
        let items = session.aof.read_all().await?;
        let len = items.len();
        session.context.replace(items).await?;
        info!(session = %key, entries = len, "Context log rebuilt from AOF");
        Ok(len)
    }

    /// Sessions present on disk, sorted.
    pub fn list_sessions(&self) -> Result<Vec<SessionKey>, StoreError> {
        let mut keys = Vec::new();
        for channel in read_subdirs(&self.sessions_dir)? {
            for chat in read_subdirs(&self.sessions_dir.join(&channel))? {
                let dir = self.sessions_dir.join(&channel).join(&chat);
                if !has_logs(&dir) {
                    continue;
                }
                match SessionKey::new(channel.clone(), chat) {
                    Ok(key) => keys.push(key),
                    Err(e) => warn!(dir = %dir.display(), error = %e, "Skipping session directory"),
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Estimated tokens of the next request: system prompt, context view
    /// and cached tool schemas.
    pub async fn estimate_tokens(&self, key: &SessionKey) -> Result<usize, StoreError> {
        let messages = self.get_message_context(key).await?;
        let tools = self.tool_schemas.read().await;
        Ok(self.system_prompt_tokens.load(Ordering::Relaxed) + estimate_messages(&messages, &tools))
    }

    /// Offload up to `count` oversized tool results, oldest first.
    ///
    /// With nothing eligible the context file is not touched at all.
    pub async fn compress_tool_calls(&self, key: &SessionKey, count: usize) -> Result<usize, StoreError> {
        let session = self.session(key).await?;
        let threshold = self.settings.compress_threshold_chars;
        let refs = &self.refs;

        let compressed = session
            .context
            .update(|items| {
                // Nothing is swapped in until every save went through, so a
                // failed batch leaves memory and file in step.
                let mut replacements = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    if replacements.len() >= count {
                        break;
                    }
                    let Message::Tool { content, .. } = &item.message else {
                        continue;
                    };
                    if let Some(replacement) = compress_tool_content(content, threshold, refs)? {
                        replacements.push((i, replacement));
                    }
                }
                for (i, replacement) in &mut replacements {
                    if let Message::Tool { content, .. } = &mut items[*i].message {
                        *content = std::mem::take(replacement);
                    }
                }
                Ok(replacements.len())
            })
            .await?;

        if compressed > 0 {
            info!(session = %key, compressed, "Compressed tool results");
        }
        Ok(compressed)
    }

    /// Collapse old history into one summary message.
    ///
    /// Returns `false` when there was nothing to summarize, or when the log
    /// changed underneath while the summary was being produced.
    pub async fn summarize_history(&self, key: &SessionKey, summarizer: &dyn Summarizer) -> Result<bool, Error> {
        let session = self.session(key).await?;
        let snapshot = session.context.items().await;
        let messages: Vec<Message> = snapshot.iter().map(|i| i.message.clone()).collect();

        let Some(span) = select_summary_span(
            &messages,
            self.settings.keep_recent,
            self.settings.min_summarize_messages,
        ) else {
            return Ok(false);
        };

        debug!(session = %key, from = span.start, to = span.end, "Summarizing history");
        let summary = summarizer.summarize(&messages[span.clone()]).await?;

        let prefix_ids: Vec<&str> = snapshot[..span.end].iter().map(|i| i.id.as_str()).collect();
        let replaced = session
            .context
            .update(|items| {
                let unchanged = items.len() >= span.end
                    && items[..span.end].iter().map(|i| i.id.as_str()).eq(prefix_ids.iter().copied());
                if !unchanged {
                    return Ok(0);
                }
                let mut rebuilt = Vec::with_capacity(items.len() - span.end + 1);
                rebuilt.push(LogItem::new(Message::user(wrap_summary(&summary))));
                rebuilt.extend(items.drain(span.end..));
                *items = rebuilt;
                Ok(1)
            })
            .await?;

        if replaced == 0 {
            warn!(session = %key, "Context log changed during summarization, summary discarded");
            return Ok(false);
        }

        let orphans = orphaned_tool_results(&session.context.messages().await);
        if !orphans.is_empty() {
            warn!(session = %key, ?orphans, "Summarized context holds orphaned tool results");
        }
        info!(session = %key, summarized = span.len(), "History summarized");
        Ok(true)
    }

    /// Keep the session under budget: compress when over the compact
    /// threshold, then summarize if the result is still over the summarize
    /// threshold. A failed summarization is logged and retried next time.
    pub async fn maintain(
        &self,
        key: &SessionKey,
        summarizer: &dyn Summarizer,
    ) -> Result<MaintenanceReport, StoreError> {
        let tokens_before = self.estimate_tokens(key).await?;
        let mut report = MaintenanceReport {
            tokens_before,
            tokens_after: tokens_before,
            ..MaintenanceReport::default()
        };

        if !self.budget.needs_compaction(tokens_before) {
            return Ok(report);
        }

        report.compressed = self.compress_tool_calls(key, self.budget.compress_batch).await?;
        report.tokens_after = self.estimate_tokens(key).await?;

        if self.budget.needs_summary(report.tokens_after) {
            match self.summarize_history(key, summarizer).await {
                Ok(done) => report.summarized = done,
                Err(e) => warn!(session = %key, error = %e, "Summarization failed, will retry next round"),
            }
            report.tokens_after = self.estimate_tokens(key).await?;
        }

        debug!(
            session = %key,
            before = report.tokens_before,
            after = report.tokens_after,
            compressed = report.compressed,
            summarized = report.summarized,
            "Context maintenance done"
        );
        Ok(report)
    }

    /// Flush every open session's AOF increment buffer.
    pub async fn flush_all(&self) -> Result<usize, StoreError> {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut flushed = 0;
        let mut first_err = None;
        for session in sessions {
            match session.aof.flush().await {
                Ok(n) => flushed += n,
                Err(e) => {
                    warn!(session = %session.key, error = %e, "AOF flush failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }
}

fn has_logs(dir: &Path) -> bool {
    dir.join(AOF_FILE).exists() || dir.join(CONTEXT_FILE).exists()
}

fn context_is_empty(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true)
}

fn read_subdirs(dir: &Path) -> Result<Vec<String>, StoreError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };
    Ok(entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect())
}
