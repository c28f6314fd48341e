//! Rewritable session log (`log.context.jsonl`).
//!
//! The working set the request builder feeds the model. Appends are mirrored
//! line by line; compaction and summarization rewrite the whole file
//! (truncate + rewrite). The in-memory items and the file handle live behind
//! one lock, so a rewrite never interleaves with an append.

use roundclaw_core::{Message, StoreError};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::log_item::{LogItem, read_items};

pub const CONTEXT_FILE: &str = "log.context.jsonl";

pub struct ContextLog {
    path: PathBuf,
    state: RwLock<ContextState>,
}

struct ContextState {
    items: Vec<LogItem>,
    file: File,
}

impl ContextState {
    fn rewrite(&mut self, path: &Path) -> Result<(), StoreError> {
        let mut content = String::new();
        for item in &self.items {
            content.push_str(&item.to_line()?);
        }
        // Opened in append mode: after truncation writes land at offset 0.
        self.file.set_len(0).map_err(|e| StoreError::io(path, e))?;
        self.file
            .write_all(content.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|e| StoreError::io(path, e))
    }
}

impl ContextLog {
    /// Open (or create) the context log at `path`.
    ///
    /// When the file is missing or empty and `seed` is non-empty, the log
    /// starts as a copy of `seed` (the session's AOF content).
    pub fn open(path: impl Into<PathBuf>, seed: Vec<LogItem>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let existing = read_items(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        let seeded = existing.is_empty() && !seed.is_empty();
        let mut state = ContextState {
            items: if seeded { seed } else { existing },
            file,
        };
        if seeded {
            info!(path = %path.display(), entries = state.items.len(), "Seeding context log from AOF");
            state.rewrite(&path)?;
        }

        debug!(path = %path.display(), entries = state.items.len(), "Context log opened");
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Push an item and mirror it to disk.
    ///
    /// The in-memory push happens first; a failed disk write leaves the two
    /// out of sync until the next rewrite.
    pub async fn append(&self, item: LogItem) -> Result<(), StoreError> {
        let line = item.to_line()?;
        let mut state = self.state.write().await;
        state.items.push(item);
        state
            .file
            .write_all(line.as_bytes())
            .map_err(|e| StoreError::io(&self.path, e))
    }

    /// Ordered messages of the current working set.
    pub async fn messages(&self) -> Vec<Message> {
        let state = self.state.read().await;
        state.items.iter().map(|i| i.message.clone()).collect()
    }

    pub async fn items(&self) -> Vec<LogItem> {
        self.state.read().await.items.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Mutate the items in place; rewrite the file only if `f` reports a
    /// non-zero change count.
    pub async fn update<F>(&self, f: F) -> Result<usize, StoreError>
    where
        F: FnOnce(&mut Vec<LogItem>) -> Result<usize, StoreError>,
    {
        let mut state = self.state.write().await;
        let changed = f(&mut state.items)?;
        if changed > 0 {
            state.rewrite(&self.path)?;
        }
        Ok(changed)
    }

    /// Replace the whole working set and rewrite the file.
    pub async fn replace(&self, items: Vec<LogItem>) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.items = items;
        state.rewrite(&self.path)
    }

    /// Rewrite the file from the in-memory items.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.rewrite(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(texts: &[&str]) -> Vec<LogItem> {
        texts.iter().map(|t| LogItem::new(Message::user(*t))).collect()
    }

    #[tokio::test]
    async fn append_mirrors_to_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONTEXT_FILE);
        let log = ContextLog::open(&path, vec![]).unwrap();

        log.append(LogItem::new(Message::user("hi"))).await.unwrap();
        log.append(LogItem::new(Message::assistant("hello"))).await.unwrap();

        assert_eq!(log.len().await, 2);
        let on_disk = read_items(&path).unwrap();
        assert_eq!(on_disk.len(), 2);
        assert_eq!(on_disk[1].message.content(), "hello");
    }

    #[tokio::test]
    async fn seeds_from_aof_when_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONTEXT_FILE);
        let log = ContextLog::open(&path, items(&["a", "b"])).unwrap();

        assert_eq!(log.len().await, 2);
        assert_eq!(read_items(&path).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn existing_file_wins_over_seed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONTEXT_FILE);
        {
            let log = ContextLog::open(&path, vec![]).unwrap();
            log.append(LogItem::new(Message::user("summary"))).await.unwrap();
        }

        let log = ContextLog::open(&path, items(&["a", "b", "c"])).unwrap();
        let messages = log.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content(), "summary");
    }

    #[tokio::test]
    async fn replace_truncates_and_rewrites() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONTEXT_FILE);
        let log = ContextLog::open(&path, items(&["a", "b", "c"])).unwrap();

        log.replace(items(&["z"])).await.unwrap();
        log.append(LogItem::new(Message::user("after"))).await.unwrap();

        let on_disk = read_items(&path).unwrap();
        assert_eq!(on_disk.len(), 2);
        assert_eq!(on_disk[0].message.content(), "z");
        assert_eq!(on_disk[1].message.content(), "after");
    }

    #[tokio::test]
    async fn update_without_changes_leaves_file_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONTEXT_FILE);
        let log = ContextLog::open(&path, items(&["a"])).unwrap();
        let before = std::fs::metadata(&path).unwrap().modified().unwrap();
        let bytes = std::fs::read(&path).unwrap();

        let changed = log.update(|_| Ok(0)).await.unwrap();
        assert_eq!(changed, 0);
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), before);
    }
}
