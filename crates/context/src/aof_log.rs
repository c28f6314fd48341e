//! Append-only session log (`log.jsonl`).
//!
//! Never rewritten. It is the durability source of truth and the basis for
//! history replay. Appends either go straight to disk (write-through) or
//! into an increment buffer drained by [`AofLog::flush`].

use roundclaw_core::StoreError;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::log_item::{LogItem, read_items};

pub const AOF_FILE: &str = "log.jsonl";

pub struct AofLog {
    path: PathBuf,
    write_through: bool,
    state: Mutex<AofState>,
}

struct AofState {
    file: File,
    /// Encoded lines not yet on disk
    pending: Vec<String>,
    /// Entries appended so far, on disk or pending
    len: usize,
}

impl AofLog {
    /// Open (or create) the AOF log at `path`.
    pub fn open(path: impl Into<PathBuf>, write_through: bool) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let existing = read_items(&path)?.len();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        debug!(path = %path.display(), entries = existing, write_through, "AOF log opened");
        Ok(Self {
            path,
            write_through,
            state: Mutex::new(AofState {
                file,
                pending: Vec::new(),
                len: existing,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one item. With write-through off the line is buffered until
    /// the next flush.
    pub async fn append(&self, item: &LogItem) -> Result<(), StoreError> {
        let line = item.to_line()?;
        let mut state = self.state.lock().await;
        if self.write_through {
            state
                .file
                .write_all(line.as_bytes())
                .map_err(|e| StoreError::io(&self.path, e))?;
        } else {
            state.pending.push(line);
        }
        state.len += 1;
        Ok(())
    }

    /// Write the increment buffer to disk. Returns how many entries were written.
    ///
    /// The buffer is taken and cleared under the lock, so appends racing
    /// with a flush land in the next batch. A failed write puts the batch
    /// back in front of anything appended since.
    pub async fn flush(&self) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        if state.pending.is_empty() {
            return Ok(0);
        }

        let batch = std::mem::take(&mut state.pending);
        let data = batch.concat();
        let result = state.file.write_all(data.as_bytes()).and_then(|()| state.file.flush());
        if let Err(e) = result {
            let mut restored = batch;
            restored.append(&mut state.pending);
            state.pending = restored;
            return Err(StoreError::io(&self.path, e));
        }

        debug!(path = %self.path.display(), entries = batch.len(), "AOF increment flushed");
        Ok(batch.len())
    }

    /// Number of entries appended over the log's lifetime. Never decreases.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn pending(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Every entry, oldest first. Pending entries are flushed first.
    pub async fn read_all(&self) -> Result<Vec<LogItem>, StoreError> {
        self.flush().await?;
        read_items(&self.path)
    }
}
