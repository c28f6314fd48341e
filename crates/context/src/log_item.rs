//! The persisted envelope around every message, one JSON object per line.

use chrono::Utc;
use roundclaw_core::{Message, Role, StoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

/// One line of a session log.
///
/// Order in the file is the only ordering signal; `created` is informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogItem {
    pub id: String,
    pub role: Role,
    /// Unix seconds
    pub created: i64,
    pub message: Message,
}

impl LogItem {
    pub fn new(message: Message) -> Self {
        Self {
            id: Uuid::now_v7().simple().to_string(),
            role: message.role(),
            created: Utc::now().timestamp(),
            message,
        }
    }

    /// Serialize as one JSONL line, newline included.
    pub fn to_line(&self) -> Result<String, StoreError> {
        let mut line = serde_json::to_string(self).map_err(|e| StoreError::Encode(e.to_string()))?;
        line.push('\n');
        Ok(line)
    }
}

/// Read every log item in a JSONL file.
///
/// A missing file reads as empty. Corrupted lines are skipped with a warning
/// so one bad write never makes a whole session unreadable.
pub fn read_items(path: &Path) -> Result<Vec<LogItem>, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<LogItem>(line) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping corrupted log item");
                None
            }
        })
        .collect())
}
