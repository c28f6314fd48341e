//! Reference store: small text blobs under `refs/<id>`.
//!
//! Oversized tool outputs are moved here during compaction and replaced in
//! the context log by an `@refs/<id>` pointer. The full text stays
//! recoverable through [`ReferenceStore::load`].

use roundclaw_core::StoreError;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Prefix of every reference pointer.
pub const REF_PREFIX: &str = "@refs/";

const ID_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct ReferenceStore {
    dir: PathBuf,
}

impl ReferenceStore {
    /// A store rooted at `dir` (usually `<workspace>/refs`).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save `content` under a fresh random id and return its pointer.
    pub fn save(&self, content: &str) -> Result<String, StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let id: String = Uuid::new_v4().simple().to_string().chars().take(ID_LEN).collect();
        let path = self.dir.join(&id);
        std::fs::write(&path, content).map_err(|e| StoreError::io(&path, e))?;

        debug!(reference = %id, bytes = content.len(), "Saved reference");
        Ok(format!("{REF_PREFIX}{id}"))
    }

    /// Load the content behind an `@refs/<id>` pointer.
    pub fn load(&self, reference: &str) -> Result<String, StoreError> {
        let id = parse_reference(reference)
            .ok_or_else(|| StoreError::InvalidReference(reference.to_string()))?;
        let path = self.dir.join(id);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::ReferenceNotFound(reference.to_string()))
            }
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Ids of every stored reference, sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };
        let mut ids: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|name| is_valid_id(name))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Extract the id from an exact `@refs/<id>` pointer.
pub fn parse_reference(reference: &str) -> Option<&str> {
    reference
        .strip_prefix(REF_PREFIX)
        .filter(|id| is_valid_id(id))
}

/// Whether `text` starts with a reference pointer (a hint may follow it).
pub fn is_reference(text: &str) -> bool {
    let Some(rest) = text.strip_prefix(REF_PREFIX) else {
        return false;
    };
    let id_len = rest.chars().take_while(char::is_ascii_alphanumeric).count();
    id_len > 0 && rest[id_len..].chars().next().is_none_or(char::is_whitespace)
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())
}
