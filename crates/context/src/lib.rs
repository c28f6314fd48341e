//! Session persistence and context management for roundclaw.
//!
//! Each conversation keeps two logs: an append-only AOF that records every
//! message forever, and a rewritable context log holding what the model will
//! actually see. Compaction offloads large tool results into the reference
//! store; summarization collapses old history into a single message.

pub mod aof_log;
pub mod budget;
pub mod compaction;
pub mod context_log;
pub mod flusher;
pub mod log_item;
pub mod refs;
pub mod store;

pub use aof_log::AofLog;
pub use budget::{ContextBudget, MaintenanceReport};
pub use compaction::{SUMMARY_FOOTER, SUMMARY_HEADER, wrap_summary};
pub use context_log::ContextLog;
pub use flusher::AofFlusher;
pub use log_item::LogItem;
pub use refs::{REF_PREFIX, ReferenceStore, is_reference, parse_reference};
pub use store::{ContextStore, Session, Summarizer};
