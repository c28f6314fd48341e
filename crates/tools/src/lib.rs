//! Built-in tool implementations for roundclaw.
//!
//! The runtime ships one tool of its own: `load_ref`, which lets the model
//! recover tool output that context compaction moved into the reference
//! store. Everything else is registered by the embedding application.

pub mod load_ref;

use roundclaw_context::ReferenceStore;
use roundclaw_core::tool::ToolRegistry;
use std::sync::Arc;

pub use load_ref::{LOAD_REF_TOOL, LoadRefTool};

/// Create a tool registry holding the built-in tools.
pub fn default_registry(refs: ReferenceStore) -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(LoadRefTool::new(refs)));
    registry
}
