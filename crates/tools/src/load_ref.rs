//! Load-reference tool: read back tool output offloaded during compaction.

use async_trait::async_trait;
use roundclaw_context::ReferenceStore;
use roundclaw_core::error::{StoreError, ToolError};
use roundclaw_core::schema::SchemaBuilder;
use roundclaw_core::tool::Tool;
use serde::Deserialize;
use tracing::debug;

pub const LOAD_REF_TOOL: &str = "load_ref";

pub struct LoadRefTool {
    refs: ReferenceStore,
}

#[derive(Debug, Deserialize)]
struct LoadRefArgs {
    #[serde(rename = "ref")]
    reference: String,
}

impl LoadRefTool {
    pub fn new(refs: ReferenceStore) -> Self {
        Self { refs }
    }
}

#[async_trait]
impl Tool for LoadRefTool {
    fn name(&self) -> &str {
        LOAD_REF_TOOL
    }

    fn description(&self) -> &str {
        "Load the full content behind an @refs/<id> pointer. Earlier tool outputs that were too large \
         were moved out of the conversation and replaced by such a pointer."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        SchemaBuilder::object()
            .required("ref", "string", "The reference pointer, e.g. @refs/0123456789abcdef")
            .build()
    }

    async fn invoke(&self, arguments: &str) -> Result<String, ToolError> {
        let args: LoadRefArgs = serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments {
            tool_name: LOAD_REF_TOOL.into(),
            reason: e.to_string(),
        })?;

        // The model often copies the pointer together with its hint.
        let pointer = args.reference.split_whitespace().next().unwrap_or_default();
        debug!(reference = pointer, "Loading reference");

        self.refs.load(pointer).map_err(|e| match e {
            StoreError::InvalidReference(r) => ToolError::InvalidArguments {
                tool_name: LOAD_REF_TOOL.into(),
                reason: format!("not a reference: {r}"),
            },
            other => ToolError::ExecutionFailed {
                tool_name: LOAD_REF_TOOL.into(),
                reason: other.to_string(),
            },
        })
    }
}
