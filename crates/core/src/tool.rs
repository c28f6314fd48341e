//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world. The
//! runtime only knows the invocation contract: a tool describes itself and
//! turns a JSON argument string into a textual result.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::llm::ToolDefinition;
use crate::message::ToolCall;

/// The core Tool trait.
///
/// Tools are registered in the [`ToolRegistry`] and made available to the
/// orchestrator, which advertises them to the model and dispatches the
/// model's tool calls back to them.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "load_ref").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Invoke the tool with the raw JSON argument string the model produced.
    async fn invoke(&self, arguments: &str) -> Result<String, ToolError>;

    /// Name, description and schema as one definition for the LLM.
    fn info(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// Owned by one orchestrator; independent registries never share state.
/// Registration and lookup go through an internal lock so a shared registry
/// can be extended while turns are running.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool. A second tool with an already registered name is
    /// ignored and the first registration wins.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        if tools.contains_key(&name) {
            warn!(tool = %name, "Tool already registered, keeping the first one");
            return;
        }
        debug!(tool = %name, "Registered tool");
        tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        tools.get(name).cloned()
    }

    /// Get all tool definitions (for sending to the LLM), sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        let mut defs: Vec<ToolDefinition> = tools.values().map(|t| t.info()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run a tool call and return the text to feed back to the model.
    ///
    /// Never fails: an unknown tool and a failed invocation both become
    /// textual results so the model can react to them.
    pub async fn dispatch(&self, call: &ToolCall) -> String {
        // The lock is released before the tool runs.
        let Some(tool) = self.get(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "Model called an unknown tool");
            return format!("(tool {} not found)", call.name);
        };

        debug!(tool = %call.name, call_id = %call.id, "Invoking tool");
        match tool.invoke(&call.arguments).await {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool invocation failed");
                format!("(tool invoke failed: {e})")
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

type InvokeFn<I, O> = Box<dyn Fn(I) -> BoxFuture<'static, Result<O, String>> + Send + Sync>;

/// Adapts a typed async function into a [`Tool`].
///
/// Arguments are deserialized into `I`; the output is serialized back to
/// JSON, except that a string output is returned as-is.
pub struct FnTool<I, O> {
    name: String,
    description: String,
    schema: serde_json::Value,
    func: InvokeFn<I, O>,
}

impl<I, O> FnTool<I, O>
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
{
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
        func: F,
    ) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            func: Box::new(move |input| func(input).boxed()),
        }
    }
}

#[async_trait]
impl<I, O> Tool for FnTool<I, O>
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    async fn invoke(&self, arguments: &str) -> Result<String, ToolError> {
        let input: I = serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments {
            tool_name: self.name.clone(),
            reason: e.to_string(),
        })?;

        let output = (self.func)(input).await.map_err(|reason| ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason,
        })?;

        let value = serde_json::to_value(&output).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason: format!("output marshal failed: {e}"),
        })?;

        Ok(match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
    }
}
