//! Tool trait: the capabilities the model can invoke during a turn.
//!
//! A tool declares a typed argument struct. The registry erases that type so
//! the loop can hold heterogeneous tools and hand them the raw JSON the model
//! produced; deserialization happens at the edge, once, per call.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// The core Tool trait.
///
/// Tools always produce text. Recoverable failures (upstream unavailable,
/// nothing found) are reported as informative text, not as `Err`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Typed arguments, deserialized from the model's JSON.
    type Args: DeserializeOwned + Send;

    /// The unique name the model uses to request this tool.
    fn name(&self) -> &str;

    /// What this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing `Args`.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute with already-validated arguments.
    async fn call(&self, args: Self::Args) -> Result<String, ToolError>;
}

/// Object-safe view of a [`Tool`], taking raw JSON arguments.
#[async_trait]
pub trait ErasedTool: Send + Sync {
    fn name(&self) -> &str;

    fn definition(&self) -> ToolDefinition;

    async fn invoke(&self, raw_arguments: &str) -> Result<String, ToolError>;
}

#[async_trait]
impl<T: Tool> ErasedTool for T {
    fn name(&self) -> &str {
        Tool::name(self)
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Tool::name(self).to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }

    async fn invoke(&self, raw_arguments: &str) -> Result<String, ToolError> {
        // Models send "" for a call with no arguments.
        let raw = if raw_arguments.trim().is_empty() {
            "{}"
        } else {
            raw_arguments
        };
        let args: T::Args =
            serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        self.call(args).await
    }
}

/// Name → tool lookup, fixed after startup.
///
/// Registration order is kept so definitions are sent to the model in a
/// stable order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ErasedTool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names must be unique.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<(), ToolError> {
        self.register_erased(Arc::new(tool))
    }

    pub fn register_erased(&mut self, tool: Arc<dyn ErasedTool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Look up a tool by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ErasedTool>, ToolError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Definitions for every tool, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
