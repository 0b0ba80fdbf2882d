//! Registry - Tool registration and lookup
//!
//! Tools come in two flavours: [`Tool`] for async implementations and
//! [`BlockingTool`] for plain synchronous ones. Both are stored behind a
//! [`ToolHandle`] so callers can decide how to drive them.

use crate::context::ToolContext;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Tool category for organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    /// Parsing free-form order text
    Extraction,
    /// Stock lookups
    Inventory,
    /// Price computation
    Pricing,
    /// Shipping and delivery planning
    Logistics,
    /// Asks the human client a question
    Clarification,
    /// Utility operations
    Utility,
}

impl ToolCategory {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Inventory => "inventory",
            Self::Pricing => "pricing",
            Self::Logistics => "logistics",
            Self::Clarification => "clarification",
            Self::Utility => "utility",
        }
    }
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tool metadata and schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool ID (stable, used for deduplication)
    pub name: String,
    /// Human-readable step name shown to clients
    pub display_name: String,
    /// Human-readable description
    pub description: String,
    /// JSON schema for parameters
    pub parameters: serde_json::Value,
    /// Tool category
    pub category: ToolCategory,
    /// Whether the tool is enabled
    pub enabled: bool,
}

impl ToolDefinition {
    /// Create a new tool definition
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            description: description.into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
            category: ToolCategory::Utility,
            enabled: true,
        }
    }

    /// Set the display name
    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Set the parameters schema
    #[must_use]
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the category
    #[must_use]
    pub fn with_category(mut self, category: ToolCategory) -> Self {
        self.category = category;
        self
    }

    /// Set enabled status
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether invocations must be routed to a human instead of executed.
    #[must_use]
    pub fn is_clarification(&self) -> bool {
        self.category == ToolCategory::Clarification
    }
}

/// Trait for async tool implementations
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool definition
    fn definition(&self) -> &ToolDefinition;

    /// Execute the tool with given input
    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value)
        -> Result<serde_json::Value>;
}

/// Trait for synchronous tool implementations
pub trait BlockingTool: Send + Sync {
    /// Get the tool definition
    fn definition(&self) -> &ToolDefinition;

    /// Execute the tool with given input on the calling thread
    fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> Result<serde_json::Value>;
}

/// A registered tool, tagged with its execution model.
#[derive(Clone)]
pub enum ToolHandle {
    /// Must be driven to completion on an async runtime
    Async(Arc<dyn Tool>),
    /// Runs on whichever thread calls it
    Blocking(Arc<dyn BlockingTool>),
}

impl ToolHandle {
    /// Get the tool definition
    #[must_use]
    pub fn definition(&self) -> &ToolDefinition {
        match self {
            Self::Async(tool) => tool.definition(),
            Self::Blocking(tool) => tool.definition(),
        }
    }

    /// Unique tool ID
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition().name
    }

    /// Whether the tool needs an async runtime
    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }
}

impl std::fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_async() { "async" } else { "blocking" };
        f.debug_struct("ToolHandle")
            .field("name", &self.name())
            .field("kind", &kind)
            .finish()
    }
}

/// Registry for managing tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolHandle>,
}

impl ToolRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register an async tool
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.insert(ToolHandle::Async(tool));
    }

    /// Register a synchronous tool
    pub fn register_blocking(&mut self, tool: Arc<dyn BlockingTool>) {
        self.insert(ToolHandle::Blocking(tool));
    }

    fn insert(&mut self, handle: ToolHandle) {
        let name = handle.name().to_string();
        debug!(tool = %name, async_tool = handle.is_async(), "Registering tool");
        self.tools.insert(name, handle);
    }

    /// Get a tool by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ToolHandle> {
        self.tools.get(name).cloned()
    }

    /// Get an enabled tool by name, or a `NotFound` error
    pub fn require(&self, name: &str) -> Result<ToolHandle> {
        match self.tools.get(name) {
            Some(handle) if handle.definition().enabled => Ok(handle.clone()),
            Some(_) => Err(Error::NotFound(format!("{} (disabled)", name))),
            None => Err(Error::NotFound(name.to_string())),
        }
    }

    /// Get a tool definition by name
    #[must_use]
    pub fn get_definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(ToolHandle::definition)
    }

    /// Check if a tool exists
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all tool names, sorted
    #[must_use]
    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// List tools by category
    #[must_use]
    pub fn list_by_category(&self, category: ToolCategory) -> Vec<&ToolDefinition> {
        self.tools
            .values()
            .map(ToolHandle::definition)
            .filter(|d| d.category == category)
            .collect()
    }

    /// Get tool count
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
