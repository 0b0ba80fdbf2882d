//! Clarification tool - asks the connected client a question
//!
//! This tool has no business logic of its own. Invocations inside a live run
//! are intercepted and routed to the client; executing it directly means no
//! client is reachable.

use crate::context::ToolContext;
use crate::error::{Error, Result};
use crate::registry::{BlockingTool, ToolCategory, ToolDefinition};

/// Tool ID
pub const CLARIFICATION_TOOL: &str = "clarification_tool";

/// Argument keys that may carry the question, checked in order.
pub const PROMPT_KEYS: &[&str] = &["question", "prompt", "message", "text"];

/// Asks the user for details missing from the order
pub struct ClarificationTool {
    definition: ToolDefinition,
}

impl ClarificationTool {
    /// Create a new clarification tool
    #[must_use]
    pub fn new() -> Self {
        let definition = ToolDefinition::new(
            CLARIFICATION_TOOL,
            "Asks the user for missing details when required fields are not provided",
        )
        .with_display_name("Clarification")
        .with_category(ToolCategory::Clarification)
        .with_parameters(serde_json::json!({
            "type": "object",
            "properties": {
                "question": {"type": "string", "description": "The clarification question to ask"},
                "options": {"type": "array", "items": {"type": "string"}},
                "context": {"type": "object"},
                "timeout_seconds": {"type": "integer"}
            },
            "required": ["question"]
        }));

        Self { definition }
    }
}

impl Default for ClarificationTool {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockingTool for ClarificationTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    fn execute(&self, _ctx: &ToolContext, _input: serde_json::Value) -> Result<serde_json::Value> {
        Err(Error::Unavailable(
            "no interactive channel to ask the user".to_string(),
        ))
    }
}
