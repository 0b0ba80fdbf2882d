//! Run identity passed into tool invocations.

use serde::{Deserialize, Serialize};

/// Identity of a live run: which workflow execution and which client owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunContext {
    /// Workflow execution ID
    pub run_id: String,
    /// Owning client connection ID
    pub client_id: String,
}

impl RunContext {
    /// Create a new run context
    #[must_use]
    pub fn new(run_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            client_id: client_id.into(),
        }
    }

    /// First eight characters of the run ID, used in generated step IDs.
    #[must_use]
    pub fn run_prefix(&self) -> &str {
        let end = self
            .run_id
            .char_indices()
            .nth(8)
            .map_or(self.run_id.len(), |(i, _)| i);
        &self.run_id[..end]
    }
}

/// Context handed to a tool's `execute`.
///
/// Both IDs are absent when a tool is invoked outside any live session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolContext {
    /// Workflow execution ID, if running inside a session
    pub run_id: Option<String>,
    /// Owning client ID, if running inside a session
    pub client_id: Option<String>,
}

impl ToolContext {
    /// Context for an invocation with no live session.
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    /// Whether this invocation belongs to a live session.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.run_id.is_some() && self.client_id.is_some()
    }
}

impl From<&RunContext> for ToolContext {
    fn from(ctx: &RunContext) -> Self {
        Self {
            run_id: Some(ctx.run_id.clone()),
            client_id: Some(ctx.client_id.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_prefix_truncates() {
        let ctx = RunContext::new("0123456789abcdef", "client");
        assert_eq!(ctx.run_prefix(), "01234567");

        let short = RunContext::new("r1", "client");
        assert_eq!(short.run_prefix(), "r1");
    }

    #[test]
    fn test_tool_context_from_run() {
        let run = RunContext::new("r1", "c1");
        let ctx = ToolContext::from(&run);
        assert!(ctx.is_attached());
        assert_eq!(ctx.run_id.as_deref(), Some("r1"));
        assert!(!ToolContext::detached().is_attached());
    }
}
