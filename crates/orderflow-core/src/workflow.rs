//! Workflow - The synchronous planner contract
//!
//! A workflow is whatever drives tools for a run. It is called on a
//! blocking worker thread and reaches tools only through the
//! [`ToolBridge`], which reports each step and handles clarifications.

use orderflow_tools::RunContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge::ToolBridge;
use crate::error::Result;
use crate::protocol::RunOptions;

/// Input of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Free-form order text from the client
    pub order_text: String,
    /// Options sent with `start_order_processing`
    #[serde(default)]
    pub options: RunOptions,
}

impl OrderRequest {
    /// Create a request with default options
    #[must_use]
    pub fn new(order_text: impl Into<String>) -> Self {
        Self {
            order_text: order_text.into(),
            options: RunOptions::default(),
        }
    }

    /// Set the run options
    #[must_use]
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }
}

/// Drives the tools of one run to a final output
pub trait Workflow: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Execute the run on the calling (blocking) thread.
    ///
    /// Errors fail the run; the returned value becomes its final output.
    fn execute(&self, ctx: &RunContext, order: &OrderRequest, bridge: &ToolBridge) -> Result<Value>;
}
