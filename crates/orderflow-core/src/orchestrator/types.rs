use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::protocol::StepStatus;

/// One step event, as reported by the bridge or a workflow
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// Unique step ID
    pub step_id: String,
    /// Human-readable step name
    pub step_name: String,
    /// Step status
    pub status: StepStatus,
    /// Tool that ran the step
    pub tool_name: Option<String>,
    /// Tool output
    pub output: Option<Value>,
    /// Error message
    pub error: Option<String>,
    /// Wall-clock duration
    pub duration_ms: Option<u64>,
}

impl StepReport {
    /// Create a report with no payload
    #[must_use]
    pub fn new(step_id: impl Into<String>, step_name: impl Into<String>, status: StepStatus) -> Self {
        Self {
            step_id: step_id.into(),
            step_name: step_name.into(),
            status,
            tool_name: None,
            output: None,
            error: None,
            duration_ms: None,
        }
    }

    /// Set the tool name
    #[must_use]
    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    /// Attach tool output
    #[must_use]
    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Attach an error message
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach the elapsed time
    #[must_use]
    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        self
    }
}

/// Orchestrator statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    /// Runs that have not reached a final status
    pub active_runs: usize,
    /// Runs currently blocked on a clarification
    pub waiting_clarification: usize,
    /// Active runs per workflow phase
    pub phase_breakdown: BTreeMap<String, usize>,
}
