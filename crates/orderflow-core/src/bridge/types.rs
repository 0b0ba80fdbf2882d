use std::time::Duration;
use thiserror::Error;

use crate::clarification::ClarificationError;
use crate::config::{ClarificationFallback, EngineConfig};

/// Tool call failure as seen by the workflow
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The tool itself failed; passed through unchanged
    #[error(transparent)]
    Tool(#[from] orderflow_tools::Error),

    /// A clarification timed out or was cancelled
    #[error("clarification failed: {0}")]
    Clarification(#[from] ClarificationError),

    /// No runtime or client reachable to complete the call
    #[error("no execution context: {0}")]
    NoExecutionContext(String),

    /// The bridge stopped waiting
    #[error("{tool} did not finish within {secs}s")]
    Timeout {
        /// Tool name
        tool: String,
        /// How long the bridge waited
        secs: u64,
    },

    /// Tool is not registered or disabled
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The run was cancelled or already finished
    #[error("run {0} is no longer active")]
    RunInactive(String),
}

impl BridgeError {
    /// Whether this failure came from the client not answering in time
    #[must_use]
    pub fn is_clarification_timeout(&self) -> bool {
        matches!(self, Self::Clarification(ClarificationError::Timeout { .. }))
    }
}

/// Timeouts and fallback policy for the bridge
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// How long a clarification waits for an answer
    pub clarification_timeout: Duration,
    /// Ceiling for a per-question timeout override
    pub max_clarification_timeout: Duration,
    /// Extra bridge wait on top of the clarification timeout, so the
    /// coordinator's own timeout resolves first
    pub grace: Duration,
    /// Upper bound for one async tool execution
    pub tool_timeout: Duration,
    /// What to do when no client can be asked
    pub fallback: ClarificationFallback,
    /// Answer used by [`ClarificationFallback::DefaultAnswer`]
    pub fallback_answer: String,
}

impl BridgeSettings {
    /// Total time a worker thread waits for a clarification
    #[must_use]
    pub fn bridge_wait(&self) -> Duration {
        self.clarification_timeout.saturating_add(self.grace)
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for BridgeSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            clarification_timeout: config.clarification_timeout(),
            max_clarification_timeout: config.max_clarification_timeout(),
            grace: Duration::from_secs(config.bridge_grace_secs),
            tool_timeout: config.tool_timeout(),
            fallback: config.clarification_fallback,
            fallback_answer: config.fallback_answer.clone(),
        }
    }
}
