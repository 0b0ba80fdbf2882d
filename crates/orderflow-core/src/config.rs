//! Engine configuration
//!
//! Timeouts and intervals for the coordination engine. Loaded by the server
//! binary from the `[engine]` section of its layered configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// What the bridge does when a clarification cannot reach any client at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationFallback {
    /// Fail the tool call with a descriptive error
    #[default]
    Fail,
    /// Return `fallback_answer` as if the user had typed it (logged at error level)
    DefaultAnswer,
}

/// Coordination engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a clarification waits for an answer
    pub clarification_timeout_secs: u64,
    /// Ceiling for a per-question `timeout_seconds` override
    pub max_clarification_timeout_secs: u64,
    /// Extra time the bridge waits beyond the clarification timeout
    pub bridge_grace_secs: u64,
    /// Upper bound for a single async tool execution
    pub tool_timeout_secs: u64,
    /// Heartbeat push interval
    pub heartbeat_interval_secs: u64,
    /// Idle connection / stale session sweep interval
    pub sweep_interval_secs: u64,
    /// Connections idle this long are dropped; terminal sessions this old are purged
    pub idle_timeout_secs: u64,
    /// Delay between run completion and session removal
    pub session_cleanup_delay_secs: u64,
    /// Resolved clarifications older than this are purged
    pub clarification_retention_hours: u64,
    /// Behaviour when no client can be asked
    pub clarification_fallback: ClarificationFallback,
    /// Answer used by [`ClarificationFallback::DefaultAnswer`]
    pub fallback_answer: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            clarification_timeout_secs: 300,
            max_clarification_timeout_secs: 3600,
            bridge_grace_secs: 10,
            tool_timeout_secs: 120,
            heartbeat_interval_secs: 30,
            sweep_interval_secs: 60,
            idle_timeout_secs: 300,
            session_cleanup_delay_secs: 300,
            clarification_retention_hours: 24,
            clarification_fallback: ClarificationFallback::Fail,
            fallback_answer: "YES".to_string(),
        }
    }
}

impl EngineConfig {
    /// Reject settings that would hang or spin.
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("clarification_timeout_secs", self.clarification_timeout_secs),
            ("max_clarification_timeout_secs", self.max_clarification_timeout_secs),
            ("bridge_grace_secs", self.bridge_grace_secs),
            ("tool_timeout_secs", self.tool_timeout_secs),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("idle_timeout_secs", self.idle_timeout_secs),
        ];
        if let Some((field, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(Error::Configuration(format!("engine.{field} must be non-zero")));
        }

        if self.max_clarification_timeout_secs < self.clarification_timeout_secs {
            return Err(Error::Configuration(
                "engine.max_clarification_timeout_secs must not be below clarification_timeout_secs"
                    .to_string(),
            ));
        }

        if self.clarification_fallback == ClarificationFallback::DefaultAnswer
            && self.fallback_answer.trim().is_empty()
        {
            return Err(Error::Configuration(
                "engine.fallback_answer is required when clarification_fallback = \"default_answer\""
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Clarification timeout as a duration
    #[must_use]
    pub fn clarification_timeout(&self) -> Duration {
        Duration::from_secs(self.clarification_timeout_secs)
    }

    /// Largest clarification timeout a single question may ask for
    #[must_use]
    pub fn max_clarification_timeout(&self) -> Duration {
        Duration::from_secs(self.max_clarification_timeout_secs)
    }

    /// Total time the bridge blocks on a clarification
    #[must_use]
    pub fn bridge_wait(&self) -> Duration {
        Duration::from_secs(
            self.clarification_timeout_secs
                .saturating_add(self.bridge_grace_secs),
        )
    }

    /// Async tool timeout as a duration
    #[must_use]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Heartbeat interval as a duration
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Sweep interval as a duration
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Idle timeout as a duration
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Session cleanup delay as a duration
    #[must_use]
    pub fn session_cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.session_cleanup_delay_secs)
    }

    /// Clarification retention as a duration
    #[must_use]
    pub fn clarification_retention(&self) -> Duration {
        Duration::from_secs(self.clarification_retention_hours.saturating_mul(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.bridge_wait() > config.clarification_timeout());
        assert_eq!(config.clarification_fallback, ClarificationFallback::Fail);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = EngineConfig {
            heartbeat_interval_secs: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("heartbeat_interval_secs"));
    }

    #[test]
    fn test_default_answer_requires_value() {
        let config = EngineConfig {
            clarification_fallback: ClarificationFallback::DefaultAnswer,
            fallback_answer: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_ceiling_below_default_rejected() {
        let config = EngineConfig {
            max_clarification_timeout_secs: 60,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_clarification_timeout_secs"));
    }

    #[test]
    fn test_huge_values_saturate() {
        let config = EngineConfig {
            clarification_timeout_secs: u64::MAX,
            max_clarification_timeout_secs: u64::MAX,
            clarification_retention_hours: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.bridge_wait(), Duration::from_secs(u64::MAX));
        assert_eq!(config.clarification_retention(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_fallback_deserializes_snake_case() {
        let parsed: ClarificationFallback = serde_json::from_str("\"default_answer\"").unwrap();
        assert_eq!(parsed, ClarificationFallback::DefaultAnswer);
    }
}
