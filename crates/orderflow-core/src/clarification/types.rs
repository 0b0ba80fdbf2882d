use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// State of a clarification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClarificationStatus {
    /// Waiting for the client
    Pending,
    /// Answered
    Responded,
    /// Expired without an answer
    Timeout,
    /// Cancelled before an answer arrived
    Cancelled,
}

impl ClarificationStatus {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Responded => "responded",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ClarificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a question to ask
#[derive(Debug, Clone)]
pub struct ClarificationRequest {
    /// Client to ask
    pub client_id: String,
    /// Run waiting on the answer
    pub run_id: String,
    /// The question
    pub question: String,
    /// Allowed answers, if restricted
    pub options: Option<Vec<String>>,
    /// Extra context shown to the user
    pub context: Option<Value>,
    /// How long to wait
    pub timeout: Duration,
    /// Whether the workflow cannot continue without an answer
    pub required: bool,
}

impl ClarificationRequest {
    /// Create a request with a five minute timeout
    pub fn new(
        client_id: impl Into<String>,
        run_id: impl Into<String>,
        question: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            run_id: run_id.into(),
            question: question.into(),
            options: None,
            context: None,
            timeout: Duration::from_secs(300),
            required: true,
        }
    }

    /// Restrict answers to these options
    #[must_use]
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = Some(options).filter(|o| !o.is_empty());
        self
    }

    /// Attach UI context
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Timeout in whole seconds, rounded up, for the wire
    #[must_use]
    pub fn timeout_seconds(&self) -> u64 {
        let secs = self.timeout.as_secs();
        if self.timeout.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// One question and its outcome
#[derive(Debug, Clone, Serialize)]
pub struct ClarificationContext {
    /// Clarification ID
    pub clarification_id: String,
    /// Client asked
    pub client_id: String,
    /// Run waiting on the answer
    pub run_id: String,
    /// The question
    pub question: String,
    /// Allowed answers
    pub options: Option<Vec<String>>,
    /// UI context
    pub context: Option<Value>,
    /// Timeout in seconds
    pub timeout_seconds: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Current state
    pub status: ClarificationStatus,
    /// The answer, once responded
    pub response: Option<String>,
    /// When the state left `pending`
    pub responded_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) created: Instant,
}

impl ClarificationContext {
    pub(crate) fn new(clarification_id: &str, request: &ClarificationRequest) -> Self {
        Self {
            clarification_id: clarification_id.to_string(),
            client_id: request.client_id.clone(),
            run_id: request.run_id.clone(),
            question: request.question.clone(),
            options: request.options.clone(),
            context: request.context.clone(),
            timeout_seconds: request.timeout_seconds(),
            created_at: Utc::now(),
            status: ClarificationStatus::Pending,
            response: None,
            responded_at: None,
            created: Instant::now(),
        }
    }

    /// Whether the clarification is still awaiting an answer
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == ClarificationStatus::Pending
    }
}

/// Why a clarification did not produce an answer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClarificationError {
    /// No answer within the timeout
    #[error("clarification {clarification_id} timed out after {timeout_seconds}s")]
    Timeout {
        /// Clarification ID
        clarification_id: String,
        /// Timeout that elapsed
        timeout_seconds: u64,
    },

    /// Cancelled explicitly or by run cancellation
    #[error("clarification {clarification_id} cancelled: {reason}")]
    Cancelled {
        /// Clarification ID
        clarification_id: String,
        /// Why
        reason: String,
    },

    /// The question could not be sent to the client
    #[error("clarification could not be delivered to client {client_id}")]
    NotDelivered {
        /// Client that was unreachable
        client_id: String,
    },

    /// The resolver went away without resolving
    #[error("clarification waiter closed without a result")]
    Closed,
}

/// Coordinator statistics
#[derive(Debug, Clone, Serialize)]
pub struct ClarificationStats {
    /// Tracked clarifications (any status)
    pub total: usize,
    /// Still pending
    pub pending: usize,
    /// Timeout watchers still armed
    pub active_timeouts: usize,
    /// Count per status
    pub status_breakdown: BTreeMap<String, usize>,
}
