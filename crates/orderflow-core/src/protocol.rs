//! Wire protocol
//!
//! Every frame is a JSON envelope:
//! `{type, data, timestamp, client_id, correlation_id, run_id?}`.
//! Outbound payloads are [`ServerMessage`] variants; inbound payloads are
//! parsed into [`ClientMessage`] with a machine-readable [`ErrorCode`] on
//! failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Capabilities announced in `connection_acknowledged`.
pub const CAPABILITIES: &[&str] = &["order_processing", "clarifications", "real_time_updates"];

/// Lifecycle status of a run session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Session created, workflow not yet running
    Started,
    /// Workflow executing
    Running,
    /// Blocked on a clarification
    WaitingClarification,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled by the client or by disconnect
    Cancelled,
}

impl RunStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [RunStatus; 6] = [
        Self::Started,
        Self::Running,
        Self::WaitingClarification,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Whether no further transitions are allowed
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns the string representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Running => "running",
            Self::WaitingClarification => "waiting_clarification",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status carried by a `step_update`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Tool invocation began
    Started,
    /// Still running (intermediate progress)
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Waiting on the client
    Waiting,
    /// Not executed; a cached result was returned
    Skipped,
}

impl StepStatus {
    /// Whether this status ends the step
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Status carried by a `clarification_acknowledged`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    /// Received but not yet applied
    Received,
    /// Applied; the waiting step resumed
    Processed,
    /// Rejected; nothing changed
    Error,
}

/// Machine-readable error codes on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Frame is not JSON
    InvalidJson,
    /// Frame has no `type`
    MissingType,
    /// `type` is not an inbound message type
    UnknownType,
    /// `data` does not match the message schema
    ValidationError,
    /// A handler failed while processing a valid message
    HandlerError,
    /// `get_processing_status` for an unknown run
    StatusNotFound,
    /// `cancel_processing` for an unknown or foreign run
    RunNotFound,
    /// Workflow execution failed
    WorkflowError,
}

impl ErrorCode {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::MissingType => "missing_type",
            Self::UnknownType => "unknown_type",
            Self::ValidationError => "validation_error",
            Self::HandlerError => "handler_error",
            Self::StatusNotFound => "status_not_found",
            Self::RunNotFound => "run_not_found",
            Self::WorkflowError => "workflow_error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server → client payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once on connect
    ConnectionAcknowledged {
        /// Client ID the connection is registered under
        client_id: String,
        /// Server capabilities
        capabilities: Vec<String>,
    },
    /// A run was accepted
    ProcessingStarted {
        /// Run ID
        run_id: String,
        /// Human-readable message
        message: String,
        /// Known step count, if supplied
        #[serde(skip_serializing_if = "Option::is_none")]
        total_steps: Option<u32>,
    },
    /// Run status snapshot
    ProcessingStatus {
        /// Run ID
        run_id: String,
        /// Current status
        status: RunStatus,
        /// Current step name
        #[serde(skip_serializing_if = "Option::is_none")]
        current_step: Option<String>,
        /// Human-readable message
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        /// Progress, 0-100
        #[serde(skip_serializing_if = "Option::is_none")]
        progress_percentage: Option<f64>,
        /// Completed step count
        #[serde(skip_serializing_if = "Option::is_none")]
        steps_completed: Option<u32>,
        /// Known step count
        #[serde(skip_serializing_if = "Option::is_none")]
        total_steps: Option<u32>,
    },
    /// Tool lifecycle event
    StepUpdate {
        /// Run the step belongs to
        run_id: String,
        /// Unique step ID
        step_id: String,
        /// Human-readable step name
        step_name: String,
        /// Step status
        status: StepStatus,
        /// Tool ID
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        /// Run progress after this update
        #[serde(skip_serializing_if = "Option::is_none")]
        progress_percentage: Option<f64>,
        /// Tool output
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        /// Error message
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Wall-clock duration
        #[serde(skip_serializing_if = "Option::is_none")]
        execution_time_ms: Option<u64>,
    },
    /// A question for the user
    ClarificationRequest {
        /// Clarification ID to answer with
        clarification_id: String,
        /// Run waiting on the answer
        run_id: String,
        /// The question
        question: String,
        /// Seconds before the question expires
        timeout_seconds: u64,
        /// Allowed answers, if restricted
        #[serde(skip_serializing_if = "Option::is_none")]
        options: Option<Vec<String>>,
        /// Extra context for the UI
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
        /// Whether the workflow cannot continue without an answer
        required: bool,
    },
    /// A question expired or was cancelled
    ClarificationTimeout {
        /// Clarification ID
        clarification_id: String,
        /// Human-readable message
        message: String,
    },
    /// Result of handling a `clarification_response`
    ClarificationAcknowledged {
        /// Clarification ID
        clarification_id: String,
        /// Outcome
        status: AckStatus,
        /// Human-readable message
        message: String,
    },
    /// Workflow moved to a new phase
    PhaseTransition {
        /// Run ID
        run_id: String,
        /// Previous phase
        #[serde(skip_serializing_if = "Option::is_none")]
        from_phase: Option<String>,
        /// New phase
        to_phase: String,
        /// Phase description
        description: String,
    },
    /// Free-form progress push
    ProgressUpdate {
        /// Run ID
        run_id: String,
        /// Current step name
        current_step: String,
        /// Progress, 0-100
        progress_percentage: f64,
        /// Human-readable message
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Run finished successfully
    ProcessingCompleted {
        /// Run ID
        run_id: String,
        /// Workflow output
        final_output: Value,
        /// Elapsed wall-clock time
        processing_time_seconds: f64,
        /// Human-readable message
        message: String,
    },
    /// Protocol or run error
    Error {
        /// Error family (`websocket_error`, `processing_error`)
        error_type: String,
        /// Machine-readable code
        error_code: ErrorCode,
        /// Human-readable message
        message: String,
        /// Whether the client may retry
        recoverable: bool,
        /// Run the error belongs to
        #[serde(skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
    },
    /// Periodic liveness push
    Heartbeat {
        /// Live connection count
        active_connections: usize,
        /// Live run session count
        active_processing_sessions: usize,
    },
}

impl ServerMessage {
    /// Wire name of this message type
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionAcknowledged { .. } => "connection_acknowledged",
            Self::ProcessingStarted { .. } => "processing_started",
            Self::ProcessingStatus { .. } => "processing_status",
            Self::StepUpdate { .. } => "step_update",
            Self::ClarificationRequest { .. } => "clarification_request",
            Self::ClarificationTimeout { .. } => "clarification_timeout",
            Self::ClarificationAcknowledged { .. } => "clarification_acknowledged",
            Self::PhaseTransition { .. } => "phase_transition",
            Self::ProgressUpdate { .. } => "progress_update",
            Self::ProcessingCompleted { .. } => "processing_completed",
            Self::Error { .. } => "error",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }

    /// Run this message concerns, if any
    #[must_use]
    pub fn run_id(&self) -> Option<&str> {
        match self {
            Self::ProcessingStarted { run_id, .. }
            | Self::ProcessingStatus { run_id, .. }
            | Self::StepUpdate { run_id, .. }
            | Self::ClarificationRequest { run_id, .. }
            | Self::PhaseTransition { run_id, .. }
            | Self::ProgressUpdate { run_id, .. }
            | Self::ProcessingCompleted { run_id, .. } => Some(run_id),
            Self::Error { run_id, .. } => run_id.as_deref(),
            _ => None,
        }
    }

    /// Protocol-level error reply (connection stays open)
    #[must_use]
    pub fn protocol_error(err: &ProtocolError) -> Self {
        Self::Error {
            error_type: "websocket_error".to_string(),
            error_code: err.code,
            message: err.message.clone(),
            recoverable: true,
            run_id: None,
        }
    }

    /// Acknowledgement with the given outcome
    #[must_use]
    pub fn ack(clarification_id: &str, status: AckStatus, message: impl Into<String>) -> Self {
        Self::ClarificationAcknowledged {
            clarification_id: clarification_id.to_string(),
            status,
            message: message.into(),
        }
    }
}

/// Outbound frame: a [`ServerMessage`] plus envelope metadata
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    /// Payload, flattened into `type` and `data`
    #[serde(flatten)]
    pub message: &'a ServerMessage,
    /// Send time, RFC 3339
    pub timestamp: DateTime<Utc>,
    /// Recipient
    pub client_id: &'a str,
    /// Unique per frame
    pub correlation_id: String,
    /// Run the frame concerns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<&'a str>,
}

impl<'a> Envelope<'a> {
    /// Wrap a message for a client
    #[must_use]
    pub fn new(client_id: &'a str, message: &'a ServerMessage) -> Self {
        Self {
            run_id: message.run_id(),
            message,
            timestamp: Utc::now(),
            client_id,
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Options accepted with `start_order_processing`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Known step count, used for progress percentages
    #[serde(default)]
    pub total_steps: Option<u32>,
    /// Anything else, passed through to the workflow
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Client → server messages
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Start a new run
    StartOrderProcessing {
        /// Free-form order text
        order_text: String,
        /// Run options
        options: RunOptions,
    },
    /// Answer a pending clarification
    ClarificationResponse {
        /// Clarification being answered
        clarification_id: String,
        /// The answer
        response: String,
    },
    /// Cancel a run
    CancelProcessing {
        /// Run to cancel
        run_id: String,
        /// Why
        reason: Option<String>,
    },
    /// Ask for a status snapshot
    GetProcessingStatus {
        /// Run to report
        run_id: String,
    },
}

#[derive(Deserialize)]
struct StartData {
    order_text: String,
    #[serde(default)]
    options: Option<RunOptions>,
}

#[derive(Deserialize)]
struct ResponseData {
    clarification_id: String,
    response: String,
}

#[derive(Deserialize)]
struct CancelData {
    run_id: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct StatusData {
    run_id: String,
}

/// Inbound message rejected before reaching a handler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ProtocolError {
    /// Wire error code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
}

impl ProtocolError {
    /// Create a protocol error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn field<T: serde::de::DeserializeOwned>(kind: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| {
        ProtocolError::new(
            ErrorCode::ValidationError,
            format!("Invalid data for message type {kind}: {e}"),
        )
    })
}

fn non_empty(kind: &str, name: &str, value: &str) -> Result<(), ProtocolError> {
    if value.trim().is_empty() {
        return Err(ProtocolError::new(
            ErrorCode::ValidationError,
            format!("Invalid data for message type {kind}: '{name}' must not be empty"),
        ));
    }
    Ok(())
}

impl ClientMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let frame: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::new(ErrorCode::InvalidJson, format!("Invalid JSON: {e}")))?;

        let kind = frame
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProtocolError::new(ErrorCode::MissingType, "Message type is required"))?;

        let data = match frame.get("data") {
            None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
            Some(data) => data.clone(),
        };

        match kind {
            "start_order_processing" => {
                let d: StartData = field(kind, data)?;
                non_empty(kind, "order_text", &d.order_text)?;
                Ok(Self::StartOrderProcessing {
                    order_text: d.order_text,
                    options: d.options.unwrap_or_default(),
                })
            }
            "clarification_response" => {
                let d: ResponseData = field(kind, data)?;
                non_empty(kind, "clarification_id", &d.clarification_id)?;
                Ok(Self::ClarificationResponse {
                    clarification_id: d.clarification_id,
                    response: d.response,
                })
            }
            "cancel_processing" => {
                let d: CancelData = field(kind, data)?;
                non_empty(kind, "run_id", &d.run_id)?;
                Ok(Self::CancelProcessing {
                    run_id: d.run_id,
                    reason: d.reason,
                })
            }
            "get_processing_status" => {
                let d: StatusData = field(kind, data)?;
                Ok(Self::GetProcessingStatus { run_id: d.run_id })
            }
            other => Err(ProtocolError::new(
                ErrorCode::UnknownType,
                format!("Unknown message type: {other}"),
            )),
        }
    }

    /// Wire name of this message type
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartOrderProcessing { .. } => "start_order_processing",
            Self::ClarificationResponse { .. } => "clarification_response",
            Self::CancelProcessing { .. } => "cancel_processing",
            Self::GetProcessingStatus { .. } => "get_processing_status",
        }
    }
}
