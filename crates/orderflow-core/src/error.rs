//! Error types for orderflow-core

use thiserror::Error;

use crate::bridge::BridgeError;
use crate::clarification::ClarificationError;
use crate::protocol::ProtocolError;
use crate::transport::TransportError;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level send or close failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed inbound message
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Unknown run, connection or clarification
    #[error("not found: {0}")]
    NotFound(String),

    /// Clarification timed out, was cancelled or could not be delivered
    #[error("clarification error: {0}")]
    Clarification(#[from] ClarificationError),

    /// Tool execution through the bridge failed
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// The workflow gave up on the order
    #[error("workflow error: {0}")]
    Workflow(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error (serialization, task join, etc.)
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization: {err}"))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
