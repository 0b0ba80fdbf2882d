//! Transport seam between the registry and a concrete socket.
//!
//! `transmit` only enqueues. The connection's own writer task drains the
//! queue, so frames for one client are written in order from one place and
//! callers on worker threads never touch socket I/O.

use thiserror::Error;
use tokio::sync::mpsc;

/// Transport failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer's writer is gone
    #[error("transport closed")]
    Closed,
    /// Any other transport-specific failure
    #[error("transport failure: {0}")]
    Failed(String),
}

/// One outbound connection
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Queue a serialized frame for delivery
    fn transmit(&self, frame: String) -> Result<(), TransportError>;

    /// Ask the writer to close the connection
    fn close(&self, reason: &str);
}

/// Item drained by a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text frame
    Text(String),
    /// Close the socket with this reason
    Close(String),
}

/// [`Transport`] backed by an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelTransport {
    /// Create a transport and the receiver its writer task should drain
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn transmit(&self, frame: String) -> Result<(), TransportError> {
        self.tx
            .send(Outbound::Text(frame))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self, reason: &str) {
        let _ = self.tx.send(Outbound::Close(reason.to_string()));
    }
}
