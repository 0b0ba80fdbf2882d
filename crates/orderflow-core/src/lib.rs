//! Orderflow Core - Clarification & Step-Execution Coordination Engine
//!
//! This crate provides the machinery that lets a synchronous, multi-threaded
//! workflow pause mid-flight to ask a connected client a question, while
//! streaming step-by-step progress over a websocket session:
//! - Registry: live client connections and run sessions
//! - Tracker: per-run idempotency ledger and step ID allocation
//! - Clarification: question/answer rendezvous with exactly-once resolution
//! - Orchestrator: run lifecycle and progress reporting
//! - Bridge: tool execution across the sync/async boundary
//! - Dispatch: inbound message routing

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bridge;
pub mod clarification;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod shutdown;
mod sync;
#[cfg(test)]
mod testing;
pub mod tracker;
pub mod transport;
pub mod workflow;

pub use bridge::{BridgeError, BridgeSettings, Handoff, ToolBridge};
pub use clarification::{
    ClarificationContext, ClarificationCoordinator, ClarificationError, ClarificationRequest,
    ClarificationStats, ClarificationStatus,
};
pub use config::{ClarificationFallback, EngineConfig};
pub use dispatch::MessageRouter;
pub use error::{Error, Result};
pub use orchestrator::{RunOrchestrator, SessionStats, StepReport};
pub use protocol::{ClientMessage, ErrorCode, ProtocolError, RunStatus, ServerMessage, StepStatus};
pub use registry::{Connection, ConnectionRegistry, ConnectionStats, RunSession};
pub use shutdown::{wait_for_shutdown_signal, ShutdownController, ShutdownPhase};
pub use tracker::{ExecutionRecord, ExecutionTracker, RecordStatus};
pub use transport::{ChannelTransport, Outbound, Transport, TransportError};
pub use workflow::{OrderRequest, Workflow};
