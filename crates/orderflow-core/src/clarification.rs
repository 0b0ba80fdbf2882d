//! Clarification - Question/answer rendezvous with a connected client
//!
//! A tool that needs human input calls [`ClarificationCoordinator::request`],
//! which sends a `clarification_request` and suspends until exactly one of
//! a valid answer, the timeout watcher, or a cancellation resolves it.

use std::sync::Arc;

pub mod coordinator;
pub mod types;

pub use coordinator::ClarificationCoordinator;
pub use types::{
    ClarificationContext, ClarificationError, ClarificationRequest, ClarificationStats,
    ClarificationStatus,
};

/// Shared coordinator type
pub type SharedCoordinator = Arc<ClarificationCoordinator>;

#[cfg(test)]
mod tests;
