//! Registry - Live connections and run sessions
//!
//! The registry is the single owner of per-client connection state and
//! per-run session state. Everything else talks to clients through
//! [`ConnectionRegistry::send`].

use std::sync::Arc;

pub mod manager;
pub mod types;

pub use manager::{ConnectionRegistry, SweepReport};
pub use types::{Connection, ConnectionStats, RunSession};

/// Shared registry type
pub type SharedRegistry = Arc<ConnectionRegistry>;

#[cfg(test)]
mod tests;
