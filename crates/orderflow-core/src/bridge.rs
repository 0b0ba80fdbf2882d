//! Bridge - Tool execution across the sync/async boundary
//!
//! Workflows call tools synchronously from blocking worker threads. The
//! bridge instruments each call (idempotency, step reporting), drives async
//! tools on a dedicated runtime, and turns clarification tools into a
//! question to the client while the worker thread waits on a [`Handoff`].
//!
//! # Module Structure
//!
//! - `handoff`: single-assignment cross-thread slot
//! - `context`: thread-local [`RunContext`](orderflow_tools::RunContext) fallback
//! - `runtime`: dedicated runtime for async tools
//! - `types`: `BridgeError`, `BridgeSettings`
//! - `core`: `ToolBridge`

pub mod context;
mod core;
mod handoff;
mod runtime;
mod types;


pub use core::ToolBridge;
pub use handoff::Handoff;
pub use runtime::ToolRuntime;
pub use types::{BridgeError, BridgeSettings};
