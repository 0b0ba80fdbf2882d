//! Orchestrator - Run lifecycle and progress reporting
//!
//! The orchestrator owns the life of a run: it creates the session, hands the
//! workflow to a blocking worker thread, forwards step, phase and progress
//! reports to the owning client, and settles the run exactly once as
//! completed, failed or cancelled.
//!
//! # Module Structure
//!
//! - `types`: `StepReport`, `SessionStats`
//! - `core`: `RunOrchestrator` struct, builders, start/cancel/status
//! - `reporting`: step, phase and progress pushes
//! - `lifecycle`: workflow execution, completion, failure and cleanup

mod core;
mod lifecycle;
mod reporting;
mod types;


pub use core::RunOrchestrator;
pub use types::{SessionStats, StepReport};
