//! Orderflow Tools - Tool contracts and registry
//!
//! This crate provides the tool system for Orderflow:
//! - Registry: Tool registration and lookup
//! - Context: Run/client identity handed to every tool invocation
//! - Builtins: Order processing tools (extraction, inventory, pricing, logistics)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod builtins;
pub mod context;
pub mod error;
pub mod registry;

pub use builtins::register_builtins;
pub use context::{RunContext, ToolContext};
pub use error::{Error, Result};
pub use registry::{BlockingTool, Tool, ToolCategory, ToolDefinition, ToolHandle, ToolRegistry};
