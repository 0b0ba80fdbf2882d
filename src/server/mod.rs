//! Server module for Orderflow
//!
//! # Module Structure
//!
//! - `config`: Configuration structures
//! - `loader`: Configuration loading from files and environment
//! - `logging`: Tracing subscriber setup
//! - `background_tasks`: Heartbeat and sweep loops
//! - `init`: Component wiring and the main run loop

mod background_tasks;
pub mod config;
mod init;
mod loader;
pub mod logging;

pub use config::AppConfig;
pub use init::{build_app, run};
pub use loader::load_config;
