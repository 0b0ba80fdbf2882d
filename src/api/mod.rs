//! HTTP API module for Orderflow

mod health;

pub use health::health_routes;
