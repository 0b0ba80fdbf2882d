//! WebSocket module for Orderflow
//!
//! One endpoint, `/ws/:client_id`. The path segment is the client identity;
//! reconnecting with the same ID replaces the previous socket and inherits
//! its runs.

mod connection;

pub use connection::ws_handler;

use axum::{routing::get, Router};

/// Create the WebSocket router
pub fn websocket_router() -> Router {
    Router::new().route("/ws/:client_id", get(ws_handler))
}
