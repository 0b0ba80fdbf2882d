//! Health check endpoint
//!
//! `/health` reports liveness plus connection and clarification counters.

use axum::extract::Extension;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use orderflow_core::{ClarificationStats, ConnectionStats, MessageRouter};
use serde::Serialize;
use std::sync::Arc;

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub connections: ConnectionStats,
    pub clarifications: ClarificationStats,
}

async fn health_check(Extension(router): Extension<Arc<MessageRouter>>) -> Json<HealthResponse> {
    let orchestrator = router.orchestrator();
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        connections: orchestrator.registry().stats(),
        clarifications: orchestrator.coordinator().stats(),
    })
}

/// Create health routes
pub fn health_routes() -> Router {
    Router::new().route("/health", get(health_check))
}
