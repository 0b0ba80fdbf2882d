//! Server initialization and main run loop

use super::background_tasks::{start_heartbeat_task, start_sweep_task};
use super::config::AppConfig;
use crate::workflow::ScriptedOrderWorkflow;
use anyhow::{Context, Result};
use axum::{Extension, Router};
use orderflow_core::{
    wait_for_shutdown_signal, BridgeSettings, ClarificationCoordinator, ConnectionRegistry,
    ExecutionTracker, MessageRouter, RunOrchestrator, ShutdownController, ToolBridge,
};
use orderflow_tools::{builtins::register_builtins, ToolRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Upper bound for in-flight runs to finish after a shutdown signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Wire the engine together and build the HTTP router
pub fn build_app(config: &AppConfig, shutdown: &Arc<ShutdownController>) -> Result<(Router, Arc<MessageRouter>)> {
    let registry = Arc::new(ConnectionRegistry::new());
    let coordinator = Arc::new(ClarificationCoordinator::new(Arc::clone(&registry)));
    let tracker = Arc::new(ExecutionTracker::new());
    let orchestrator = Arc::new(
        RunOrchestrator::new(registry, coordinator, tracker)
            .with_cleanup_delay(config.engine.session_cleanup_delay())
            .with_shutdown(Arc::clone(shutdown)),
    );

    let mut tools = ToolRegistry::new();
    register_builtins(&mut tools);
    info!(tools = tools.len(), "Tool registry initialized");

    let bridge = ToolBridge::new(
        Arc::new(tools),
        Arc::clone(&orchestrator),
        BridgeSettings::from(&config.engine),
    )
    .context("Failed to start tool runtime")?;

    let workflow = Arc::new(ScriptedOrderWorkflow::new());
    let router = Arc::new(MessageRouter::new(orchestrator, Arc::new(bridge), workflow));

    let app = Router::new()
        .merge(crate::api::health_routes())
        .merge(crate::websocket::websocket_router())
        .layer(Extension(Arc::clone(&router)))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    Ok((app, router))
}

/// Run the server until a shutdown signal arrives
pub async fn run(config: AppConfig) -> Result<()> {
    info!("Starting Orderflow v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = ShutdownController::with_timeout(DRAIN_TIMEOUT);
    let (app, router) = build_app(&config, &shutdown)?;
    let orchestrator = Arc::clone(router.orchestrator());

    let heartbeat = start_heartbeat_task(
        Arc::clone(orchestrator.registry()),
        config.engine.heartbeat_interval(),
        &shutdown,
    );
    let sweep = start_sweep_task(Arc::clone(&orchestrator), &config.engine, &shutdown);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("HTTP server listening on http://{}", addr);

    let signal_orchestrator = Arc::clone(&orchestrator);
    let signal_shutdown = Arc::clone(&shutdown);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            let disconnected = signal_orchestrator.registry().disconnect_all("Server shutdown");
            info!(disconnected, "Disconnected all clients");
            signal_shutdown.shutdown().await;
        })
        .await
        .context("HTTP server error")?;

    for (name, handle) in [("heartbeat", heartbeat), ("sweep", sweep)] {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "Background task ended abnormally");
        }
    }

    info!("Orderflow shutdown complete");
    Ok(())
}
