//! Background liveness tasks
//!
//! Both loops stop when the shutdown controller cancels its token.

use orderflow_core::{ConnectionRegistry, EngineConfig, RunOrchestrator, ShutdownController};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Push a heartbeat to every connected client once per interval
pub fn start_heartbeat_task(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    shutdown_controller: &ShutdownController,
) -> JoinHandle<()> {
    let shutdown = shutdown_controller.token();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    let delivered = registry.heartbeat();
                    debug!(delivered, "Heartbeat tick");
                }
                () = shutdown.cancelled() => {
                    info!("Heartbeat task shutting down");
                    break;
                }
            }
        }
    });
    info!(interval_secs = interval.as_secs(), "Heartbeat task started");
    handle
}

/// Drop idle connections, stale sessions and old clarifications
pub fn start_sweep_task(
    orchestrator: Arc<RunOrchestrator>,
    engine: &EngineConfig,
    shutdown_controller: &ShutdownController,
) -> JoinHandle<()> {
    let shutdown = shutdown_controller.token();
    let interval = engine.sweep_interval();
    let idle_timeout = engine.idle_timeout();
    let retention = engine.clarification_retention();

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    orchestrator.sweep(idle_timeout, retention);
                }
                () = shutdown.cancelled() => {
                    info!("Sweep task shutting down");
                    break;
                }
            }
        }
    });
    info!(
        interval_secs = interval.as_secs(),
        idle_timeout_secs = idle_timeout.as_secs(),
        "Sweep task started"
    );
    handle
}
