//! Shutdown - Coordinated stop of background loops and in-flight runs
//!
//! Background loops hold a child token from [`ShutdownController::token`];
//! every workflow thread holds a [`TaskGuard`]. Shutdown stops accepting
//! runs, cancels the loops, then waits for the guards to drop, up to a
//! bounded drain timeout.
//!
//! ```ignore
//! let shutdown = ShutdownController::new();
//! tokio::spawn(heartbeat_loop(registry, shutdown.token()));
//!
//! // on SIGTERM
//! registry.disconnect_all("Server shutdown");
//! shutdown.shutdown().await;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default drain timeout in seconds
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

/// Shutdown phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// No new runs are accepted; waiting for in-flight runs to finish
    Draining,
    /// Shutdown complete
    Terminated,
}

impl ShutdownPhase {
    fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Terminated,
        }
    }
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Coordinates graceful shutdown
pub struct ShutdownController {
    cancel_token: CancellationToken,
    phase: AtomicU32,
    initiated: AtomicBool,
    active_tasks: AtomicUsize,
    idle: Notify,
    drain_timeout: Duration,
}

impl ShutdownController {
    /// Controller with the default drain timeout
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS))
    }

    /// Controller with a custom drain timeout
    #[must_use]
    pub fn with_timeout(drain_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            cancel_token: CancellationToken::new(),
            phase: AtomicU32::new(ShutdownPhase::Running as u32),
            initiated: AtomicBool::new(false),
            active_tasks: AtomicUsize::new(0),
            idle: Notify::new(),
            drain_timeout,
        })
    }

    /// Token cancelled when shutdown begins draining
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u32(self.phase.load(Ordering::SeqCst))
    }

    /// Whether new runs may start
    #[must_use]
    pub fn is_accepting_work(&self) -> bool {
        self.phase() == ShutdownPhase::Running
    }

    /// Track an in-flight unit of work until the guard drops
    #[must_use]
    pub fn register_task(self: &Arc<Self>) -> TaskGuard {
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
        TaskGuard {
            controller: Arc::clone(self),
        }
    }

    /// In-flight task count
    #[must_use]
    pub fn active_task_count(&self) -> usize {
        self.active_tasks.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.store(phase as u32, Ordering::SeqCst);
        info!(phase = %phase, "Shutdown phase changed");
    }

    fn task_finished(&self) {
        if self.active_tasks.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Stop accepting work, cancel background loops and drain in-flight
    /// tasks. A second call is a no-op.
    pub async fn shutdown(&self) {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Shutdown already initiated");
            return;
        }

        info!("Initiating graceful shutdown");
        self.set_phase(ShutdownPhase::Draining);
        self.cancel_token.cancel();

        let drained = tokio::time::timeout(self.drain_timeout, async {
            loop {
                let notified = self.idle.notified();
                if self.active_task_count() == 0 {
                    break;
                }
                notified.await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                active_tasks = self.active_task_count(),
                timeout_secs = self.drain_timeout.as_secs(),
                "Drain timeout exceeded, abandoning in-flight runs"
            );
        } else {
            info!("All in-flight runs finished");
        }

        self.set_phase(ShutdownPhase::Terminated);
    }
}

/// Keeps a task counted as in flight until dropped
pub struct TaskGuard {
    controller: Arc<ShutdownController>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.controller.task_finished();
    }
}

impl std::fmt::Debug for TaskGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGuard")
            .field("active_tasks", &self.controller.active_task_count())
            .finish()
    }
}

/// Wait for Ctrl+C or SIGTERM.
///
/// A signal source that cannot be installed is logged and never fires; the
/// other one still works.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
