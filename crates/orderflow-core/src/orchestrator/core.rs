//! RunOrchestrator struct and builder methods

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::SessionStats;
use crate::clarification::SharedCoordinator;
use crate::protocol::{RunStatus, ServerMessage};
use crate::registry::{RunSession, SharedRegistry};
use crate::shutdown::ShutdownController;
use crate::tracker::ExecutionTracker;
use crate::workflow::OrderRequest;

/// Default delay before a finished run's state is dropped
const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_secs(300);

/// Phase every run starts in
pub(crate) const INITIAL_PHASE: &str = "initialization";

/// Drives runs and reports their progress to the owning client
pub struct RunOrchestrator {
    pub(crate) registry: SharedRegistry,
    pub(crate) coordinator: SharedCoordinator,
    pub(crate) tracker: Arc<ExecutionTracker>,
    pub(crate) cleanup_delay: Duration,
    /// Runtime that owns delayed cleanups and workflow threads
    pub(crate) runtime: Option<Handle>,
    pub(crate) shutdown: Option<Arc<ShutdownController>>,
}

impl RunOrchestrator {
    /// Create an orchestrator.
    ///
    /// Captures the current tokio runtime, if any, for delayed cleanup and
    /// for spawning workflow threads; see [`Self::with_runtime`].
    #[must_use]
    pub fn new(
        registry: SharedRegistry,
        coordinator: SharedCoordinator,
        tracker: Arc<ExecutionTracker>,
    ) -> Self {
        Self {
            registry,
            coordinator,
            tracker,
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
            runtime: Handle::try_current().ok(),
            shutdown: None,
        }
    }

    /// Set how long finished runs stay queryable
    #[must_use]
    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }

    /// Use an explicit runtime handle
    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Register workflow threads with a shutdown controller
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Arc<ShutdownController>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Connection registry
    #[must_use]
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Clarification coordinator
    #[must_use]
    pub fn coordinator(&self) -> &SharedCoordinator {
        &self.coordinator
    }

    /// Execution tracker
    #[must_use]
    pub fn tracker(&self) -> &Arc<ExecutionTracker> {
        &self.tracker
    }

    /// Whether new runs may start
    #[must_use]
    pub fn is_accepting_runs(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_none_or(|s| s.is_accepting_work())
    }

    /// Create a run for `client_id` and announce it. Returns the run ID.
    ///
    /// The caller drives execution, usually through [`Self::spawn_run`].
    pub fn start_run(&self, client_id: &str, order: &OrderRequest) -> String {
        let run_id = Uuid::new_v4().to_string();
        let total_steps = order.options.total_steps;

        self.registry.create_session(client_id, &run_id, total_steps);
        self.registry.update_and_send(&run_id, |s| {
            s.current_phase = Some(INITIAL_PHASE.to_string());
            vec![ServerMessage::ProcessingStarted {
                run_id: run_id.clone(),
                message: "Order processing started successfully".to_string(),
                total_steps,
            }]
        });

        info!(
            client_id = %client_id,
            run_id = %run_id,
            order_len = order.order_text.len(),
            "Run started"
        );
        run_id
    }

    /// Cancel a run and any clarification it is waiting on.
    ///
    /// Returns `false` for unknown or already-finished runs. The session is
    /// marked terminal before clarifications are released, so a worker woken
    /// by the cancellation can no longer report steps.
    pub fn cancel_run(&self, run_id: &str, reason: &str) -> bool {
        if !self.registry.cancel_session(run_id, reason) {
            debug!(run_id = %run_id, "Cancel ignored; run unknown or finished");
            return false;
        }

        let released = self.coordinator.cancel_for_run(run_id, reason);
        info!(
            run_id = %run_id,
            reason = %reason,
            clarifications_cancelled = released,
            "Run cancelled"
        );
        self.schedule_cleanup(run_id);
        true
    }

    /// Snapshot of a run
    #[must_use]
    pub fn status(&self, run_id: &str) -> Option<RunSession> {
        self.registry.session(run_id)
    }

    /// Status message for a run, as answered to `get_processing_status`
    #[must_use]
    pub fn status_message(&self, run_id: &str) -> Option<ServerMessage> {
        let session = self.registry.session(run_id)?;
        let phase = session.current_phase.as_deref().unwrap_or("unknown");
        Some(ServerMessage::ProcessingStatus {
            run_id: session.run_id.clone(),
            status: session.status,
            message: Some(format!("Processing in phase: {phase}")),
            current_step: session.current_step.clone(),
            progress_percentage: Some(session.progress_pct),
            steps_completed: Some(session.steps_completed),
            total_steps: session.total_steps,
        })
    }

    /// Active run statistics
    #[must_use]
    pub fn session_stats(&self) -> SessionStats {
        let mut stats = SessionStats::default();
        let mut phases = BTreeMap::new();

        for session in self.registry.sessions() {
            if session.is_terminal() {
                continue;
            }
            stats.active_runs += 1;
            if session.status == RunStatus::WaitingClarification {
                stats.waiting_clarification += 1;
            }
            let phase = session.current_phase.unwrap_or_else(|| "unknown".to_string());
            *phases.entry(phase).or_insert(0) += 1;
        }

        stats.phase_breakdown = phases;
        stats
    }

    /// Periodic maintenance: idle connections, stale sessions, their
    /// execution records and old clarifications.
    pub fn sweep(&self, idle_timeout: Duration, clarification_retention: Duration) {
        let report = self.registry.sweep(idle_timeout);
        for run_id in &report.removed_runs {
            self.tracker.cleanup(run_id);
        }
        let purged = self.coordinator.purge_older_than(clarification_retention);

        if !report.disconnected.is_empty() {
            warn!(
                disconnected = report.disconnected.len(),
                "Idle clients disconnected during sweep"
            );
        }
        debug!(
            removed_runs = report.removed_runs.len(),
            purged_clarifications = purged,
            tracked_runs = self.tracker.run_count(),
            "Sweep complete"
        );
    }
}
