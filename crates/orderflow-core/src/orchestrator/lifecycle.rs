//! Workflow execution, completion, failure and cleanup

use chrono::Utc;
use orderflow_tools::RunContext;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::core::RunOrchestrator;
use crate::bridge::{context, ToolBridge};
use crate::error::{Error, Result};
use crate::protocol::{ErrorCode, RunStatus, ServerMessage};
use crate::workflow::{OrderRequest, Workflow};

impl RunOrchestrator {
    /// Run `workflow` for an already started run on a blocking worker thread.
    ///
    /// The worker carries the run's [`RunContext`] in its thread-local scope
    /// so tools reached through the bridge without explicit context still
    /// resolve it. When the workflow returns (or panics) the run is settled
    /// exactly once.
    pub fn spawn_run(
        self: &Arc<Self>,
        run_id: &str,
        order: OrderRequest,
        workflow: Arc<dyn Workflow>,
        bridge: Arc<ToolBridge>,
    ) -> Result<JoinHandle<()>> {
        let runtime = self
            .runtime
            .clone()
            .ok_or_else(|| Error::Internal("no tokio runtime available for workflows".into()))?;
        let session = self
            .registry
            .session(run_id)
            .ok_or_else(|| Error::NotFound(format!("run {run_id}")))?;

        let ctx = RunContext::new(run_id, session.client_id.as_str());
        let guard = self.shutdown.as_ref().map(|s| s.register_task());
        self.mark_running(run_id);

        let worker = runtime.spawn_blocking(move || {
            context::scope(&ctx, || workflow.execute(&ctx, &order, &bridge))
        });

        let this = Arc::clone(self);
        let run_id = run_id.to_string();
        Ok(runtime.spawn(async move {
            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "Workflow thread aborted");
                    Err(Error::Internal(format!("workflow thread aborted: {e}")))
                }
            };
            this.finish(&run_id, outcome);
            drop(guard);
        }))
    }

    fn finish(&self, run_id: &str, outcome: Result<Value>) {
        let cancelled = self
            .registry
            .session(run_id)
            .is_some_and(|s| s.status == RunStatus::Cancelled);
        if cancelled {
            debug!(run_id = %run_id, ok = outcome.is_ok(), "Workflow returned after cancellation");
            self.schedule_cleanup(run_id);
            return;
        }

        match outcome {
            Ok(result) => {
                self.complete_run(run_id, result);
            }
            Err(e) => {
                self.fail_run(run_id, &e.to_string());
            }
        }
    }

    /// Mark a run completed and push the final output.
    ///
    /// Returns `false` if the run is unknown or already finished. The
    /// session stays queryable until the cleanup delay elapses.
    pub fn complete_run(&self, run_id: &str, result: Value) -> bool {
        let mut settled = None;
        self.registry.update_and_send(run_id, |s| {
            if s.is_terminal() {
                return Vec::new();
            }
            s.status = RunStatus::Completed;
            s.result = Some(result.clone());
            s.progress_pct = 100.0;
            let elapsed = (Utc::now() - s.start_time).to_std().unwrap_or_default();
            settled = Some((s.client_id.clone(), elapsed));
            vec![ServerMessage::ProcessingCompleted {
                run_id: run_id.to_string(),
                final_output: result,
                processing_time_seconds: elapsed.as_secs_f64(),
                message: "Order processing completed successfully".to_string(),
            }]
        });

        let Some((client_id, elapsed)) = settled else {
            debug!(run_id = %run_id, "Completion ignored; run unknown or finished");
            return false;
        };

        info!(
            run_id = %run_id,
            client_id = %client_id,
            elapsed_ms = elapsed.as_millis() as u64,
            "Run completed"
        );
        self.schedule_cleanup(run_id);
        true
    }

    /// Mark a run failed, push an error and the final status. Never panics
    /// or errors; returns `false` if the run is unknown or already finished.
    pub fn fail_run(&self, run_id: &str, error: &str) -> bool {
        let message = format!("Processing failed: {error}");
        let mut settled = None;
        self.registry.update_and_send(run_id, |s| {
            if s.is_terminal() {
                return Vec::new();
            }
            s.status = RunStatus::Failed;
            s.error = Some(error.to_string());
            settled = Some(s.client_id.clone());
            vec![
                ServerMessage::Error {
                    error_type: "processing_error".to_string(),
                    error_code: ErrorCode::WorkflowError,
                    message: message.clone(),
                    recoverable: false,
                    run_id: Some(run_id.to_string()),
                },
                ServerMessage::ProcessingStatus {
                    run_id: run_id.to_string(),
                    status: RunStatus::Failed,
                    current_step: None,
                    message: Some(message.clone()),
                    progress_percentage: None,
                    steps_completed: Some(s.steps_completed),
                    total_steps: s.total_steps,
                },
            ]
        });

        let Some(client_id) = settled else {
            debug!(run_id = %run_id, "Failure ignored; run unknown or finished");
            return false;
        };

        error!(run_id = %run_id, client_id = %client_id, error = %error, "Run failed");
        self.schedule_cleanup(run_id);
        true
    }

    /// Drop the tracker records and session of a run right away.
    pub fn cleanup_run(&self, run_id: &str) -> bool {
        let records = self.tracker.cleanup(run_id);
        let session = self.registry.remove_session(run_id).is_some();
        if records || session {
            debug!(run_id = %run_id, "Cleaned up run");
        }
        records || session
    }

    pub(crate) fn schedule_cleanup(&self, run_id: &str) {
        let Some(runtime) = &self.runtime else {
            warn!(run_id = %run_id, "No runtime for delayed cleanup; cleaning up now");
            self.cleanup_run(run_id);
            return;
        };

        let registry = Arc::clone(&self.registry);
        let tracker = Arc::clone(&self.tracker);
        let delay = self.cleanup_delay;
        let run_id = run_id.to_string();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            tracker.cleanup(&run_id);
            if registry.remove_session(&run_id).is_some() {
                info!(run_id = %run_id, "Cleaned up finished run");
            }
        });
    }
}
