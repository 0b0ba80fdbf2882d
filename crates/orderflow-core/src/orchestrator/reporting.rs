//! Step, phase and progress pushes
//!
//! Every push updates the session and enqueues its frame under the
//! registry's session lock, and is dropped if the run already reached a
//! final status.

use tracing::{debug, info};

use super::core::RunOrchestrator;
use super::types::StepReport;
use crate::protocol::{RunStatus, ServerMessage, StepStatus};

impl RunOrchestrator {
    /// Forward a step event to the run's client.
    ///
    /// Updates `current_step`, counts completed steps and recomputes
    /// progress. Returns `false` if the run is unknown or finished, in which
    /// case nothing is sent.
    pub fn report_step(&self, run_id: &str, report: StepReport) -> bool {
        let step_id = report.step_id.clone();
        let status = report.status;
        let sent = self.registry.update_and_send(run_id, |s| {
            if s.is_terminal() {
                return Vec::new();
            }
            s.current_step = Some(report.step_name.clone());
            if report.status == StepStatus::Completed {
                s.record_completed_step();
            }
            info!(
                run_id = %run_id,
                step_id = %report.step_id,
                step = %report.step_name,
                status = ?report.status,
                "Step update"
            );
            vec![ServerMessage::StepUpdate {
                run_id: run_id.to_string(),
                step_id: report.step_id,
                step_name: report.step_name,
                status: report.status,
                tool_name: report.tool_name,
                progress_percentage: s.total_steps.map(|_| s.progress_pct),
                output: report.output,
                error: report.error,
                execution_time_ms: report.duration_ms,
            }]
        });

        if !sent {
            debug!(
                run_id = %run_id,
                step_id = %step_id,
                status = ?status,
                "Dropping step update for inactive run"
            );
        }
        sent
    }

    /// Move the run to a new workflow phase.
    pub fn report_phase(&self, run_id: &str, to_phase: &str, description: &str) -> bool {
        self.registry.update_and_send(run_id, |s| {
            if s.is_terminal() {
                return Vec::new();
            }
            let from_phase = s.current_phase.replace(to_phase.to_string());
            debug!(run_id = %run_id, from = ?from_phase, to = %to_phase, "Phase transition");
            vec![ServerMessage::PhaseTransition {
                run_id: run_id.to_string(),
                from_phase,
                to_phase: to_phase.to_string(),
                description: description.to_string(),
            }]
        })
    }

    /// Push a free-form progress update.
    pub fn report_progress(
        &self,
        run_id: &str,
        current_step: &str,
        progress_percentage: f64,
        message: Option<&str>,
    ) -> bool {
        let pct = progress_percentage.clamp(0.0, 100.0);
        self.registry.update_and_send(run_id, |s| {
            if s.is_terminal() {
                return Vec::new();
            }
            s.current_step = Some(current_step.to_string());
            s.progress_pct = pct;
            vec![ServerMessage::ProgressUpdate {
                run_id: run_id.to_string(),
                current_step: current_step.to_string(),
                progress_percentage: pct,
                message: message.map(str::to_string),
            }]
        })
    }

    /// Record the number of steps a run will take.
    pub fn set_total_steps(&self, run_id: &str, total: u32) {
        self.registry.update_session(run_id, |s| {
            if !s.is_terminal() {
                s.set_total_steps(total);
            }
        });
    }

    /// Flip a run between `running` and `waiting_clarification`.
    pub fn set_waiting(&self, run_id: &str, waiting: bool) {
        let status = if waiting {
            RunStatus::WaitingClarification
        } else {
            RunStatus::Running
        };
        self.registry.update_session(run_id, |s| {
            if !s.is_terminal() {
                s.status = status;
            }
        });
    }

    /// Move a freshly started run to `running` and tell the client.
    pub(crate) fn mark_running(&self, run_id: &str) -> bool {
        self.registry.update_and_send(run_id, |s| {
            if s.status != RunStatus::Started {
                return Vec::new();
            }
            s.status = RunStatus::Running;
            vec![ServerMessage::ProcessingStatus {
                run_id: run_id.to_string(),
                status: RunStatus::Running,
                current_step: None,
                message: Some("Starting order processing workflow...".to_string()),
                progress_percentage: None,
                steps_completed: None,
                total_steps: s.total_steps,
            }]
        })
    }
}
