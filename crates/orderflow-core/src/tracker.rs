//! Tracker - Per-run idempotency ledger
//!
//! Records which tool invocations have run inside each run, hands out
//! collision-free step IDs (`{tool}_{run prefix}_{seq}`), and lets the bridge
//! short-circuit a tool that already completed in the same run.
//!
//! One mutex guards every map. Each operation is a single lookup or insert
//! under that lock; nothing is held across tool execution.

use chrono::{DateTime, Utc};
use orderflow_tools::RunContext;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::bridge::Handoff;
use crate::sync::lock;

/// Outcome stored in an execution record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Tool returned a value
    Completed,
    /// Tool returned an error
    Failed,
}

/// One attempted tool invocation
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    /// Run ID
    pub run_id: String,
    /// Deduplication key (usually the tool name)
    pub tool_id: String,
    /// Unique step ID
    pub step_id: String,
    /// When the record was written
    pub execution_time: DateTime<Utc>,
    /// Outcome
    pub status: RecordStatus,
    /// Output on success
    pub result: Option<Value>,
    /// Error message on failure
    pub error: Option<String>,
}

/// Result of [`ExecutionTracker::claim`]
#[derive(Debug)]
pub enum Claim {
    /// Nobody ran this tool yet; execute it under `step_id`, then call
    /// [`ExecutionTracker::mark_executed`]
    Execute {
        /// Freshly allocated step ID
        step_id: String,
    },
    /// The tool already completed in this run
    Cached(ExecutionRecord),
    /// Another thread is executing the same tool right now; its record
    /// lands in the handoff when it finishes
    InFlight(Arc<Handoff<ExecutionRecord>>),
}

#[derive(Default)]
struct RunLedger {
    next_seq: u64,
    steps: HashSet<String>,
    records: Vec<ExecutionRecord>,
    completed: HashMap<String, usize>,
    in_flight: HashMap<String, (String, Arc<Handoff<ExecutionRecord>>)>,
}

impl RunLedger {
    fn allocate(&mut self, prefix: &str, tool_name: &str) -> String {
        self.next_seq += 1;
        format!("{tool_name}_{prefix}_{:04}", self.next_seq)
    }
}

/// Per-run idempotency ledger
#[derive(Default)]
pub struct ExecutionTracker {
    runs: Mutex<HashMap<String, RunLedger>>,
}

impl ExecutionTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next step ID for a tool in a run.
    ///
    /// IDs are unique per run by construction: the sequence number is a
    /// per-run counter incremented under the ledger lock.
    pub fn next_step_id(&self, ctx: &RunContext, tool_name: &str) -> String {
        let mut runs = lock(&self.runs);
        runs.entry(ctx.run_id.clone())
            .or_default()
            .allocate(ctx.run_prefix(), tool_name)
    }

    /// Atomically decide how a tool invocation should proceed.
    pub fn claim(&self, ctx: &RunContext, tool_id: &str, tool_name: &str) -> Claim {
        let mut runs = lock(&self.runs);
        let ledger = runs.entry(ctx.run_id.clone()).or_default();

        if let Some(&idx) = ledger.completed.get(tool_id) {
            return Claim::Cached(ledger.records[idx].clone());
        }
        if let Some((_, handoff)) = ledger.in_flight.get(tool_id) {
            return Claim::InFlight(Arc::clone(handoff));
        }

        let step_id = ledger.allocate(ctx.run_prefix(), tool_name);
        ledger
            .in_flight
            .insert(tool_id.to_string(), (step_id.clone(), Arc::new(Handoff::new())));
        Claim::Execute { step_id }
    }

    /// `true` unless `step_id` was already recorded for `run_id`.
    #[must_use]
    pub fn should_execute(&self, run_id: &str, tool_id: &str, step_id: &str) -> bool {
        let runs = lock(&self.runs);
        let seen = runs
            .get(run_id)
            .is_some_and(|ledger| ledger.steps.contains(step_id));
        if seen {
            debug!(run_id = %run_id, tool_id = %tool_id, step_id = %step_id, "Step already recorded");
        }
        !seen
    }

    /// The completed record for a tool in a run, if any.
    #[must_use]
    pub fn completed_result(&self, run_id: &str, tool_id: &str) -> Option<ExecutionRecord> {
        let runs = lock(&self.runs);
        let ledger = runs.get(run_id)?;
        ledger
            .completed
            .get(tool_id)
            .map(|&idx| ledger.records[idx].clone())
    }

    /// Record the outcome of a step.
    ///
    /// A `completed` record for a step is final; later writes for the same
    /// step are ignored. A `failed` record may be replaced by a later write.
    /// Runs with no ledger (never claimed, or already cleaned up) are ignored.
    pub fn mark_executed(
        &self,
        run_id: &str,
        tool_id: &str,
        step_id: &str,
        status: RecordStatus,
        result: Option<Value>,
        error: Option<String>,
    ) {
        let record = ExecutionRecord {
            run_id: run_id.to_string(),
            tool_id: tool_id.to_string(),
            step_id: step_id.to_string(),
            execution_time: Utc::now(),
            status,
            result,
            error,
        };

        let waiters = {
            let mut runs = lock(&self.runs);
            let Some(ledger) = runs.get_mut(run_id) else {
                debug!(run_id = %run_id, step_id = %step_id, "Dropping record for untracked run");
                return;
            };

            let idx = match ledger.records.iter().position(|r| r.step_id == step_id) {
                Some(idx) if ledger.records[idx].status == RecordStatus::Completed => {
                    warn!(run_id = %run_id, step_id = %step_id, "Ignoring write to completed step");
                    return;
                }
                Some(idx) => {
                    ledger.records[idx] = record.clone();
                    idx
                }
                None => {
                    ledger.records.push(record.clone());
                    ledger.steps.insert(step_id.to_string());
                    ledger.records.len() - 1
                }
            };

            if status == RecordStatus::Completed {
                ledger.completed.entry(tool_id.to_string()).or_insert(idx);
            }

            let owns_claim = ledger
                .in_flight
                .get(tool_id)
                .is_some_and(|(owner, _)| owner == step_id);
            if owns_claim {
                ledger.in_flight.remove(tool_id).map(|(_, handoff)| handoff)
            } else {
                None
            }
        };

        if let Some(handoff) = waiters {
            handoff.fill(record);
        }
    }

    /// All records for a run, in execution order.
    #[must_use]
    pub fn get_execution_records(&self, run_id: &str) -> Vec<ExecutionRecord> {
        lock(&self.runs)
            .get(run_id)
            .map(|ledger| ledger.records.clone())
            .unwrap_or_default()
    }

    /// Drop all state for a run. Unknown runs are a no-op.
    pub fn cleanup(&self, run_id: &str) -> bool {
        let removed = lock(&self.runs).remove(run_id);
        if let Some(ledger) = &removed {
            debug!(run_id = %run_id, records = ledger.records.len(), "Cleaned up execution records");
        }
        removed.is_some()
    }

    /// Number of runs with tracking state
    #[must_use]
    pub fn run_count(&self) -> usize {
        lock(&self.runs).len()
    }
}
