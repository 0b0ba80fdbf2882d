use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::protocol::RunStatus;
use crate::transport::Transport;

/// Snapshot of a live client connection
#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    /// Client ID
    pub client_id: String,
    /// When the client connected
    pub connected_at: DateTime<Utc>,
    /// Last inbound or outbound message
    pub last_activity: DateTime<Utc>,
    /// Runs owned by this connection
    pub run_ids: HashSet<String>,
}

pub(crate) struct ConnectionEntry {
    pub(crate) info: Connection,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) last_seen: Instant,
}

impl ConnectionEntry {
    pub(crate) fn new(client_id: &str, transport: Arc<dyn Transport>) -> Self {
        let now = Utc::now();
        Self {
            info: Connection {
                client_id: client_id.to_string(),
                connected_at: now,
                last_activity: now,
                run_ids: HashSet::new(),
            },
            transport,
            last_seen: Instant::now(),
        }
    }

    pub(crate) fn touch(&mut self) {
        self.info.last_activity = Utc::now();
        self.last_seen = Instant::now();
    }
}

/// State of one workflow execution
#[derive(Debug, Clone, Serialize)]
pub struct RunSession {
    /// Run ID
    pub run_id: String,
    /// Owning client
    pub client_id: String,
    /// Lifecycle status
    pub status: RunStatus,
    /// Name of the step currently executing
    pub current_step: Option<String>,
    /// Current workflow phase
    pub current_phase: Option<String>,
    /// Number of completed steps
    pub steps_completed: u32,
    /// Known step count
    pub total_steps: Option<u32>,
    /// Progress, 0-100
    pub progress_pct: f64,
    /// Failure or cancellation reason
    pub error: Option<String>,
    /// Final workflow output
    pub result: Option<Value>,
    /// Creation time
    pub start_time: DateTime<Utc>,
    /// Last update
    pub last_activity: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) cancel: CancellationToken,
    #[serde(skip)]
    pub(crate) last_seen: Instant,
}

impl RunSession {
    pub(crate) fn new(run_id: &str, client_id: &str, total_steps: Option<u32>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            client_id: client_id.to_string(),
            status: RunStatus::Started,
            current_step: None,
            current_phase: None,
            steps_completed: 0,
            total_steps,
            progress_pct: 0.0,
            error: None,
            result: None,
            start_time: now,
            last_activity: now,
            cancel: CancellationToken::new(),
            last_seen: Instant::now(),
        }
    }

    /// Whether the session has reached a final status
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Token cancelled when this run is cancelled
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Count a completed step and recompute progress.
    pub fn record_completed_step(&mut self) {
        self.steps_completed += 1;
        self.recompute_progress();
    }

    /// Set the step count and recompute progress.
    pub fn set_total_steps(&mut self, total: u32) {
        self.total_steps = Some(total);
        self.recompute_progress();
    }

    fn recompute_progress(&mut self) {
        if let Some(total) = self.total_steps.filter(|t| *t > 0) {
            let pct = f64::from(self.steps_completed) / f64::from(total) * 100.0;
            self.progress_pct = pct.min(100.0);
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Utc::now();
        self.last_seen = Instant::now();
    }
}

/// Connection statistics
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    /// Live connections
    pub active_connections: usize,
    /// Tracked run sessions (any status)
    pub active_processing_sessions: usize,
    /// Session count per status
    pub sessions_by_status: BTreeMap<String, usize>,
}
