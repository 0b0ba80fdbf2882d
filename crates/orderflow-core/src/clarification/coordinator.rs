use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{
    ClarificationContext, ClarificationError, ClarificationRequest, ClarificationStats,
    ClarificationStatus,
};
use crate::protocol::{AckStatus, ServerMessage};
use crate::registry::ConnectionRegistry;
use crate::sync::lock;

type Outcome = Result<String, ClarificationError>;

struct Waiter {
    sender: oneshot::Sender<Outcome>,
    watcher: Option<AbortHandle>,
}

#[derive(Default)]
struct State {
    contexts: HashMap<String, ClarificationContext>,
    waiters: HashMap<String, Waiter>,
}

impl State {
    /// Move a pending clarification to `status` and detach its waiter.
    ///
    /// `None` if the clarification is unknown or already resolved; this is
    /// the single point that makes resolution exactly-once.
    fn settle(
        &mut self,
        clarification_id: &str,
        status: ClarificationStatus,
        response: Option<&str>,
    ) -> Option<(ClarificationContext, Option<Waiter>)> {
        let ctx = self.contexts.get_mut(clarification_id)?;
        if !ctx.is_pending() {
            return None;
        }
        ctx.status = status;
        ctx.response = response.map(str::to_string);
        ctx.responded_at = Some(Utc::now());
        let snapshot = ctx.clone();
        Some((snapshot, self.waiters.remove(clarification_id)))
    }
}

/// Coordinates clarification requests and responses
pub struct ClarificationCoordinator {
    registry: Arc<ConnectionRegistry>,
    state: Mutex<State>,
}

impl ClarificationCoordinator {
    /// Create a coordinator that talks to clients through `registry`
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(State::default()),
        }
    }

    /// Ask a client a question and wait for the outcome.
    ///
    /// Resolves with the answer, or with a [`ClarificationError`] on timeout,
    /// cancellation (explicit or through `cancel`), or if the question could
    /// not be delivered. Only the calling task is suspended.
    pub async fn request(
        self: &Arc<Self>,
        request: ClarificationRequest,
        cancel: CancellationToken,
    ) -> Result<String, ClarificationError> {
        let clarification_id = format!("clarify_{}", Uuid::new_v4().simple());
        let (tx, rx) = oneshot::channel();

        {
            let mut state = lock(&self.state);
            state.contexts.insert(
                clarification_id.clone(),
                ClarificationContext::new(&clarification_id, &request),
            );
            state.waiters.insert(
                clarification_id.clone(),
                Waiter {
                    sender: tx,
                    watcher: None,
                },
            );
        }

        if cancel.is_cancelled() {
            self.resolve_silently(&clarification_id, ClarificationStatus::Cancelled);
            return Err(ClarificationError::Cancelled {
                clarification_id,
                reason: "run already cancelled".to_string(),
            });
        }

        let message = ServerMessage::ClarificationRequest {
            clarification_id: clarification_id.clone(),
            run_id: request.run_id.clone(),
            question: request.question.clone(),
            timeout_seconds: request.timeout_seconds(),
            options: request.options.clone(),
            context: request.context.clone(),
            required: request.required,
        };
        if !self.registry.send(&request.client_id, &message) {
            warn!(
                clarification_id = %clarification_id,
                client_id = %request.client_id,
                "Clarification request could not be delivered"
            );
            self.resolve_silently(&clarification_id, ClarificationStatus::Cancelled);
            return Err(ClarificationError::NotDelivered {
                client_id: request.client_id,
            });
        }

        info!(
            clarification_id = %clarification_id,
            client_id = %request.client_id,
            run_id = %request.run_id,
            timeout_secs = request.timeout_seconds(),
            "Clarification requested"
        );

        let watcher = tokio::spawn({
            let this = Arc::clone(self);
            let id = clarification_id.clone();
            let timeout = request.timeout;
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        this.expire(&id);
                    }
                    _ = cancel.cancelled() => {
                        this.cancel(&id, "run cancelled");
                    }
                }
            }
        });
        self.arm_watcher(&clarification_id, watcher.abort_handle());

        rx.await.unwrap_or(Err(ClarificationError::Closed))
    }

    fn arm_watcher(&self, clarification_id: &str, handle: AbortHandle) {
        let mut state = lock(&self.state);
        match state.waiters.get_mut(clarification_id) {
            Some(waiter) => waiter.watcher = Some(handle),
            // Resolved before the watcher was stored.
            None => handle.abort(),
        }
    }

    fn resolve_silently(&self, clarification_id: &str, status: ClarificationStatus) {
        let settled = lock(&self.state).settle(clarification_id, status, None);
        if let Some((_, Some(waiter))) = settled {
            if let Some(watcher) = waiter.watcher {
                watcher.abort();
            }
        }
    }

    fn deliver(clarification_id: &str, waiter: Option<Waiter>, outcome: Outcome) {
        let Some(waiter) = waiter else {
            warn!(clarification_id = %clarification_id, "No waiter for clarification");
            return;
        };
        if let Some(watcher) = waiter.watcher {
            watcher.abort();
        }
        if waiter.sender.send(outcome).is_err() {
            warn!(clarification_id = %clarification_id, "Clarification waiter already gone");
        }
    }

    /// Handle an answer from a client.
    ///
    /// Checks, in order: the clarification exists, belongs to `client_id`, is
    /// still pending, and (if options were given) the answer is one of them.
    /// Any failure is acknowledged with `status=error` and changes nothing.
    pub fn handle_response(
        &self,
        client_id: &str,
        clarification_id: &str,
        response: &str,
    ) -> AckStatus {
        let verdict = {
            let mut state = lock(&self.state);
            let rejection = match state.contexts.get(clarification_id) {
                None => Some("No pending clarification found with this ID".to_string()),
                Some(ctx) if ctx.client_id != client_id => {
                    Some("Clarification does not belong to this client".to_string())
                }
                Some(ctx) if !ctx.is_pending() => {
                    Some(format!("Clarification already {}", ctx.status))
                }
                Some(ctx) => ctx
                    .options
                    .as_ref()
                    .filter(|opts| !opts.iter().any(|o| o == response))
                    .map(|opts| format!("Invalid response. Expected one of: {}", opts.join(", "))),
            };

            match rejection {
                Some(message) => Err(message),
                None => state
                    .settle(clarification_id, ClarificationStatus::Responded, Some(response))
                    .ok_or_else(|| "Clarification already resolved".to_string()),
            }
        };

        match verdict {
            Ok((ctx, waiter)) => {
                Self::deliver(clarification_id, waiter, Ok(response.to_string()));
                self.registry.send(
                    client_id,
                    &ServerMessage::ack(
                        clarification_id,
                        AckStatus::Processed,
                        "Response received successfully",
                    ),
                );
                info!(
                    clarification_id = %clarification_id,
                    client_id = %client_id,
                    run_id = %ctx.run_id,
                    "Clarification answered"
                );
                AckStatus::Processed
            }
            Err(message) => {
                warn!(
                    clarification_id = %clarification_id,
                    client_id = %client_id,
                    reason = %message,
                    "Rejected clarification response"
                );
                self.registry.send(
                    client_id,
                    &ServerMessage::ack(clarification_id, AckStatus::Error, message),
                );
                AckStatus::Error
            }
        }
    }

    /// Cancel a pending clarification. Returns `false` if it was not pending.
    pub fn cancel(&self, clarification_id: &str, reason: &str) -> bool {
        let settled = lock(&self.state).settle(clarification_id, ClarificationStatus::Cancelled, None);
        let Some((ctx, waiter)) = settled else {
            debug!(clarification_id = %clarification_id, "Cancel ignored; not pending");
            return false;
        };

        self.registry.send(
            &ctx.client_id,
            &ServerMessage::ClarificationTimeout {
                clarification_id: clarification_id.to_string(),
                message: format!("Clarification cancelled: {reason}"),
            },
        );
        Self::deliver(
            clarification_id,
            waiter,
            Err(ClarificationError::Cancelled {
                clarification_id: clarification_id.to_string(),
                reason: reason.to_string(),
            }),
        );
        info!(clarification_id = %clarification_id, reason = %reason, "Clarification cancelled");
        true
    }

    /// Cancel every pending clarification of a run; returns how many.
    pub fn cancel_for_run(&self, run_id: &str, reason: &str) -> usize {
        let ids: Vec<String> = lock(&self.state)
            .contexts
            .values()
            .filter(|c| c.run_id == run_id && c.is_pending())
            .map(|c| c.clarification_id.clone())
            .collect();
        ids.iter().filter(|id| self.cancel(id, reason)).count()
    }

    fn expire(&self, clarification_id: &str) -> bool {
        let settled = lock(&self.state).settle(clarification_id, ClarificationStatus::Timeout, None);
        let Some((ctx, waiter)) = settled else {
            return false;
        };

        self.registry.send(
            &ctx.client_id,
            &ServerMessage::ClarificationTimeout {
                clarification_id: clarification_id.to_string(),
                message: "Clarification request timed out".to_string(),
            },
        );
        Self::deliver(
            clarification_id,
            waiter,
            Err(ClarificationError::Timeout {
                clarification_id: clarification_id.to_string(),
                timeout_seconds: ctx.timeout_seconds,
            }),
        );
        warn!(
            clarification_id = %clarification_id,
            client_id = %ctx.client_id,
            run_id = %ctx.run_id,
            "Clarification timed out"
        );
        true
    }

    /// Pending clarifications, optionally for one client
    #[must_use]
    pub fn pending(&self, client_id: Option<&str>) -> Vec<ClarificationContext> {
        lock(&self.state)
            .contexts
            .values()
            .filter(|c| c.is_pending())
            .filter(|c| client_id.is_none_or(|id| c.client_id == id))
            .cloned()
            .collect()
    }

    /// Look up a clarification in any state
    #[must_use]
    pub fn context(&self, clarification_id: &str) -> Option<ClarificationContext> {
        lock(&self.state).contexts.get(clarification_id).cloned()
    }

    /// Drop resolved clarifications older than `max_age`; returns how many.
    pub fn purge_older_than(&self, max_age: Duration) -> usize {
        let mut state = lock(&self.state);
        let before = state.contexts.len();
        state
            .contexts
            .retain(|_, c| c.is_pending() || c.created.elapsed() <= max_age);
        let purged = before - state.contexts.len();
        if purged > 0 {
            info!(purged, "Purged old clarifications");
        }
        purged
    }

    /// Coordinator statistics
    #[must_use]
    pub fn stats(&self) -> ClarificationStats {
        let state = lock(&self.state);
        let mut status_breakdown = BTreeMap::new();
        for ctx in state.contexts.values() {
            *status_breakdown
                .entry(ctx.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        ClarificationStats {
            total: state.contexts.len(),
            pending: state.contexts.values().filter(|c| c.is_pending()).count(),
            active_timeouts: state.waiters.values().filter(|w| w.watcher.is_some()).count(),
            status_breakdown,
        }
    }
}
