use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::types::{Connection, ConnectionEntry, ConnectionStats, RunSession};
use crate::protocol::{Envelope, RunStatus, ServerMessage, CAPABILITIES};
use crate::sync::lock;
use crate::transport::Transport;
use tokio_util::sync::CancellationToken;

/// What a sweep removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Clients disconnected for inactivity
    pub disconnected: Vec<String>,
    /// Terminal runs whose sessions were dropped
    pub removed_runs: Vec<String>,
}

enum Delivery {
    Sent,
    Dropped,
    Failed(Arc<dyn Transport>),
}

/// Registry of live connections and run sessions
///
/// Two locks, one per map. When both are held, `sessions` is taken first;
/// nothing takes `sessions` while holding `connections`.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, ConnectionEntry>>,
    sessions: Mutex<HashMap<String, RunSession>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a connection and acknowledge it.
    ///
    /// A second connection under the same client ID replaces the first and
    /// inherits its runs. Returns `false` if the acknowledgement could not be
    /// delivered, in which case nothing stays registered.
    pub fn connect(&self, client_id: &str, transport: Arc<dyn Transport>) -> bool {
        let replaced = {
            let mut connections = lock(&self.connections);
            let mut entry = ConnectionEntry::new(client_id, Arc::clone(&transport));
            let previous = connections.remove(client_id);
            if let Some(prev) = &previous {
                entry.info.run_ids = prev.info.run_ids.clone();
            }
            connections.insert(client_id.to_string(), entry);
            previous
        };

        if let Some(prev) = replaced {
            info!(client_id = %client_id, "Connection replaced by a new one");
            prev.transport.close("Replaced by a new connection");
        }

        let ack = ServerMessage::ConnectionAcknowledged {
            client_id: client_id.to_string(),
            capabilities: CAPABILITIES.iter().map(|c| (*c).to_string()).collect(),
        };
        if !self.send(client_id, &ack) {
            error!(client_id = %client_id, "Failed to acknowledge connection");
            return false;
        }

        info!(client_id = %client_id, "Client connected");
        true
    }

    /// Tear down a connection: cancel its runs, close the transport, forget it.
    ///
    /// Unknown or already-disconnected clients are a no-op.
    pub fn disconnect(&self, client_id: &str, reason: &str) {
        let Some(entry) = lock(&self.connections).remove(client_id) else {
            debug!(client_id = %client_id, "Client already disconnected");
            return;
        };
        self.finish_disconnect(entry, reason);
    }

    /// Like [`Self::disconnect`], but only if `transport` is still the one
    /// registered for `client_id`. A socket that was replaced by a reconnect
    /// must not tear down its successor.
    pub fn disconnect_transport(&self, client_id: &str, transport: &Arc<dyn Transport>, reason: &str) {
        let entry = {
            let mut connections = lock(&self.connections);
            match connections.get(client_id) {
                Some(current) if Arc::ptr_eq(&current.transport, transport) => {
                    connections.remove(client_id)
                }
                _ => None,
            }
        };
        if let Some(entry) = entry {
            self.finish_disconnect(entry, reason);
        }
    }

    fn finish_disconnect(&self, entry: ConnectionEntry, reason: &str) {
        let client_id = entry.info.client_id.as_str();
        let cancel_reason = format!("Client disconnected: {reason}");
        for run_id in &entry.info.run_ids {
            self.cancel_session(run_id, &cancel_reason);
        }
        entry.transport.close(reason);
        info!(client_id = %client_id, reason = %reason, "Client disconnected");
    }

    /// Send a message to one client.
    ///
    /// Never fails loudly: an unknown client or a transport failure yields
    /// `false`, and a transport failure also disconnects the client.
    pub fn send(&self, client_id: &str, message: &ServerMessage) -> bool {
        match self.deliver(client_id, message) {
            Delivery::Sent => true,
            Delivery::Dropped => false,
            Delivery::Failed(transport) => {
                self.disconnect_transport(client_id, &transport, "Send failed");
                false
            }
        }
    }

    /// Serialize and enqueue one frame. Takes only the connections lock, so
    /// it is safe to call while the sessions lock is held.
    fn deliver(&self, client_id: &str, message: &ServerMessage) -> Delivery {
        let transport = {
            let mut connections = lock(&self.connections);
            let Some(entry) = connections.get_mut(client_id) else {
                debug!(client_id = %client_id, kind = message.kind(), "Send to unknown client");
                return Delivery::Dropped;
            };
            entry.touch();
            Arc::clone(&entry.transport)
        };

        let frame = match Envelope::new(client_id, message).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                error!(client_id = %client_id, kind = message.kind(), error = %e, "Failed to serialize message");
                return Delivery::Dropped;
            }
        };

        match transport.transmit(frame) {
            Ok(()) => {
                debug!(client_id = %client_id, kind = message.kind(), "Message sent");
                Delivery::Sent
            }
            Err(e) => {
                error!(client_id = %client_id, kind = message.kind(), error = %e, "Transmit failed");
                Delivery::Failed(transport)
            }
        }
    }

    /// Send to every client not in `exclude`; returns the delivered count.
    pub fn broadcast(&self, message: &ServerMessage, exclude: &[&str]) -> usize {
        self.client_ids()
            .iter()
            .filter(|id| !exclude.contains(&id.as_str()))
            .filter(|id| self.send(id, message))
            .count()
    }

    /// Record inbound activity for a client.
    pub fn touch(&self, client_id: &str) {
        if let Some(entry) = lock(&self.connections).get_mut(client_id) {
            entry.touch();
        }
    }

    /// Whether the client is connected
    #[must_use]
    pub fn is_connected(&self, client_id: &str) -> bool {
        lock(&self.connections).contains_key(client_id)
    }

    /// Snapshot of a connection
    #[must_use]
    pub fn connection(&self, client_id: &str) -> Option<Connection> {
        lock(&self.connections).get(client_id).map(|e| e.info.clone())
    }

    /// Connected client IDs
    #[must_use]
    pub fn client_ids(&self) -> Vec<String> {
        lock(&self.connections).keys().cloned().collect()
    }

    /// Live connection count
    #[must_use]
    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    // ------------------------------------------------------------------
    // Run sessions
    // ------------------------------------------------------------------

    /// Create a session for a run and attach it to its client.
    pub fn create_session(
        &self,
        client_id: &str,
        run_id: &str,
        total_steps: Option<u32>,
    ) -> RunSession {
        let session = RunSession::new(run_id, client_id, total_steps);
        lock(&self.sessions).insert(run_id.to_string(), session.clone());

        if let Some(entry) = lock(&self.connections).get_mut(client_id) {
            entry.info.run_ids.insert(run_id.to_string());
        }

        info!(client_id = %client_id, run_id = %run_id, "Created run session");
        session
    }

    /// Snapshot of a session
    #[must_use]
    pub fn session(&self, run_id: &str) -> Option<RunSession> {
        lock(&self.sessions).get(run_id).cloned()
    }

    /// Cancellation token of a live session
    #[must_use]
    pub fn session_token(&self, run_id: &str) -> Option<CancellationToken> {
        lock(&self.sessions)
            .get(run_id)
            .map(RunSession::cancellation_token)
    }

    /// Mutate a session in place; `None` if the run is unknown.
    pub fn update_session<R>(&self, run_id: &str, f: impl FnOnce(&mut RunSession) -> R) -> Option<R> {
        let mut sessions = lock(&self.sessions);
        let session = sessions.get_mut(run_id)?;
        let out = f(session);
        session.touch();
        Some(out)
    }

    /// Mutate a session and enqueue the frames `f` returns before the
    /// sessions lock is released.
    ///
    /// Frames for a run are therefore ordered against every other status
    /// change of that run: once a final status is queued, a concurrent push
    /// that finds the session terminal sends nothing. An empty `Vec` from `f`
    /// means "nothing to send". Returns `false` if the run is unknown or `f`
    /// returned no frames.
    pub fn update_and_send(
        &self,
        run_id: &str,
        f: impl FnOnce(&mut RunSession) -> Vec<ServerMessage>,
    ) -> bool {
        let failed = {
            let mut sessions = lock(&self.sessions);
            let Some(session) = sessions.get_mut(run_id) else {
                return false;
            };
            let messages = f(session);
            session.touch();
            if messages.is_empty() {
                return false;
            }
            let client_id = session.client_id.clone();
            let mut failed = None;
            for message in &messages {
                if let Delivery::Failed(transport) = self.deliver(&client_id, message) {
                    failed = Some((client_id, transport));
                    break;
                }
            }
            failed
        };

        // Disconnecting cancels sessions, so it runs outside the lock.
        if let Some((client_id, transport)) = failed {
            self.disconnect_transport(&client_id, &transport, "Send failed");
        }
        true
    }

    /// Mark a session cancelled, notify its client and fire its token.
    ///
    /// The cancelled status is queued before the token fires, so anything
    /// woken by the token already sees a terminal session. Returns `false`
    /// for unknown or already-terminal runs.
    pub fn cancel_session(&self, run_id: &str, reason: &str) -> bool {
        let mut cancelled = None;
        self.update_and_send(run_id, |session| {
            if session.is_terminal() {
                return Vec::new();
            }
            session.status = RunStatus::Cancelled;
            session.error = Some(reason.to_string());
            cancelled = Some((session.client_id.clone(), session.cancellation_token()));
            vec![ServerMessage::ProcessingStatus {
                run_id: run_id.to_string(),
                status: RunStatus::Cancelled,
                current_step: None,
                message: Some(reason.to_string()),
                progress_percentage: None,
                steps_completed: None,
                total_steps: None,
            }]
        });

        let Some((client_id, token)) = cancelled else {
            return false;
        };

        if let Some(entry) = lock(&self.connections).get_mut(&client_id) {
            entry.info.run_ids.remove(run_id);
        }
        token.cancel();

        info!(run_id = %run_id, client_id = %client_id, reason = %reason, "Cancelled run session");
        true
    }

    /// Drop a session entirely.
    pub fn remove_session(&self, run_id: &str) -> Option<RunSession> {
        let session = lock(&self.sessions).remove(run_id)?;
        if let Some(entry) = lock(&self.connections).get_mut(&session.client_id) {
            entry.info.run_ids.remove(run_id);
        }
        debug!(run_id = %run_id, "Removed run session");
        Some(session)
    }

    /// Sessions owned by a client
    #[must_use]
    pub fn sessions_for(&self, client_id: &str) -> Vec<RunSession> {
        lock(&self.sessions)
            .values()
            .filter(|s| s.client_id == client_id)
            .cloned()
            .collect()
    }

    /// Every tracked session
    #[must_use]
    pub fn sessions(&self) -> Vec<RunSession> {
        lock(&self.sessions).values().cloned().collect()
    }

    /// Tracked session count (any status)
    #[must_use]
    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    // ------------------------------------------------------------------
    // Liveness
    // ------------------------------------------------------------------

    /// Push a heartbeat to every client; returns the delivered count.
    pub fn heartbeat(&self) -> usize {
        let active_connections = self.connection_count();
        if active_connections == 0 {
            return 0;
        }
        let message = ServerMessage::Heartbeat {
            active_connections,
            active_processing_sessions: self.session_count(),
        };
        let delivered = self.broadcast(&message, &[]);
        debug!(delivered, "Heartbeat sent");
        delivered
    }

    /// Disconnect idle clients and drop long-terminal sessions.
    pub fn sweep(&self, idle_timeout: Duration) -> SweepReport {
        let idle: Vec<String> = lock(&self.connections)
            .iter()
            .filter(|(_, e)| e.last_seen.elapsed() > idle_timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for client_id in &idle {
            warn!(client_id = %client_id, "Disconnecting idle client");
            self.disconnect(client_id, "Connection timeout");
        }

        let stale: Vec<String> = lock(&self.sessions)
            .values()
            .filter(|s| s.is_terminal() && s.last_seen.elapsed() > idle_timeout)
            .map(|s| s.run_id.clone())
            .collect();

        for run_id in &stale {
            self.remove_session(run_id);
        }

        if !idle.is_empty() || !stale.is_empty() {
            info!(
                disconnected = idle.len(),
                removed_sessions = stale.len(),
                "Registry sweep complete"
            );
        }

        SweepReport {
            disconnected: idle,
            removed_runs: stale,
        }
    }

    /// Disconnect every client.
    pub fn disconnect_all(&self, reason: &str) -> usize {
        let ids = self.client_ids();
        for client_id in &ids {
            self.disconnect(client_id, reason);
        }
        ids.len()
    }

    /// Connection statistics
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        let mut sessions_by_status: BTreeMap<String, usize> = RunStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();

        let session_count = {
            let sessions = lock(&self.sessions);
            for session in sessions.values() {
                *sessions_by_status
                    .entry(session.status.as_str().to_string())
                    .or_default() += 1;
            }
            sessions.len()
        };

        ConnectionStats {
            active_connections: self.connection_count(),
            active_processing_sessions: session_count,
            sessions_by_status,
        }
    }
}
