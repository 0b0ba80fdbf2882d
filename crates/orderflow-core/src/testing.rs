//! Shared fixtures for unit tests

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::clarification::ClarificationCoordinator;
use crate::orchestrator::RunOrchestrator;
use crate::registry::ConnectionRegistry;
use crate::tracker::ExecutionTracker;
use crate::transport::{ChannelTransport, Outbound};

/// Outbound frames of one connected test client
pub(crate) struct Frames {
    rx: UnboundedReceiver<Outbound>,
}

impl Frames {
    /// Everything queued so far
    pub(crate) fn drain(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            if let Outbound::Text(text) = item {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }

    /// Next text frame, waiting up to five seconds
    pub(crate) async fn next(&mut self) -> Value {
        loop {
            let item = tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
                .await
                .expect("no frame within 5s");
            match item {
                Some(Outbound::Text(text)) => return serde_json::from_str(&text).unwrap(),
                Some(Outbound::Close(_)) => continue,
                None => panic!("transport closed"),
            }
        }
    }

    /// Skip frames until one of type `kind`
    pub(crate) async fn next_of(&mut self, kind: &str) -> Value {
        loop {
            let frame = self.next().await;
            if frame["type"] == kind {
                return frame;
            }
        }
    }
}

/// Connect `client_id` and swallow its acknowledgement
pub(crate) fn connect(registry: &ConnectionRegistry, client_id: &str) -> Frames {
    let (transport, rx) = ChannelTransport::new();
    assert!(registry.connect(client_id, Arc::new(transport)));
    let mut frames = Frames { rx };
    frames.drain();
    frames
}

/// Registry, coordinator and tracker wired into an orchestrator
pub(crate) fn orchestrator(cleanup_delay: Duration) -> Arc<RunOrchestrator> {
    let registry = Arc::new(ConnectionRegistry::new());
    let coordinator = Arc::new(ClarificationCoordinator::new(Arc::clone(&registry)));
    let tracker = Arc::new(ExecutionTracker::new());
    Arc::new(RunOrchestrator::new(registry, coordinator, tracker).with_cleanup_delay(cleanup_delay))
}
