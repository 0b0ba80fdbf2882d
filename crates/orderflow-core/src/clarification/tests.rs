use super::*;
use crate::protocol::AckStatus;
use crate::registry::ConnectionRegistry;
use crate::transport::{ChannelTransport, Outbound};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Harness {
    coordinator: Arc<ClarificationCoordinator>,
    rx: UnboundedReceiver<Outbound>,
}

impl Harness {
    fn new() -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let (transport, rx) = ChannelTransport::new();
        assert!(registry.connect("c1", Arc::new(transport)));
        let mut harness = Self {
            coordinator: Arc::new(ClarificationCoordinator::new(registry)),
            rx,
        };
        harness.drain();
        harness
    }

    fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }

    async fn next_frame(&mut self) -> Value {
        loop {
            match self.rx.recv().await {
                Some(Outbound::Text(text)) => return serde_json::from_str(&text).unwrap(),
                Some(Outbound::Close(_)) => continue,
                None => panic!("transport closed"),
            }
        }
    }

    fn ask(
        &self,
        request: ClarificationRequest,
        token: CancellationToken,
    ) -> JoinHandle<Result<String, ClarificationError>> {
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move { coordinator.request(request, token).await })
    }

    /// Start a request and return its ID once the client has seen it.
    async fn ask_and_read_id(
        &mut self,
        request: ClarificationRequest,
        token: CancellationToken,
    ) -> (JoinHandle<Result<String, ClarificationError>>, String) {
        let handle = self.ask(request, token);
        let frame = self.next_frame().await;
        assert_eq!(frame["type"], "clarification_request");
        let id = frame["data"]["clarification_id"].as_str().unwrap().to_string();
        (handle, id)
    }
}

fn location_question() -> ClarificationRequest {
    ClarificationRequest::new("c1", "r1", "What is your delivery location?")
}

#[tokio::test]
async fn test_valid_response_resolves_waiter() {
    let mut h = Harness::new();
    let (handle, id) = h
        .ask_and_read_id(location_question(), CancellationToken::new())
        .await;
    assert!(id.starts_with("clarify_"));
    assert_eq!(h.coordinator.pending(Some("c1")).len(), 1);

    assert_eq!(
        h.coordinator.handle_response("c1", &id, "Mumbai"),
        AckStatus::Processed
    );
    assert_eq!(handle.await.unwrap(), Ok("Mumbai".to_string()));

    let ack = h.next_frame().await;
    assert_eq!(ack["type"], "clarification_acknowledged");
    assert_eq!(ack["data"]["status"], "processed");

    let ctx = h.coordinator.context(&id).unwrap();
    assert_eq!(ctx.status, ClarificationStatus::Responded);
    assert_eq!(ctx.response.as_deref(), Some("Mumbai"));
    assert_eq!(h.coordinator.stats().active_timeouts, 0);
    assert!(!h.coordinator.cancel(&id, "too late"));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_late_response_is_rejected() {
    let mut h = Harness::new();
    let (handle, id) = h
        .ask_and_read_id(location_question(), CancellationToken::new())
        .await;

    let outcome = handle.await.unwrap();
    assert!(matches!(outcome, Err(ClarificationError::Timeout { timeout_seconds: 300, .. })));

    let notice = h.next_frame().await;
    assert_eq!(notice["type"], "clarification_timeout");
    assert_eq!(notice["data"]["message"], "Clarification request timed out");

    assert_eq!(
        h.coordinator.handle_response("c1", &id, "Mumbai"),
        AckStatus::Error
    );
    let ack = h.next_frame().await;
    assert_eq!(ack["data"]["status"], "error");
    assert_eq!(ack["data"]["message"], "Clarification already timeout");
    assert_eq!(
        h.coordinator.context(&id).unwrap().status,
        ClarificationStatus::Timeout
    );
}

#[tokio::test]
async fn test_response_from_other_client_changes_nothing() {
    let mut h = Harness::new();
    let (handle, id) = h
        .ask_and_read_id(location_question(), CancellationToken::new())
        .await;

    assert_eq!(
        h.coordinator.handle_response("intruder", &id, "Nowhere"),
        AckStatus::Error
    );
    assert!(h.coordinator.context(&id).unwrap().is_pending());

    assert_eq!(
        h.coordinator.handle_response("c1", "clarify_unknown", "x"),
        AckStatus::Error
    );
    let ack = h.next_frame().await;
    assert_eq!(ack["data"]["message"], "No pending clarification found with this ID");

    assert_eq!(
        h.coordinator.handle_response("c1", &id, "Delhi"),
        AckStatus::Processed
    );
    assert_eq!(handle.await.unwrap(), Ok("Delhi".to_string()));
}

#[tokio::test]
async fn test_answer_must_match_options() {
    let mut h = Harness::new();
    let request = location_question().with_options(vec!["Mumbai".into(), "Pune".into()]);
    let (handle, id) = h.ask_and_read_id(request, CancellationToken::new()).await;

    assert_eq!(h.coordinator.handle_response("c1", &id, "Goa"), AckStatus::Error);
    let ack = h.next_frame().await;
    assert_eq!(ack["data"]["message"], "Invalid response. Expected one of: Mumbai, Pune");

    assert_eq!(h.coordinator.handle_response("c1", &id, "Pune"), AckStatus::Processed);
    assert_eq!(handle.await.unwrap(), Ok("Pune".to_string()));
}

#[tokio::test]
async fn test_token_cancellation_resolves_waiter() {
    let mut h = Harness::new();
    let token = CancellationToken::new();
    let (handle, id) = h.ask_and_read_id(location_question(), token.clone()).await;

    token.cancel();
    let outcome = handle.await.unwrap();
    assert!(matches!(outcome, Err(ClarificationError::Cancelled { .. })));

    let notice = h.next_frame().await;
    assert_eq!(notice["type"], "clarification_timeout");
    assert_eq!(notice["data"]["message"], "Clarification cancelled: run cancelled");
    assert_eq!(
        h.coordinator.context(&id).unwrap().status,
        ClarificationStatus::Cancelled
    );
}

#[tokio::test]
async fn test_cancel_for_run() {
    let mut h = Harness::new();
    let (first, _) = h
        .ask_and_read_id(location_question(), CancellationToken::new())
        .await;
    let (other, other_id) = h
        .ask_and_read_id(
            ClarificationRequest::new("c1", "r2", "Which carrier?"),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(h.coordinator.cancel_for_run("r1", "user cancelled"), 1);
    match first.await.unwrap() {
        Err(ClarificationError::Cancelled { reason, .. }) => assert_eq!(reason, "user cancelled"),
        other => panic!("unexpected {other:?}"),
    }

    assert!(h.coordinator.context(&other_id).unwrap().is_pending());
    h.coordinator.handle_response("c1", &other_id, "DHL");
    assert_eq!(other.await.unwrap(), Ok("DHL".to_string()));
}

#[tokio::test]
async fn test_undeliverable_request_fails_fast() {
    let registry = Arc::new(ConnectionRegistry::new());
    let coordinator = Arc::new(ClarificationCoordinator::new(registry));

    let outcome = coordinator
        .request(
            ClarificationRequest::new("offline", "r1", "Anyone there?"),
            CancellationToken::new(),
        )
        .await;
    assert!(matches!(outcome, Err(ClarificationError::NotDelivered { .. })));
    assert!(coordinator.pending(None).is_empty());
}

#[tokio::test]
async fn test_already_cancelled_token() {
    let h = Harness::new();
    let token = CancellationToken::new();
    token.cancel();

    let outcome = h.coordinator.request(location_question(), token).await;
    assert!(matches!(outcome, Err(ClarificationError::Cancelled { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_purge_keeps_pending() {
    let mut h = Harness::new();
    let (done, done_id) = h
        .ask_and_read_id(location_question(), CancellationToken::new())
        .await;
    h.coordinator.handle_response("c1", &done_id, "Mumbai");
    done.await.unwrap().unwrap();
    h.drain();

    let (_waiting, _) = h
        .ask_and_read_id(
            location_question().with_timeout(Duration::from_secs(48 * 3600)),
            CancellationToken::new(),
        )
        .await;

    tokio::time::advance(Duration::from_secs(25 * 3600)).await;
    assert_eq!(h.coordinator.purge_older_than(Duration::from_secs(24 * 3600)), 1);
    assert!(h.coordinator.context(&done_id).is_none());

    let stats = h.coordinator.stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.status_breakdown["pending"], 1);
}

#[test]
fn test_timeout_seconds_round_up() {
    let request = location_question().with_timeout(Duration::from_millis(1500));
    assert_eq!(request.timeout_seconds(), 2);
    assert_eq!(location_question().timeout_seconds(), 300);
}
