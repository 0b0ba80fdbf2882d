use super::*;
use crate::protocol::{RunStatus, ServerMessage};
use crate::transport::{ChannelTransport, MockTransport, Outbound, TransportError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

fn frames(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        if let Outbound::Text(text) = item {
            out.push(serde_json::from_str(&text).unwrap());
        }
    }
    out
}

fn connected(registry: &ConnectionRegistry, client_id: &str) -> UnboundedReceiver<Outbound> {
    let (transport, rx) = ChannelTransport::new();
    assert!(registry.connect(client_id, Arc::new(transport)));
    rx
}

#[test]
fn test_connect_sends_acknowledgement() {
    let registry = ConnectionRegistry::new();
    let mut rx = connected(&registry, "c1");

    let sent = frames(&mut rx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "connection_acknowledged");
    assert_eq!(sent[0]["data"]["client_id"], "c1");
    let caps = sent[0]["data"]["capabilities"].as_array().unwrap();
    assert!(caps.contains(&Value::from("clarifications")));
    assert!(registry.is_connected("c1"));
}

#[test]
fn test_connect_fails_when_ack_cannot_be_sent() {
    let registry = ConnectionRegistry::new();
    let mut transport = MockTransport::new();
    transport
        .expect_transmit()
        .returning(|_| Err(TransportError::Closed));
    transport.expect_close().times(1).return_const(());

    assert!(!registry.connect("c1", Arc::new(transport)));
    assert!(!registry.is_connected("c1"));
}

#[test]
fn test_send_failure_disconnects_and_cancels_runs() {
    let registry = ConnectionRegistry::new();
    let mut transport = MockTransport::new();
    let mut calls = 0;
    transport.expect_transmit().returning(move |_| {
        calls += 1;
        if calls == 1 {
            Ok(())
        } else {
            Err(TransportError::Failed("broken pipe".to_string()))
        }
    });
    transport.expect_close().times(1).return_const(());

    assert!(registry.connect("c1", Arc::new(transport)));
    let session = registry.create_session("c1", "r1", None);
    let token = session.cancellation_token();

    let msg = ServerMessage::Heartbeat {
        active_connections: 1,
        active_processing_sessions: 1,
    };
    assert!(!registry.send("c1", &msg));

    assert!(!registry.is_connected("c1"));
    assert!(token.is_cancelled());
    let session = registry.session("r1").unwrap();
    assert_eq!(session.status, RunStatus::Cancelled);
    assert!(session.error.unwrap().starts_with("Client disconnected"));
}

#[test]
fn test_send_to_unknown_client_is_false() {
    let registry = ConnectionRegistry::new();
    let msg = ServerMessage::Heartbeat {
        active_connections: 0,
        active_processing_sessions: 0,
    };
    assert!(!registry.send("ghost", &msg));
}

#[test]
fn test_disconnect_is_idempotent() {
    let registry = ConnectionRegistry::new();
    let mut rx = connected(&registry, "c1");
    registry.create_session("c1", "r1", None);

    registry.disconnect("c1", "bye");
    registry.disconnect("c1", "bye");
    registry.disconnect("nobody", "bye");

    let closes: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
        .filter(|o| matches!(o, Outbound::Close(_)))
        .collect();
    assert_eq!(closes, vec![Outbound::Close("bye".to_string())]);
    assert_eq!(registry.session("r1").unwrap().status, RunStatus::Cancelled);
}

#[test]
fn test_reconnect_inherits_runs() {
    let registry = ConnectionRegistry::new();
    let mut first = connected(&registry, "c1");
    registry.create_session("c1", "r1", None);

    let _second = connected(&registry, "c1");

    assert!(frames(&mut first).len() == 1);
    let conn = registry.connection("c1").unwrap();
    assert!(conn.run_ids.contains("r1"));
    assert_eq!(registry.connection_count(), 1);
}

#[test]
fn test_broadcast_respects_exclude() {
    let registry = ConnectionRegistry::new();
    let mut a = connected(&registry, "a");
    let mut b = connected(&registry, "b");
    frames(&mut a);
    frames(&mut b);

    let msg = ServerMessage::Heartbeat {
        active_connections: 2,
        active_processing_sessions: 0,
    };
    assert_eq!(registry.broadcast(&msg, &["b"]), 1);
    assert_eq!(frames(&mut a).len(), 1);
    assert!(frames(&mut b).is_empty());
}

#[test]
fn test_cancel_session_notifies_once() {
    let registry = ConnectionRegistry::new();
    let mut rx = connected(&registry, "c1");
    registry.create_session("c1", "r1", None);
    frames(&mut rx);

    assert!(registry.cancel_session("r1", "user asked"));
    assert!(!registry.cancel_session("r1", "again"));
    assert!(!registry.cancel_session("missing", "x"));

    let sent = frames(&mut rx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "processing_status");
    assert_eq!(sent[0]["data"]["status"], "cancelled");
    assert_eq!(sent[0]["data"]["message"], "user asked");
    assert!(!registry.connection("c1").unwrap().run_ids.contains("r1"));
}

#[test]
fn test_progress_recomputed_on_completed_steps() {
    let registry = ConnectionRegistry::new();
    registry.create_session("c1", "r1", Some(4));

    registry.update_session("r1", |s| {
        s.record_completed_step();
        s.record_completed_step();
    });

    let session = registry.session("r1").unwrap();
    assert_eq!(session.steps_completed, 2);
    assert!((session.progress_pct - 50.0).abs() < f64::EPSILON);
    assert!(registry.update_session("missing", |_| ()).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_drops_idle_connections_and_stale_sessions() {
    let registry = ConnectionRegistry::new();
    let _idle = connected(&registry, "idle");
    registry.create_session("gone", "done", None);
    registry.update_session("done", |s| s.status = RunStatus::Completed);
    registry.create_session("gone", "live", None);

    tokio::time::advance(Duration::from_secs(301)).await;
    let mut fresh = connected(&registry, "fresh");

    let report = registry.sweep(Duration::from_secs(300));
    assert_eq!(report.disconnected, vec!["idle".to_string()]);
    assert_eq!(report.removed_runs, vec!["done".to_string()]);
    assert!(registry.is_connected("fresh"));
    assert!(registry.session("live").is_some());
    assert_eq!(frames(&mut fresh).len(), 1);
}

#[test]
fn test_heartbeat_and_stats() {
    let registry = ConnectionRegistry::new();
    assert_eq!(registry.heartbeat(), 0);

    let mut rx = connected(&registry, "c1");
    registry.create_session("c1", "r1", None);
    frames(&mut rx);

    assert_eq!(registry.heartbeat(), 1);
    let sent = frames(&mut rx);
    assert_eq!(sent[0]["type"], "heartbeat");
    assert_eq!(sent[0]["data"]["active_processing_sessions"], 1);

    let stats = registry.stats();
    assert_eq!(stats.active_connections, 1);
    assert_eq!(stats.sessions_by_status["started"], 1);
    assert_eq!(stats.sessions_by_status["cancelled"], 0);
}
