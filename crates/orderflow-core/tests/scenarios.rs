//! End-to-end runs driven through the message router

use orderflow_core::{
    BridgeSettings, ChannelTransport, ClarificationCoordinator, ClarificationFallback,
    ConnectionRegistry, ExecutionTracker, MessageRouter, OrderRequest, Outbound, RecordStatus,
    RunOrchestrator, ToolBridge, Workflow,
};
use orderflow_tools::builtins::register_builtins;
use orderflow_tools::{RunContext, ToolRegistry};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Extract, clarify the location if missing, then price the order twice.
struct OrderScript;

impl Workflow for OrderScript {
    fn name(&self) -> &str {
        "order_script"
    }

    fn execute(
        &self,
        ctx: &RunContext,
        order: &OrderRequest,
        bridge: &ToolBridge,
    ) -> orderflow_core::Result<Value> {
        bridge.set_total_steps(ctx, 3);
        bridge.report_phase(ctx, "extraction", "Reading the order");
        let extracted = bridge.run(
            "order_extraction_tool",
            Some(ctx),
            json!({"order_text": order.order_text}),
        )?;

        let location = match extracted["delivery_location"].as_str() {
            Some(location) => location.to_string(),
            None => bridge
                .run(
                    "clarification_tool",
                    Some(ctx),
                    json!({"question": "What is your delivery location?"}),
                )?
                .as_str()
                .unwrap_or_default()
                .to_string(),
        };

        bridge.report_phase(ctx, "pricing", "Computing totals");
        let args = json!({"model": extracted["model"], "quantity": extracted["quantity"]});
        let priced = bridge.run("pricing_tool", Some(ctx), args.clone())?;
        let again = bridge.run("pricing_tool", Some(ctx), args)?;
        assert_eq!(priced, again);

        Ok(json!({
            "model": extracted["model"],
            "quantity": extracted["quantity"],
            "delivery_location": location,
            "total": priced["total"],
        }))
    }
}

struct Client {
    id: &'static str,
    rx: UnboundedReceiver<Outbound>,
}

impl Client {
    async fn next(&mut self) -> Value {
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

    async fn next_of(&mut self, kind: &str) -> Value {
        loop {
            let frame = self.next().await;
            if frame["type"] == kind {
                return frame;
            }
        }
    }

    /// Collect frames until one of type `kind` arrives, inclusive
    async fn until(&mut self, kind: &str) -> Vec<Value> {
        let mut frames = Vec::new();
        loop {
            let frame = self.next().await;
            let done = frame["type"] == kind;
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }

    fn drain(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            if let Outbound::Text(text) = item {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }
}

struct Server {
    router: MessageRouter,
    orch: Arc<RunOrchestrator>,
}

impl Server {
    fn new(clarification_timeout: Duration) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let coordinator = Arc::new(ClarificationCoordinator::new(Arc::clone(&registry)));
        let orch = Arc::new(
            RunOrchestrator::new(registry, coordinator, Arc::new(ExecutionTracker::new()))
                .with_cleanup_delay(Duration::from_secs(300)),
        );

        let mut tools = ToolRegistry::new();
        register_builtins(&mut tools);
        let settings = BridgeSettings {
            clarification_timeout,
            max_clarification_timeout: Duration::from_secs(60),
            grace: Duration::from_millis(500),
            tool_timeout: Duration::from_secs(5),
            fallback: ClarificationFallback::Fail,
            fallback_answer: "YES".to_string(),
        };
        let bridge = ToolBridge::new(Arc::new(tools), Arc::clone(&orch), settings).unwrap();
        let router = MessageRouter::new(Arc::clone(&orch), Arc::new(bridge), Arc::new(OrderScript));
        Self { router, orch }
    }

    fn connect(&self, id: &'static str) -> Client {
        let (transport, rx) = ChannelTransport::new();
        assert!(self.orch.registry().connect(id, Arc::new(transport)));
        let mut client = Client { id, rx };
        let ack = client.drain();
        assert_eq!(ack[0]["type"], "connection_acknowledged");
        client
    }

    fn send(&self, client: &Client, frame: Value) -> Result<(), orderflow_core::ErrorCode> {
        self.router.handle_text(client.id, &frame.to_string())
    }

    fn start(&self, client: &Client, order_text: &str) {
        self.send(
            client,
            json!({"type": "start_order_processing", "data": {"order_text": order_text}}),
        )
        .unwrap();
    }
}

fn of_type<'a>(frames: &'a [Value], kind: &str) -> Vec<&'a Value> {
    frames.iter().filter(|f| f["type"] == kind).collect()
}

/// Every step's `started` precedes its terminal update
fn assert_step_order(frames: &[Value]) {
    let mut seen: HashMap<String, String> = HashMap::new();
    for frame in of_type(frames, "step_update") {
        let step_id = frame["data"]["step_id"].as_str().unwrap().to_string();
        let status = frame["data"]["status"].as_str().unwrap().to_string();
        match status.as_str() {
            "started" | "waiting" => {
                assert!(!seen.contains_key(&step_id), "{step_id} started twice");
            }
            "completed" | "failed" => {
                let prior = seen.get(&step_id).map(String::as_str);
                assert!(
                    matches!(prior, Some("started" | "waiting")),
                    "{step_id} finished before starting"
                );
            }
            _ => {}
        }
        seen.insert(step_id, status);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_complete_order_runs_without_clarification() {
    let server = Server::new(Duration::from_secs(5));
    let mut client = server.connect("c1");

    server.start(&client, "2 Harrier to Pune");
    let frames = client.until("processing_completed").await;

    assert_eq!(frames[0]["type"], "processing_started");
    let run_id = frames[0]["data"]["run_id"].as_str().unwrap();
    assert_eq!(frames[1]["type"], "processing_status");
    assert_eq!(frames[1]["data"]["status"], "running");
    assert!(of_type(&frames, "clarification_request").is_empty());
    assert_step_order(&frames);

    let steps = of_type(&frames, "step_update");
    let skipped: Vec<_> = steps.iter().filter(|f| f["data"]["status"] == "skipped").collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0]["data"]["tool_name"], "pricing_tool");

    let done = frames.last().unwrap();
    assert_eq!(done["run_id"], run_id);
    assert_eq!(done["data"]["final_output"]["delivery_location"], "Pune");
    assert_eq!(done["data"]["final_output"]["total"], 50_000);
    let records = server.orch.tracker().get_execution_records(run_id);
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == RecordStatus::Completed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_location_is_clarified() {
    let server = Server::new(Duration::from_secs(5));
    let mut client = server.connect("c1");

    server.start(&client, "please send 3 glc, contact buyer@example.com");
    let request = client.next_of("clarification_request").await;
    let clarification_id = request["data"]["clarification_id"].as_str().unwrap();
    assert_eq!(request["data"]["question"], "What is your delivery location?");
    assert_eq!(request["data"]["timeout_seconds"], 5);
    assert_eq!(request["data"]["required"], true);

    let run_id = request["data"]["run_id"].as_str().unwrap();
    let waiting = server.orch.status(run_id).unwrap();
    assert_eq!(waiting.status, orderflow_core::RunStatus::WaitingClarification);

    server
        .send(
            &client,
            json!({
                "type": "clarification_response",
                "data": {"clarification_id": clarification_id, "response": "Mumbai"}
            }),
        )
        .unwrap();

    let frames = client.until("processing_completed").await;
    let ack = of_type(&frames, "clarification_acknowledged");
    assert_eq!(ack.len(), 1);
    assert_eq!(ack[0]["data"]["status"], "processed");
    assert!(frames.iter().any(|f| {
        f["type"] == "step_update" && f["data"]["step_name"] == "User input received"
    }));
    let done = frames.last().unwrap();
    assert_eq!(done["data"]["final_output"]["delivery_location"], "Mumbai");
    assert_eq!(done["data"]["final_output"]["total"], 150_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unanswered_clarification_fails_the_run() {
    let server = Server::new(Duration::from_millis(300));
    let mut client = server.connect("c1");

    server.start(&client, "please send 3 glc");
    let request = client.next_of("clarification_request").await;
    let clarification_id = request["data"]["clarification_id"].as_str().unwrap().to_string();

    let frames = client.until("processing_status").await;
    let timeout = of_type(&frames, "clarification_timeout");
    assert_eq!(timeout.len(), 1);
    assert_eq!(timeout[0]["data"]["clarification_id"], clarification_id.as_str());

    let failed: Vec<_> = of_type(&frames, "step_update")
        .into_iter()
        .filter(|f| f["data"]["status"] == "failed")
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["data"]["step_name"], "Clarification failed");

    let error = of_type(&frames, "error");
    assert_eq!(error[0]["data"]["error_code"], "workflow_error");
    assert_eq!(frames.last().unwrap()["data"]["status"], "failed");

    // A late answer changes nothing.
    server
        .send(
            &client,
            json!({
                "type": "clarification_response",
                "data": {"clarification_id": clarification_id, "response": "Mumbai"}
            }),
        )
        .unwrap();
    let late = client.next_of("clarification_acknowledged").await;
    assert_eq!(late["data"]["status"], "error");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_while_waiting_stops_the_run() {
    let server = Server::new(Duration::from_secs(5));
    let mut client = server.connect("c1");

    server.start(&client, "please send 3 glc");
    let request = client.next_of("clarification_request").await;
    let run_id = request["data"]["run_id"].as_str().unwrap().to_string();

    server
        .send(
            &client,
            json!({"type": "cancel_processing", "data": {"run_id": run_id}}),
        )
        .unwrap();

    let status = client.next_of("processing_status").await;
    assert_eq!(status["data"]["status"], "cancelled");
    assert_eq!(status["data"]["message"], "User requested cancellation");
    let released = client.next_of("clarification_timeout").await;
    assert_eq!(released["data"]["clarification_id"], request["data"]["clarification_id"]);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let trailing = client.drain();
    assert!(of_type(&trailing, "step_update").is_empty());
    assert!(of_type(&trailing, "processing_completed").is_empty());
    assert!(of_type(&trailing, "error").is_empty());
    assert_eq!(
        server.orch.status(&run_id).unwrap().status,
        orderflow_core::RunStatus::Cancelled
    );
    assert!(server.orch.coordinator().pending(None).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_messages_keep_the_connection() {
    let server = Server::new(Duration::from_secs(5));
    let mut client = server.connect("c1");

    let bad = server.router.handle_text("c1", "{not json");
    assert_eq!(bad, Err(orderflow_core::ErrorCode::InvalidJson));
    let reply = client.next_of("error").await;
    assert_eq!(reply["data"]["error_code"], "invalid_json");
    assert_eq!(reply["data"]["error_type"], "websocket_error");

    let unknown = server.send(&client, json!({"type": "launch_rockets"}));
    assert_eq!(unknown, Err(orderflow_core::ErrorCode::UnknownType));

    let missing = server.send(
        &client,
        json!({"type": "get_processing_status", "data": {"run_id": "nope"}}),
    );
    assert_eq!(missing, Err(orderflow_core::ErrorCode::StatusNotFound));

    let cancel = server.send(
        &client,
        json!({"type": "cancel_processing", "data": {"run_id": "nope"}}),
    );
    assert_eq!(cancel, Err(orderflow_core::ErrorCode::RunNotFound));

    assert!(server.orch.registry().is_connected("c1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_foreign_runs_are_invisible() {
    let server = Server::new(Duration::from_secs(5));
    let mut owner = server.connect("c1");
    let other = server.connect("c2");

    server.start(&owner, "please send 3 glc");
    let request = owner.next_of("clarification_request").await;
    let run_id = request["data"]["run_id"].as_str().unwrap();

    let peek = server.send(
        &other,
        json!({"type": "get_processing_status", "data": {"run_id": run_id}}),
    );
    assert_eq!(peek, Err(orderflow_core::ErrorCode::StatusNotFound));

    server
        .send(
            &other,
            json!({
                "type": "clarification_response",
                "data": {"clarification_id": request["data"]["clarification_id"], "response": "Goa"}
            }),
        )
        .unwrap();
    assert!(server.orch.coordinator().pending(Some("c1")).len() == 1);

    server
        .send(
            &owner,
            json!({"type": "get_processing_status", "data": {"run_id": run_id}}),
        )
        .unwrap();
    let status = owner.next_of("processing_status").await;
    assert_eq!(status["data"]["status"], "waiting_clarification");

    server.orch.cancel_run(run_id, "test over");
}
