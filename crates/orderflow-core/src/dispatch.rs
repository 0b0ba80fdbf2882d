//! Dispatch - Inbound message routing
//!
//! Every text frame from a client goes through [`MessageRouter::handle_text`].
//! Malformed or unroutable messages get an `error` reply and the connection
//! stays open.

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::bridge::ToolBridge;
use crate::orchestrator::RunOrchestrator;
use crate::protocol::{ClientMessage, ErrorCode, ProtocolError, RunOptions, ServerMessage};
use crate::workflow::{OrderRequest, Workflow};

const DEFAULT_CANCEL_REASON: &str = "User requested cancellation";

/// Routes client messages to the orchestrator and coordinator
pub struct MessageRouter {
    orchestrator: Arc<RunOrchestrator>,
    bridge: Arc<ToolBridge>,
    workflow: Arc<dyn Workflow>,
}

impl MessageRouter {
    /// Create a router that runs `workflow` for every started order
    #[must_use]
    pub fn new(
        orchestrator: Arc<RunOrchestrator>,
        bridge: Arc<ToolBridge>,
        workflow: Arc<dyn Workflow>,
    ) -> Self {
        Self {
            orchestrator,
            bridge,
            workflow,
        }
    }

    /// Orchestrator behind this router
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<RunOrchestrator> {
        &self.orchestrator
    }

    /// Handle one inbound text frame.
    ///
    /// Returns the error code that was replied to the client, if any.
    pub fn handle_text(&self, client_id: &str, text: &str) -> Result<(), ErrorCode> {
        self.orchestrator.registry().touch(client_id);

        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(client_id = %client_id, code = %e.code, error = %e.message, "Rejected client message");
                self.reply_error(client_id, &e);
                return Err(e.code);
            }
        };
        debug!(client_id = %client_id, kind = message.kind(), "Client message");

        match message {
            ClientMessage::StartOrderProcessing {
                order_text,
                options,
            } => self.start(client_id, order_text, options),
            ClientMessage::ClarificationResponse {
                clarification_id,
                response,
            } => {
                // The coordinator acknowledges success and rejection itself.
                self.orchestrator
                    .coordinator()
                    .handle_response(client_id, &clarification_id, &response);
                Ok(())
            }
            ClientMessage::CancelProcessing { run_id, reason } => {
                if !self.owns_run(client_id, &run_id) {
                    return self.not_found(client_id, ErrorCode::RunNotFound, &run_id);
                }
                let reason = reason.as_deref().unwrap_or(DEFAULT_CANCEL_REASON);
                if !self.orchestrator.cancel_run(&run_id, reason) {
                    debug!(run_id = %run_id, "Cancel requested for finished run");
                }
                Ok(())
            }
            ClientMessage::GetProcessingStatus { run_id } => {
                let status = self
                    .owns_run(client_id, &run_id)
                    .then(|| self.orchestrator.status_message(&run_id))
                    .flatten();
                match status {
                    Some(message) => {
                        self.orchestrator.registry().send(client_id, &message);
                        Ok(())
                    }
                    None => self.not_found(client_id, ErrorCode::StatusNotFound, &run_id),
                }
            }
        }
    }

    fn start(&self, client_id: &str, order_text: String, options: RunOptions) -> Result<(), ErrorCode> {
        if !self.orchestrator.is_accepting_runs() {
            let err = ProtocolError::new(ErrorCode::HandlerError, "Server is shutting down");
            self.reply_error(client_id, &err);
            return Err(err.code);
        }

        let order = OrderRequest {
            order_text,
            options,
        };
        let run_id = self.orchestrator.start_run(client_id, &order);
        debug!(run_id = %run_id, workflow = self.workflow.name(), "Dispatching workflow");

        if let Err(e) = self.orchestrator.spawn_run(
            &run_id,
            order,
            Arc::clone(&self.workflow),
            Arc::clone(&self.bridge),
        ) {
            error!(run_id = %run_id, error = %e, "Failed to start workflow");
            self.orchestrator.fail_run(&run_id, &e.to_string());
        }
        Ok(())
    }

    fn owns_run(&self, client_id: &str, run_id: &str) -> bool {
        self.orchestrator
            .status(run_id)
            .is_some_and(|s| s.client_id == client_id)
    }

    fn not_found(&self, client_id: &str, code: ErrorCode, run_id: &str) -> Result<(), ErrorCode> {
        let err = ProtocolError::new(code, format!("Processing session {run_id} not found"));
        self.reply_error(client_id, &err);
        Err(code)
    }

    fn reply_error(&self, client_id: &str, err: &ProtocolError) {
        self.orchestrator
            .registry()
            .send(client_id, &ServerMessage::protocol_error(err));
    }
}
