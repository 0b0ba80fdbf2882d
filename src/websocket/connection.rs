//! Per-connection socket handling
//!
//! The socket is split: a writer task drains the connection's
//! [`ChannelTransport`] queue, and the read loop feeds text frames to the
//! [`MessageRouter`]. Engine code never writes to the socket directly.

use std::sync::Arc;

use axum::{
    extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
    extract::Path,
    response::IntoResponse,
    Extension,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use orderflow_core::{ChannelTransport, MessageRouter, Outbound, Transport};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    Extension(router): Extension<Arc<MessageRouter>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, router))
}

async fn handle_socket(socket: WebSocket, client_id: String, router: Arc<MessageRouter>) {
    let (sender, mut receiver) = socket.split();
    let (transport, outbound) = ChannelTransport::new();
    let transport: Arc<dyn Transport> = Arc::new(transport);
    let writer = tokio::spawn(write_loop(sender, outbound, client_id.clone()));

    let registry = Arc::clone(router.orchestrator().registry());
    if !registry.connect(&client_id, Arc::clone(&transport)) {
        writer.abort();
        return;
    }

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                debug!(client_id = %client_id, "Received message");
                // Rejections are already answered on the socket.
                let _ = router.handle_text(&client_id, &text);
            }
            Ok(Message::Close(_)) => {
                info!(client_id = %client_id, "WebSocket closed by client");
                break;
            }
            Ok(_) => registry.touch(&client_id),
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "WebSocket read error");
                break;
            }
        }
    }

    registry.disconnect_transport(&client_id, &transport, "Client disconnected");
    drop(transport);
    if let Err(e) = writer.await {
        debug!(client_id = %client_id, error = %e, "Writer task aborted");
    }
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: UnboundedReceiver<Outbound>,
    client_id: String,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Text(text) => {
                if sender.send(Message::Text(text)).await.is_err() {
                    debug!(client_id = %client_id, "Socket gone, writer stopping");
                    break;
                }
            }
            Outbound::Close(reason) => {
                let frame = CloseFrame {
                    code: close_code::NORMAL,
                    reason: reason.into(),
                };
                let _ = sender.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }
}
