//! Executor peer endpoint — the remote side of the wire protocol, serving
//! task execution over a WebSocket route.
//!
//! Accept policy is single-capacity: the peer claims one advertised task at
//! a time and asks for more only after finishing it, so back-pressure toward
//! the queue is just the absence of `AcceptTask`.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, info, warn};

use crate::files::FileStore;
use crate::protocol::{PROTOCOL_VERSION, WireMessage, decode, encode};
use crate::tasks::TaskCatalog;

/// Shared state for peer connections.
#[derive(Clone)]
pub struct PeerState {
    pub catalog: Arc<dyn TaskCatalog>,
    pub files: Arc<FileStore>,
}

/// Build the WebSocket router for the executor endpoint.
pub fn peer_routes(catalog: Arc<dyn TaskCatalog>, files: Arc<FileStore>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(PeerState { catalog, files })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<PeerState>) -> impl IntoResponse {
    info!("Worker connecting to executor endpoint");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: PeerState) {
    // Handshake gate: nothing else is valid as the first frame.
    match read_frame(&mut socket).await {
        Some(Ok(WireMessage::Handshake { version })) if version == PROTOCOL_VERSION => {}
        Some(Ok(WireMessage::Handshake { version })) => {
            warn!(theirs = %version, ours = PROTOCOL_VERSION, "Handshake version mismatch");
            return;
        }
        Some(Ok(other)) => {
            warn!(kind = other.kind(), "First frame was not a handshake, closing");
            return;
        }
        Some(Err(e)) => {
            warn!(error = %e, "Undecodable first frame, closing");
            return;
        }
        None => return,
    }
    if !send(&mut socket, &WireMessage::Handshake {
        version: PROTOCOL_VERSION.to_string(),
    })
    .await
    {
        return;
    }
    info!("Worker session established");

    while let Some(frame) = read_frame(&mut socket).await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Undecodable frame, closing session");
                return;
            }
        };

        match message {
            WireMessage::AvailableTasks { tasks } => {
                // Idle whenever we get here; claim the head of the queue.
                if let Some(task) = tasks.into_iter().next() {
                    debug!(task_id = %task.id, "Accepting advertised task");
                    if !send(&mut socket, &WireMessage::AcceptTask { task_id: task.id }).await {
                        return;
                    }
                }
            }
            WireMessage::Execute { task_id, request } => {
                let name = request.kind().to_string();
                debug!(task_id = %task_id, task = %name, "Executing task");
                if !send(&mut socket, &WireMessage::IncrementalUpdate {
                    task_id,
                    message: format!("running {name}"),
                    partial_result: None,
                })
                .await
                {
                    return;
                }

                let reply = match state.catalog.run(&request).await {
                    Ok(result) => WireMessage::TaskResult { task_id, result },
                    Err(e) => WireMessage::TaskError {
                        task_id,
                        error: e.to_string(),
                    },
                };
                if !send(&mut socket, &reply).await {
                    return;
                }
                // Done; pull the next advertisement.
                if !send(&mut socket, &WireMessage::RequestAvailableTasks).await {
                    return;
                }
            }
            WireMessage::FileRequest { file_id } => match state.files.get(&file_id).await {
                Ok(asset) => {
                    if !send(&mut socket, &WireMessage::FileSend {
                        file_id,
                        content: BASE64.encode(&asset.bytes),
                    })
                    .await
                    {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "File request for unknown asset"),
            },
            WireMessage::FileSend { file_id, content } => {
                match BASE64.decode(content.as_bytes()) {
                    Ok(bytes) => {
                        state.files.register_with_id(file_id.clone(), bytes).await;
                        if !send(&mut socket, &WireMessage::FileReceive { file_id }).await {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(file_id = %file_id, error = %e, "Malformed file payload, closing");
                        return;
                    }
                }
            }
            WireMessage::FileReceive { file_id } => {
                debug!(file_id = %file_id, "Worker acknowledged file");
            }
            other => {
                debug!(kind = other.kind(), "Ignoring message");
            }
        }
    }
    info!("Worker session closed");
}

async fn send(socket: &mut WebSocket, message: &WireMessage) -> bool {
    match encode(message) {
        Ok(bytes) => socket.send(Message::Binary(bytes.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode frame");
            false
        }
    }
}

/// Next data frame, skipping control frames. `None` on close.
async fn read_frame(
    socket: &mut WebSocket,
) -> Option<Result<WireMessage, crate::error::ProtocolError>> {
    loop {
        match socket.recv().await? {
            Ok(Message::Binary(bytes)) => return Some(decode(&bytes)),
            Ok(Message::Text(text)) => return Some(decode(text.as_bytes())),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}
