//! Remote worker — drives the wire protocol over one persistent WebSocket
//! connection to an executor peer.
//!
//! The session is pull-asymmetric: this side advertises queued tasks, the
//! peer claims them with `AcceptTask` when it has capacity, so back-pressure
//! never needs an explicit window. A saturated peer simply stops accepting.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::{Worker, WorkerCore, WorkerId, WorkerSnapshot, WorkerStatus, short_id};
use crate::config::RemoteConfig;
use crate::error::{ProtocolError, Result};
use crate::files::FileStore;
use crate::protocol::{AdvertisedTask, PROTOCOL_VERSION, WireMessage, decode, encode};
use crate::queue::TaskQueue;
use crate::queue::record::{TaskFailure, TaskId};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Worker variant that executes tasks by round-tripping them to a remote
/// peer over a framed binary connection.
pub struct RemoteWorker {
    core: Arc<WorkerCore>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteWorker {
    /// Connect to the peer endpoint and spawn the session. Connection
    /// establishment is the sole entry point of this variant; the handshake
    /// completes asynchronously inside the session.
    pub async fn connect(
        config: RemoteConfig,
        queue: Arc<TaskQueue>,
        files: Arc<FileStore>,
    ) -> Result<Arc<Self>> {
        let (ws, _) = connect_async(config.endpoint.as_str())
            .await
            .map_err(|e| ProtocolError::Transport {
                reason: e.to_string(),
            })?;
        info!(endpoint = %config.endpoint, "Remote worker connected");

        let core = WorkerCore::new();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let session = Session {
            core: Arc::clone(&core),
            queue,
            files,
            in_flight: HashSet::new(),
        };
        let handle = tokio::spawn(session.run(ws, config.handshake_timeout, shutdown_rx));

        Ok(Arc::new(Self {
            core,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }))
    }
}

#[async_trait::async_trait]
impl Worker for RemoteWorker {
    fn id(&self) -> WorkerId {
        self.core.id
    }

    fn snapshot(&self) -> WorkerSnapshot {
        self.core.snapshot()
    }

    fn notify(&self) {
        self.core.wake.notify_one();
    }

    async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.handle.lock().expect("handle slot poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Connection-scoped protocol state.
struct Session {
    core: Arc<WorkerCore>,
    queue: Arc<TaskQueue>,
    files: Arc<FileStore>,
    /// Task ids with an `Execute` in flight, awaiting `TaskResult`/`TaskError`.
    in_flight: HashSet<TaskId>,
}

/// Sender half of the session's outbound channel. Dropping it closes the
/// writer, which closes the socket.
type Outbound = mpsc::UnboundedSender<WireMessage>;

impl Session {
    async fn run(
        mut self,
        ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
        handshake_timeout: std::time::Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let (sink, mut stream) = ws.split();
        let outbound = spawn_writer(sink);

        // Unestablished: our handshake goes out first; nothing but the
        // peer's handshake reply is acceptable until it arrives.
        self.send(&outbound, WireMessage::Handshake {
            version: PROTOCOL_VERSION.to_string(),
        });
        self.core.set_message(&self.queue, "Awaiting handshake").await;

        match timeout(handshake_timeout, read_frame(&mut stream)).await {
            Ok(Some(Ok(WireMessage::Handshake { version }))) => {
                if version != PROTOCOL_VERSION {
                    self.fail(
                        ProtocolError::VersionMismatch {
                            ours: PROTOCOL_VERSION.to_string(),
                            theirs: version,
                        }
                        .to_string(),
                    )
                    .await;
                    return;
                }
            }
            Ok(Some(Ok(other))) => {
                self.fail(
                    ProtocolError::HandshakeRequired {
                        got: other.kind().to_string(),
                    }
                    .to_string(),
                )
                .await;
                return;
            }
            Ok(Some(Err(e))) => {
                self.fail(e.to_string()).await;
                return;
            }
            Ok(None) => {
                self.fail(ProtocolError::ConnectionClosed.to_string()).await;
                return;
            }
            Err(_) => {
                self.fail("Handshake timed out").await;
                return;
            }
        }

        // Established.
        self.core.set_message(&self.queue, "Connected").await;
        self.core.set_status(&self.queue, WorkerStatus::Idle).await;
        self.advertise(&outbound).await;

        let wake = Arc::clone(&self.core);
        loop {
            tokio::select! {
                frame = read_frame(&mut stream) => match frame {
                    Some(Ok(message)) => {
                        if let Err(violation) = self.handle(&outbound, message).await {
                            self.fail(violation.to_string()).await;
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        self.fail(e.to_string()).await;
                        return;
                    }
                    None => {
                        self.fail(ProtocolError::ConnectionClosed.to_string()).await;
                        return;
                    }
                },
                _ = wake.wake.notified() => {
                    if self.core.status().ready_to_pull() {
                        self.advertise(&outbound).await;
                    }
                }
                _ = shutdown_rx.changed() => {
                    debug!(worker_id = %self.core.id, "Remote worker shutting down");
                    return;
                }
            }
        }
    }

    /// Dispatch one established-session message. `Err` means a protocol
    /// violation that is fatal to this connection.
    async fn handle(
        &mut self,
        outbound: &Outbound,
        message: WireMessage,
    ) -> std::result::Result<(), ProtocolError> {
        match message {
            WireMessage::RequestAvailableTasks => {
                self.advertise(outbound).await;
            }
            WireMessage::AcceptTask { task_id } => {
                self.accept(outbound, task_id).await;
            }
            WireMessage::TaskResult { task_id, result } => {
                if !self.in_flight.remove(&task_id) {
                    warn!(task_id = %task_id, "Result for unknown in-flight task, dropped");
                    return Ok(());
                }
                if let Err(e) = self.queue.resolve(task_id, result).await {
                    warn!(task_id = %task_id, error = %e, "Resolve from peer result failed");
                }
                self.finish_one(outbound).await;
            }
            WireMessage::TaskError { task_id, error } => {
                if !self.in_flight.remove(&task_id) {
                    warn!(task_id = %task_id, "Error for unknown in-flight task, dropped");
                    return Ok(());
                }
                if let Err(e) = self.queue.reject(task_id, TaskFailure::new(error)).await {
                    warn!(task_id = %task_id, error = %e, "Reject from peer error failed");
                }
                self.finish_one(outbound).await;
            }
            WireMessage::IncrementalUpdate {
                task_id,
                message,
                partial_result,
            } => {
                self.queue
                    .handle_incremental_update(task_id, message, partial_result)
                    .await;
            }
            WireMessage::FileRequest { file_id } => {
                match self.files.get(&file_id).await {
                    Ok(asset) => {
                        self.send(outbound, WireMessage::FileSend {
                            file_id,
                            content: BASE64.encode(&asset.bytes),
                        });
                    }
                    // Unknown file id is local and non-fatal.
                    Err(e) => warn!(error = %e, "File request for unknown asset"),
                }
            }
            WireMessage::FileSend { file_id, content } => {
                let bytes = BASE64
                    .decode(content.as_bytes())
                    .map_err(|e| ProtocolError::Payload {
                        reason: format!("file {file_id}: {e}"),
                    })?;
                self.files.register_with_id(file_id.clone(), bytes).await;
                self.send(outbound, WireMessage::FileReceive { file_id });
            }
            WireMessage::FileReceive { file_id } => {
                debug!(file_id = %file_id, "Peer acknowledged file");
            }
            WireMessage::Pause => {
                info!(worker_id = %self.core.id, "Paused by peer");
                self.core.set_message(&self.queue, "Paused by peer").await;
                self.core.set_status(&self.queue, WorkerStatus::Paused).await;
            }
            WireMessage::Resume => {
                info!(worker_id = %self.core.id, "Resumed by peer");
                self.core.set_message(&self.queue, "Connected").await;
                self.core.set_status(&self.queue, WorkerStatus::Idle).await;
                self.advertise(outbound).await;
            }
            // We are the advertising side; these have no meaning inbound.
            WireMessage::Handshake { .. }
            | WireMessage::AvailableTasks { .. }
            | WireMessage::Execute { .. } => {
                warn!(kind = message.kind(), "Ignoring unexpected message");
            }
        }
        Ok(())
    }

    /// Peer claimed an advertised task. The advertisement may be stale, so
    /// the claim re-validates; a lost race is an explicit no-op.
    async fn accept(&mut self, outbound: &Outbound, task_id: TaskId) {
        if !self.core.status().ready_to_pull() {
            debug!(task_id = %task_id, status = %self.core.status(), "Accept while not ready, ignored");
            return;
        }

        if !self.queue.claim(task_id, self.core.id).await {
            debug!(task_id = %task_id, "Accept for task no longer queued, ignored");
            return;
        }

        // Claim succeeded; the task snapshot is ours now.
        let Some(task) = self.queue.task(task_id).await else {
            warn!(task_id = %task_id, "Claimed task vanished");
            return;
        };

        self.core
            .set_message(
                &self.queue,
                format!("Executing {} ({})", task.kind, short_id(task_id)),
            )
            .await;
        self.core.set_status(&self.queue, WorkerStatus::Busy).await;
        self.in_flight.insert(task_id);
        self.send(outbound, WireMessage::Execute {
            task_id,
            request: task.request,
        });
    }

    /// After a terminal result: back to idle and immediately re-advertise
    /// to keep the pipeline full.
    async fn finish_one(&mut self, outbound: &Outbound) {
        self.core.set_message(&self.queue, "Connected").await;
        self.core.set_status(&self.queue, WorkerStatus::Idle).await;
        self.advertise(outbound).await;
    }

    async fn advertise(&self, outbound: &Outbound) {
        let tasks: Vec<AdvertisedTask> = self
            .queue
            .list_available()
            .await
            .into_iter()
            .map(|s| AdvertisedTask {
                id: s.id,
                request: s.request,
            })
            .collect();
        debug!(worker_id = %self.core.id, count = tasks.len(), "Advertising queued tasks");
        self.send(outbound, WireMessage::AvailableTasks { tasks });
    }

    fn send(&self, outbound: &Outbound, message: WireMessage) {
        if outbound.send(message).is_err() {
            warn!(worker_id = %self.core.id, "Outbound channel closed");
        }
    }

    /// Terminal for the connection: status `Error` with the diagnostic
    /// preserved. Other workers are unaffected; no reconnect is attempted.
    async fn fail(&self, diagnostic: impl Into<String>) {
        let diagnostic = diagnostic.into();
        warn!(worker_id = %self.core.id, %diagnostic, "Remote session failed");
        self.core.set_message(&self.queue, diagnostic).await;
        self.core.set_status(&self.queue, WorkerStatus::Error).await;
    }
}

/// Writer task: owns the sink, serializes frames in order. Ends (closing
/// the socket) when the session drops the sender.
fn spawn_writer(mut sink: WsSink) -> Outbound {
    let (tx, mut rx) = mpsc::unbounded_channel::<WireMessage>();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match encode(&message) {
                Ok(bytes) => {
                    if sink.send(Message::Binary(bytes.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Failed to encode outbound message"),
            }
        }
        let _ = sink.close().await;
    });
    tx
}

/// Read the next data frame, skipping control frames. `None` on close.
async fn read_frame(
    stream: &mut WsStream,
) -> Option<std::result::Result<WireMessage, ProtocolError>> {
    loop {
        match stream.next().await? {
            Ok(Message::Binary(bytes)) => return Some(decode(&bytes)),
            Ok(Message::Text(text)) => return Some(decode(text.as_bytes())),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => {
                return Some(Err(ProtocolError::Transport {
                    reason: e.to_string(),
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_to_unreachable_endpoint_is_a_transport_error() {
        let queue = TaskQueue::new();
        let files = FileStore::new();
        let config = RemoteConfig {
            // Nothing listens on port 1.
            endpoint: "ws://127.0.0.1:1/ws".to_string(),
            ..RemoteConfig::default()
        };

        let err = match RemoteWorker::connect(config, queue, files).await {
            Ok(_) => panic!("connecting to a dead port should fail"),
            Err(e) => e,
        };
        assert!(matches!(
            err,
            crate::error::Error::Protocol(ProtocolError::Transport { .. })
        ));
    }
}
