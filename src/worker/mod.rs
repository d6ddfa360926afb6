//! Worker abstraction — status lifecycle, the capability trait, and the
//! shared pull algorithm.

pub mod local;
pub mod remote;

pub use local::LocalWorker;
pub use remote::RemoteWorker;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::queue::TaskQueue;
use crate::queue::record::{TaskFailure, TaskSnapshot};
use crate::tasks::TaskResponse;

pub type WorkerId = Uuid;

/// Status of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Ready to pull.
    Idle,
    /// Ready to pull; last snapshot of the queue was empty.
    Waiting,
    /// Executing a claimed task.
    Busy,
    /// Claims suppressed until a resume.
    Paused,
    /// Transport or protocol failure; terminal for the connection.
    Error,
}

impl WorkerStatus {
    pub fn ready_to_pull(&self) -> bool {
        matches!(self, Self::Idle | Self::Waiting)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Waiting => "waiting",
            Self::Busy => "busy",
            Self::Paused => "paused",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Read view of a worker: status plus a short diagnostic message, the sole
/// error-reporting channel to observers.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub message: String,
}

/// Capability interface for the closed set of worker variants. Dispatch is
/// always through this trait, never by inspecting the concrete type.
#[async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> WorkerId;

    fn snapshot(&self) -> WorkerSnapshot;

    /// Non-blocking "tasks may be available" hook. Busy or paused workers
    /// ignore it.
    fn notify(&self);

    /// Disposal hook: releases the worker's transport resource. Called by
    /// the queue before deregistration.
    async fn shutdown(&self);
}

/// State shared by every worker variant: identity, status, diagnostic
/// message, and the wakeup used by the notify hook.
pub(crate) struct WorkerCore {
    pub id: WorkerId,
    status: Mutex<WorkerStatus>,
    message: Mutex<String>,
    pub wake: Notify,
}

impl WorkerCore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            status: Mutex::new(WorkerStatus::Idle),
            message: Mutex::new(String::new()),
            wake: Notify::new(),
        })
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.lock().expect("worker status poisoned")
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id,
            status: self.status(),
            message: self.message.lock().expect("worker message poisoned").clone(),
        }
    }

    /// Update status and re-publish the worker map.
    pub async fn set_status(&self, queue: &TaskQueue, status: WorkerStatus) {
        debug!(worker_id = %self.id, status = %status, "Worker status");
        *self.status.lock().expect("worker status poisoned") = status;
        queue.emit_worker_changed().await;
    }

    pub async fn set_message(&self, queue: &TaskQueue, message: impl Into<String>) {
        let message = message.into();
        debug!(worker_id = %self.id, message = %message, "Worker message");
        *self.message.lock().expect("worker message poisoned") = message;
        queue.emit_worker_changed().await;
    }
}

/// The execute seam: the only operation a concrete variant must supply.
#[async_trait]
pub(crate) trait ExecuteTask: Send + Sync {
    async fn execute(&self, task: &TaskSnapshot)
    -> std::result::Result<TaskResponse, TaskFailure>;
}

/// One pass of the pull algorithm: snapshot the queue, claim the FIFO head
/// (retrying after lost races), execute, report the outcome. Returns false
/// when there was nothing claimable — the caller's loop parks on the wakeup,
/// which is the base case that prevents busy-looping.
pub(crate) async fn pull_one(
    core: &WorkerCore,
    queue: &TaskQueue,
    exec: &dyn ExecuteTask,
) -> bool {
    if !core.status().ready_to_pull() {
        return false;
    }

    loop {
        let available = queue.list_available().await;
        let Some(head) = available.into_iter().next() else {
            core.set_message(queue, "Waiting for tasks").await;
            core.set_status(queue, WorkerStatus::Waiting).await;
            return false;
        };

        if !queue.claim(head.id, core.id).await {
            // Lost the race to another worker; re-snapshot and retry.
            continue;
        }

        core.set_message(queue, format!("Executing {} ({})", head.kind, short_id(head.id)))
            .await;
        core.set_status(queue, WorkerStatus::Busy).await;

        match exec.execute(&head).await {
            Ok(response) => {
                if let Err(e) = queue.resolve(head.id, response).await {
                    warn!(task_id = %head.id, error = %e, "Resolve after execution failed");
                }
            }
            Err(failure) => {
                if let Err(e) = queue.reject(head.id, failure).await {
                    warn!(task_id = %head.id, error = %e, "Reject after execution failed");
                }
            }
        }

        core.set_status(queue, WorkerStatus::Idle).await;
        return true;
    }
}

/// First uuid segment, for diagnostic messages.
pub(crate) fn short_id(id: Uuid) -> String {
    id.to_string()
        .split('-')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_to_pull_only_when_idle_or_waiting() {
        assert!(WorkerStatus::Idle.ready_to_pull());
        assert!(WorkerStatus::Waiting.ready_to_pull());
        assert!(!WorkerStatus::Busy.ready_to_pull());
        assert!(!WorkerStatus::Paused.ready_to_pull());
        assert!(!WorkerStatus::Error.ready_to_pull());
    }

    #[test]
    fn short_id_is_first_segment() {
        let id = Uuid::new_v4();
        assert_eq!(short_id(id).len(), 8);
        assert!(id.to_string().starts_with(&short_id(id)));
    }
}
