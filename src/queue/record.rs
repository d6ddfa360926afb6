//! Task records and the status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::QueueError;
use crate::tasks::{TaskDescriptor, TaskKind, TaskRequest, TaskResponse};
use crate::worker::WorkerId;

pub type TaskId = Uuid;

/// Status of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed by a worker.
    Queued,
    /// Claimed, executing.
    Pending,
    /// Completed with a response.
    Resolved,
    /// Failed; the failure reason is in the completion outcome.
    Rejected,
    /// Cancelled before any worker claimed it.
    Cancelled,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another status.
    /// Transitions only move forward; `Queued` is never re-entered.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Queued, Pending) | (Queued, Cancelled) | (Pending, Resolved) | (Pending, Rejected)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Rejected | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Cloneable failure payload attached to rejected tasks, so late observers
/// of the completion signal still see the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub message: String,
}

impl TaskFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Terminal outcome of a task.
pub type TaskOutcome = std::result::Result<TaskResponse, TaskFailure>;

/// Queue-internal envelope around a task descriptor. The completion channel
/// is the one settleable object per task: the queue holds the setter, every
/// `await_result` caller gets a read-only subscription.
#[derive(Debug)]
pub(crate) struct TaskRecord {
    pub id: TaskId,
    pub descriptor: TaskDescriptor,
    pub status: TaskStatus,
    pub assigned_worker: Option<WorkerId>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    completion: watch::Sender<Option<TaskOutcome>>,
}

impl TaskRecord {
    pub fn new(descriptor: TaskDescriptor) -> Self {
        let (completion, _) = watch::channel(None);
        Self {
            id: Uuid::new_v4(),
            descriptor,
            status: TaskStatus::Queued,
            assigned_worker: None,
            queued_at: Utc::now(),
            started_at: None,
            ended_at: None,
            completion,
        }
    }

    /// Read-only view of the completion signal. Works before and after
    /// settlement.
    pub fn subscribe(&self) -> watch::Receiver<Option<TaskOutcome>> {
        self.completion.subscribe()
    }

    /// Settle the completion signal. At most once per record.
    pub fn settle(&mut self, outcome: TaskOutcome) -> std::result::Result<(), QueueError> {
        if self.completion.borrow().is_some() {
            return Err(QueueError::AlreadySettled { id: self.id });
        }
        self.completion.send_replace(Some(outcome));
        Ok(())
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            kind: self.descriptor.kind(),
            request: self.descriptor.request.clone(),
            response: self.descriptor.response.clone(),
            status: self.status,
            assigned_worker: self.assigned_worker,
            queued_at: self.queued_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

/// Point-in-time read view of a task record, cloned out of the queue.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub kind: TaskKind,
    pub request: TaskRequest,
    pub response: Option<TaskResponse>,
    pub status: TaskStatus,
    pub assigned_worker: Option<WorkerId>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}
