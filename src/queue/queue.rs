//! The task queue: owns all task records and the worker registry.
//!
//! Every mutation of a record's status goes through this type while holding
//! the single write lock, which is what makes `claim`'s check-and-set atomic
//! and rules out double-assignment. Event emission happens after the lock is
//! dropped but before the mutating call returns.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, QueueError, Result};
use crate::queue::events::{Listeners, SubscriptionId, TaskUpdate};
use crate::queue::record::{TaskFailure, TaskId, TaskRecord, TaskSnapshot, TaskStatus};
use crate::tasks::{TaskDescriptor, TaskResponse};
use crate::worker::{Worker, WorkerId, WorkerSnapshot};

struct QueueState {
    tasks: HashMap<TaskId, TaskRecord>,
    workers: HashMap<WorkerId, Arc<dyn Worker>>,
}

/// In-memory task queue with a pull-based worker registry.
pub struct TaskQueue {
    state: RwLock<QueueState>,
    queue_listeners: Listeners<Vec<TaskSnapshot>>,
    worker_listeners: Listeners<Vec<WorkerSnapshot>>,
    update_listeners: Listeners<TaskUpdate>,
}

impl TaskQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(QueueState {
                tasks: HashMap::new(),
                workers: HashMap::new(),
            }),
            queue_listeners: Listeners::new(),
            worker_listeners: Listeners::new(),
            update_listeners: Listeners::new(),
        })
    }

    // ── Producer interface ──────────────────────────────────────────────

    /// Create a task record in `Queued` and wake idle workers. Never blocks
    /// on execution.
    pub async fn enqueue(&self, descriptor: TaskDescriptor) -> TaskId {
        let record = TaskRecord::new(descriptor);
        let id = record.id;

        let (snapshot, workers) = {
            let mut state = self.state.write().await;
            state.tasks.insert(id, record);
            (task_snapshots(&state), worker_handles(&state))
        };

        info!(task_id = %id, "Task enqueued");
        self.queue_listeners.emit(&snapshot);
        notify_all(&workers);
        id
    }

    /// Cancel a task that has not been claimed yet. Returns false (status
    /// untouched) for `Pending` or terminal records.
    pub async fn cancel(&self, task_id: TaskId) -> bool {
        let snapshot = {
            let mut state = self.state.write().await;
            let Some(record) = state.tasks.get_mut(&task_id) else {
                warn!(task_id = %task_id, "Cancel for unknown task");
                return false;
            };
            if !record.status.can_transition_to(TaskStatus::Cancelled) {
                debug!(task_id = %task_id, status = %record.status, "Cannot cancel task");
                return false;
            }
            record.status = TaskStatus::Cancelled;
            record.ended_at = Some(Utc::now());
            task_snapshots(&state)
        };

        info!(task_id = %task_id, "Task cancelled");
        self.queue_listeners.emit(&snapshot);
        true
    }

    /// Await the task's terminal outcome. Returns immediately if it already
    /// settled; `TaskNotFound` for unknown ids.
    ///
    /// Only `resolve` and `reject` settle the signal. A cancelled task never
    /// settles, so a caller already waiting on it suspends indefinitely;
    /// observe cancellation through `QueueChanged` or `task()` instead.
    pub async fn await_result(&self, task_id: TaskId) -> Result<TaskResponse> {
        let mut rx = {
            let state = self.state.read().await;
            let record = state
                .tasks
                .get(&task_id)
                .ok_or(QueueError::TaskNotFound { id: task_id })?;
            record.subscribe()
        };

        loop {
            let settled = rx.borrow().clone();
            match settled {
                Some(Ok(response)) => return Ok(response),
                Some(Err(failure)) => {
                    return Err(Error::TaskFailed {
                        reason: failure.message,
                    });
                }
                None => {}
            }
            if rx.changed().await.is_err() {
                // The queue owns the sender for the record's lifetime, so
                // this only happens if the queue itself is gone.
                return Err(Error::TaskFailed {
                    reason: "queue dropped before completion".to_string(),
                });
            }
        }
    }

    // ── Worker-facing interface ─────────────────────────────────────────

    /// Point-in-time snapshot of claimable tasks, oldest first.
    pub async fn list_available(&self) -> Vec<TaskSnapshot> {
        let state = self.state.read().await;
        let mut available: Vec<TaskSnapshot> = state
            .tasks
            .values()
            .filter(|r| r.status == TaskStatus::Queued)
            .map(TaskRecord::snapshot)
            .collect();
        available.sort_by_key(|s| s.queued_at);
        available
    }

    /// Atomic check-and-set: `Queued -> Pending`, binding the task to one
    /// worker. Returns false without side effects if the task is unknown or
    /// no longer `Queued` (another worker won the race).
    pub async fn claim(&self, task_id: TaskId, worker_id: WorkerId) -> bool {
        let snapshot = {
            let mut state = self.state.write().await;
            let Some(record) = state.tasks.get_mut(&task_id) else {
                return false;
            };
            if record.status != TaskStatus::Queued {
                return false;
            }
            record.status = TaskStatus::Pending;
            record.assigned_worker = Some(worker_id);
            record.started_at = Some(Utc::now());
            task_snapshots(&state)
        };

        debug!(task_id = %task_id, worker_id = %worker_id, "Task claimed");
        self.queue_listeners.emit(&snapshot);
        true
    }

    /// Complete a `Pending` task with its response.
    pub async fn resolve(&self, task_id: TaskId, response: TaskResponse) -> Result<()> {
        let snapshot = {
            let mut state = self.state.write().await;
            let record = state
                .tasks
                .get_mut(&task_id)
                .ok_or(QueueError::TaskNotFound { id: task_id })?;
            if !record.status.can_transition_to(TaskStatus::Resolved) {
                return Err(QueueError::InvalidTransition {
                    id: task_id,
                    from: record.status.to_string(),
                    to: TaskStatus::Resolved.to_string(),
                }
                .into());
            }
            record.descriptor.response = Some(response.clone());
            record.status = TaskStatus::Resolved;
            record.ended_at = Some(Utc::now());
            record.settle(Ok(response))?;
            task_snapshots(&state)
        };

        info!(task_id = %task_id, "Task resolved");
        self.queue_listeners.emit(&snapshot);
        Ok(())
    }

    /// Fail a `Pending` task.
    pub async fn reject(&self, task_id: TaskId, failure: TaskFailure) -> Result<()> {
        let snapshot = {
            let mut state = self.state.write().await;
            let record = state
                .tasks
                .get_mut(&task_id)
                .ok_or(QueueError::TaskNotFound { id: task_id })?;
            if !record.status.can_transition_to(TaskStatus::Rejected) {
                return Err(QueueError::InvalidTransition {
                    id: task_id,
                    from: record.status.to_string(),
                    to: TaskStatus::Rejected.to_string(),
                }
                .into());
            }
            record.status = TaskStatus::Rejected;
            record.ended_at = Some(Utc::now());
            record.settle(Err(failure.clone()))?;
            task_snapshots(&state)
        };

        warn!(task_id = %task_id, reason = %failure, "Task rejected");
        self.queue_listeners.emit(&snapshot);
        Ok(())
    }

    /// Forward a progress report for a still-executing task. Status is not
    /// touched.
    pub async fn handle_incremental_update(
        &self,
        task_id: TaskId,
        message: String,
        partial_result: Option<serde_json::Value>,
    ) {
        if !self.state.read().await.tasks.contains_key(&task_id) {
            warn!(task_id = %task_id, "Incremental update for unknown task");
        }
        self.update_listeners.emit(&TaskUpdate {
            task_id,
            message,
            partial_result,
        });
    }

    // ── Observers ───────────────────────────────────────────────────────

    /// Full snapshot of every task record, in no particular order.
    pub async fn tasks(&self) -> Vec<TaskSnapshot> {
        let state = self.state.read().await;
        task_snapshots(&state)
    }

    pub async fn task(&self, task_id: TaskId) -> Option<TaskSnapshot> {
        let state = self.state.read().await;
        state.tasks.get(&task_id).map(TaskRecord::snapshot)
    }

    pub async fn worker_snapshots(&self) -> Vec<WorkerSnapshot> {
        let state = self.state.read().await;
        worker_snapshots(&state)
    }

    // ── Worker registry ─────────────────────────────────────────────────

    /// Register a worker and immediately let it attempt a claim, in case
    /// tasks were enqueued before it arrived.
    pub async fn add_worker(&self, worker: Arc<dyn Worker>) {
        let snapshot = {
            let mut state = self.state.write().await;
            state.workers.insert(worker.id(), Arc::clone(&worker));
            worker_snapshots(&state)
        };
        info!(worker_id = %worker.id(), "Worker registered");
        self.worker_listeners.emit(&snapshot);
        worker.notify();
    }

    /// Deregister a worker, releasing its transport resource first.
    pub async fn remove_worker(&self, worker_id: WorkerId) -> Result<()> {
        let worker = {
            let state = self.state.read().await;
            state
                .workers
                .get(&worker_id)
                .cloned()
                .ok_or(QueueError::WorkerNotFound { id: worker_id })?
        };

        worker.shutdown().await;

        let snapshot = {
            let mut state = self.state.write().await;
            state.workers.remove(&worker_id);
            worker_snapshots(&state)
        };
        info!(worker_id = %worker_id, "Worker removed");
        self.worker_listeners.emit(&snapshot);
        Ok(())
    }

    /// Non-blocking "tasks may be available" hook on every registered
    /// worker. Busy or paused workers ignore it.
    pub async fn notify_workers(&self) {
        let workers = {
            let state = self.state.read().await;
            worker_handles(&state)
        };
        notify_all(&workers);
    }

    /// Called by workers when their own status or message changes.
    pub async fn emit_worker_changed(&self) {
        let snapshot = {
            let state = self.state.read().await;
            worker_snapshots(&state)
        };
        self.worker_listeners.emit(&snapshot);
    }

    // ── Subscriptions ───────────────────────────────────────────────────
    //
    // Callbacks run synchronously inside the mutating call and must not
    // call back into the queue.

    pub fn subscribe_queue_changed(
        &self,
        callback: impl Fn(&Vec<TaskSnapshot>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.queue_listeners.subscribe(callback)
    }

    pub fn unsubscribe_queue_changed(&self, id: SubscriptionId) -> bool {
        self.queue_listeners.unsubscribe(id)
    }

    pub fn subscribe_worker_changed(
        &self,
        callback: impl Fn(&Vec<WorkerSnapshot>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.worker_listeners.subscribe(callback)
    }

    pub fn unsubscribe_worker_changed(&self, id: SubscriptionId) -> bool {
        self.worker_listeners.unsubscribe(id)
    }

    pub fn subscribe_task_update(
        &self,
        callback: impl Fn(&TaskUpdate) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.update_listeners.subscribe(callback)
    }

    pub fn unsubscribe_task_update(&self, id: SubscriptionId) -> bool {
        self.update_listeners.unsubscribe(id)
    }
}

fn task_snapshots(state: &QueueState) -> Vec<TaskSnapshot> {
    state.tasks.values().map(TaskRecord::snapshot).collect()
}

fn worker_snapshots(state: &QueueState) -> Vec<WorkerSnapshot> {
    state.workers.values().map(|w| w.snapshot()).collect()
}

fn worker_handles(state: &QueueState) -> Vec<Arc<dyn Worker>> {
    state.workers.values().cloned().collect()
}

fn notify_all(workers: &[Arc<dyn Worker>]) {
    for worker in workers {
        worker.notify();
    }
}
