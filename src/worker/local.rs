//! In-process worker — pulls from the queue and executes via the shared
//! task catalogue.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{ExecuteTask, Worker, WorkerCore, WorkerId, WorkerSnapshot, pull_one};
use crate::queue::TaskQueue;
use crate::queue::record::{TaskFailure, TaskSnapshot};
use crate::tasks::{TaskCatalog, TaskResponse};

struct CatalogExecute {
    catalog: Arc<dyn TaskCatalog>,
}

#[async_trait]
impl ExecuteTask for CatalogExecute {
    async fn execute(
        &self,
        task: &TaskSnapshot,
    ) -> std::result::Result<TaskResponse, TaskFailure> {
        self.catalog
            .run(&task.request)
            .await
            .map_err(|e| TaskFailure::new(e.to_string()))
    }
}

/// Worker variant that executes tasks on the local runtime.
pub struct LocalWorker {
    core: Arc<WorkerCore>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LocalWorker {
    /// Spawn the pull loop and return the registrable handle.
    pub fn spawn(queue: Arc<TaskQueue>, catalog: Arc<dyn TaskCatalog>) -> Arc<Self> {
        let core = WorkerCore::new();
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let loop_core = Arc::clone(&core);
        let handle = tokio::spawn(async move {
            let exec = CatalogExecute { catalog };
            loop {
                tokio::select! {
                    _ = loop_core.wake.notified() => {}
                    _ = shutdown_rx.changed() => break,
                }
                // Drain until the queue snapshot comes back empty.
                while pull_one(&loop_core, &queue, &exec).await {}
            }
            debug!(worker_id = %loop_core.id, "Local worker loop stopped");
        });

        Arc::new(Self {
            core,
            shutdown,
            handle: Mutex::new(Some(handle)),
        })
    }
}

#[async_trait]
impl Worker for LocalWorker {
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

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::config::CatalogConfig;
    use crate::queue::record::TaskStatus;
    use crate::tasks::{BuiltinCatalog, TaskDescriptor, TaskKind, TaskRequest};
    use crate::worker::WorkerStatus;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn catalog(delay_ms: u64) -> Arc<dyn TaskCatalog> {
        Arc::new(BuiltinCatalog::new(CatalogConfig {
            simulated_delay: Duration::from_millis(delay_ms),
        }))
    }

    #[tokio::test]
    async fn capitalize_end_to_end() {
        let queue = TaskQueue::new();
        let worker = LocalWorker::spawn(Arc::clone(&queue), catalog(10));
        queue.add_worker(worker.clone()).await;

        let task_id = queue
            .enqueue(TaskDescriptor::new(TaskRequest::Capitalize {
                text: "hi".to_string(),
            }))
            .await;

        let response = timeout(TEST_TIMEOUT, queue.await_result(task_id))
            .await
            .expect("task hung")
            .unwrap();
        assert_eq!(
            response,
            TaskResponse::Capitalize {
                result: "HI".to_string()
            }
        );

        let task = queue.task(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Resolved);
        assert_eq!(task.assigned_worker, Some(worker.id()));
        let (queued, started, ended) = (
            task.queued_at,
            task.started_at.unwrap(),
            task.ended_at.unwrap(),
        );
        assert!(ended > started);
        assert!(started > queued);
    }

    #[tokio::test]
    async fn one_task_two_workers_exactly_one_busy() {
        let queue = TaskQueue::new();
        let a = LocalWorker::spawn(Arc::clone(&queue), catalog(300));
        let b = LocalWorker::spawn(Arc::clone(&queue), catalog(300));
        queue.add_worker(a.clone()).await;
        queue.add_worker(b.clone()).await;

        let task_id = queue
            .enqueue(TaskDescriptor::new(TaskRequest::Reverse {
                text: "abc".to_string(),
            }))
            .await;

        tokio::time::sleep(Duration::from_millis(100)).await;

        let statuses = [a.snapshot().status, b.snapshot().status];
        let busy = statuses
            .iter()
            .filter(|s| **s == WorkerStatus::Busy)
            .count();
        assert_eq!(busy, 1, "exactly one worker should be executing");
        assert!(
            statuses
                .iter()
                .any(|s| matches!(s, WorkerStatus::Idle | WorkerStatus::Waiting))
        );

        let task = queue.task(task_id).await.unwrap();
        let busy_id = if a.snapshot().status == WorkerStatus::Busy {
            a.id()
        } else {
            b.id()
        };
        assert_eq!(task.assigned_worker, Some(busy_id));

        timeout(TEST_TIMEOUT, queue.await_result(task_id))
            .await
            .expect("task hung")
            .unwrap();
    }

    #[tokio::test]
    async fn worker_drains_backlog_in_fifo_order() {
        let queue = TaskQueue::new();

        // Enqueue before the worker exists; registration must trigger the
        // first pull.
        let first = queue
            .enqueue(TaskDescriptor::new(TaskRequest::Capitalize {
                text: "a".to_string(),
            }))
            .await;
        let second = queue
            .enqueue(TaskDescriptor::new(TaskRequest::Capitalize {
                text: "b".to_string(),
            }))
            .await;

        let worker = LocalWorker::spawn(Arc::clone(&queue), catalog(0));
        queue.add_worker(worker).await;

        timeout(TEST_TIMEOUT, queue.await_result(second))
            .await
            .expect("task hung")
            .unwrap();

        let first_task = queue.task(first).await.unwrap();
        let second_task = queue.task(second).await.unwrap();
        assert_eq!(first_task.status, TaskStatus::Resolved);
        assert!(first_task.started_at.unwrap() <= second_task.started_at.unwrap());
    }

    #[tokio::test]
    async fn execution_failure_surfaces_as_rejected() {
        let queue = TaskQueue::new();
        let narrow: Arc<dyn TaskCatalog> = Arc::new(BuiltinCatalog::with_kinds(
            CatalogConfig::default(),
            [TaskKind::Capitalize],
        ));
        let worker = LocalWorker::spawn(Arc::clone(&queue), narrow);
        queue.add_worker(worker).await;

        let task_id = queue
            .enqueue(TaskDescriptor::new(TaskRequest::Reverse {
                text: "abc".to_string(),
            }))
            .await;

        let err = timeout(TEST_TIMEOUT, queue.await_result(task_id))
            .await
            .expect("task hung")
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::TaskFailed { .. }));
        assert_eq!(
            queue.task(task_id).await.unwrap().status,
            TaskStatus::Rejected
        );
    }

    #[tokio::test]
    async fn shutdown_stops_the_pull_loop() {
        let queue = TaskQueue::new();
        let worker = LocalWorker::spawn(Arc::clone(&queue), catalog(0));
        queue.add_worker(worker.clone()).await;

        queue.remove_worker(worker.id()).await.unwrap();

        // Tasks enqueued after removal stay queued.
        let task_id = queue
            .enqueue(TaskDescriptor::new(TaskRequest::Capitalize {
                text: "x".to_string(),
            }))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.task(task_id).await.unwrap().status, TaskStatus::Queued);
    }
}
