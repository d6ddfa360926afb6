use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use taskwire::config::{CatalogConfig, PeerConfig, RemoteConfig};
use taskwire::files::FileStore;
use taskwire::peer::peer_routes;
use taskwire::queue::TaskQueue;
use taskwire::tasks::{BuiltinCatalog, TaskCatalog, TaskDescriptor, TaskRequest};
use taskwire::worker::{LocalWorker, RemoteWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let peer_config = match std::env::var("TASKWIRE_BIND") {
        Ok(bind_addr) => PeerConfig { bind_addr },
        Err(_) => PeerConfig::default(),
    };
    let delay_ms: u64 = std::env::var("TASKWIRE_TASK_DELAY_MS")
        .unwrap_or_else(|_| "500".to_string())
        .parse()
        .unwrap_or(500);

    let catalog: Arc<dyn TaskCatalog> = Arc::new(BuiltinCatalog::new(CatalogConfig {
        simulated_delay: Duration::from_millis(delay_ms),
    }));

    // Executor peer endpoint: the in-repo remote side of the protocol.
    let peer_files = FileStore::new();
    let listener = TcpListener::bind(&peer_config.bind_addr).await?;
    let peer_addr = listener.local_addr()?;
    let app = peer_routes(Arc::clone(&catalog), peer_files);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Peer endpoint stopped");
        }
    });

    eprintln!("⚙️  Taskwire v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Executor endpoint: ws://{peer_addr}/ws");
    eprintln!("   Task delay: {delay_ms}ms\n");

    let queue = TaskQueue::new();
    queue.subscribe_queue_changed(|tasks| {
        for task in tasks {
            info!(task_id = %task.id, kind = %task.kind, status = %task.status, "queue");
        }
    });
    queue.subscribe_task_update(|update| {
        info!(task_id = %update.task_id, message = %update.message, "progress");
    });

    let files = FileStore::new();
    let local = LocalWorker::spawn(Arc::clone(&queue), Arc::clone(&catalog));
    queue.add_worker(local).await;

    let remote = RemoteWorker::connect(
        RemoteConfig {
            endpoint: format!("ws://{peer_addr}/ws"),
            ..RemoteConfig::default()
        },
        Arc::clone(&queue),
        Arc::clone(&files),
    )
    .await?;
    queue.add_worker(remote).await;

    let task_ids = vec![
        queue
            .enqueue(TaskDescriptor::new(TaskRequest::Capitalize {
                text: "hello taskwire".to_string(),
            }))
            .await,
        queue
            .enqueue(TaskDescriptor::new(TaskRequest::Reverse {
                text: "dispatch".to_string(),
            }))
            .await,
        queue
            .enqueue(TaskDescriptor::new(TaskRequest::WordCount {
                text: "one queue many workers".to_string(),
            }))
            .await,
    ];

    for task_id in task_ids {
        match queue.await_result(task_id).await {
            Ok(response) => eprintln!("✔ {task_id}: {response:?}"),
            Err(e) => eprintln!("✘ {task_id}: {e}"),
        }
    }

    for worker in queue.worker_snapshots().await {
        eprintln!("worker {} — {} ({})", worker.id, worker.status, worker.message);
    }

    Ok(())
}
