//! Worker pool & lifecycle (C5): spawns the worker tasks and the
//! drain-watcher, and converges the three independent shutdown triggers
//! (OS signal, context/token cancellation, queue drain) onto one idempotent
//! path, per spec.md §4.5 and §9.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::archive::CarRepoArchive;
use crate::db::{Database, ScyllaRowSink};
use crate::processor::process_archive;
use crate::queue::{JobQueue, Outcome};

/// How often the drain-watcher checks whether the enqueued set is empty.
const DRAIN_TICK: Duration = Duration::from_secs(30);

/// Spawns `worker_count` blocking worker tasks. Each loops: check shutdown,
/// dequeue, process, finish, repeat — exiting once the queue is empty or
/// shutdown has been observed at loop-top. A worker already inside
/// `process_archive` runs the archive to completion before it re-checks
/// shutdown; mid-archive suspension is deliberately unsupported (spec.md §4.5
/// race note).
pub fn spawn_workers(
    queue: Arc<JobQueue>,
    db: Arc<Database>,
    out_dir: PathBuf,
    worker_count: usize,
    shutdown: CancellationToken,
    text_len: Arc<AtomicU64>,
    runtime: tokio::runtime::Handle,
) -> Vec<JoinHandle<()>> {
    (0..worker_count)
        .map(|id| {
            let queue = queue.clone();
            let db = db.clone();
            let out_dir = out_dir.clone();
            let shutdown = shutdown.clone();
            let text_len = text_len.clone();
            let runtime = runtime.clone();
            tokio::task::spawn_blocking(move || {
                worker_loop(id, &queue, db, &out_dir, &shutdown, &text_len, runtime)
            })
        })
        .collect()
}

fn worker_loop(
    id: usize,
    queue: &JobQueue,
    db: Arc<Database>,
    out_dir: &Path,
    shutdown: &CancellationToken,
    text_len: &AtomicU64,
    runtime: tokio::runtime::Handle,
) {
    let sink = ScyllaRowSink::new(db, runtime);

    loop {
        if shutdown.is_cancelled() {
            info!(worker = id, "exiting on shutdown signal");
            return;
        }

        let Some(did) = queue.dequeue() else {
            info!(worker = id, "no more archives enqueued, exiting");
            return;
        };

        let outcome = match CarRepoArchive::open(out_dir, &did) {
            Ok(archive) => process_archive(&sink, &archive, &did, text_len),
            Err(e) => {
                warn!(worker = id, did = %did, error = ?e, "failed to open archive");
                Outcome::FailedForEach
            },
        };

        queue.finish(did, outcome);
    }
}

/// Wakes every [`DRAIN_TICK`] and cancels `shutdown` once the job queue's
/// enqueued set is empty. This is one of the three convergent shutdown
/// triggers (spec.md §4.5); the other two are the OS signal listener and an
/// externally cancelled token, both handled in [`wait_for_shutdown`].
pub fn spawn_drain_watcher(queue: Arc<JobQueue>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DRAIN_TICK);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    if queue.is_drained() {
                        info!("no more archives to process, shutting down");
                        shutdown.cancel();
                        return;
                    }
                },
            }
        }
    })
}

/// Blocks until one of SIGINT, SIGTERM, or `shutdown` being cancelled
/// (internally, by the drain-watcher) fires, then cancels `shutdown` so every
/// other listener (workers, metrics server) converges on the same signal.
/// Cancelling an already-cancelled token is a no-op, so this is safe to call
/// regardless of which trigger fired first.
pub async fn wait_for_shutdown(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install SIGINT handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
        _ = shutdown.cancelled() => info!("shutdown triggered internally"),
    }

    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn drain_watcher_cancels_shutdown_once_queue_empties() {
        let queue = Arc::new(JobQueue::from_dids(["a".to_string()]));
        let shutdown = CancellationToken::new();
        let watcher = spawn_drain_watcher(queue.clone(), shutdown.clone());

        queue.dequeue();
        queue.finish("a".to_string(), Outcome::Finished);

        tokio::time::advance(DRAIN_TICK + Duration::from_secs(1)).await;
        shutdown.cancelled().await;
        assert!(shutdown.is_cancelled());
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_shutdown_returns_immediately_on_pre_cancelled_token() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        wait_for_shutdown(shutdown.clone()).await;
        assert!(shutdown.is_cancelled());
    }
}
