//! Bounded worker pool
//!
//! Items go into a closed multi-consumer queue, `workers` tasks drain it and
//! forward successful results on a channel. The caller gets results only after
//! every worker has been joined. No pool outlives the call that created it.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Run `task` over `items` with at most `workers` concurrent tasks.
///
/// `task` returns `None` for items that failed; failures are expected to be
/// logged by the task itself. Result order is unspecified.
pub async fn run_pool<T, R, F, Fut>(items: Vec<T>, workers: usize, task: F) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<R>> + Send + 'static,
{
    if items.is_empty() {
        return Vec::new();
    }

    let workers = workers.clamp(1, items.len());
    let (queue_tx, queue_rx) = async_channel::bounded(items.len());
    for item in items {
        // Capacity equals the item count and the receiver is alive
        if queue_tx.try_send(item).is_err() {
            error!("Worker queue rejected an item");
        }
    }
    queue_tx.close();

    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    let task = Arc::new(task);
    let mut join_set = JoinSet::new();

    for worker_id in 0..workers {
        let queue_rx = queue_rx.clone();
        let result_tx = result_tx.clone();
        let task = Arc::clone(&task);
        join_set.spawn(async move {
            let mut processed = 0usize;
            while let Ok(item) = queue_rx.recv().await {
                processed += 1;
                if let Some(result) = task(item).await {
                    // Receiver lives until after the join
                    let _ = result_tx.send(result);
                }
            }
            debug!(worker_id = worker_id, processed = processed, "Worker drained queue");
        });
    }
    drop(result_tx);

    while let Some(joined) = join_set.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Worker task failed");
        }
    }

    let mut results = Vec::new();
    while let Some(result) = result_rx.recv().await {
        results.push(result);
    }
    results
}
