//! Worker pool driving a work queue

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::metrics;
use crate::workqueue::WorkQueue;

/// Processes one queue key
///
/// An error re-queues the key with backoff; `Ok` clears its failure history.
#[async_trait]
pub trait SyncHandler: Send + Sync + 'static {
    async fn sync(&self, key: &str) -> Result<()>;
}

/// A work queue plus the handler its workers feed keys to
pub struct QueueController<H: SyncHandler> {
    kind: &'static str,
    queue: WorkQueue<String>,
    handler: Arc<H>,
}

impl<H: SyncHandler> QueueController<H> {
    pub fn new(kind: &'static str, queue: WorkQueue<String>, handler: Arc<H>) -> Self {
        Self { kind, queue, handler }
    }

    /// Wait for the caches, run `workers` workers until `shutdown` fires, then
    /// drain the queue and wait for every worker to exit
    ///
    /// Fails if shutdown arrives before the caches are synced or if they never
    /// sync.
    pub async fn run<F>(self, caches_synced: F, workers: usize, shutdown: CancellationToken) -> Result<()>
    where
        F: Future<Output = bool> + Send,
    {
        let kind = self.kind;
        info!(kind = kind, "Starting controller");

        info!(kind = kind, "Waiting for caches to sync");
        let synced = tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            synced = caches_synced => synced,
        };
        if !synced {
            self.queue.shutdown();
            return Err(Error::CacheSync(kind.to_string()));
        }
        info!(kind = kind, "Caches are synced");
        metrics::controller_ready();

        let handles: Vec<_> = (0..workers.max(1))
            .map(|worker| {
                let queue = self.queue.clone();
                let handler = self.handler.clone();
                tokio::spawn(async move {
                    while process_next_work_item(kind, &queue, handler.as_ref()).await {}
                    debug!(kind = kind, worker = worker, "Worker stopped");
                })
            })
            .collect();

        shutdown.cancelled().await;
        info!(kind = kind, "Shutting down, waiting for workers to finish");
        self.queue.shutdown();

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(kind = kind, error = %e, "Worker exited abnormally");
            }
        }
        info!(kind = kind, "Controller stopped");
        Ok(())
    }
}

/// Take one key off the queue and hand it to the handler
///
/// Returns `false` once the queue is shut down and empty.
pub async fn process_next_work_item<H>(kind: &str, queue: &WorkQueue<String>, handler: &H) -> bool
where
    H: SyncHandler + ?Sized,
{
    let Some(key) = queue.get().await else {
        return false;
    };
    metrics::QUEUE_DEPTH.with_label_values(&[kind]).set(queue.len() as f64);

    let result = {
        let _timer = metrics::RECONCILE_DURATION.with_label_values(&[kind]).start_timer();
        metrics::RECONCILIATIONS.with_label_values(&[kind]).inc();
        handler.sync(&key).await
    };

    match result {
        Ok(()) => queue.forget(&key),
        Err(e) => {
            error!(kind = kind, key = %key, error = %e, "Error in sync handler, re-adding item to queue");
            metrics::RECONCILIATION_ERRORS.with_label_values(&[kind]).inc();
            queue.add_rate_limited(key.clone());
        }
    }
    queue.done(&key);
    true
}
