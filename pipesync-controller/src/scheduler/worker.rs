//! Reconcile workers
//!
//! Each worker pulls keys off the shared queue and hands them to the
//! reconciler registered for the key's kind. Failed or requeued keys go back on
//! the queue after a delay.

use pipesync_core::ResourceKind;
use pipesync_reconciler::Reconciler;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::queue::{WorkItem, WorkQueue};

pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    reconcilers: Arc<HashMap<ResourceKind, Arc<dyn Reconciler>>>,
    requeue_delay: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<WorkQueue>,
        reconcilers: Vec<Arc<dyn Reconciler>>,
        requeue_delay: Duration,
    ) -> Self {
        let reconcilers = reconcilers.into_iter().map(|r| (r.kind(), r)).collect();
        Self {
            queue,
            reconcilers: Arc::new(reconcilers),
            requeue_delay,
        }
    }

    /// Spawns `count` workers that run until `token` is cancelled or the queue
    /// shuts down
    pub fn spawn(&self, count: usize, token: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: Arc::clone(&self.queue),
                    reconcilers: Arc::clone(&self.reconcilers),
                    requeue_delay: self.requeue_delay,
                };
                let token = token.clone();
                tokio::spawn(async move { worker.run(token).await })
            })
            .collect()
    }
}

struct Worker {
    id: usize,
    queue: Arc<WorkQueue>,
    reconcilers: Arc<HashMap<ResourceKind, Arc<dyn Reconciler>>>,
    requeue_delay: Duration,
}

impl Worker {
    async fn run(self, token: CancellationToken) {
        debug!("Worker {} started", self.id);

        loop {
            let item = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                item = self.queue.next() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            self.process(&item).await;
            self.queue.done(&item);
        }

        debug!("Worker {} stopped", self.id);
    }

    async fn process(&self, item: &WorkItem) {
        let Some(reconciler) = self.reconcilers.get(&item.kind) else {
            warn!("No reconciler registered for {}", item.kind);
            return;
        };

        match reconciler.reconcile(&item.key).await {
            Ok(result) if result.requeue => {
                let delay = result.requeue_after.unwrap_or(self.requeue_delay);
                debug!("Requeueing {} in {:?}", item, delay);
                self.queue.add_after(item.clone(), delay);
            }
            Ok(_) => debug!("Reconciled {}", item),
            Err(e) => {
                warn!("Failed to reconcile {}: {}", item, e);
                if e.is_retryable() {
                    self.queue.add_after(item.clone(), self.requeue_delay);
                } else {
                    info!("Dropping {} until it changes", item);
                }
            }
        }
    }
}
