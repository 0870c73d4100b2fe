//! Resync poller
//!
//! Periodically lists every resource the controller reconciles and enqueues
//! its key. Level-triggered: a missed change is picked up on the next tick.

use anyhow::{Context, Result};
use pipesync_core::{ControlPlane, ResourceKind};
use std::sync::Arc;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::queue::{WorkItem, WorkQueue};

pub struct ResyncPoller {
    control_plane: Arc<dyn ControlPlane>,
    queue: Arc<WorkQueue>,
    interval: Duration,
}

impl ResyncPoller {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        queue: Arc<WorkQueue>,
        interval: Duration,
    ) -> Self {
        Self {
            control_plane,
            queue,
            interval,
        }
    }

    /// Resyncs on every tick until `token` is cancelled
    pub async fn run(&self, token: CancellationToken) {
        info!("Starting resync poller (interval: {:?})", self.interval);

        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.resync_once().await {
                Ok(count) => debug!("Enqueued {} resource(s)", count),
                Err(e) => error!("Error during resync: {:#}", e),
            }
        }

        info!("Resync poller stopped");
    }

    /// Enqueues the key of every resource of every kind
    pub async fn resync_once(&self) -> Result<usize> {
        let mut count = 0;
        for kind in ResourceKind::ALL {
            let keys = self
                .control_plane
                .list_keys(kind)
                .await
                .with_context(|| format!("Failed to list {} resources", kind))?;

            count += keys.len();
            for key in keys {
                self.queue.add(WorkItem::new(kind, key));
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipesync_core::domain::binding::JenkinsBinding;
    use pipesync_core::domain::meta::ObjectMeta;
    use pipesync_core::domain::pipeline::Pipeline;
    use pipesync_core::memory::InMemoryControlPlane;
    use pipesync_core::NamespaceName;

    fn seeded() -> Arc<InMemoryControlPlane> {
        let control_plane = Arc::new(InMemoryControlPlane::new());
        control_plane.put_pipeline(Pipeline::new(ObjectMeta::new("ns", "demo-00001"), "demo"));
        control_plane.put_pipeline(Pipeline::new(ObjectMeta::new("ns", "demo-00002"), "demo"));
        control_plane.put_jenkins_binding(JenkinsBinding::new(ObjectMeta::new("ns", "binding"), "jenkins"));
        control_plane
    }

    #[tokio::test]
    async fn test_resync_enqueues_every_kind() {
        let control_plane = seeded();
        let queue = Arc::new(WorkQueue::new());
        let poller = ResyncPoller::new(control_plane.clone(), queue.clone(), Duration::from_secs(60));

        assert_eq!(poller.resync_once().await.unwrap(), 3);
        assert_eq!(queue.len(), 3);

        // keys still pending are not queued twice
        assert_eq!(poller.resync_once().await.unwrap(), 3);
        assert_eq!(queue.len(), 3);

        let mut items = Vec::new();
        while !queue.is_empty() {
            items.push(queue.next().await.unwrap());
        }
        assert!(items.contains(&WorkItem::new(
            ResourceKind::JenkinsBinding,
            NamespaceName::new("ns", "binding")
        )));

        control_plane.remove_pipeline(&NamespaceName::new("ns", "demo-00002"));
        assert_eq!(poller.resync_once().await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let queue = Arc::new(WorkQueue::new());
        let poller = ResyncPoller::new(seeded(), queue.clone(), Duration::from_secs(60));
        let token = CancellationToken::new();

        let handle = {
            let token = token.clone();
            tokio::spawn(async move { poller.run(token).await })
        };
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(queue.len(), 3);

        token.cancel();
        handle.await.unwrap();
    }
}
