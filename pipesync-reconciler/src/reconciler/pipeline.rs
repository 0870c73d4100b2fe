//! Pipeline reconciler
//!
//! Starts a run for each new Pipeline, follows it while it is queued or
//! running, cancels it on abort and removes its record once the Pipeline is
//! deleted.

use async_trait::async_trait;
use pipesync_core::domain::pipeline::{Pipeline, PipelinePhase};
use pipesync_core::{ControlPlane, NamespaceName, ResourceKind, Result, SyncError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ReconcileResult, Reconciler, replace_status};
use crate::lifecycle::{RunLifecycleManager, RunPhase};

pub struct PipelineReconciler {
    control_plane: Arc<dyn ControlPlane>,
    lifecycle: Arc<RunLifecycleManager>,
    requeue_delay: Duration,
}

impl PipelineReconciler {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        lifecycle: Arc<RunLifecycleManager>,
        requeue_delay: Duration,
    ) -> Self {
        Self {
            control_plane,
            lifecycle,
            requeue_delay,
        }
    }

    async fn set_phase(&self, key: &NamespaceName, phase: PipelinePhase) -> Result<()> {
        let patch = replace_status(json!({ "phase": phase }));
        self.control_plane
            .patch(ResourceKind::Pipeline, key, &patch)
            .await?;
        Ok(())
    }

    /// Requeue retryable failures, give up on the rest
    fn retry_or_drop(&self, key: &NamespaceName, error: SyncError) -> ReconcileResult {
        if error.is_retryable() {
            debug!("Pipeline {} not ready yet: {}", key, error);
            ReconcileResult::requeue_after(self.requeue_delay)
        } else {
            warn!("Giving up on Pipeline {}: {}", key, error);
            ReconcileResult::done()
        }
    }

    async fn abort(&self, key: &NamespaceName, pipeline: &Pipeline) -> Result<ReconcileResult> {
        if pipeline.phase().is_final() {
            debug!("Pipeline {} already finished as {}", key, pipeline.phase());
            return Ok(ReconcileResult::done());
        }

        match self.lifecycle.cancel(key).await {
            Ok(()) => info!("Cancelled run of Pipeline {}", key),
            Err(e) if e.is_not_found() => debug!("Nothing to cancel for {}: {}", key, e),
            Err(e) => return Ok(self.retry_or_drop(key, e)),
        }

        self.set_phase(key, PipelinePhase::Cancelled).await?;
        Ok(ReconcileResult::done())
    }

    async fn start(&self, key: &NamespaceName, pipeline: &Pipeline) -> Result<ReconcileResult> {
        let config = match self.lifecycle.parent_config(key).await {
            Ok(config) => config,
            Err(e) => return Ok(self.retry_or_drop(key, e)),
        };

        if config.spec.disabled {
            debug!(
                "PipelineConfig {} is disabled, not starting {}",
                config.metadata.namespace_name(),
                key
            );
            return Ok(ReconcileResult::done());
        }

        match self.lifecycle.phase(key).await {
            Ok(RunPhase::NotFound) => {}
            Ok(phase) => {
                debug!("Pipeline {} already has a run ({:?})", key, phase);
                return self.track(key, pipeline.phase()).await;
            }
            Err(e) => return Ok(self.retry_or_drop(key, e)),
        }

        match self.lifecycle.trigger(pipeline, &config).await {
            Ok(build_id) => {
                debug!("Pipeline {} scheduled as build {}", key, build_id);
                self.set_phase(key, PipelinePhase::Queued).await?;
                Ok(ReconcileResult::requeue_after(self.requeue_delay))
            }
            Err(e) => Ok(self.retry_or_drop(key, e)),
        }
    }

    /// Follows the run of a started Pipeline until the engine reports it done
    ///
    /// The status phase only moves forward, Pending to Queued to Running.
    async fn track(&self, key: &NamespaceName, current: PipelinePhase) -> Result<ReconcileResult> {
        let observed = match self.lifecycle.phase(key).await {
            Ok(phase) => phase,
            Err(e) => return Ok(self.retry_or_drop(key, e)),
        };

        let next = match observed {
            RunPhase::Queued => PipelinePhase::Queued,
            RunPhase::Running | RunPhase::Stopping => PipelinePhase::Running,
            RunPhase::Completed => {
                debug!("Run of Pipeline {} completed", key);
                return Ok(ReconcileResult::done());
            }
            RunPhase::NotFound => match self.lifecycle.pending_build(key) {
                Some(build_id) => {
                    debug!("Build {} of Pipeline {} not visible yet", build_id, key);
                    return Ok(ReconcileResult::requeue_after(self.requeue_delay));
                }
                None => {
                    debug!("Pipeline {} has no run left to follow", key);
                    return Ok(ReconcileResult::done());
                }
            },
        };

        let advances = matches!(
            (current, next),
            (PipelinePhase::Pending, _) | (PipelinePhase::Queued, PipelinePhase::Running)
        );
        if advances {
            self.set_phase(key, next).await?;
        }
        Ok(ReconcileResult::requeue_after(self.requeue_delay))
    }
}

#[async_trait]
impl Reconciler for PipelineReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Pipeline
    }

    async fn reconcile(&self, key: &NamespaceName) -> Result<ReconcileResult> {
        let Some(pipeline) = self.control_plane.get_pipeline(key).await? else {
            if self.lifecycle.delete_pipeline(key).await? {
                info!("Pipeline {} is gone, deleted its run", key);
            }
            return Ok(ReconcileResult::done());
        };

        if pipeline.spec.abort {
            return self.abort(key, &pipeline).await;
        }

        match pipeline.phase() {
            PipelinePhase::Pending => self.start(key, &pipeline).await,
            phase @ (PipelinePhase::Queued | PipelinePhase::Running) => self.track(key, phase).await,
            _ => Ok(ReconcileResult::done()),
        }
    }
}
