//! PipelineConfig reconciler
//!
//! Mirrors a PipelineConfig onto its engine job. Sync failures are recorded as
//! a `Synced` status condition.

use async_trait::async_trait;
use pipesync_core::domain::meta::Condition;
use pipesync_core::domain::pipeline_config::PipelineConfig;
use pipesync_core::{ApiError, ControlPlane, NamespaceName, ResourceKind, Result, SyncError, naming};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ReconcileResult, Reconciler, replace_status};
use crate::projection::JobProjectionClient;

const CONDITION_SYNCED: &str = "Synced";

pub struct PipelineConfigReconciler {
    control_plane: Arc<dyn ControlPlane>,
    projection: Arc<JobProjectionClient>,
    jenkins_service: String,
    requeue_delay: Duration,
}

impl PipelineConfigReconciler {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        projection: Arc<JobProjectionClient>,
        jenkins_service: impl Into<String>,
        requeue_delay: Duration,
    ) -> Self {
        Self {
            control_plane,
            projection,
            jenkins_service: jenkins_service.into(),
            requeue_delay,
        }
    }

    /// Whether the config's binding points at the engine this controller serves
    async fn is_bound_here(&self, config: &PipelineConfig) -> Result<bool> {
        let identity = config.metadata.namespace_name();
        let Some(reference) = &config.spec.jenkins_binding else {
            debug!("PipelineConfig {} has no JenkinsBinding, skipping", identity);
            return Ok(false);
        };

        let key = NamespaceName::new(&identity.namespace, &reference.name);
        match self.control_plane.get_jenkins_binding(&key).await? {
            Some(binding) if binding.targets(&self.jenkins_service) => Ok(true),
            Some(binding) => {
                debug!(
                    "PipelineConfig {} is bound to Jenkins '{}', skipping",
                    identity, binding.spec.jenkins.name
                );
                Ok(false)
            }
            None => {
                debug!("JenkinsBinding {} of {} not found, skipping", key, identity);
                Ok(false)
            }
        }
    }

    async fn sync(&self, config: &PipelineConfig) -> Result<ReconcileResult> {
        let identity = config.metadata.namespace_name();

        match self.projection.has_synced_job(config).await {
            Ok(true) => {
                debug!("Job for {} is up to date", identity);
                return Ok(ReconcileResult::done());
            }
            Ok(false) => {}
            Err(e) => return self.record_failure(config, e).await,
        }

        match self.projection.upsert(config).await {
            Ok(handle) => {
                info!(
                    "Synced {} to job {} at version {}",
                    identity,
                    handle.full_name(),
                    config.metadata.resource_version()
                );
                self.clear_failure(config).await;
                Ok(ReconcileResult::done())
            }
            Err(e) => self.record_failure(config, e).await,
        }
    }

    async fn record_failure(
        &self,
        config: &PipelineConfig,
        error: SyncError,
    ) -> Result<ReconcileResult> {
        let identity = config.metadata.namespace_name();
        warn!("Failed to sync PipelineConfig {}: {}", identity, error);

        let condition = Condition::new(CONDITION_SYNCED, "False", error.reason(), error.to_string());
        match self.set_condition(config, condition).await {
            Ok(()) => {}
            Err(SyncError::Api(e)) if e.is_conflict() => {
                debug!("Status of {} changed concurrently, not recording failure", identity)
            }
            Err(e) => warn!("Unable to record sync failure on {}: {}", identity, e),
        }

        if error.is_retryable() {
            Ok(ReconcileResult::requeue_after(self.requeue_delay))
        } else {
            Ok(ReconcileResult::done())
        }
    }

    /// Flips a previously recorded failure back to synced
    async fn clear_failure(&self, config: &PipelineConfig) {
        let failed = config.status.as_ref().is_some_and(|status| {
            status
                .conditions
                .iter()
                .any(|c| c.condition_type == CONDITION_SYNCED && c.status != "True")
        });
        if !failed {
            return;
        }

        let condition = Condition::new(CONDITION_SYNCED, "True", CONDITION_SYNCED, "");
        if let Err(e) = self.set_condition(config, condition).await {
            warn!(
                "Unable to clear sync failure on {}: {}",
                config.metadata.namespace_name(),
                e
            );
        }
    }

    /// Replaces the condition of the same type; an identical one is left alone
    async fn set_condition(&self, config: &PipelineConfig, condition: Condition) -> Result<()> {
        let mut status = config.status.clone().unwrap_or_default();
        let unchanged = status.conditions.iter().any(|c| {
            c.condition_type == condition.condition_type
                && c.status == condition.status
                && c.reason == condition.reason
                && c.message == condition.message
        });
        if unchanged {
            return Ok(());
        }

        status
            .conditions
            .retain(|c| c.condition_type != condition.condition_type);
        status.conditions.push(condition);

        let value =
            serde_json::to_value(&status).map_err(|e| ApiError::ParseError(e.to_string()))?;
        self.control_plane
            .patch(
                ResourceKind::PipelineConfig,
                &config.metadata.namespace_name(),
                &replace_status(value),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for PipelineConfigReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::PipelineConfig
    }

    async fn reconcile(&self, key: &NamespaceName) -> Result<ReconcileResult> {
        let Some(config) = self.control_plane.get_pipeline_config(key).await? else {
            if self.projection.delete(key).await? {
                info!("PipelineConfig {} is gone, deleted its job", key);
            } else {
                debug!("PipelineConfig {} is gone and has no job", key);
            }
            return Ok(ReconcileResult::done());
        };

        if self.projection.is_delete_in_progress(key) {
            debug!("Job for {} is being deleted, retrying later", key);
            return Ok(ReconcileResult::requeue_after(self.requeue_delay));
        }

        if !naming::is_jenkins_strategy(&config) {
            debug!("PipelineConfig {} has no Jenkins strategy, skipping", key);
            return Ok(ReconcileResult::done());
        }

        if !self.is_bound_here(&config).await? {
            return Ok(ReconcileResult::done());
        }

        self.sync(&config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, jenkins_config};
    use pipesync_core::domain::binding::JenkinsBinding;
    use pipesync_core::domain::meta::ObjectMeta;
    use pipesync_core::domain::pipeline_config::PipelineConfigSpec;
    use pipesync_core::memory::{EngineEvent, FailPoint};

    fn key() -> NamespaceName {
        NamespaceName::new("ns", "demo")
    }

    #[tokio::test]
    async fn test_create_noop_update() {
        let h = Harness::new();
        h.control_plane.put_pipeline_config(jenkins_config("demo", "1"));
        let reconciler = h.config_reconciler();

        let result = reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(result, ReconcileResult::done());
        assert_eq!(
            h.engine.events(),
            vec![
                EngineEvent::FolderCreated("ns".into()),
                EngineEvent::JobCreated("ns/ns-demo".into()),
            ]
        );

        reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(h.engine.mutations(), 2);

        h.control_plane.put_pipeline_config(jenkins_config("demo", "2"));
        reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(
            h.engine.events()[2..],
            [EngineEvent::JobUpdated("ns/ns-demo".into())]
        );
        assert!(h.control_plane.patches().is_empty());
    }

    #[tokio::test]
    async fn test_missing_config_deletes_job() {
        let h = Harness::new();
        h.control_plane.put_pipeline_config(jenkins_config("demo", "1"));
        let reconciler = h.config_reconciler();
        reconciler.reconcile(&key()).await.unwrap();

        h.control_plane.remove_pipeline_config(&key());
        reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(
            h.engine.events().last(),
            Some(&EngineEvent::ItemDeleted("ns/ns-demo".into()))
        );

        // nothing left to delete
        reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(h.engine.mutations(), 3);
    }

    #[tokio::test]
    async fn test_skips_foreign_or_non_jenkins_configs() {
        let h = Harness::new();
        let reconciler = h.config_reconciler();

        let plain = PipelineConfig::new(ObjectMeta::new("ns", "demo"), PipelineConfigSpec::default());
        h.control_plane.put_pipeline_config(plain);
        reconciler.reconcile(&key()).await.unwrap();

        h.control_plane
            .put_jenkins_binding(JenkinsBinding::new(ObjectMeta::new("ns", "binding"), "other"));
        h.control_plane.put_pipeline_config(jenkins_config("demo", "1"));
        reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(h.engine.mutations(), 0);
    }

    #[tokio::test]
    async fn test_failure_recorded_once() {
        let h = Harness::new();
        h.control_plane.put_pipeline_config(jenkins_config("demo", "1"));
        h.engine.fail_on(FailPoint::CreateFolder);
        let reconciler = h.config_reconciler();

        let result = reconciler.reconcile(&key()).await.unwrap();
        assert!(result.requeue);
        assert_eq!(h.control_plane.patches().len(), 1);

        let stored = h.control_plane.get_pipeline_config(&key()).await.unwrap().unwrap();
        let condition = &stored.status.unwrap().conditions[0];
        assert_eq!(condition.condition_type, "Synced");
        assert_eq!(condition.status, "False");
        assert_eq!(condition.reason, "EngineError");

        reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(h.control_plane.patches().len(), 1);

        h.engine.clear_failures();
        reconciler.reconcile(&key()).await.unwrap();
        let stored = h.control_plane.get_pipeline_config(&key()).await.unwrap().unwrap();
        assert_eq!(stored.status.unwrap().conditions[0].status, "True");
    }

    #[tokio::test]
    async fn test_structural_failure_is_not_requeued() {
        let h = Harness::new();
        h.engine.add_job("ns", None);
        h.control_plane.put_pipeline_config(jenkins_config("demo", "1"));

        let result = h.config_reconciler().reconcile(&key()).await.unwrap();
        assert_eq!(result, ReconcileResult::done());

        let stored = h.control_plane.get_pipeline_config(&key()).await.unwrap().unwrap();
        assert_eq!(stored.status.unwrap().conditions[0].reason, "StructuralError");
    }

    #[tokio::test]
    async fn test_requeues_while_deleting() {
        let h = Harness::new();
        h.control_plane.put_pipeline_config(jenkins_config("demo", "1"));

        let _guard = h.services.deletes.mark(key());
        let result = h.config_reconciler().reconcile(&key()).await.unwrap();
        assert!(result.requeue);
        assert_eq!(h.engine.mutations(), 0);
    }
}
