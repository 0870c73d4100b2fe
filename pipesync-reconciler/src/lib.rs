//! Pipesync Reconciler
//!
//! Keeps execution-engine jobs and runs converging toward the control-plane
//! resources that declare them.
//!
//! This crate contains:
//! - Privilege: scoped elevation around every engine call
//! - Cache: identity → job handle, plus the delete-in-progress set
//! - Folder manager and job projection client (upsert/delete/drift check)
//! - Run lifecycle manager: find, cancel, stop, delete and trigger runs
//! - Action correlation store for runs waiting to start
//! - Translate: PipelineConfig → engine job definition
//! - Reconcilers for PipelineConfig, Pipeline and JenkinsBinding
//!
//! Shared state is owned by [`SyncServices`], built once and injected into
//! every reconciler.

pub mod actions;
pub mod cache;
pub mod folder;
pub mod lifecycle;
pub mod privilege;
pub mod projection;
pub mod reconciler;
pub mod translate;

use pipesync_core::{ControlPlane, ExecutionEngine};
use std::sync::Arc;
use std::time::Duration;

pub use actions::ActionCorrelationStore;
pub use cache::{DeleteInProgress, JobCache};
pub use folder::FolderManager;
pub use lifecycle::{DEFAULT_KILL_GRACE_PERIOD, RunLifecycleManager, RunPhase};
pub use privilege::{PrivilegeProvider, SystemPrivilege, with_privilege};
pub use projection::JobProjectionClient;
pub use reconciler::{ReconcileResult, Reconciler};
pub use translate::{JobTranslator, XmlJobTranslator};

/// Settings shared by the reconcilers
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Name of the Jenkins instance bindings must target
    pub jenkins_service: String,
    pub kill_grace_period: Duration,
    pub requeue_delay: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            jenkins_service: "jenkins".to_string(),
            kill_grace_period: DEFAULT_KILL_GRACE_PERIOD,
            requeue_delay: Duration::from_secs(10),
        }
    }
}

/// Process-wide reconciliation state, wired once at startup
pub struct SyncServices {
    pub control_plane: Arc<dyn ControlPlane>,
    pub cache: Arc<JobCache>,
    pub deletes: Arc<DeleteInProgress>,
    pub actions: Arc<ActionCorrelationStore>,
    pub projection: Arc<JobProjectionClient>,
    pub lifecycle: Arc<RunLifecycleManager>,
    pub options: SyncOptions,
}

impl SyncServices {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        engine: Arc<dyn ExecutionEngine>,
        privilege: Arc<dyn PrivilegeProvider>,
        translator: Arc<dyn JobTranslator>,
        options: SyncOptions,
    ) -> Self {
        let deletes = Arc::new(DeleteInProgress::new());
        let cache = Arc::new(JobCache::new(
            engine.clone(),
            privilege.clone(),
            deletes.clone(),
        ));
        let projection = Arc::new(JobProjectionClient::new(
            engine.clone(),
            privilege.clone(),
            cache.clone(),
            deletes.clone(),
            translator,
        ));
        let actions = Arc::new(ActionCorrelationStore::new());
        let lifecycle = Arc::new(RunLifecycleManager::new(
            control_plane.clone(),
            engine,
            privilege,
            projection.clone(),
            actions.clone(),
            options.kill_grace_period,
        ));

        Self {
            control_plane,
            cache,
            deletes,
            actions,
            projection,
            lifecycle,
            options,
        }
    }

    pub fn pipeline_config_reconciler(&self) -> reconciler::PipelineConfigReconciler {
        reconciler::PipelineConfigReconciler::new(
            self.control_plane.clone(),
            self.projection.clone(),
            self.options.jenkins_service.clone(),
            self.options.requeue_delay,
        )
    }

    pub fn pipeline_reconciler(&self) -> reconciler::PipelineReconciler {
        reconciler::PipelineReconciler::new(
            self.control_plane.clone(),
            self.lifecycle.clone(),
            self.options.requeue_delay,
        )
    }

    pub fn binding_reconciler(&self) -> reconciler::JenkinsBindingReconciler {
        reconciler::JenkinsBindingReconciler::new(
            self.control_plane.clone(),
            self.options.jenkins_service.clone(),
        )
    }

    /// One reconciler per resource kind
    pub fn reconcilers(&self) -> Vec<Arc<dyn Reconciler>> {
        vec![
            Arc::new(self.pipeline_config_reconciler()),
            Arc::new(self.pipeline_reconciler()),
            Arc::new(self.binding_reconciler()),
        ]
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, jenkins_config};
    use pipesync_core::memory::EngineEvent;
    use pipesync_core::{NamespaceName, ResourceKind};

    #[test]
    fn test_one_reconciler_per_kind() {
        let h = Harness::new();
        let kinds: Vec<ResourceKind> = h.services.reconcilers().iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, ResourceKind::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_config_lifecycle_scenario() {
        let h = Harness::new();
        let key = NamespaceName::new("ns", "demo");
        let reconciler = h.config_reconciler();

        h.control_plane.put_pipeline_config(jenkins_config("demo", "1"));
        reconciler.reconcile(&key).await.unwrap();
        reconciler.reconcile(&key).await.unwrap();
        h.control_plane.put_pipeline_config(jenkins_config("demo", "2"));
        reconciler.reconcile(&key).await.unwrap();

        let job = h.services.projection.get_job(&key).await.unwrap().unwrap();
        assert_eq!(job.resource_version.as_deref(), Some("2"));
        assert_eq!(job.display_name, "ns/demo");

        h.control_plane.remove_pipeline_config(&key);
        reconciler.reconcile(&key).await.unwrap();

        assert_eq!(
            h.engine.events(),
            vec![
                EngineEvent::FolderCreated("ns".into()),
                EngineEvent::JobCreated("ns/ns-demo".into()),
                EngineEvent::JobUpdated("ns/ns-demo".into()),
                EngineEvent::ItemDeleted("ns/ns-demo".into()),
            ]
        );
        assert!(h.services.cache.is_empty());
        assert!(h.services.deletes.is_empty());
    }
}
