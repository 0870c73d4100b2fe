//! JenkinsBinding reconciler
//!
//! Bindings carry no engine state of their own; the reconciler only reports
//! which of them this controller serves.

use async_trait::async_trait;
use pipesync_core::{ControlPlane, NamespaceName, ResourceKind, Result};
use std::sync::Arc;
use tracing::{debug, info};

use super::{ReconcileResult, Reconciler};

pub struct JenkinsBindingReconciler {
    control_plane: Arc<dyn ControlPlane>,
    jenkins_service: String,
}

impl JenkinsBindingReconciler {
    pub fn new(control_plane: Arc<dyn ControlPlane>, jenkins_service: impl Into<String>) -> Self {
        Self {
            control_plane,
            jenkins_service: jenkins_service.into(),
        }
    }

    /// Whether the binding at `key` exists and targets this controller's Jenkins
    pub async fn is_served(&self, key: &NamespaceName) -> Result<bool> {
        let binding = self.control_plane.get_jenkins_binding(key).await?;
        Ok(binding.is_some_and(|binding| binding.targets(&self.jenkins_service)))
    }
}

#[async_trait]
impl Reconciler for JenkinsBindingReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::JenkinsBinding
    }

    async fn reconcile(&self, key: &NamespaceName) -> Result<ReconcileResult> {
        if self.is_served(key).await? {
            info!("JenkinsBinding {} targets {}", key, self.jenkins_service);
        } else {
            debug!("JenkinsBinding {} is not served by {}", key, self.jenkins_service);
        }
        Ok(ReconcileResult::done())
    }
}
