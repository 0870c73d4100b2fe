//! Control-plane seam
//!
//! Current objects are re-fetched by key on every reconcile; the reconciler
//! never trusts the event that triggered it.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::domain::binding::JenkinsBinding;
use crate::domain::identity::NamespaceName;
use crate::domain::pipeline::Pipeline;
use crate::domain::pipeline_config::PipelineConfig;
use crate::error::ApiError;

/// Resource kinds reconciled by pipesync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    PipelineConfig,
    Pipeline,
    JenkinsBinding,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::PipelineConfig,
        ResourceKind::Pipeline,
        ResourceKind::JenkinsBinding,
    ];

    /// Plural resource name used in REST paths
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::PipelineConfig => "pipelineconfigs",
            ResourceKind::Pipeline => "pipelines",
            ResourceKind::JenkinsBinding => "jenkinsbindings",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::PipelineConfig => write!(f, "PipelineConfig"),
            ResourceKind::Pipeline => write!(f, "Pipeline"),
            ResourceKind::JenkinsBinding => write!(f, "JenkinsBinding"),
        }
    }
}

/// Read and patch access to control-plane resources
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get_pipeline_config(
        &self,
        key: &NamespaceName,
    ) -> Result<Option<PipelineConfig>, ApiError>;

    async fn get_pipeline(&self, key: &NamespaceName) -> Result<Option<Pipeline>, ApiError>;

    async fn get_jenkins_binding(
        &self,
        key: &NamespaceName,
    ) -> Result<Option<JenkinsBinding>, ApiError>;

    /// Keys of every resource of `kind`, across namespaces
    async fn list_keys(&self, kind: ResourceKind) -> Result<Vec<NamespaceName>, ApiError>;

    /// Applies a JSON patch (RFC 6902) to one resource
    async fn patch(
        &self,
        kind: ResourceKind,
        key: &NamespaceName,
        patch: &JsonValue,
    ) -> Result<(), ApiError>;
}
