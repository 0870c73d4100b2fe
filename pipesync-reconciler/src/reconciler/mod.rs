//! Per-kind reconcilers
//!
//! Each reconciler re-fetches the current object by key and drives the engine
//! toward it. Callers never hand over the event that triggered the reconcile.

pub mod binding;
pub mod pipeline;
pub mod pipeline_config;

use async_trait::async_trait;
use pipesync_core::{NamespaceName, ResourceKind, Result};
use serde_json::{Value as JsonValue, json};
use std::time::Duration;

pub use binding::JenkinsBindingReconciler;
pub use pipeline::PipelineReconciler;
pub use pipeline_config::PipelineConfigReconciler;

/// Outcome of one reconcile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub requeue: bool,
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: true,
            requeue_after: Some(delay),
        }
    }
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    fn kind(&self) -> ResourceKind;

    async fn reconcile(&self, key: &NamespaceName) -> Result<ReconcileResult>;
}

/// JSON patch replacing the whole status of a resource
pub(crate) fn replace_status(status: JsonValue) -> JsonValue {
    json!([{ "op": "add", "path": "/status", "value": status }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results() {
        assert!(!ReconcileResult::done().requeue);

        let retry = ReconcileResult::requeue_after(Duration::from_secs(10));
        assert!(retry.requeue);
        assert_eq!(retry.requeue_after, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_replace_status_patch() {
        let patch = replace_status(json!({ "phase": "Queued" }));
        assert_eq!(patch[0]["op"], "add");
        assert_eq!(patch[0]["path"], "/status");
        assert_eq!(patch[0]["value"]["phase"], "Queued");
    }
}
