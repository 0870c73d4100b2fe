//! In-memory control plane

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::control_plane::{ControlPlane, ResourceKind};
use crate::domain::binding::JenkinsBinding;
use crate::domain::identity::NamespaceName;
use crate::domain::pipeline::Pipeline;
use crate::domain::pipeline_config::PipelineConfig;
use crate::error::ApiError;

/// A patch received through [`ControlPlane::patch`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPatch {
    pub kind: ResourceKind,
    pub key: NamespaceName,
    pub patch: JsonValue,
}

#[derive(Default)]
struct ControlPlaneState {
    configs: BTreeMap<NamespaceName, PipelineConfig>,
    pipelines: BTreeMap<NamespaceName, Pipeline>,
    bindings: BTreeMap<NamespaceName, JenkinsBinding>,
    patches: Vec<RecordedPatch>,
    reject_patches: bool,
}

/// Control plane backed by in-process maps
///
/// Patches are recorded and applied to the stored objects.
#[derive(Default)]
pub struct InMemoryControlPlane {
    state: RwLock<ControlPlaneState>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_pipeline_config(&self, config: PipelineConfig) {
        let key = config.metadata.namespace_name();
        self.state.write().configs.insert(key, config);
    }

    pub fn remove_pipeline_config(&self, key: &NamespaceName) -> Option<PipelineConfig> {
        self.state.write().configs.remove(key)
    }

    pub fn put_pipeline(&self, pipeline: Pipeline) {
        let key = pipeline.metadata.namespace_name();
        self.state.write().pipelines.insert(key, pipeline);
    }

    pub fn remove_pipeline(&self, key: &NamespaceName) -> Option<Pipeline> {
        self.state.write().pipelines.remove(key)
    }

    pub fn put_jenkins_binding(&self, binding: JenkinsBinding) {
        let key = binding.metadata.namespace_name();
        self.state.write().bindings.insert(key, binding);
    }

    pub fn patches(&self) -> Vec<RecordedPatch> {
        self.state.read().patches.clone()
    }

    /// Makes every following patch fail as unavailable until switched off
    pub fn reject_patches(&self, reject: bool) {
        self.state.write().reject_patches = reject;
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn get_pipeline_config(
        &self,
        key: &NamespaceName,
    ) -> Result<Option<PipelineConfig>, ApiError> {
        Ok(self.state.read().configs.get(key).cloned())
    }

    async fn get_pipeline(&self, key: &NamespaceName) -> Result<Option<Pipeline>, ApiError> {
        Ok(self.state.read().pipelines.get(key).cloned())
    }

    async fn get_jenkins_binding(
        &self,
        key: &NamespaceName,
    ) -> Result<Option<JenkinsBinding>, ApiError> {
        Ok(self.state.read().bindings.get(key).cloned())
    }

    async fn list_keys(&self, kind: ResourceKind) -> Result<Vec<NamespaceName>, ApiError> {
        let state = self.state.read();
        let keys = match kind {
            ResourceKind::PipelineConfig => state.configs.keys().cloned().collect(),
            ResourceKind::Pipeline => state.pipelines.keys().cloned().collect(),
            ResourceKind::JenkinsBinding => state.bindings.keys().cloned().collect(),
        };
        Ok(keys)
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        key: &NamespaceName,
        patch: &JsonValue,
    ) -> Result<(), ApiError> {
        let mut state = self.state.write();
        if state.reject_patches {
            return Err(ApiError::status(503, "patches are rejected"));
        }
        match kind {
            ResourceKind::PipelineConfig => patch_entry(&mut state.configs, key, patch)?,
            ResourceKind::Pipeline => patch_entry(&mut state.pipelines, key, patch)?,
            ResourceKind::JenkinsBinding => patch_entry(&mut state.bindings, key, patch)?,
        }
        state.patches.push(RecordedPatch {
            kind,
            key: key.clone(),
            patch: patch.clone(),
        });
        Ok(())
    }
}

fn patch_entry<T>(
    objects: &mut BTreeMap<NamespaceName, T>,
    key: &NamespaceName,
    patch: &JsonValue,
) -> Result<(), ApiError>
where
    T: Serialize + DeserializeOwned,
{
    let object = objects
        .get_mut(key)
        .ok_or_else(|| ApiError::NotFound(key.to_string()))?;

    let mut document =
        serde_json::to_value(&*object).map_err(|e| ApiError::ParseError(e.to_string()))?;
    apply_patch(&mut document, patch)?;
    *object = serde_json::from_value(document).map_err(|e| ApiError::ParseError(e.to_string()))?;
    Ok(())
}

/// Applies the `add`, `replace` and `remove` operations of a JSON patch
fn apply_patch(document: &mut JsonValue, patch: &JsonValue) -> Result<(), ApiError> {
    let operations = patch
        .as_array()
        .ok_or_else(|| ApiError::status(400, "patch must be an array of operations"))?;

    for operation in operations {
        let op = operation.get("op").and_then(JsonValue::as_str).unwrap_or("");
        let path = operation
            .get("path")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| ApiError::status(400, "patch operation without path"))?;
        let (parent, last) = path
            .rsplit_once('/')
            .ok_or_else(|| ApiError::status(422, format!("invalid path '{}'", path)))?;

        let target = document
            .pointer_mut(parent)
            .ok_or_else(|| ApiError::status(422, format!("path '{}' does not exist", parent)))?;
        let value = operation.get("value").cloned().unwrap_or(JsonValue::Null);

        match (op, target) {
            ("add" | "replace", JsonValue::Object(map)) => {
                map.insert(last.to_string(), value);
            }
            ("remove", JsonValue::Object(map)) => {
                map.remove(last);
            }
            ("add", JsonValue::Array(items)) if last == "-" => items.push(value),
            ("add" | "replace" | "remove", JsonValue::Array(items)) => {
                let index: usize = last
                    .parse()
                    .map_err(|_| ApiError::status(422, format!("invalid index '{}'", last)))?;
                if index > items.len() || (op != "add" && index == items.len()) {
                    return Err(ApiError::status(422, format!("index {} out of range", index)));
                }
                match op {
                    "add" => items.insert(index, value),
                    "replace" => items[index] = value,
                    _ => {
                        items.remove(index);
                    }
                }
            }
            _ => {
                return Err(ApiError::status(
                    422,
                    format!("unsupported operation '{}' at '{}'", op, path),
                ));
            }
        }
    }

    Ok(())
}
