//! Pipeline domain types
//!
//! A Pipeline is one requested execution of a PipelineConfig. Its name is
//! generated as `<configName>-<suffix>`.

use serde::{Deserialize, Serialize};

use super::meta::{LocalObjectReference, ObjectMeta};
use crate::naming::ANNOTATION_MULTI_BRANCH_NAME;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PipelineSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PipelineStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    #[serde(default)]
    pub pipeline_config: LocalObjectReference,
    #[serde(default)]
    pub parameters: Vec<PipelineParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<PipelineTriggerCause>,
    /// Set by the user to request cancellation of the run
    #[serde(default)]
    pub abort: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineParameter {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTriggerCause {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    #[serde(default)]
    pub phase: PipelinePhase,
}

/// Control-plane view of a run's progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelinePhase {
    #[default]
    Pending,
    Queued,
    Running,
    Complete,
    Failed,
    Error,
    Cancelled,
    Aborted,
    #[serde(other)]
    Unknown,
}

impl PipelinePhase {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            PipelinePhase::Complete
                | PipelinePhase::Failed
                | PipelinePhase::Error
                | PipelinePhase::Cancelled
                | PipelinePhase::Aborted
        )
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            PipelinePhase::Pending => "Pending",
            PipelinePhase::Queued => "Queued",
            PipelinePhase::Running => "Running",
            PipelinePhase::Complete => "Complete",
            PipelinePhase::Failed => "Failed",
            PipelinePhase::Error => "Error",
            PipelinePhase::Cancelled => "Cancelled",
            PipelinePhase::Aborted => "Aborted",
            PipelinePhase::Unknown => "Unknown",
        };
        write!(f, "{}", phase)
    }
}

impl Pipeline {
    pub fn new(metadata: ObjectMeta, config_name: impl Into<String>) -> Self {
        Self {
            metadata,
            spec: PipelineSpec {
                pipeline_config: LocalObjectReference {
                    name: config_name.into(),
                },
                ..PipelineSpec::default()
            },
            status: None,
        }
    }

    pub fn phase(&self) -> PipelinePhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Branch of a multi-branch project this run belongs to
    pub fn multi_branch_name(&self) -> Option<&str> {
        self.metadata.annotation(ANNOTATION_MULTI_BRANCH_NAME)
    }
}
