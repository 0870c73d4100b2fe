//! Run (build) and queue types
//!
//! A run is correlated back to the Pipeline that requested it through a
//! [`PipelineCause`]. Queued entries live in the engine-wide queue and are not
//! attached to any job's build history yet.

use serde::{Deserialize, Serialize};

use super::identity::NamespaceName;

/// Correlation cause linking an engine run to a Pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineCause {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl PipelineCause {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: None,
        }
    }

    /// Exact match on both namespace and name
    pub fn matches(&self, identity: &NamespaceName) -> bool {
        self.namespace == identity.namespace && self.name == identity.name
    }
}

/// Lifecycle state of a run inside a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Attached to the job but not started yet
    Queued,
    Running,
    Completed,
}

/// One build inside a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    /// Full name of the job owning this run
    pub job: String,
    pub number: u64,
    pub state: RunState,
    pub causes: Vec<PipelineCause>,
    /// Provisional build id the run was scheduled with, if it carried one
    pub build_id: Option<String>,
}

impl RunRecord {
    /// The first pipeline cause, which is the one the run was triggered with
    pub fn cause(&self) -> Option<&PipelineCause> {
        self.causes.first()
    }

    pub fn matches(&self, identity: &NamespaceName) -> bool {
        self.cause().is_some_and(|cause| cause.matches(identity))
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, RunState::Queued | RunState::Running)
    }

    pub fn display_name(&self) -> String {
        format!("{} #{}", self.job, self.number)
    }
}

/// An entry in the engine-wide pending-build queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: u64,
    /// Full name of the job the entry will run in
    pub task: String,
    pub causes: Vec<PipelineCause>,
    pub build_id: Option<String>,
}

impl QueueItem {
    pub fn matches(&self, identity: &NamespaceName) -> bool {
        self.causes.iter().any(|cause| cause.matches(identity))
    }
}

/// A build parameter passed when scheduling a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildParameter {
    pub name: String,
    pub value: String,
}

/// Request to schedule a new run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Provisional identifier correlating the run with its stored actions
    pub build_id: String,
    pub parameters: Vec<BuildParameter>,
    pub cause: PipelineCause,
}
