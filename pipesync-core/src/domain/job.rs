//! Execution-engine object model
//!
//! The engine organizes jobs inside folders. A PipelineConfig maps to exactly
//! one [`JobHandle`]: either a plain workflow job or a multi-branch project
//! holding one child job per branch.

use std::collections::BTreeMap;

/// A namespace-scoped container for jobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub full_name: String,
    pub description: Option<String>,
    /// Whether the folder carries the system-managed tag
    pub managed: bool,
}

/// A single (non multi-branch) workflow job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowJob {
    pub full_name: String,
    pub display_name: String,
    /// Stamp persisted on the job when it was last projected; `None` when the
    /// job was not created from a PipelineConfig
    pub resource_version: Option<String>,
    pub disabled: bool,
}

/// A multi-branch project and its per-branch child jobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiBranchProject {
    pub full_name: String,
    pub display_name: String,
    pub resource_version: Option<String>,
    /// Child jobs keyed by branch name
    pub branches: BTreeMap<String, WorkflowJob>,
}

/// Reference to the engine object projected from a PipelineConfig
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobHandle {
    Job(WorkflowJob),
    MultiBranch(MultiBranchProject),
}

/// Kind of job a definition materializes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Pipeline,
    MultiBranch,
}

impl JobHandle {
    pub fn full_name(&self) -> &str {
        match self {
            JobHandle::Job(job) => &job.full_name,
            JobHandle::MultiBranch(project) => &project.full_name,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            JobHandle::Job(job) => &job.display_name,
            JobHandle::MultiBranch(project) => &project.display_name,
        }
    }

    pub fn resource_version(&self) -> Option<&str> {
        match self {
            JobHandle::Job(job) => job.resource_version.as_deref(),
            JobHandle::MultiBranch(project) => project.resource_version.as_deref(),
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobHandle::Job(_) => JobKind::Pipeline,
            JobHandle::MultiBranch(_) => JobKind::MultiBranch,
        }
    }

    /// Jobs that own build history: the job itself, or every branch job
    pub fn jobs(&self) -> Vec<&WorkflowJob> {
        match self {
            JobHandle::Job(job) => vec![job],
            JobHandle::MultiBranch(project) => project.branches.values().collect(),
        }
    }

    /// Child job for `branch`; a plain job has no branches
    pub fn branch(&self, branch: &str) -> Option<&WorkflowJob> {
        match self {
            JobHandle::Job(_) => None,
            JobHandle::MultiBranch(project) => project.branches.get(branch),
        }
    }

    pub fn as_job(&self) -> Option<&WorkflowJob> {
        match self {
            JobHandle::Job(job) => Some(job),
            JobHandle::MultiBranch(_) => None,
        }
    }

    pub fn as_multi_branch(&self) -> Option<&MultiBranchProject> {
        match self {
            JobHandle::MultiBranch(project) => Some(project),
            JobHandle::Job(_) => None,
        }
    }

    /// Whether this object carries a stamp, i.e. was projected from a PipelineConfig
    pub fn is_created_by_pipeline_config(&self) -> bool {
        self.resource_version().is_some()
    }
}

/// Result of an engine lookup by full name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Folder(Folder),
    Job(JobHandle),
    /// Any engine object this system does not manage
    Other { full_name: String, class: String },
}

impl Item {
    pub fn full_name(&self) -> &str {
        match self {
            Item::Folder(folder) => &folder.full_name,
            Item::Job(handle) => handle.full_name(),
            Item::Other { full_name, .. } => full_name,
        }
    }

    /// Short description of the object type, used in log messages
    pub fn class_name(&self) -> &str {
        match self {
            Item::Folder(_) => "Folder",
            Item::Job(JobHandle::Job(_)) => "WorkflowJob",
            Item::Job(JobHandle::MultiBranch(_)) => "WorkflowMultiBranchProject",
            Item::Other { class, .. } => class,
        }
    }

    pub fn into_job(self) -> Option<JobHandle> {
        match self {
            Item::Job(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn into_folder(self) -> Option<Folder> {
        match self {
            Item::Folder(folder) => Some(folder),
            _ => None,
        }
    }
}

/// Serialized job definition ready to be materialized by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub kind: JobKind,
    /// Full name of the folder the job lives in
    pub parent: String,
    pub name: String,
    pub display_name: String,
    pub resource_version: String,
    pub disabled: bool,
    /// Engine-native exchange format (config.xml)
    pub xml: String,
}

impl JobDefinition {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.parent, self.name)
    }
}

/// A folder to be created in one engine call, already tagged as managed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderDefinition {
    pub name: String,
    pub description: String,
}
