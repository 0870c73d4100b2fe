//! Identity mapping between control-plane resources and engine objects
//!
//! Pure functions, no I/O. Every PipelineConfig `ns/name` lands in folder `ns`
//! as job `ns-name`; since a folder only holds jobs of its own namespace and
//! names are unique within a namespace, distinct identities never share a path.

use std::sync::LazyLock;

use regex_lite::Regex;

use crate::domain::pipeline_config::{PipelineConfig, RunPolicy};
use crate::error::SyncError;

/// Overrides the computed job path of a PipelineConfig
pub const ANNOTATION_JOB_PATH: &str = "alauda.io/jenkins-job-path";
/// Names the branch of a multi-branch project a Pipeline runs on
pub const ANNOTATION_MULTI_BRANCH_NAME: &str = "alauda.io/multiBranchName";
/// Label selecting the kind of a PipelineConfig
pub const LABEL_PIPELINE_CONFIG_KIND: &str = "pipelineconfig.kind";
pub const PIPELINE_CONFIG_KIND_MULTI_BRANCH: &str = "multi-branch";

/// Folder property marking a folder as managed by pipesync
pub const MANAGED_FOLDER_PROPERTY: &str = "io.alauda.jenkins.devops.sync.AlaudaFolderProperty";
/// Job property carrying the PipelineConfig identity and resource-version stamp
pub const PIPELINE_CONFIG_PROPERTY: &str =
    "io.alauda.jenkins.devops.sync.PipelineConfigProjectProperty";

/// Build parameters naming the Pipeline a run was scheduled for
pub const PARAMETER_NAMESPACE: &str = "PIPESYNC_NAMESPACE";
pub const PARAMETER_NAME: &str = "PIPESYNC_NAME";
pub const PARAMETER_UID: &str = "PIPESYNC_UID";
/// Build parameter carrying the provisional build id
pub const PARAMETER_BUILD_ID: &str = "PIPESYNC_BUILD_ID";

/// Parameters every managed job declares so scheduled runs keep them
pub const CORRELATION_PARAMETERS: [&str; 4] = [
    PARAMETER_NAMESPACE,
    PARAMETER_NAME,
    PARAMETER_UID,
    PARAMETER_BUILD_ID,
];

const FOLDER_DESCRIPTION: &str = "Managed by pipesync, synchronized from namespace: ";

/// `<configName>-<suffix>`, suffix being five word characters or digits.
/// The prefix is greedy, so only the last dash-separated token is stripped.
static PIPELINE_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)(-(\w{5}|\d+))$").expect("pipeline name pattern"));

/// Job name inside the namespace folder
pub fn job_name(namespace: &str, name: &str) -> String {
    format!("{}-{}", namespace, name)
}

/// Full engine path of the job (`folder/job`)
pub fn job_path(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, job_name(namespace, name))
}

pub fn job_display_name(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Full engine path for a config, honoring the path override annotation
pub fn job_full_name(config: &PipelineConfig) -> String {
    match config.metadata.annotation(ANNOTATION_JOB_PATH) {
        Some(path) => path.to_string(),
        None => job_path(&config.metadata.namespace, &config.metadata.name),
    }
}

/// Recovers the owning PipelineConfig name from a generated Pipeline name
///
/// ```
/// use pipesync_core::naming::parent_config_name;
///
/// assert_eq!(parent_config_name("build-ab3de").unwrap(), "build");
/// assert!(parent_config_name("build").is_err());
/// ```
pub fn parent_config_name(pipeline_name: &str) -> Result<String, SyncError> {
    PIPELINE_NAME_PATTERN
        .captures(pipeline_name)
        .and_then(|captures| captures.get(1))
        .map(|prefix| prefix.as_str().to_string())
        .ok_or_else(|| SyncError::NameFormat(pipeline_name.to_string()))
}

pub fn folder_description(namespace: &str) -> String {
    format!("{}{}", FOLDER_DESCRIPTION, namespace)
}

pub fn is_multi_branch(config: &PipelineConfig) -> bool {
    config.metadata.label(LABEL_PIPELINE_CONFIG_KIND) == Some(PIPELINE_CONFIG_KIND_MULTI_BRANCH)
}

/// Whether the config describes a Jenkins pipeline that should be mirrored to a job
pub fn is_jenkins_strategy(config: &PipelineConfig) -> bool {
    config.spec.strategy.jenkins.as_ref().is_some_and(|jenkins| {
        jenkins.jenkinsfile.as_deref().is_some_and(|s| !s.is_empty())
            || jenkins.jenkinsfile_path.as_deref().is_some_and(|s| !s.is_empty())
    })
}

pub fn is_serial_policy(config: &PipelineConfig) -> bool {
    config.spec.run_policy == RunPolicy::Serial
}

pub fn is_parallel_policy(config: &PipelineConfig) -> bool {
    config.spec.run_policy == RunPolicy::Parallel
}
