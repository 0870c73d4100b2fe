//! PipelineConfig domain types

use serde::{Deserialize, Serialize};

use super::meta::{Condition, LocalObjectReference, ObjectMeta};

/// A reusable build definition, projected 1:1 onto an engine job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PipelineConfigSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PipelineConfigStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfigSpec {
    #[serde(default)]
    pub run_policy: RunPolicy,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PipelineSource>,
    #[serde(default)]
    pub strategy: PipelineStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jenkins_binding: Option<LocalObjectReference>,
}

/// How concurrent runs of one config are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPolicy {
    Serial,
    Parallel,
    #[default]
    #[serde(other)]
    Unspecified,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svn: Option<SvnSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitSource {
    pub uri: String,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SvnSource {
    pub uri: String,
}

/// Which kind of source a config builds from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Git,
    Svn,
    None,
}

impl PipelineSource {
    pub fn kind(&self) -> SourceKind {
        if self.git.as_ref().is_some_and(|git| !git.uri.is_empty()) {
            SourceKind::Git
        } else if self.svn.as_ref().is_some_and(|svn| !svn.uri.is_empty()) {
            SourceKind::Svn
        } else {
            SourceKind::None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jenkins: Option<JenkinsStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PipelineTemplate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jenkinsfile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jenkinsfile_path: Option<String>,
}

/// Template the config was instantiated from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineTemplate {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<PluginDependency>,
}

/// A plugin the template requires, with its minimum version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDependency {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfigStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl PipelineConfig {
    pub fn new(metadata: ObjectMeta, spec: PipelineConfigSpec) -> Self {
        Self {
            metadata,
            spec,
            status: None,
        }
    }
}
