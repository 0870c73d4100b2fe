//! JenkinsBinding domain types

use serde::{Deserialize, Serialize};

use super::meta::{LocalObjectReference, ObjectMeta};

/// Ties a control-plane project to one execution-engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JenkinsBinding {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: JenkinsBindingSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JenkinsBindingSpec {
    #[serde(default)]
    pub jenkins: LocalObjectReference,
}

impl JenkinsBinding {
    pub fn new(metadata: ObjectMeta, jenkins: impl Into<String>) -> Self {
        Self {
            metadata,
            spec: JenkinsBindingSpec {
                jenkins: LocalObjectReference {
                    name: jenkins.into(),
                },
            },
        }
    }

    /// Whether this binding points at the engine instance named `jenkins_service`
    pub fn targets(&self, jenkins_service: &str) -> bool {
        self.spec.jenkins.name == jenkins_service
    }
}
