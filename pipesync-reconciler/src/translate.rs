//! PipelineConfig → job definition translation
//!
//! The definition is written in the engine's XML exchange format and carries
//! the config identity and resource-version stamp as a job property, which is
//! what drift detection reads back.

use pipesync_core::domain::job::{JobDefinition, JobKind};
use pipesync_core::domain::pipeline_config::{PipelineConfig, PipelineSource, SourceKind};
use pipesync_core::naming::{self, PIPELINE_CONFIG_PROPERTY};
use pipesync_core::{Result, SyncError, xml};

const MULTI_BRANCH_PROPERTY: &str = "io.alauda.jenkins.devops.sync.MultiBranchProperty";
const DISABLE_CONCURRENT_BUILDS: &str =
    "org.jenkinsci.plugins.workflow.job.properties.DisableConcurrentBuildsJobProperty";
const DEFAULT_JENKINSFILE: &str = "Jenkinsfile";
const PARAMETERS_PROPERTY: &str = "hudson.model.ParametersDefinitionProperty";
const STRING_PARAMETER: &str = "hudson.model.StringParameterDefinition";

/// Turns a PipelineConfig into a serialized job definition
pub trait JobTranslator: Send + Sync {
    fn translate(&self, config: &PipelineConfig) -> Result<JobDefinition>;
}

/// Default translator producing pipeline-job and multi-branch XML
#[derive(Debug, Default, Clone)]
pub struct XmlJobTranslator;

impl XmlJobTranslator {
    pub fn new() -> Self {
        Self
    }
}

impl JobTranslator for XmlJobTranslator {
    fn translate(&self, config: &PipelineConfig) -> Result<JobDefinition> {
        let meta = &config.metadata;
        let resource_version = meta.resource_version();
        if resource_version.is_empty() {
            return Err(SyncError::Translation(format!(
                "PipelineConfig {} has no resourceVersion",
                meta.namespace_name()
            )));
        }

        let full_name = naming::job_full_name(config);
        let (parent, name) = full_name.rsplit_once('/').ok_or_else(|| {
            SyncError::Translation(format!("job path '{}' has no parent folder", full_name))
        })?;

        let kind = if naming::is_multi_branch(config) {
            JobKind::MultiBranch
        } else {
            JobKind::Pipeline
        };
        let display_name = naming::job_display_name(&meta.namespace, &meta.name);
        let xml = match kind {
            JobKind::Pipeline => pipeline_xml(config, &display_name)?,
            JobKind::MultiBranch => multi_branch_xml(config, &display_name)?,
        };

        Ok(JobDefinition {
            kind,
            parent: parent.to_string(),
            name: name.to_string(),
            display_name,
            resource_version: resource_version.to_string(),
            disabled: config.spec.disabled,
            xml,
        })
    }
}

fn identity_property(class: &str, config: &PipelineConfig) -> String {
    let meta = &config.metadata;
    format!(
        "<{class}>\
         <namespace>{}</namespace>\
         <name>{}</name>\
         <uid>{}</uid>\
         <resourceVersion>{}</resourceVersion>\
         </{class}>",
        xml::escape(&meta.namespace),
        xml::escape(&meta.name),
        xml::escape(meta.uid.as_deref().unwrap_or_default()),
        xml::escape(meta.resource_version()),
    )
}

fn scm_xml(source: &PipelineSource) -> Option<String> {
    match source.kind() {
        SourceKind::Git => {
            let git = source.git.as_ref()?;
            let branch = git.git_ref.as_deref().unwrap_or("*/master");
            Some(format!(
                "<scm class=\"hudson.plugins.git.GitSCM\">\
                 <userRemoteConfigs><hudson.plugins.git.UserRemoteConfig>\
                 <url>{}</url>\
                 </hudson.plugins.git.UserRemoteConfig></userRemoteConfigs>\
                 <branches><hudson.plugins.git.BranchSpec><name>{}</name></hudson.plugins.git.BranchSpec></branches>\
                 </scm>",
                xml::escape(&git.uri),
                xml::escape(branch),
            ))
        }
        SourceKind::Svn => {
            let svn = source.svn.as_ref()?;
            Some(format!(
                "<scm class=\"hudson.scm.SubversionSCM\">\
                 <locations><hudson.scm.SubversionSCM_-ModuleLocation>\
                 <remote>{}</remote><local>.</local>\
                 </hudson.scm.SubversionSCM_-ModuleLocation></locations>\
                 </scm>",
                xml::escape(&svn.uri),
            ))
        }
        SourceKind::None => None,
    }
}

/// Inline script when given, otherwise a script path inside the source
fn flow_definition(config: &PipelineConfig) -> Result<String> {
    let jenkins = config.spec.strategy.jenkins.as_ref().ok_or_else(|| {
        SyncError::Translation(format!(
            "PipelineConfig {} has no jenkins strategy",
            config.metadata.namespace_name()
        ))
    })?;

    if let Some(script) = jenkins.jenkinsfile.as_deref().filter(|s| !s.is_empty()) {
        return Ok(format!(
            "<definition class=\"org.jenkinsci.plugins.workflow.cps.CpsFlowDefinition\">\
             <script>{}</script><sandbox>true</sandbox>\
             </definition>",
            xml::escape(script)
        ));
    }

    let scm = config.spec.source.as_ref().and_then(scm_xml).ok_or_else(|| {
        SyncError::Translation(format!(
            "PipelineConfig {} has neither a jenkinsfile nor a source",
            config.metadata.namespace_name()
        ))
    })?;
    let script_path = jenkins
        .jenkinsfile_path
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_JENKINSFILE);

    Ok(format!(
        "<definition class=\"org.jenkinsci.plugins.workflow.cps.CpsScmFlowDefinition\">\
         {}<scriptPath>{}</scriptPath><lightweight>true</lightweight>\
         </definition>",
        scm,
        xml::escape(script_path)
    ))
}

/// Declares the parameters a scheduled run is correlated through; Jenkins
/// drops undeclared ones
fn correlation_parameters() -> String {
    let definitions: String = naming::CORRELATION_PARAMETERS
        .iter()
        .map(|name| {
            format!(
                "<{STRING_PARAMETER}><name>{name}</name><defaultValue></defaultValue>\
                 <trim>false</trim></{STRING_PARAMETER}>"
            )
        })
        .collect();
    format!(
        "<{PARAMETERS_PROPERTY}><parameterDefinitions>{definitions}</parameterDefinitions>\
         </{PARAMETERS_PROPERTY}>"
    )
}

fn pipeline_xml(config: &PipelineConfig, display_name: &str) -> Result<String> {
    let mut properties = identity_property(PIPELINE_CONFIG_PROPERTY, config);
    properties.push_str(&correlation_parameters());
    if naming::is_serial_policy(config) {
        properties.push_str(&format!("<{}/>", DISABLE_CONCURRENT_BUILDS));
    }

    Ok(format!(
        "<?xml version='1.1' encoding='UTF-8'?>\n\
         <flow-definition plugin=\"workflow-job\">\
         <displayName>{}</displayName>\
         <properties>{}</properties>\
         {}\
         <disabled>{}</disabled>\
         </flow-definition>\n",
        xml::escape(display_name),
        properties,
        flow_definition(config)?,
        config.spec.disabled,
    ))
}

fn multi_branch_xml(config: &PipelineConfig, display_name: &str) -> Result<String> {
    let git = config
        .spec
        .source
        .as_ref()
        .filter(|source| source.kind() == SourceKind::Git)
        .and_then(|source| source.git.as_ref())
        .ok_or_else(|| {
            SyncError::Translation(format!(
                "multi-branch PipelineConfig {} requires a git source",
                config.metadata.namespace_name()
            ))
        })?;
    let script_path = config
        .spec
        .strategy
        .jenkins
        .as_ref()
        .and_then(|jenkins| jenkins.jenkinsfile_path.as_deref())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_JENKINSFILE);

    Ok(format!(
        "<?xml version='1.1' encoding='UTF-8'?>\n\
         <org.jenkinsci.plugins.workflow.multibranch.WorkflowMultiBranchProject plugin=\"workflow-multibranch\">\
         <displayName>{}</displayName>\
         <properties>{}</properties>\
         <sources class=\"jenkins.branch.MultiBranchProject$BranchSourceList\"><data>\
         <jenkins.branch.BranchSource><source class=\"jenkins.plugins.git.GitSCMSource\">\
         <remote>{}</remote>\
         </source></jenkins.branch.BranchSource>\
         </data></sources>\
         <factory class=\"org.jenkinsci.plugins.workflow.multibranch.WorkflowBranchProjectFactory\">\
         <scriptPath>{}</scriptPath>\
         </factory>\
         <disabled>{}</disabled>\
         </org.jenkinsci.plugins.workflow.multibranch.WorkflowMultiBranchProject>\n",
        xml::escape(display_name),
        identity_property(MULTI_BRANCH_PROPERTY, config),
        xml::escape(&git.uri),
        xml::escape(script_path),
        config.spec.disabled,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipesync_core::domain::meta::ObjectMeta;
    use pipesync_core::domain::pipeline_config::{
        GitSource, JenkinsStrategy, PipelineConfigSpec, PipelineStrategy, RunPolicy,
    };

    fn config(script: Option<&str>, version: &str) -> PipelineConfig {
        let mut meta = ObjectMeta::new("ns", "demo");
        meta.resource_version = Some(version.to_string());
        meta.uid = Some("uid-1".to_string());
        PipelineConfig::new(
            meta,
            PipelineConfigSpec {
                strategy: PipelineStrategy {
                    jenkins: Some(JenkinsStrategy {
                        jenkinsfile: script.map(str::to_string),
                        jenkinsfile_path: None,
                    }),
                    template: None,
                },
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_inline_script_definition() {
        let definition = XmlJobTranslator::new()
            .translate(&config(Some("echo 'a < b'"), "7"))
            .unwrap();

        assert_eq!(definition.kind, JobKind::Pipeline);
        assert_eq!(definition.parent, "ns");
        assert_eq!(definition.name, "ns-demo");
        assert_eq!(definition.display_name, "ns/demo");
        assert_eq!(xml::resource_version(&definition.xml).as_deref(), Some("7"));
        assert!(definition.xml.contains("echo &apos;a &lt; b&apos;"));
        assert!(!definition.xml.contains(DISABLE_CONCURRENT_BUILDS));
    }

    #[test]
    fn test_pipeline_job_declares_correlation_parameters() {
        let definition = XmlJobTranslator::new()
            .translate(&config(Some("echo"), "1"))
            .unwrap();
        assert_eq!(definition.xml.matches(PARAMETERS_PROPERTY).count(), 2);
        for name in naming::CORRELATION_PARAMETERS {
            assert!(definition.xml.contains(&format!("<name>{}</name>", name)));
        }
    }

    #[test]
    fn test_serial_policy_disables_concurrency() {
        let mut serial = config(Some("echo"), "1");
        serial.spec.run_policy = RunPolicy::Serial;
        let definition = XmlJobTranslator::new().translate(&serial).unwrap();
        assert!(definition.xml.contains(DISABLE_CONCURRENT_BUILDS));
    }

    #[test]
    fn test_scm_definition_uses_script_path() {
        let mut from_git = config(None, "1");
        from_git.spec.source = Some(PipelineSource {
            git: Some(GitSource {
                uri: "https://git.local/demo.git".to_string(),
                git_ref: Some("main".to_string()),
            }),
            svn: None,
        });
        if let Some(jenkins) = from_git.spec.strategy.jenkins.as_mut() {
            jenkins.jenkinsfile_path = Some("ci/Jenkinsfile".to_string());
        }

        let definition = XmlJobTranslator::new().translate(&from_git).unwrap();
        assert!(definition.xml.contains("CpsScmFlowDefinition"));
        assert!(definition.xml.contains("<scriptPath>ci/Jenkinsfile</scriptPath>"));
        assert!(definition.xml.contains("<name>main</name>"));
    }

    #[test]
    fn test_multi_branch_requires_git() {
        let mut multi = config(None, "1");
        multi.metadata.labels.insert(
            naming::LABEL_PIPELINE_CONFIG_KIND.to_string(),
            naming::PIPELINE_CONFIG_KIND_MULTI_BRANCH.to_string(),
        );
        let err = XmlJobTranslator::new().translate(&multi).unwrap_err();
        assert!(matches!(err, SyncError::Translation(_)));

        multi.spec.source = Some(PipelineSource {
            git: Some(GitSource {
                uri: "https://git.local/demo.git".to_string(),
                git_ref: None,
            }),
            svn: None,
        });
        let definition = XmlJobTranslator::new().translate(&multi).unwrap();
        assert_eq!(definition.kind, JobKind::MultiBranch);
        assert!(definition.xml.contains(MULTI_BRANCH_PROPERTY));
    }

    #[test]
    fn test_missing_stamp_or_strategy() {
        let err = XmlJobTranslator::new()
            .translate(&config(Some("echo"), ""))
            .unwrap_err();
        assert!(!err.is_retryable());

        let mut no_strategy = config(None, "1");
        no_strategy.spec.strategy.jenkins = None;
        assert!(XmlJobTranslator::new().translate(&no_strategy).is_err());
    }

    #[test]
    fn test_override_path() {
        let mut moved = config(Some("echo"), "1");
        moved.metadata.annotations.insert(
            naming::ANNOTATION_JOB_PATH.to_string(),
            "team/builds/demo".to_string(),
        );
        let definition = XmlJobTranslator::new().translate(&moved).unwrap();
        assert_eq!(definition.parent, "team/builds");
        assert_eq!(definition.name, "demo");
    }
}
