//! Jenkins REST client
//!
//! Item paths map to nested `/job/<segment>` URLs. Job state comes from the
//! JSON API, while the managed-folder tag and the resource-version stamp are
//! only visible in an item's `config.xml`.

use async_trait::async_trait;
use pipesync_core::domain::job::{
    Folder, FolderDefinition, Item, JobDefinition, JobHandle, MultiBranchProject, WorkflowJob,
};
use pipesync_core::domain::run::{BuildRequest, PipelineCause, QueueItem, RunRecord, RunState};
use pipesync_core::naming::{
    MANAGED_FOLDER_PROPERTY, PARAMETER_BUILD_ID, PARAMETER_NAME, PARAMETER_NAMESPACE,
    PARAMETER_UID,
};
use pipesync_core::{EngineError, ExecutionEngine, xml};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

use crate::error::{ClientError, Result};
use crate::{
    handle_empty_response, handle_optional_response, handle_response, handle_text_response,
};

const FOLDER_CLASS: &str = "com.cloudbees.hudson.plugins.folder.Folder";
const WORKFLOW_JOB_CLASS: &str = "org.jenkinsci.plugins.workflow.job.WorkflowJob";
const MULTI_BRANCH_CLASS: &str =
    "org.jenkinsci.plugins.workflow.multibranch.WorkflowMultiBranchProject";

const ITEM_TREE: &str =
    "_class,fullName,displayName,description,buildable,jobs[_class,name,fullName,displayName,buildable]";
const BUILDS_TREE: &str =
    "builds[number,building,result,actions[causes[namespace,name,uid],parameters[name,value]]]";
const RUN_TREE: &str = "number,building,result";
const QUEUE_TREE: &str =
    "items[id,task[url],actions[causes[namespace,name,uid],parameters[name,value]]]";

const XML: &str = "application/xml";

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemJson {
    #[serde(rename = "_class")]
    class: String,
    full_name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    buildable: Option<bool>,
    #[serde(default)]
    jobs: Vec<ChildJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChildJson {
    #[serde(rename = "_class")]
    class: String,
    name: String,
    full_name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    buildable: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct BuildsJson {
    #[serde(default)]
    builds: Vec<BuildJson>,
}

#[derive(Debug, Deserialize)]
struct BuildJson {
    number: u64,
    #[serde(default)]
    building: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    actions: Vec<Option<ActionJson>>,
}

#[derive(Debug, Deserialize)]
struct ActionJson {
    #[serde(default)]
    causes: Vec<CauseJson>,
    #[serde(default)]
    parameters: Vec<ParameterJson>,
}

#[derive(Debug, Deserialize)]
struct CauseJson {
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    uid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ParameterJson {
    name: String,
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct QueueJson {
    #[serde(default)]
    items: Vec<QueueEntryJson>,
}

#[derive(Debug, Deserialize)]
struct QueueEntryJson {
    id: u64,
    task: TaskJson,
    #[serde(default)]
    actions: Vec<Option<ActionJson>>,
}

#[derive(Debug, Deserialize)]
struct TaskJson {
    #[serde(default)]
    url: String,
}

/// Pipeline correlation recovered from a build's or queue entry's actions
#[derive(Debug, Default)]
struct Correlation {
    causes: Vec<PipelineCause>,
    build_id: Option<String>,
}

fn correlation(actions: Vec<Option<ActionJson>>) -> Correlation {
    let mut causes = Vec::new();
    let mut parameters = HashMap::new();
    for action in actions.into_iter().flatten() {
        causes.extend(action.causes.into_iter().filter_map(|cause| {
            match (cause.namespace, cause.name) {
                (Some(namespace), Some(name)) => Some(PipelineCause {
                    namespace,
                    name,
                    uid: cause.uid,
                }),
                _ => None,
            }
        }));
        parameters.extend(action.parameters.into_iter().filter_map(|p| match p.value {
            serde_json::Value::String(value) if !value.is_empty() => Some((p.name, value)),
            _ => None,
        }));
    }

    // The parameters a run was scheduled with name the Pipeline that triggered it
    if let (Some(namespace), Some(name)) = (
        parameters.remove(PARAMETER_NAMESPACE),
        parameters.remove(PARAMETER_NAME),
    ) {
        causes.retain(|cause| cause.namespace != namespace || cause.name != name);
        causes.insert(
            0,
            PipelineCause {
                namespace,
                name,
                uid: parameters.remove(PARAMETER_UID),
            },
        );
    }

    Correlation {
        causes,
        build_id: parameters.remove(PARAMETER_BUILD_ID),
    }
}

/// Form fields of a `buildWithParameters` call
fn build_form(request: &BuildRequest) -> Vec<(String, String)> {
    let cause = &request.cause;
    let mut form: Vec<(String, String)> = request
        .parameters
        .iter()
        .map(|p| (p.name.clone(), p.value.clone()))
        .collect();
    form.push((PARAMETER_NAMESPACE.to_string(), cause.namespace.clone()));
    form.push((PARAMETER_NAME.to_string(), cause.name.clone()));
    if let Some(uid) = &cause.uid {
        form.push((PARAMETER_UID.to_string(), uid.clone()));
    }
    form.push((PARAMETER_BUILD_ID.to_string(), request.build_id.clone()));
    form
}

fn run_state(building: bool, result: Option<&str>) -> RunState {
    match (building, result) {
        (true, _) => RunState::Running,
        (false, None) => RunState::Queued,
        (false, Some(_)) => RunState::Completed,
    }
}

fn run_record(job: &str, build: BuildJson) -> RunRecord {
    let Correlation { causes, build_id } = correlation(build.actions);
    RunRecord {
        job: job.to_string(),
        number: build.number,
        state: run_state(build.building, build.result.as_deref()),
        causes,
        build_id,
    }
}

/// Recovers an item's full name from its absolute URL
fn full_name_from_url(url: &str) -> String {
    let mut names = Vec::new();
    let mut segments = url.split('/');
    while let Some(segment) = segments.next() {
        if segment == "job" {
            if let Some(name) = segments.next() {
                names.push(name);
            }
        }
    }
    names.join("/")
}

fn folder_xml(description: &str) -> String {
    format!(
        "<?xml version='1.1' encoding='UTF-8'?>\n\
         <{class}>\n  \
         <description>{description}</description>\n  \
         <properties>\n    <{property}/>\n  </properties>\n\
         </{class}>\n",
        class = FOLDER_CLASS,
        property = MANAGED_FOLDER_PROPERTY,
        description = xml::escape(description),
    )
}

/// Adds the managed tag to a folder's config.xml, `None` if it has no
/// properties section to put it in
fn add_folder_property(config: &str) -> Option<String> {
    let tag = format!("<{}/>", MANAGED_FOLDER_PROPERTY);
    if config.contains("<properties/>") {
        return Some(config.replacen("<properties/>", &format!("<properties>{}</properties>", tag), 1));
    }
    if config.contains("<properties>") {
        return Some(config.replacen("<properties>", &format!("<properties>{}", tag), 1));
    }
    None
}

fn workflow_job(
    full_name: String,
    display_name: Option<String>,
    buildable: Option<bool>,
    resource_version: Option<String>,
) -> WorkflowJob {
    WorkflowJob {
        display_name: display_name.unwrap_or_else(|| full_name.clone()),
        full_name,
        resource_version,
        disabled: !buildable.unwrap_or(true),
    }
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for a Jenkins instance
#[derive(Debug, Clone)]
pub struct JenkinsClient {
    /// Base URL of Jenkins (e.g., "http://jenkins:8080")
    base_url: String,
    /// User and API token for basic auth
    credentials: Option<(String, String)>,
    /// HTTP client instance
    client: Client,
}

impl JenkinsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: None,
            client,
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, token: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), token.into()));
        self
    }

    /// Get the base URL of Jenkins
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of an item, `a/b` becoming `/job/a/job/b`
    ///
    /// Each segment is percent-encoded.
    fn item_url(&self, full_name: &str) -> Result<String> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            ClientError::InvalidRequest(format!("invalid Jenkins URL '{}': {}", self.base_url, e))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                ClientError::InvalidRequest(format!("'{}' cannot hold item paths", self.base_url))
            })?;
            segments.pop_if_empty();
            for segment in full_name.split('/').filter(|s| !s.is_empty()) {
                segments.push("job").push(segment);
            }
        }
        Ok(url.as_str().trim_end_matches('/').to_string())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, token)) => request.basic_auth(user, Some(token)),
            None => request,
        }
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.authorize(self.client.get(url))
    }

    fn post(&self, url: &str) -> RequestBuilder {
        self.authorize(self.client.post(url))
    }

    async fn fetch_config(&self, full_name: &str) -> Result<String> {
        let url = format!("{}/config.xml", self.item_url(full_name)?);
        let response = self.get(&url).send().await?;

        handle_text_response(response).await
    }

    async fn post_config(&self, full_name: &str, config: String) -> Result<()> {
        let url = format!("{}/config.xml", self.item_url(full_name)?);
        let response = self
            .post(&url)
            .header(CONTENT_TYPE, XML)
            .body(config)
            .send()
            .await?;

        handle_empty_response(response).await
    }

    async fn create_item(&self, parent: Option<&str>, name: &str, config: String) -> Result<()> {
        let url = format!("{}/createItem", self.item_url(parent.unwrap_or_default())?);
        let response = self
            .post(&url)
            .query(&[("name", name)])
            .header(CONTENT_TYPE, XML)
            .body(config)
            .send()
            .await?;

        handle_empty_response(response).await
    }

    async fn fetch_item(&self, full_name: &str) -> Result<Option<Item>> {
        let url = format!("{}/api/json", self.item_url(full_name)?);
        let response = self.get(&url).query(&[("tree", ITEM_TREE)]).send().await?;
        let Some(json) = handle_optional_response::<ItemJson>(response).await? else {
            return Ok(None);
        };

        let item = match json.class.as_str() {
            FOLDER_CLASS => {
                let config = self.fetch_config(full_name).await?;
                Item::Folder(Folder {
                    full_name: json.full_name,
                    description: json.description.filter(|d| !d.is_empty()),
                    managed: config.contains(MANAGED_FOLDER_PROPERTY),
                })
            }
            WORKFLOW_JOB_CLASS => {
                let config = self.fetch_config(full_name).await?;
                Item::Job(JobHandle::Job(workflow_job(
                    json.full_name,
                    json.display_name,
                    json.buildable,
                    xml::resource_version(&config),
                )))
            }
            MULTI_BRANCH_CLASS => {
                let config = self.fetch_config(full_name).await?;
                let branches: BTreeMap<String, WorkflowJob> = json
                    .jobs
                    .into_iter()
                    .filter(|child| child.class == WORKFLOW_JOB_CLASS)
                    .map(|child| {
                        let job = workflow_job(
                            child.full_name,
                            child.display_name,
                            child.buildable,
                            None,
                        );
                        (child.name, job)
                    })
                    .collect();
                Item::Job(JobHandle::MultiBranch(MultiBranchProject {
                    display_name: json.display_name.unwrap_or_else(|| json.full_name.clone()),
                    full_name: json.full_name,
                    resource_version: xml::resource_version(&config),
                    branches,
                }))
            }
            _ => Item::Other {
                full_name: json.full_name,
                class: json.class.clone(),
            },
        };

        Ok(Some(item))
    }

    async fn add_managed_tag(&self, full_name: &str) -> Result<()> {
        let config = self.fetch_config(full_name).await?;
        if config.contains(MANAGED_FOLDER_PROPERTY) {
            return Ok(());
        }

        let tagged = add_folder_property(&config).ok_or_else(|| {
            ClientError::InvalidRequest(format!("'{}' has no properties section", full_name))
        })?;
        self.post_config(full_name, tagged).await
    }

    async fn fetch_builds(&self, job: &str) -> Result<Vec<RunRecord>> {
        let url = format!("{}/api/json", self.item_url(job)?);
        let response = self.get(&url).query(&[("tree", BUILDS_TREE)]).send().await?;
        let builds: BuildsJson = handle_response(response).await?;

        Ok(builds
            .builds
            .into_iter()
            .map(|build| run_record(job, build))
            .collect())
    }

    async fn fetch_run_state(&self, job: &str, number: u64) -> Result<Option<RunState>> {
        let url = format!("{}/{}/api/json", self.item_url(job)?, number);
        let response = self.get(&url).query(&[("tree", RUN_TREE)]).send().await?;
        let build: Option<BuildJson> = handle_optional_response(response).await?;

        Ok(build.map(|b| run_state(b.building, b.result.as_deref())))
    }

    async fn fetch_queue(&self) -> Result<Vec<QueueItem>> {
        let url = format!("{}/queue/api/json", self.base_url);
        let response = self.get(&url).query(&[("tree", QUEUE_TREE)]).send().await?;
        let queue: QueueJson = handle_response(response).await?;

        Ok(queue
            .items
            .into_iter()
            .map(|entry| {
                let Correlation { causes, build_id } = correlation(entry.actions);
                QueueItem {
                    id: entry.id,
                    task: full_name_from_url(&entry.task.url),
                    causes,
                    build_id,
                }
            })
            .collect())
    }

    async fn post_queue_cancel(&self, id: u64) -> Result<bool> {
        let url = format!("{}/queue/cancelItem", self.base_url);
        let response = self.post(&url).query(&[("id", id)]).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        handle_empty_response(response).await.map(|_| true)
    }

    async fn post_item_action(&self, full_name: &str, action: &str) -> Result<()> {
        let url = format!("{}/{}", self.item_url(full_name)?, action);
        let response = self.post(&url).send().await?;

        handle_empty_response(response).await
    }

    /// POSTs to a run-scoped action such as `term`, `kill` or `doDelete`
    async fn post_run_action(&self, job: &str, number: u64, action: &str) -> Result<()> {
        let url = format!("{}/{}/{}", self.item_url(job)?, number, action);
        let response = self.post(&url).send().await?;

        handle_empty_response(response).await
    }

    async fn post_build(&self, job: &str, request: &BuildRequest) -> Result<()> {
        let url = format!("{}/buildWithParameters", self.item_url(job)?);
        let response = self.post(&url).form(&build_form(request)).send().await?;

        handle_empty_response(response).await
    }
}

#[async_trait]
impl ExecutionEngine for JenkinsClient {
    async fn get_item(&self, full_name: &str) -> std::result::Result<Option<Item>, EngineError> {
        Ok(self.fetch_item(full_name).await?)
    }

    async fn create_folder(&self, folder: &FolderDefinition) -> std::result::Result<(), EngineError> {
        tracing::debug!("Creating folder {}", folder.name);
        Ok(self
            .create_item(None, &folder.name, folder_xml(&folder.description))
            .await?)
    }

    async fn tag_folder(&self, full_name: &str) -> std::result::Result<(), EngineError> {
        Ok(self.add_managed_tag(full_name).await?)
    }

    async fn create_job(&self, definition: &JobDefinition) -> std::result::Result<(), EngineError> {
        tracing::debug!("Creating job {}", definition.full_name());
        Ok(self
            .create_item(
                Some(&definition.parent),
                &definition.name,
                definition.xml.clone(),
            )
            .await?)
    }

    async fn update_job(
        &self,
        full_name: &str,
        definition: &JobDefinition,
    ) -> std::result::Result<(), EngineError> {
        tracing::debug!("Updating job {}", full_name);
        Ok(self.post_config(full_name, definition.xml.clone()).await?)
    }

    async fn delete_item(&self, full_name: &str) -> std::result::Result<(), EngineError> {
        tracing::debug!("Deleting item {}", full_name);
        Ok(self.post_item_action(full_name, "doDelete").await?)
    }

    async fn list_builds(&self, job: &str) -> std::result::Result<Vec<RunRecord>, EngineError> {
        Ok(self.fetch_builds(job).await?)
    }

    async fn run_state(
        &self,
        job: &str,
        number: u64,
    ) -> std::result::Result<Option<RunState>, EngineError> {
        Ok(self.fetch_run_state(job, number).await?)
    }

    async fn queue_items(&self) -> std::result::Result<Vec<QueueItem>, EngineError> {
        Ok(self.fetch_queue().await?)
    }

    async fn cancel_queue_item(&self, id: u64) -> std::result::Result<bool, EngineError> {
        Ok(self.post_queue_cancel(id).await?)
    }

    async fn terminate_run(&self, job: &str, number: u64) -> std::result::Result<(), EngineError> {
        Ok(self.post_run_action(job, number, "term").await?)
    }

    async fn kill_run(&self, job: &str, number: u64) -> std::result::Result<(), EngineError> {
        Ok(self.post_run_action(job, number, "kill").await?)
    }

    async fn delete_run(&self, job: &str, number: u64) -> std::result::Result<(), EngineError> {
        Ok(self.post_run_action(job, number, "doDelete").await?)
    }

    async fn schedule_build(
        &self,
        job: &str,
        request: &BuildRequest,
    ) -> std::result::Result<(), EngineError> {
        Ok(self.post_build(job, request).await?)
    }
}
