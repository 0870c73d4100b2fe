//! In-memory execution engine

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::domain::job::{
    Folder, FolderDefinition, Item, JobDefinition, JobHandle, JobKind, MultiBranchProject,
    WorkflowJob,
};
use crate::domain::run::{BuildRequest, PipelineCause, QueueItem, RunRecord, RunState};
use crate::engine::ExecutionEngine;
use crate::error::EngineError;

/// A mutation applied through the [`ExecutionEngine`] interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    FolderCreated(String),
    FolderTagged(String),
    JobCreated(String),
    JobUpdated(String),
    ItemDeleted(String),
    QueueItemCancelled(u64),
    RunTerminated { job: String, number: u64 },
    RunKilled { job: String, number: u64 },
    RunDeleted { job: String, number: u64 },
    BuildScheduled { job: String, build_id: String },
}

/// Operations that can be made to fail on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    GetItem,
    CreateFolder,
    CreateJob,
    UpdateJob,
    DeleteItem,
    ListBuilds,
    QueueItems,
    CancelQueueItem,
    TerminateRun,
    KillRun,
    ScheduleBuild,
}

type DeleteHook = Arc<dyn Fn(&str) + Send + Sync>;

enum Node {
    Folder(Folder),
    Job(WorkflowJob),
    MultiBranch(MultiBranchProject),
    Other(String),
}


#[derive(Default)]
struct EngineState {
    items: BTreeMap<String, Node>,
    /// Build history per job full name, oldest first
    builds: HashMap<String, Vec<RunRecord>>,
    queue: Vec<QueueItem>,
    next_queue_id: u64,
    xml: HashMap<String, String>,
    events: Vec<EngineEvent>,
    hidden: HashSet<String>,
    pinned: HashSet<u64>,
    failures: HashSet<FailPoint>,
}

impl EngineState {
    fn check(&self, point: FailPoint) -> Result<(), EngineError> {
        if self.failures.contains(&point) {
            return Err(EngineError::status(500, format!("injected failure: {:?}", point)));
        }
        Ok(())
    }

    fn lookup(&self, full_name: &str) -> Option<Item> {
        if self.hidden.contains(full_name) {
            return None;
        }

        match self.items.get(full_name) {
            Some(Node::Folder(folder)) => Some(Item::Folder(folder.clone())),
            Some(Node::Job(job)) => Some(Item::Job(JobHandle::Job(job.clone()))),
            Some(Node::MultiBranch(project)) => {
                Some(Item::Job(JobHandle::MultiBranch(project.clone())))
            }
            Some(Node::Other(class)) => Some(Item::Other {
                full_name: full_name.to_string(),
                class: class.clone(),
            }),
            None => {
                // Branch jobs live inside their project
                let (parent, branch) = full_name.rsplit_once('/')?;
                match self.items.get(parent) {
                    Some(Node::MultiBranch(project)) => project
                        .branches
                        .get(branch)
                        .map(|job| Item::Job(JobHandle::Job(job.clone()))),
                    _ => None,
                }
            }
        }
    }

    fn is_job(&self, full_name: &str) -> bool {
        matches!(self.lookup(full_name), Some(Item::Job(JobHandle::Job(_))))
    }

    fn run_mut(&mut self, job: &str, number: u64) -> Result<&mut RunRecord, EngineError> {
        self.builds
            .get_mut(job)
            .and_then(|runs| runs.iter_mut().find(|run| run.number == number))
            .ok_or_else(|| EngineError::NotFound(format!("{} #{}", job, number)))
    }

    fn next_run_number(&self, job: &str) -> u64 {
        self.builds
            .get(job)
            .and_then(|runs| runs.iter().map(|run| run.number).max())
            .unwrap_or(0)
            + 1
    }
}

/// Execution engine kept entirely in memory
///
/// Seeding helpers (`add_*`, `enqueue`, ...) bypass the event log so that
/// [`InMemoryEngine::mutations`] counts only what the reconciler did.
#[derive(Default)]
pub struct InMemoryEngine {
    state: Mutex<EngineState>,
    delete_hook: Mutex<Option<DeleteHook>>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    /// Adds a folder without the managed tag
    pub fn add_folder(&self, full_name: &str) {
        self.state.lock().items.insert(
            full_name.to_string(),
            Node::Folder(Folder {
                full_name: full_name.to_string(),
                description: None,
                managed: false,
            }),
        );
    }

    /// Adds an object of a type this system does not manage
    pub fn add_other(&self, full_name: &str, class: &str) {
        self.state
            .lock()
            .items
            .insert(full_name.to_string(), Node::Other(class.to_string()));
    }

    pub fn add_job(&self, full_name: &str, resource_version: Option<&str>) {
        self.state.lock().items.insert(
            full_name.to_string(),
            Node::Job(WorkflowJob {
                full_name: full_name.to_string(),
                display_name: full_name.to_string(),
                resource_version: resource_version.map(str::to_string),
                disabled: false,
            }),
        );
    }

    pub fn add_multi_branch(&self, full_name: &str, resource_version: Option<&str>) {
        self.state.lock().items.insert(
            full_name.to_string(),
            Node::MultiBranch(MultiBranchProject {
                full_name: full_name.to_string(),
                display_name: full_name.to_string(),
                resource_version: resource_version.map(str::to_string),
                branches: BTreeMap::new(),
            }),
        );
    }

    /// Adds a branch job to an existing multi-branch project
    pub fn add_branch(&self, project: &str, branch: &str) {
        let mut state = self.state.lock();
        if let Some(Node::MultiBranch(p)) = state.items.get_mut(project) {
            let full_name = format!("{}/{}", project, branch);
            p.branches.insert(
                branch.to_string(),
                WorkflowJob {
                    display_name: branch.to_string(),
                    full_name,
                    resource_version: None,
                    disabled: false,
                },
            );
        }
    }

    /// Appends a run to a job's history and returns its number
    pub fn add_run(&self, job: &str, state: RunState, cause: Option<PipelineCause>) -> u64 {
        let mut guard = self.state.lock();
        let number = guard.next_run_number(job);
        guard.builds.entry(job.to_string()).or_default().push(RunRecord {
            job: job.to_string(),
            number,
            state,
            causes: cause.into_iter().collect(),
            build_id: None,
        });
        number
    }

    pub fn set_run_state(&self, job: &str, number: u64, state: RunState) {
        if let Ok(run) = self.state.lock().run_mut(job, number) {
            run.state = state;
        }
    }

    /// Adds a pending entry to the engine-wide queue and returns its id
    pub fn enqueue(&self, task: &str, causes: Vec<PipelineCause>) -> u64 {
        let mut state = self.state.lock();
        state.next_queue_id += 1;
        let id = state.next_queue_id;
        state.queue.push(QueueItem {
            id,
            task: task.to_string(),
            causes,
            build_id: None,
        });
        id
    }

    /// Makes cancellation of a queue entry fail, as if it already started
    pub fn pin_queue_item(&self, id: u64) {
        self.state.lock().pinned.insert(id);
    }

    /// Moves a queue entry into its job's history as a running build
    ///
    /// Returns the run number and the provisional build id it was scheduled with.
    pub fn start_queued(&self, id: u64) -> Option<(u64, Option<String>)> {
        let mut state = self.state.lock();
        let index = state.queue.iter().position(|item| item.id == id)?;
        let item = state.queue.remove(index);
        let number = state.next_run_number(&item.task);
        let build_id = item.build_id.clone();
        state.builds.entry(item.task.clone()).or_default().push(RunRecord {
            job: item.task,
            number,
            state: RunState::Running,
            causes: item.causes,
            build_id: item.build_id,
        });
        Some((number, build_id))
    }

    /// Makes an item invisible to lookups while keeping it stored
    pub fn hide(&self, full_name: &str) {
        self.state.lock().hidden.insert(full_name.to_string());
    }

    pub fn fail_on(&self, point: FailPoint) {
        self.state.lock().failures.insert(point);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Called with the item name while a delete is executing
    pub fn set_delete_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.delete_hook.lock() = Some(Arc::new(hook));
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn events(&self) -> Vec<EngineEvent> {
        self.state.lock().events.clone()
    }

    /// Number of mutations applied through the engine interface
    pub fn mutations(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Definition last written for a job, as the engine stores it
    pub fn job_xml(&self, full_name: &str) -> Option<String> {
        self.state.lock().xml.get(full_name).cloned()
    }
}

fn materialize(definition: &JobDefinition, full_name: String, previous: Option<&Node>) -> Node {
    let resource_version = Some(definition.resource_version.clone());
    match definition.kind {
        JobKind::Pipeline => Node::Job(WorkflowJob {
            full_name,
            display_name: definition.display_name.clone(),
            resource_version,
            disabled: definition.disabled,
        }),
        JobKind::MultiBranch => {
            let branches = match previous {
                Some(Node::MultiBranch(project)) => project.branches.clone(),
                _ => BTreeMap::new(),
            };
            Node::MultiBranch(MultiBranchProject {
                full_name,
                display_name: definition.display_name.clone(),
                resource_version,
                branches,
            })
        }
    }
}

#[async_trait]
impl ExecutionEngine for InMemoryEngine {
    async fn get_item(&self, full_name: &str) -> Result<Option<Item>, EngineError> {
        let state = self.state.lock();
        state.check(FailPoint::GetItem)?;
        Ok(state.lookup(full_name))
    }

    async fn create_folder(&self, folder: &FolderDefinition) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check(FailPoint::CreateFolder)?;
        if state.items.contains_key(&folder.name) {
            return Err(EngineError::Rejected(format!(
                "an item named '{}' already exists",
                folder.name
            )));
        }

        state.items.insert(
            folder.name.clone(),
            Node::Folder(Folder {
                full_name: folder.name.clone(),
                description: Some(folder.description.clone()),
                managed: true,
            }),
        );
        state.events.push(EngineEvent::FolderCreated(folder.name.clone()));
        Ok(())
    }

    async fn tag_folder(&self, full_name: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        match state.items.get_mut(full_name) {
            Some(Node::Folder(folder)) => folder.managed = true,
            Some(_) => {
                return Err(EngineError::Rejected(format!("'{}' is not a folder", full_name)));
            }
            None => return Err(EngineError::NotFound(full_name.to_string())),
        }
        state.events.push(EngineEvent::FolderTagged(full_name.to_string()));
        Ok(())
    }

    async fn create_job(&self, definition: &JobDefinition) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check(FailPoint::CreateJob)?;
        if !matches!(state.items.get(&definition.parent), Some(Node::Folder(_))) {
            return Err(EngineError::Rejected(format!(
                "parent '{}' is not a folder",
                definition.parent
            )));
        }

        let full_name = definition.full_name();
        if state.items.contains_key(&full_name) {
            return Err(EngineError::Rejected(format!(
                "an item named '{}' already exists",
                full_name
            )));
        }

        let node = materialize(definition, full_name.clone(), None);
        state.items.insert(full_name.clone(), node);
        state.xml.insert(full_name.clone(), definition.xml.clone());
        state.events.push(EngineEvent::JobCreated(full_name));
        Ok(())
    }

    async fn update_job(
        &self,
        full_name: &str,
        definition: &JobDefinition,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check(FailPoint::UpdateJob)?;
        let node = match state.items.get(full_name) {
            Some(previous @ (Node::Job(_) | Node::MultiBranch(_))) => {
                materialize(definition, full_name.to_string(), Some(previous))
            }
            Some(_) => {
                return Err(EngineError::Rejected(format!("'{}' is not a job", full_name)));
            }
            None => return Err(EngineError::NotFound(full_name.to_string())),
        };

        state.items.insert(full_name.to_string(), node);
        state.xml.insert(full_name.to_string(), definition.xml.clone());
        state.events.push(EngineEvent::JobUpdated(full_name.to_string()));
        Ok(())
    }

    async fn delete_item(&self, full_name: &str) -> Result<(), EngineError> {
        {
            let state = self.state.lock();
            state.check(FailPoint::DeleteItem)?;
            if !state.items.contains_key(full_name) {
                return Err(EngineError::NotFound(full_name.to_string()));
            }
        }

        let hook = self.delete_hook.lock().clone();
        if let Some(hook) = hook {
            hook(full_name);
        }

        let mut state = self.state.lock();
        let prefix = format!("{}/", full_name);
        let below = |name: &String| name == full_name || name.starts_with(&prefix);
        state.items.retain(|name, _| !below(name));
        state.builds.retain(|name, _| !below(name));
        state.xml.retain(|name, _| !below(name));
        state.queue.retain(|item| !below(&item.task));
        state.events.push(EngineEvent::ItemDeleted(full_name.to_string()));
        Ok(())
    }

    async fn list_builds(&self, job: &str) -> Result<Vec<RunRecord>, EngineError> {
        let state = self.state.lock();
        state.check(FailPoint::ListBuilds)?;
        if !state.is_job(job) {
            return Err(EngineError::NotFound(job.to_string()));
        }

        let mut runs = state.builds.get(job).cloned().unwrap_or_default();
        runs.sort_by(|a, b| b.number.cmp(&a.number));
        Ok(runs)
    }

    async fn run_state(&self, job: &str, number: u64) -> Result<Option<RunState>, EngineError> {
        let state = self.state.lock();
        Ok(state
            .builds
            .get(job)
            .and_then(|runs| runs.iter().find(|run| run.number == number))
            .map(|run| run.state))
    }

    async fn queue_items(&self) -> Result<Vec<QueueItem>, EngineError> {
        let state = self.state.lock();
        state.check(FailPoint::QueueItems)?;
        Ok(state.queue.clone())
    }

    async fn cancel_queue_item(&self, id: u64) -> Result<bool, EngineError> {
        let mut state = self.state.lock();
        state.check(FailPoint::CancelQueueItem)?;
        if state.pinned.contains(&id) {
            return Ok(false);
        }

        let Some(index) = state.queue.iter().position(|item| item.id == id) else {
            return Ok(false);
        };
        state.queue.remove(index);
        state.events.push(EngineEvent::QueueItemCancelled(id));
        Ok(true)
    }

    async fn terminate_run(&self, job: &str, number: u64) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check(FailPoint::TerminateRun)?;
        // A terminate signal is only a request; the run keeps its state
        state.run_mut(job, number)?;
        state.events.push(EngineEvent::RunTerminated {
            job: job.to_string(),
            number,
        });
        Ok(())
    }

    async fn kill_run(&self, job: &str, number: u64) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check(FailPoint::KillRun)?;
        state.run_mut(job, number)?.state = RunState::Completed;
        state.events.push(EngineEvent::RunKilled {
            job: job.to_string(),
            number,
        });
        Ok(())
    }

    async fn delete_run(&self, job: &str, number: u64) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let runs = state
            .builds
            .get_mut(job)
            .ok_or_else(|| EngineError::NotFound(job.to_string()))?;
        let before = runs.len();
        runs.retain(|run| run.number != number);
        if runs.len() == before {
            return Err(EngineError::NotFound(format!("{} #{}", job, number)));
        }
        state.events.push(EngineEvent::RunDeleted {
            job: job.to_string(),
            number,
        });
        Ok(())
    }

    async fn schedule_build(&self, job: &str, request: &BuildRequest) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check(FailPoint::ScheduleBuild)?;
        if !state.is_job(job) {
            return Err(EngineError::NotFound(job.to_string()));
        }

        state.next_queue_id += 1;
        let id = state.next_queue_id;
        state.queue.push(QueueItem {
            id,
            task: job.to_string(),
            causes: vec![request.cause.clone()],
            build_id: Some(request.build_id.clone()),
        });
        state.events.push(EngineEvent::BuildScheduled {
            job: job.to_string(),
            build_id: request.build_id.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn definition(kind: JobKind, version: &str) -> JobDefinition {
        JobDefinition {
            kind,
            parent: "ns".to_string(),
            name: "ns-demo".to_string(),
            display_name: "ns/demo".to_string(),
            resource_version: version.to_string(),
            disabled: false,
            xml: format!("<flow-definition>{}</flow-definition>", version),
        }
    }

    #[tokio::test]
    async fn test_create_job_requires_folder_parent() {
        let engine = InMemoryEngine::new();
        let err = engine
            .create_job(&definition(JobKind::Pipeline, "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Rejected(_)));

        engine.add_folder("ns");
        engine
            .create_job(&definition(JobKind::Pipeline, "1"))
            .await
            .unwrap();

        let handle = engine.get_item("ns/ns-demo").await.unwrap().unwrap();
        assert_eq!(handle.class_name(), "WorkflowJob");
        assert_eq!(engine.mutations(), 1);
        assert!(engine.job_xml("ns/ns-demo").unwrap().contains(">1<"));
    }

    #[tokio::test]
    async fn test_update_keeps_branches() {
        let engine = InMemoryEngine::new();
        engine.add_folder("ns");
        engine.add_multi_branch("ns/ns-demo", Some("1"));
        engine.add_branch("ns/ns-demo", "main");

        engine
            .update_job("ns/ns-demo", &definition(JobKind::MultiBranch, "2"))
            .await
            .unwrap();

        let handle = engine
            .get_item("ns/ns-demo")
            .await
            .unwrap()
            .and_then(Item::into_job)
            .unwrap();
        assert_eq!(handle.resource_version(), Some("2"));
        assert!(handle.branch("main").is_some());

        let branch = engine.get_item("ns/ns-demo/main").await.unwrap().unwrap();
        assert_eq!(branch.full_name(), "ns/ns-demo/main");
    }

    #[tokio::test]
    async fn test_delete_removes_subtree_and_calls_hook() {
        let engine = InMemoryEngine::new();
        engine.add_folder("ns");
        engine.add_job("ns/ns-demo", Some("1"));
        engine.add_run("ns/ns-demo", RunState::Completed, None);

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        engine.set_delete_hook(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        engine.delete_item("ns").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(engine.get_item("ns/ns-demo").await.unwrap().is_none());
        assert!(engine.run_state("ns/ns-demo", 1).await.unwrap().is_none());
        assert!(engine.delete_item("ns").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_queue_lifecycle() {
        let engine = InMemoryEngine::new();
        engine.add_folder("ns");
        engine.add_job("ns/ns-demo", Some("1"));

        let request = BuildRequest {
            build_id: "b-1".to_string(),
            parameters: vec![],
            cause: PipelineCause::new("ns", "demo-00001"),
        };
        engine.schedule_build("ns/ns-demo", &request).await.unwrap();

        let queue = engine.queue_items().await.unwrap();
        assert_eq!(queue.len(), 1);
        let id = queue[0].id;

        engine.pin_queue_item(id);
        assert!(!engine.cancel_queue_item(id).await.unwrap());

        let (number, build_id) = engine.start_queued(id).unwrap();
        assert_eq!(number, 1);
        assert_eq!(build_id.as_deref(), Some("b-1"));
        assert_eq!(
            engine.run_state("ns/ns-demo", 1).await.unwrap(),
            Some(RunState::Running)
        );
    }

    #[tokio::test]
    async fn test_terminate_keeps_state_kill_completes() {
        let engine = InMemoryEngine::new();
        engine.add_folder("ns");
        engine.add_job("ns/ns-demo", Some("1"));
        let number = engine.add_run("ns/ns-demo", RunState::Running, None);

        engine.terminate_run("ns/ns-demo", number).await.unwrap();
        assert_eq!(
            engine.run_state("ns/ns-demo", number).await.unwrap(),
            Some(RunState::Running)
        );

        engine.kill_run("ns/ns-demo", number).await.unwrap();
        assert_eq!(
            engine.run_state("ns/ns-demo", number).await.unwrap(),
            Some(RunState::Completed)
        );
    }

    #[tokio::test]
    async fn test_injected_failure_and_hidden_items() {
        let engine = InMemoryEngine::new();
        engine.add_folder("ns");
        engine.hide("ns");
        assert!(engine.get_item("ns").await.unwrap().is_none());

        engine.fail_on(FailPoint::GetItem);
        assert!(engine.get_item("ns").await.is_err());
        engine.clear_failures();
        assert!(engine.get_item("other").await.unwrap().is_none());
    }
}
