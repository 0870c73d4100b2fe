//! Run lifecycle manager
//!
//! Finds the engine run behind a Pipeline and drives it through cancellation:
//! a queued build is pulled from the queue, a started one receives a terminate
//! signal followed by a forced kill once the grace period expires. Also
//! triggers new runs and correlates them with the Pipeline that asked for them.

use dashmap::DashMap;
use pipesync_core::domain::job::JobHandle;
use pipesync_core::domain::pipeline::Pipeline;
use pipesync_core::domain::pipeline_config::PipelineConfig;
use pipesync_core::domain::run::{
    BuildParameter, BuildRequest, PipelineCause, RunRecord, RunState,
};
use pipesync_core::{ControlPlane, ExecutionEngine, NamespaceName, Result, SyncError, naming};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actions::ActionCorrelationStore;
use crate::privilege::{PrivilegeProvider, with_privilege};
use crate::projection::JobProjectionClient;

/// Delay between the terminate signal and the forced kill
pub const DEFAULT_KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Where a Pipeline's run currently stands in the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NotFound,
    Queued,
    Running,
    /// Terminate sent, forced kill pending
    Stopping,
    Completed,
}

/// Pending forced kills, one per Pipeline identity
pub struct KillScheduler {
    engine: Arc<dyn ExecutionEngine>,
    privilege: Arc<dyn PrivilegeProvider>,
    grace_period: Duration,
    pending: Arc<DashMap<NamespaceName, (u64, CancellationToken)>>,
    generation: AtomicU64,
}

impl KillScheduler {
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        privilege: Arc<dyn PrivilegeProvider>,
        grace_period: Duration,
    ) -> Self {
        Self {
            engine,
            privilege,
            grace_period,
            pending: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Kills `job #number` after the grace period unless it completed by then
    ///
    /// Replaces any kill already pending for `identity`.
    pub fn schedule(&self, identity: NamespaceName, job: String, number: u64) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        if let Some((_, previous)) = self
            .pending
            .insert(identity.clone(), (generation, token.clone()))
        {
            previous.cancel();
        }

        let engine = Arc::clone(&self.engine);
        let privilege = Arc::clone(&self.privilege);
        let pending = Arc::clone(&self.pending);
        let grace_period = self.grace_period;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Forced kill of {} #{} cancelled", job, number);
                }
                _ = tokio::time::sleep(grace_period) => {
                    let state = with_privilege(&*privilege, engine.run_state(&job, number)).await;
                    match state {
                        Ok(Some(RunState::Queued | RunState::Running)) => {
                            match with_privilege(&*privilege, engine.kill_run(&job, number)).await {
                                Ok(()) => info!("Killed {} #{} after grace period", job, number),
                                Err(e) => warn!("Failed to kill {} #{}: {}", job, number, e),
                            }
                        }
                        Ok(_) => debug!("{} #{} finished before the forced kill", job, number),
                        Err(e) => warn!("Unable to read state of {} #{}: {}", job, number, e),
                    }
                }
            }
            pending.remove_if(&identity, |_, (current, _)| *current == generation);
        });
    }

    /// Cancels the pending kill for `identity`; returns whether one existed
    pub fn cancel(&self, identity: &NamespaceName) -> bool {
        match self.pending.remove(identity) {
            Some((_, (_, token))) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, identity: &NamespaceName) -> bool {
        self.pending.contains_key(identity)
    }
}

pub struct RunLifecycleManager {
    control_plane: Arc<dyn ControlPlane>,
    engine: Arc<dyn ExecutionEngine>,
    privilege: Arc<dyn PrivilegeProvider>,
    projection: Arc<JobProjectionClient>,
    actions: Arc<ActionCorrelationStore>,
    kills: KillScheduler,
}

impl RunLifecycleManager {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        engine: Arc<dyn ExecutionEngine>,
        privilege: Arc<dyn PrivilegeProvider>,
        projection: Arc<JobProjectionClient>,
        actions: Arc<ActionCorrelationStore>,
        grace_period: Duration,
    ) -> Self {
        let kills = KillScheduler::new(engine.clone(), privilege.clone(), grace_period);
        Self {
            control_plane,
            engine,
            privilege,
            projection,
            actions,
            kills,
        }
    }

    /// PipelineConfig owning the Pipeline `identity`, derived from its name
    pub async fn parent_config(&self, identity: &NamespaceName) -> Result<PipelineConfig> {
        let config_name = naming::parent_config_name(&identity.name)?;
        let key = NamespaceName::new(&identity.namespace, config_name);
        self.control_plane
            .get_pipeline_config(&key)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("PipelineConfig {} for {}", key, identity)))
    }

    async fn job_for(&self, identity: &NamespaceName, config: &PipelineConfig) -> Result<JobHandle> {
        self.projection.refresh_job(config).await?.ok_or_else(|| {
            SyncError::NotFound(format!(
                "job for PipelineConfig {} (needed by {})",
                config.metadata.namespace_name(),
                identity
            ))
        })
    }

    /// Run whose cause names exactly `identity`, searching every branch job
    pub async fn find_run(&self, identity: &NamespaceName) -> Result<Option<RunRecord>> {
        let config = self.parent_config(identity).await?;
        let handle = self.job_for(identity, &config).await?;

        for job in handle.jobs() {
            let runs = match with_privilege(
                &*self.privilege,
                self.engine.list_builds(&job.full_name),
            )
            .await
            {
                Ok(runs) => runs,
                Err(e) if e.is_not_found() => {
                    debug!("Branch job {} is gone, skipping it", job.full_name);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if let Some(run) = runs.into_iter().find(|run| run.matches(identity)) {
                return Ok(Some(run));
            }
        }
        Ok(None)
    }

    /// Cancels the first queue entry caused by `identity`
    ///
    /// Failures are logged and reported as `false`, never retried.
    pub async fn cancel_queued(&self, identity: &NamespaceName) -> bool {
        let items = match with_privilege(&*self.privilege, self.engine.queue_items()).await {
            Ok(items) => items,
            Err(e) => {
                warn!("Unable to read the build queue for {}: {}", identity, e);
                return false;
            }
        };

        let Some(item) = items.into_iter().find(|item| item.matches(identity)) else {
            return false;
        };

        match with_privilege(&*self.privilege, self.engine.cancel_queue_item(item.id)).await {
            Ok(true) => {
                info!("Cancelled queued build {} of {} for {}", item.id, item.task, identity);
                true
            }
            Ok(false) => {
                debug!("Queued build {} left the queue before it could be cancelled", item.id);
                false
            }
            Err(e) => {
                warn!("Failed to cancel queued build {} for {}: {}", item.id, identity, e);
                false
            }
        }
    }

    /// Sends terminate to the active run of `identity` and schedules a forced kill
    pub async fn stop_run(&self, identity: &NamespaceName) -> Result<bool> {
        let config = self.parent_config(identity).await?;
        let handle = self.job_for(identity, &config).await?;
        Ok(self.stop_in(identity, &handle).await)
    }

    async fn stop_in(&self, identity: &NamespaceName, handle: &JobHandle) -> bool {
        for job in handle.jobs() {
            let runs = match with_privilege(
                &*self.privilege,
                self.engine.list_builds(&job.full_name),
            )
            .await
            {
                Ok(runs) => runs,
                Err(e) => {
                    warn!("Unable to list builds of {}: {}", job.full_name, e);
                    continue;
                }
            };

            for run in runs.into_iter().filter(|run| run.matches(identity)) {
                if run.is_active() {
                    return self.terminate(identity, &run).await;
                }
                debug!("{} is not active, state {:?}", run.display_name(), run.state);
            }
        }

        debug!("No active run found for {}", identity);
        false
    }

    async fn terminate(&self, identity: &NamespaceName, run: &RunRecord) -> bool {
        if let Err(e) = with_privilege(
            &*self.privilege,
            self.engine.terminate_run(&run.job, run.number),
        )
        .await
        {
            warn!("Failed to terminate {}: {}", run.display_name(), e);
            return false;
        }

        info!("Terminating {} for {}", run.display_name(), identity);
        self.kills
            .schedule(identity.clone(), run.job.clone(), run.number);
        true
    }

    /// Cancels whatever `identity` has in the engine, queued or started
    ///
    /// `NotFound` when the config or job is missing, or nothing could be
    /// cancelled.
    pub async fn cancel(&self, identity: &NamespaceName) -> Result<()> {
        let config = self.parent_config(identity).await?;

        if self.cancel_queued(identity).await {
            // the entry never starts, so nothing will consume its actions
            self.actions.discard_for(identity);
            return Ok(());
        }

        let handle = self.job_for(identity, &config).await?;
        if self.stop_in(identity, &handle).await {
            self.actions.discard_for(identity);
            Ok(())
        } else {
            Err(SyncError::NotFound(format!("no running build for {}", identity)))
        }
    }

    /// Deletes the run record whose cause names exactly `identity`
    pub async fn delete_run(&self, identity: &NamespaceName) -> Result<bool> {
        let run = match self.find_run(identity).await {
            Ok(Some(run)) => run,
            Ok(None) => {
                debug!("No run to delete for {}", identity);
                return Ok(false);
            }
            Err(e) if e.is_not_found() => {
                warn!("Unable to delete run for {}: {}", identity, e);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        match with_privilege(
            &*self.privilege,
            self.engine.delete_run(&run.job, run.number),
        )
        .await
        {
            Ok(()) => {
                info!("Deleted {} for {}", run.display_name(), identity);
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Cancels the run if it is still going, then deletes its record
    pub async fn delete_pipeline(&self, identity: &NamespaceName) -> Result<bool> {
        if let Err(e) = self.cancel(identity).await {
            debug!("Did not cancel {} before delete, build might be completed: {}", identity, e);
        }
        let dropped = self.actions.discard_for(identity);
        if dropped > 0 {
            debug!("Dropped {} pending trigger(s) of deleted Pipeline {}", dropped, identity);
        }
        self.delete_run(identity).await
    }

    /// Where the run of `identity` stands
    ///
    /// Observing a run that left the queue consumes the actions stored for it,
    /// and observing completion drops any pending forced kill.
    pub async fn phase(&self, identity: &NamespaceName) -> Result<RunPhase> {
        let queue = with_privilege(&*self.privilege, self.engine.queue_items()).await?;
        if queue.iter().any(|item| item.matches(identity)) {
            return Ok(RunPhase::Queued);
        }

        let Some(run) = self.find_run(identity).await? else {
            return Ok(RunPhase::NotFound);
        };
        self.settle_actions(identity, &run);

        let phase = match run.state {
            RunState::Completed => {
                if self.run_completed(identity) {
                    debug!("{} completed before its forced kill", run.display_name());
                }
                RunPhase::Completed
            }
            _ if self.kills.is_pending(identity) => RunPhase::Stopping,
            RunState::Queued => RunPhase::Queued,
            RunState::Running => RunPhase::Running,
        };
        Ok(phase)
    }

    /// Hands stored actions to the run they were scheduled for and drops any
    /// left behind for `identity`
    fn settle_actions(&self, identity: &NamespaceName, run: &RunRecord) {
        if let Some((parameters, _)) = run
            .build_id
            .as_deref()
            .and_then(|build_id| self.on_run_started(build_id))
        {
            debug!(
                "{} started for {} with {} parameter(s)",
                run.display_name(),
                identity,
                parameters.len()
            );
        }
        self.actions.discard_for(identity);
    }

    /// Build id of a trigger of `identity` whose run has not been seen yet
    pub fn pending_build(&self, identity: &NamespaceName) -> Option<String> {
        self.actions.build_id_for(identity)
    }

    /// Schedules a new run of `config`'s job on behalf of `pipeline`
    ///
    /// Returns the provisional build id the run's actions are stored under. A
    /// Pipeline whose earlier trigger is still unobserved gets that build id
    /// back and no second build.
    pub async fn trigger(&self, pipeline: &Pipeline, config: &PipelineConfig) -> Result<String> {
        let identity = pipeline.metadata.namespace_name();
        if let Some(build_id) = self.pending_build(&identity) {
            debug!("Pipeline {} already triggered build {}", identity, build_id);
            return Ok(build_id);
        }

        let job = self
            .projection
            .get_job_for_pipeline(pipeline, config)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("job to run {}", identity)))?;

        let build_id = Uuid::new_v4().to_string();
        let parameters: Vec<BuildParameter> = pipeline
            .spec
            .parameters
            .iter()
            .map(|parameter| BuildParameter {
                name: parameter.name.clone(),
                value: parameter.value.clone(),
            })
            .collect();
        let cause = PipelineCause {
            uid: pipeline.metadata.uid.clone(),
            ..PipelineCause::new(&identity.namespace, &identity.name)
        };

        self.actions.put(&build_id, parameters.clone(), cause.clone());
        let request = BuildRequest {
            build_id: build_id.clone(),
            parameters,
            cause,
        };

        if let Err(e) = with_privilege(
            &*self.privilege,
            self.engine.schedule_build(&job.full_name, &request),
        )
        .await
        {
            self.actions.discard(&build_id);
            return Err(e.into());
        }

        info!("Scheduled build {} of {} for {}", build_id, job.full_name, identity);
        Ok(build_id)
    }

    /// Hands the stored actions to a run that just started
    pub fn on_run_started(&self, build_id: &str) -> Option<(Vec<BuildParameter>, PipelineCause)> {
        self.actions.take(build_id)
    }

    /// Drops the pending forced kill of a run that finished on its own
    pub fn run_completed(&self, identity: &NamespaceName) -> bool {
        self.kills.cancel(identity)
    }

    pub fn is_stopping(&self, identity: &NamespaceName) -> bool {
        self.kills.is_pending(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DeleteInProgress, JobCache};
    use crate::privilege::SystemPrivilege;
    use crate::translate::XmlJobTranslator;
    use pipesync_core::domain::meta::ObjectMeta;
    use pipesync_core::domain::pipeline::PipelineParameter;
    use pipesync_core::domain::pipeline_config::PipelineConfigSpec;
    use pipesync_core::memory::{EngineEvent, FailPoint, InMemoryControlPlane, InMemoryEngine};

    struct Fixture {
        engine: Arc<InMemoryEngine>,
        control_plane: Arc<InMemoryControlPlane>,
        actions: Arc<ActionCorrelationStore>,
        lifecycle: RunLifecycleManager,
    }

    fn fixture() -> Fixture {
        let engine = Arc::new(InMemoryEngine::new());
        engine.add_folder("ns");
        engine.add_job("ns/ns-demo", Some("1"));

        let control_plane = Arc::new(InMemoryControlPlane::new());
        let mut meta = ObjectMeta::new("ns", "demo");
        meta.resource_version = Some("1".to_string());
        control_plane.put_pipeline_config(PipelineConfig::new(meta, PipelineConfigSpec::default()));

        let privilege: Arc<dyn PrivilegeProvider> = Arc::new(SystemPrivilege::new());
        let deletes = Arc::new(DeleteInProgress::new());
        let cache = Arc::new(JobCache::new(engine.clone(), privilege.clone(), deletes.clone()));
        let projection = Arc::new(JobProjectionClient::new(
            engine.clone(),
            privilege.clone(),
            cache,
            deletes,
            Arc::new(XmlJobTranslator::new()),
        ));
        let actions = Arc::new(ActionCorrelationStore::new());
        let lifecycle = RunLifecycleManager::new(
            control_plane.clone(),
            engine.clone(),
            privilege,
            projection,
            actions.clone(),
            DEFAULT_KILL_GRACE_PERIOD,
        );

        Fixture {
            engine,
            control_plane,
            actions,
            lifecycle,
        }
    }

    fn run_id(name: &str) -> NamespaceName {
        NamespaceName::new("ns", name)
    }

    fn cause(name: &str) -> Option<PipelineCause> {
        Some(PipelineCause::new("ns", name))
    }

    fn killed(engine: &InMemoryEngine) -> bool {
        engine
            .events()
            .iter()
            .any(|event| matches!(event, EngineEvent::RunKilled { .. }))
    }

    #[tokio::test]
    async fn test_find_run_exact_match() {
        let f = fixture();
        f.engine
            .add_run("ns/ns-demo", RunState::Completed, cause("demo-00011"));
        let number = f
            .engine
            .add_run("ns/ns-demo", RunState::Running, cause("demo-00001"));

        let run = f.lifecycle.find_run(&run_id("demo-00001")).await.unwrap().unwrap();
        assert_eq!(run.number, number);
        assert!(f.lifecycle.find_run(&run_id("demo-00002")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_run_without_config() {
        let f = fixture();
        let err = f.lifecycle.find_run(&run_id("other-00001")).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));

        let err = f.lifecycle.find_run(&run_id("nosuffix")).await.unwrap_err();
        assert!(matches!(err, SyncError::NameFormat(_)));
    }

    #[tokio::test]
    async fn test_cancel_queued_picks_matching_entry() {
        let f = fixture();
        let unrelated = f
            .engine
            .enqueue("ns/ns-other", vec![PipelineCause::new("ns", "other-00001")]);
        let same_name = f
            .engine
            .enqueue("ns2/ns2-demo", vec![PipelineCause::new("ns2", "demo-00001")]);
        let target = f.engine.enqueue(
            "ns/ns-demo",
            vec![
                PipelineCause::new("ns", "unrelated-00009"),
                PipelineCause::new("ns", "demo-00001"),
            ],
        );

        assert!(f.lifecycle.cancel_queued(&run_id("demo-00001")).await);
        assert_eq!(f.engine.events(), vec![EngineEvent::QueueItemCancelled(target)]);
        assert_eq!(f.engine.queue_len(), 2);
        assert_ne!(target, unrelated);
        assert_ne!(target, same_name);

        assert!(!f.lifecycle.cancel_queued(&run_id("demo-00001")).await);
    }

    #[tokio::test]
    async fn test_cancel_queued_reports_failure() {
        let f = fixture();
        let id = f
            .engine
            .enqueue("ns/ns-demo", vec![PipelineCause::new("ns", "demo-00001")]);
        f.engine.pin_queue_item(id);
        assert!(!f.lifecycle.cancel_queued(&run_id("demo-00001")).await);

        f.engine.fail_on(FailPoint::QueueItems);
        assert!(!f.lifecycle.cancel_queued(&run_id("demo-00001")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_run_kill_observes_completion() {
        let f = fixture();
        let number = f
            .engine
            .add_run("ns/ns-demo", RunState::Queued, cause("demo-00001"));
        let identity = run_id("demo-00001");

        assert!(f.lifecycle.stop_run(&identity).await.unwrap());
        assert_eq!(
            f.engine.events(),
            vec![EngineEvent::RunTerminated {
                job: "ns/ns-demo".into(),
                number
            }]
        );
        assert_eq!(f.lifecycle.phase(&identity).await.unwrap(), RunPhase::Stopping);

        tokio::time::sleep(Duration::from_secs(2)).await;
        f.engine.set_run_state("ns/ns-demo", number, RunState::Completed);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!killed(&f.engine));
        assert!(!f.lifecycle.is_stopping(&identity));
        assert_eq!(f.lifecycle.phase(&identity).await.unwrap(), RunPhase::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_run_kills_after_grace_period() {
        let f = fixture();
        let number = f
            .engine
            .add_run("ns/ns-demo", RunState::Running, cause("demo-00001"));
        let identity = run_id("demo-00001");

        assert!(f.lifecycle.stop_run(&identity).await.unwrap());
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!killed(&f.engine));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            f.engine.events().last(),
            Some(&EngineEvent::RunKilled {
                job: "ns/ns-demo".into(),
                number
            })
        );
        assert!(!f.lifecycle.is_stopping(&identity));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_completed_cancels_kill() {
        let f = fixture();
        f.engine
            .add_run("ns/ns-demo", RunState::Running, cause("demo-00001"));
        let identity = run_id("demo-00001");

        f.lifecycle.stop_run(&identity).await.unwrap();
        assert!(f.lifecycle.run_completed(&identity));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!killed(&f.engine));
        assert!(!f.lifecycle.run_completed(&identity));
    }

    #[tokio::test]
    async fn test_cancel_nothing_is_not_found() {
        let f = fixture();
        f.engine
            .add_run("ns/ns-demo", RunState::Completed, cause("demo-00001"));

        let err = f.lifecycle.cancel(&run_id("demo-00001")).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
        assert_eq!(f.engine.mutations(), 0);
    }

    #[tokio::test]
    async fn test_delete_pipeline_removes_only_its_run() {
        let f = fixture();
        let other = f
            .engine
            .add_run("ns/ns-demo", RunState::Completed, cause("demo-00002"));
        let mine = f
            .engine
            .add_run("ns/ns-demo", RunState::Completed, cause("demo-00001"));

        assert!(f.lifecycle.delete_pipeline(&run_id("demo-00001")).await.unwrap());
        assert_eq!(
            f.engine.events(),
            vec![EngineEvent::RunDeleted {
                job: "ns/ns-demo".into(),
                number: mine
            }]
        );
        assert!(f.lifecycle.find_run(&run_id("demo-00002")).await.unwrap().is_some());
        assert_ne!(other, mine);

        assert!(!f.lifecycle.delete_run(&run_id("demo-00001")).await.unwrap());
    }

    #[tokio::test]
    async fn test_trigger_stores_actions() {
        let f = fixture();
        let mut pipeline = Pipeline::new(ObjectMeta::new("ns", "demo-00001"), "demo");
        pipeline.spec.parameters.push(PipelineParameter {
            name: "BRANCH".to_string(),
            kind: "string".to_string(),
            value: "main".to_string(),
        });
        let config = f.lifecycle.parent_config(&run_id("demo-00001")).await.unwrap();

        let build_id = f.lifecycle.trigger(&pipeline, &config).await.unwrap();
        assert_eq!(f.actions.len(), 1);
        assert_eq!(f.lifecycle.phase(&run_id("demo-00001")).await.unwrap(), RunPhase::Queued);

        let (parameters, cause) = f.lifecycle.on_run_started(&build_id).unwrap();
        assert_eq!(parameters[0].value, "main");
        assert_eq!(cause.name, "demo-00001");
        assert!(f.lifecycle.on_run_started(&build_id).is_none());
    }

    #[tokio::test]
    async fn test_repeated_trigger_reuses_pending_build() {
        let f = fixture();
        let pipeline = Pipeline::new(ObjectMeta::new("ns", "demo-00001"), "demo");
        let config = f.lifecycle.parent_config(&run_id("demo-00001")).await.unwrap();

        let first = f.lifecycle.trigger(&pipeline, &config).await.unwrap();
        let second = f.lifecycle.trigger(&pipeline, &config).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.engine.queue_len(), 1);
        assert_eq!(f.engine.mutations(), 1);

        // once the run is observed the Pipeline may be triggered again
        let id = f.engine.queue_items().await.unwrap()[0].id;
        f.engine.start_queued(id);
        assert_eq!(f.lifecycle.phase(&run_id("demo-00001")).await.unwrap(), RunPhase::Running);
        assert!(f.actions.is_empty());
        assert_ne!(f.lifecycle.trigger(&pipeline, &config).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_completed_run_drops_pending_kill_and_actions() {
        let f = fixture();
        let pipeline = Pipeline::new(ObjectMeta::new("ns", "demo-00001"), "demo");
        let identity = run_id("demo-00001");
        let config = f.lifecycle.parent_config(&identity).await.unwrap();
        f.lifecycle.trigger(&pipeline, &config).await.unwrap();

        let id = f.engine.queue_items().await.unwrap()[0].id;
        let (number, _) = f.engine.start_queued(id).unwrap();
        assert!(f.lifecycle.stop_run(&identity).await.unwrap());
        f.engine.set_run_state("ns/ns-demo", number, RunState::Completed);

        assert_eq!(f.lifecycle.phase(&identity).await.unwrap(), RunPhase::Completed);
        assert!(!f.lifecycle.is_stopping(&identity));
        assert!(f.actions.is_empty());
    }

    #[tokio::test]
    async fn test_delete_pipeline_drops_unstarted_actions() {
        let f = fixture();
        let pipeline = Pipeline::new(ObjectMeta::new("ns", "demo-00001"), "demo");
        let identity = run_id("demo-00001");
        let config = f.lifecycle.parent_config(&identity).await.unwrap();
        f.lifecycle.trigger(&pipeline, &config).await.unwrap();

        assert!(!f.lifecycle.delete_pipeline(&identity).await.unwrap());
        assert_eq!(f.engine.queue_len(), 0);
        assert!(f.actions.is_empty());
    }

    #[tokio::test]
    async fn test_run_lookup_sees_branches_added_after_caching() {
        let f = fixture();
        f.engine.add_multi_branch("ns/ns-mb", Some("1"));
        f.engine.add_branch("ns/ns-mb", "a");
        let mut meta = ObjectMeta::new("ns", "mb");
        meta.resource_version = Some("1".to_string());
        f.control_plane
            .put_pipeline_config(PipelineConfig::new(meta, PipelineConfigSpec::default()));
        let identity = run_id("mb-00001");

        // caches the project while it only has branch `a`
        assert!(f.lifecycle.find_run(&identity).await.unwrap().is_none());

        f.engine.add_branch("ns/ns-mb", "b");
        let number = f
            .engine
            .add_run("ns/ns-mb/b", RunState::Running, cause("mb-00001"));

        let run = f.lifecycle.find_run(&identity).await.unwrap().unwrap();
        assert_eq!((run.job.as_str(), run.number), ("ns/ns-mb/b", number));
        f.lifecycle.cancel(&identity).await.unwrap();
        assert!(f.lifecycle.is_stopping(&identity));
    }

    #[tokio::test]
    async fn test_find_run_skips_vanished_branch() {
        let f = fixture();
        f.engine.add_multi_branch("ns/ns-mb", Some("1"));
        f.engine.add_branch("ns/ns-mb", "a");
        f.engine.add_branch("ns/ns-mb", "b");
        let mut meta = ObjectMeta::new("ns", "mb");
        meta.resource_version = Some("1".to_string());
        f.control_plane
            .put_pipeline_config(PipelineConfig::new(meta, PipelineConfigSpec::default()));
        f.engine
            .add_run("ns/ns-mb/b", RunState::Running, cause("mb-00001"));
        f.engine.hide("ns/ns-mb/a");

        let run = f.lifecycle.find_run(&run_id("mb-00001")).await.unwrap().unwrap();
        assert_eq!(run.job, "ns/ns-mb/b");

        f.engine.fail_on(FailPoint::ListBuilds);
        assert!(f.lifecycle.find_run(&run_id("mb-00001")).await.is_err());
    }

    #[tokio::test]
    async fn test_trigger_failure_discards_actions() {
        let f = fixture();
        f.engine.fail_on(FailPoint::ScheduleBuild);
        let pipeline = Pipeline::new(ObjectMeta::new("ns", "demo-00001"), "demo");
        let config = f.lifecycle.parent_config(&run_id("demo-00001")).await.unwrap();

        assert!(f.lifecycle.trigger(&pipeline, &config).await.is_err());
        assert!(f.actions.is_empty());
    }
}
