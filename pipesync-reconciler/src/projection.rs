//! Job projection client
//!
//! Creates, updates and deletes the engine job that mirrors a PipelineConfig,
//! and answers whether that job is in sync with the config.

use pipesync_core::domain::job::{Item, JobHandle, MultiBranchProject, WorkflowJob};
use pipesync_core::domain::pipeline::Pipeline;
use pipesync_core::domain::pipeline_config::PipelineConfig;
use pipesync_core::{ExecutionEngine, NamespaceName, Result, SyncError, naming};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{DeleteInProgress, JobCache};
use crate::folder::FolderManager;
use crate::privilege::{PrivilegeProvider, with_privilege};
use crate::translate::JobTranslator;

pub struct JobProjectionClient {
    engine: Arc<dyn ExecutionEngine>,
    privilege: Arc<dyn PrivilegeProvider>,
    cache: Arc<JobCache>,
    deletes: Arc<DeleteInProgress>,
    folders: FolderManager,
    translator: Arc<dyn JobTranslator>,
}

impl JobProjectionClient {
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        privilege: Arc<dyn PrivilegeProvider>,
        cache: Arc<JobCache>,
        deletes: Arc<DeleteInProgress>,
        translator: Arc<dyn JobTranslator>,
    ) -> Self {
        let folders = FolderManager::new(engine.clone(), privilege.clone());
        Self {
            engine,
            privilege,
            cache,
            deletes,
            folders,
            translator,
        }
    }

    /// Creates or updates the job for `config` and returns the fresh handle
    ///
    /// A job whose stamp already matches the config is left untouched.
    pub async fn upsert(&self, config: &PipelineConfig) -> Result<JobHandle> {
        let identity = config.metadata.namespace_name();
        let full_name = naming::job_full_name(config);
        let version = config.metadata.resource_version();

        let existing = match self.cache.get_at(&identity, &full_name).await? {
            // never trust a cached stamp, re-read before skipping the update
            Some(handle) if handle.resource_version() == Some(version) => {
                self.cache.resolve(&identity, &full_name).await?
            }
            other => other,
        };
        if let Some(handle) = &existing {
            if handle.resource_version() == Some(version) {
                debug!("Job {} already at version {}", full_name, version);
                return Ok(handle.clone());
            }
        }

        let definition = self.translator.translate(config)?;

        match existing {
            None => {
                if self.deletes.contains(&identity) {
                    return Err(SyncError::Projection(format!(
                        "job for {} is being deleted",
                        identity
                    )));
                }
                self.check_path_free(&full_name).await?;
                self.folders
                    .ensure_job_parent(&definition.parent, &identity.namespace)
                    .await?;
                with_privilege(&*self.privilege, self.engine.create_job(&definition)).await?;
                info!("Created job {} for {}", full_name, identity);
            }
            Some(handle) => {
                if handle.kind() != definition.kind {
                    return Err(SyncError::Structural(format!(
                        "job {} is a {:?} but {} describes a {:?}",
                        handle.full_name(),
                        handle.kind(),
                        identity,
                        definition.kind
                    )));
                }
                with_privilege(
                    &*self.privilege,
                    self.engine.update_job(handle.full_name(), &definition),
                )
                .await?;
                info!(
                    "Updated job {} for {} to version {}",
                    full_name, identity, version
                );
            }
        }

        self.cache
            .resolve(&identity, &full_name)
            .await?
            .ok_or_else(|| {
                SyncError::Projection(format!(
                    "job {} was written but cannot be found",
                    full_name
                ))
            })
    }

    /// Something other than a job sitting at the target path is a structural error
    async fn check_path_free(&self, full_name: &str) -> Result<()> {
        let item = with_privilege(&*self.privilege, self.engine.get_item(full_name)).await?;
        match item {
            Some(item @ (Item::Folder(_) | Item::Other { .. })) => Err(SyncError::Structural(
                format!("'{}' exists but is a {}", full_name, item.class_name()),
            )),
            _ => Ok(()),
        }
    }

    /// Deletes the job projected for `identity`
    ///
    /// Returns `false` when there is nothing to delete or the object at the
    /// job path is not a pipeline job.
    pub async fn delete(&self, identity: &NamespaceName) -> Result<bool> {
        let _guard = self.deletes.mark(identity.clone());

        let full_name = match self.cache.remove(identity) {
            Some(handle) => handle.full_name().to_string(),
            None => {
                let path = naming::job_path(&identity.namespace, &identity.name);
                let item = with_privilege(&*self.privilege, self.engine.get_item(&path)).await?;
                match item {
                    Some(Item::Job(handle)) => handle.full_name().to_string(),
                    Some(other) => {
                        warn!(
                            "Unable to delete job for {}, expected a pipeline job but found {}",
                            identity,
                            other.class_name()
                        );
                        return Ok(false);
                    }
                    None => {
                        warn!("Unable to delete job for {}, no job found", identity);
                        return Ok(false);
                    }
                }
            }
        };

        match with_privilege(&*self.privilege, self.engine.delete_item(&full_name)).await {
            Ok(()) => {
                info!("Deleted job {} for {}", full_name, identity);
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                debug!("Job {} was already gone", full_name);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the engine job carries the config's current resource version
    pub async fn has_synced_job(&self, config: &PipelineConfig) -> Result<bool> {
        let identity = config.metadata.namespace_name();
        let full_name = naming::job_full_name(config);
        let handle = self.cache.resolve(&identity, &full_name).await?;

        Ok(handle.is_some_and(|handle| {
            handle.resource_version() == Some(config.metadata.resource_version())
        }))
    }

    /// Handle of the job projected for `config`, honoring the path override
    pub async fn resolve_job(&self, config: &PipelineConfig) -> Result<Option<JobHandle>> {
        let identity = config.metadata.namespace_name();
        self.cache
            .get_at(&identity, &naming::job_full_name(config))
            .await
    }

    /// Current handle of the job projected for `config`, read from the engine
    ///
    /// Run lookups go through here so a multi-branch project's branch list is
    /// never older than the call.
    pub async fn refresh_job(&self, config: &PipelineConfig) -> Result<Option<JobHandle>> {
        let identity = config.metadata.namespace_name();
        self.cache
            .resolve(&identity, &naming::job_full_name(config))
            .await
    }

    pub async fn get_job(&self, identity: &NamespaceName) -> Result<Option<WorkflowJob>> {
        let handle = self.cache.get(identity).await?;
        Ok(handle.and_then(|handle| handle.as_job().cloned()))
    }

    pub async fn get_multi_branch_project(
        &self,
        identity: &NamespaceName,
    ) -> Result<Option<MultiBranchProject>> {
        let handle = self.cache.get(identity).await?;
        Ok(handle.and_then(|handle| handle.as_multi_branch().cloned()))
    }

    /// Workflow job a Pipeline runs in
    ///
    /// For a multi-branch project this is the branch named by the Pipeline's
    /// annotation; a branch missing from the cached snapshot triggers a fresh
    /// lookup.
    pub async fn get_job_for_pipeline(
        &self,
        pipeline: &Pipeline,
        config: &PipelineConfig,
    ) -> Result<Option<WorkflowJob>> {
        let Some(handle) = self.resolve_job(config).await? else {
            return Ok(None);
        };

        match handle {
            JobHandle::Job(job) => Ok(Some(job)),
            JobHandle::MultiBranch(project) => {
                let Some(branch) = pipeline.multi_branch_name() else {
                    debug!(
                        "Pipeline {} has no branch annotation for project {}",
                        pipeline.metadata.namespace_name(),
                        project.full_name
                    );
                    return Ok(None);
                };
                if let Some(job) = project.branches.get(branch) {
                    return Ok(Some(job.clone()));
                }

                let fresh = self
                    .cache
                    .resolve(&config.metadata.namespace_name(), &project.full_name)
                    .await?;
                Ok(fresh.and_then(|handle| handle.branch(branch).cloned()))
            }
        }
    }

    pub fn is_delete_in_progress(&self, identity: &NamespaceName) -> bool {
        self.deletes.contains(identity)
    }

    pub fn is_created_by_pipeline_config(&self, handle: &JobHandle) -> bool {
        handle.is_created_by_pipeline_config()
    }
}
