//! Execution-engine seam
//!
//! Everything the reconciler needs from the engine, expressed over the domain
//! model. The engine is not transactional: each call is an independent
//! mutation and callers must re-read to confirm effects.

use async_trait::async_trait;

use crate::domain::job::{FolderDefinition, Item, JobDefinition};
use crate::domain::run::{BuildRequest, QueueItem, RunRecord, RunState};
use crate::error::EngineError;

/// Operations on the execution engine's object model
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Looks up an item by full name (`folder/job`)
    ///
    /// Returns `Ok(None)` when nothing exists at that path.
    async fn get_item(&self, full_name: &str) -> Result<Option<Item>, EngineError>;

    /// Creates a top-level folder, description and managed tag included, as one
    /// bulk change
    async fn create_folder(&self, folder: &FolderDefinition) -> Result<(), EngineError>;

    /// Tags an existing folder as system-managed (idempotent)
    async fn tag_folder(&self, full_name: &str) -> Result<(), EngineError>;

    /// Creates a job inside `definition.parent` from its serialized definition
    async fn create_job(&self, definition: &JobDefinition) -> Result<(), EngineError>;

    /// Replaces an existing job's definition as a whole
    async fn update_job(
        &self,
        full_name: &str,
        definition: &JobDefinition,
    ) -> Result<(), EngineError>;

    /// Deletes an item and everything below it
    async fn delete_item(&self, full_name: &str) -> Result<(), EngineError>;

    /// Build history of a single workflow job, newest first
    async fn list_builds(&self, job: &str) -> Result<Vec<RunRecord>, EngineError>;

    /// Current state of one run, `None` if the run no longer exists
    async fn run_state(&self, job: &str, number: u64) -> Result<Option<RunState>, EngineError>;

    /// Engine-wide pending-build queue
    async fn queue_items(&self) -> Result<Vec<QueueItem>, EngineError>;

    /// Cancels a queue entry; `Ok(false)` if it already left the queue
    async fn cancel_queue_item(&self, id: u64) -> Result<bool, EngineError>;

    /// Graceful terminate signal
    async fn terminate_run(&self, job: &str, number: u64) -> Result<(), EngineError>;

    /// Forced kill signal
    async fn kill_run(&self, job: &str, number: u64) -> Result<(), EngineError>;

    async fn delete_run(&self, job: &str, number: u64) -> Result<(), EngineError>;

    /// Schedules a new run of `job`
    async fn schedule_build(&self, job: &str, request: &BuildRequest) -> Result<(), EngineError>;
}
