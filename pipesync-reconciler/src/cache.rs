//! Job cache and delete-in-progress tracking
//!
//! The cache maps a PipelineConfig identity to the last known engine handle.
//! It only saves lookups: drift detection always re-reads the engine.

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use pipesync_core::domain::job::{Item, JobHandle};
use pipesync_core::{ExecutionEngine, NamespaceName, Result, naming};
use std::sync::Arc;
use tracing::debug;

use crate::privilege::{PrivilegeProvider, with_privilege};

/// Identities whose engine job is currently being deleted
#[derive(Debug, Default)]
pub struct DeleteInProgress {
    identities: DashSet<NamespaceName>,
}

impl DeleteInProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, identity: &NamespaceName) -> bool {
        self.identities.contains(identity)
    }

    /// Marks `identity` until the returned guard is dropped
    pub fn mark(&self, identity: NamespaceName) -> DeleteGuard<'_> {
        self.identities.insert(identity.clone());
        DeleteGuard {
            set: self,
            identity,
        }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// Clears a delete-in-progress mark on every exit path
pub struct DeleteGuard<'a> {
    set: &'a DeleteInProgress,
    identity: NamespaceName,
}

impl Drop for DeleteGuard<'_> {
    fn drop(&mut self) {
        self.set.identities.remove(&self.identity);
    }
}

/// Concurrent identity → job handle cache, filled lazily
pub struct JobCache {
    entries: DashMap<NamespaceName, JobHandle>,
    engine: Arc<dyn ExecutionEngine>,
    privilege: Arc<dyn PrivilegeProvider>,
    deletes: Arc<DeleteInProgress>,
}

impl JobCache {
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        privilege: Arc<dyn PrivilegeProvider>,
        deletes: Arc<DeleteInProgress>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            engine,
            privilege,
            deletes,
        }
    }

    /// Returns the handle for `identity`, resolving `job_path` on a miss
    ///
    /// A resolved handle is cached unless the identity is being deleted.
    /// Objects at the path that are not jobs resolve to `None`.
    pub async fn get(&self, identity: &NamespaceName) -> Result<Option<JobHandle>> {
        let path = naming::job_path(&identity.namespace, &identity.name);
        self.get_at(identity, &path).await
    }

    /// Like [`JobCache::get`] for a job living at an explicit `full_name`
    pub async fn get_at(
        &self,
        identity: &NamespaceName,
        full_name: &str,
    ) -> Result<Option<JobHandle>> {
        if let Some(handle) = self.cached(identity) {
            if handle.full_name() == full_name {
                return Ok(Some(handle));
            }
        }

        self.resolve(identity, full_name).await
    }

    /// Reads `full_name` from the engine, bypassing the cache
    ///
    /// A found job refreshes the cached snapshot of the same object.
    pub async fn resolve(
        &self,
        identity: &NamespaceName,
        full_name: &str,
    ) -> Result<Option<JobHandle>> {
        let item = with_privilege(&*self.privilege, self.engine.get_item(full_name)).await?;

        match item {
            Some(Item::Job(handle)) => {
                if !self.deletes.contains(identity) {
                    self.refresh(identity.clone(), handle.clone());
                }
                Ok(Some(handle))
            }
            Some(other) => {
                debug!(
                    "'{}' resolves to a {}, not a pipeline job",
                    full_name,
                    other.class_name()
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Cached handle without touching the engine
    pub fn cached(&self, identity: &NamespaceName) -> Option<JobHandle> {
        self.entries.get(identity).map(|entry| entry.value().clone())
    }

    /// Inserts if absent; returns whether the handle was stored
    pub fn put(&self, identity: NamespaceName, handle: JobHandle) -> bool {
        match self.entries.entry(identity) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                debug!("Cached job {} for {}", handle.full_name(), slot.key());
                slot.insert(handle);
                true
            }
        }
    }

    /// Replaces the cached snapshot when it refers to the same engine object
    ///
    /// An absent entry is inserted; an entry for a different object is kept.
    pub fn refresh(&self, identity: NamespaceName, handle: JobHandle) -> bool {
        match self.entries.entry(identity) {
            Entry::Occupied(mut slot) => {
                if slot.get().full_name() != handle.full_name() {
                    return false;
                }
                slot.insert(handle);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    pub fn remove(&self, identity: &NamespaceName) -> Option<JobHandle> {
        self.entries.remove(identity).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privilege::SystemPrivilege;
    use pipesync_core::domain::job::WorkflowJob;
    use pipesync_core::memory::{FailPoint, InMemoryEngine};

    fn handle(full_name: &str, version: &str) -> JobHandle {
        JobHandle::Job(WorkflowJob {
            full_name: full_name.to_string(),
            display_name: full_name.to_string(),
            resource_version: Some(version.to_string()),
            disabled: false,
        })
    }

    fn cache_with(engine: Arc<InMemoryEngine>) -> (JobCache, Arc<DeleteInProgress>) {
        let deletes = Arc::new(DeleteInProgress::new());
        let cache = JobCache::new(engine, Arc::new(SystemPrivilege::new()), deletes.clone());
        (cache, deletes)
    }

    #[tokio::test]
    async fn test_miss_populates_cache() {
        let engine = Arc::new(InMemoryEngine::new());
        engine.add_folder("ns");
        engine.add_job("ns/ns-demo", Some("1"));
        let (cache, _) = cache_with(engine.clone());
        let identity = NamespaceName::new("ns", "demo");

        let found = cache.get(&identity).await.unwrap().unwrap();
        assert_eq!(found.full_name(), "ns/ns-demo");
        assert_eq!(cache.len(), 1);

        // Served from the cache once the engine can no longer answer
        engine.fail_on(FailPoint::GetItem);
        assert!(cache.get(&identity).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_miss_not_cached_while_deleting() {
        let engine = Arc::new(InMemoryEngine::new());
        engine.add_folder("ns");
        engine.add_job("ns/ns-demo", Some("1"));
        let (cache, deletes) = cache_with(engine);
        let identity = NamespaceName::new("ns", "demo");

        let _guard = deletes.mark(identity.clone());
        assert!(cache.get(&identity).await.unwrap().is_some());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_get_at_ignores_entry_for_other_path() {
        let engine = Arc::new(InMemoryEngine::new());
        engine.add_folder("ns");
        engine.add_folder("custom");
        engine.add_job("ns/ns-demo", Some("1"));
        engine.add_job("custom/demo", Some("2"));
        let (cache, _) = cache_with(engine);
        let identity = NamespaceName::new("ns", "demo");

        cache.get(&identity).await.unwrap();
        let moved = cache.get_at(&identity, "custom/demo").await.unwrap().unwrap();
        assert_eq!(moved.resource_version(), Some("2"));
        // first registration wins for a different object
        assert_eq!(cache.cached(&identity).unwrap().full_name(), "ns/ns-demo");
    }

    #[tokio::test]
    async fn test_non_job_item_resolves_to_none() {
        let engine = Arc::new(InMemoryEngine::new());
        engine.add_folder("ns");
        engine.add_other("ns/ns-demo", "hudson.model.FreeStyleProject");
        let (cache, _) = cache_with(engine);

        let found = cache.get(&NamespaceName::new("ns", "demo")).await.unwrap();
        assert!(found.is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_engine_failure_is_not_cached() {
        let engine = Arc::new(InMemoryEngine::new());
        engine.fail_on(FailPoint::GetItem);
        let (cache, _) = cache_with(engine);

        assert!(cache.get(&NamespaceName::new("ns", "demo")).await.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_is_insert_if_absent() {
        let (cache, _) = cache_with(Arc::new(InMemoryEngine::new()));
        let identity = NamespaceName::new("ns", "demo");

        assert!(cache.put(identity.clone(), handle("ns/ns-demo", "1")));
        assert!(!cache.put(identity.clone(), handle("ns/ns-demo", "2")));
        assert_eq!(cache.cached(&identity).unwrap().resource_version(), Some("1"));
    }

    #[test]
    fn test_refresh_only_same_object() {
        let (cache, _) = cache_with(Arc::new(InMemoryEngine::new()));
        let identity = NamespaceName::new("ns", "demo");
        cache.put(identity.clone(), handle("ns/ns-demo", "1"));

        assert!(cache.refresh(identity.clone(), handle("ns/ns-demo", "2")));
        assert_eq!(cache.cached(&identity).unwrap().resource_version(), Some("2"));

        assert!(!cache.refresh(identity.clone(), handle("custom/path", "3")));
        assert_eq!(cache.cached(&identity).unwrap().full_name(), "ns/ns-demo");
    }

    #[test]
    fn test_delete_guard_clears_mark() {
        let deletes = DeleteInProgress::new();
        let identity = NamespaceName::new("ns", "demo");
        {
            let _guard = deletes.mark(identity.clone());
            assert!(deletes.contains(&identity));
        }
        assert!(!deletes.contains(&identity));
        assert!(deletes.is_empty());
    }
}
