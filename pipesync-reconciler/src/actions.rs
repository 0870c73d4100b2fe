//! Action correlation store
//!
//! When a Pipeline triggers a build, its parameters and cause are stored
//! under a provisional build id until the engine reports the run as started.
//! Each entry is consumed exactly once; if scheduling fails the caller
//! discards it.

use dashmap::DashMap;
use pipesync_core::NamespaceName;
use pipesync_core::domain::run::{BuildParameter, PipelineCause};

/// Transient build id → (parameters, cause) mapping
#[derive(Debug, Default)]
pub struct ActionCorrelationStore {
    parameters: DashMap<String, Vec<BuildParameter>>,
    causes: DashMap<String, PipelineCause>,
}

impl ActionCorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_parameters(&self, build_id: &str, parameters: Vec<BuildParameter>) {
        self.parameters.insert(build_id.to_string(), parameters);
    }

    pub fn take_parameters(&self, build_id: &str) -> Option<Vec<BuildParameter>> {
        self.parameters.remove(build_id).map(|(_, parameters)| parameters)
    }

    pub fn put_cause(&self, build_id: &str, cause: PipelineCause) {
        self.causes.insert(build_id.to_string(), cause);
    }

    pub fn take_cause(&self, build_id: &str) -> Option<PipelineCause> {
        self.causes.remove(build_id).map(|(_, cause)| cause)
    }

    /// Stores both entries for one build
    pub fn put(&self, build_id: &str, parameters: Vec<BuildParameter>, cause: PipelineCause) {
        self.put_parameters(build_id, parameters);
        self.put_cause(build_id, cause);
    }

    /// Consumes both entries; `None` unless a cause was stored
    pub fn take(&self, build_id: &str) -> Option<(Vec<BuildParameter>, PipelineCause)> {
        let parameters = self.take_parameters(build_id).unwrap_or_default();
        self.take_cause(build_id).map(|cause| (parameters, cause))
    }

    /// Drops whatever is stored under `build_id`
    pub fn discard(&self, build_id: &str) {
        self.parameters.remove(build_id);
        self.causes.remove(build_id);
    }

    /// Build id of the pending trigger stored for the Pipeline `identity`
    pub fn build_id_for(&self, identity: &NamespaceName) -> Option<String> {
        self.causes
            .iter()
            .find(|entry| entry.value().matches(identity))
            .map(|entry| entry.key().clone())
    }

    /// Drops every entry stored for the Pipeline `identity`; returns how many
    /// builds were dropped
    pub fn discard_for(&self, identity: &NamespaceName) -> usize {
        let build_ids: Vec<String> = self
            .causes
            .iter()
            .filter(|entry| entry.value().matches(identity))
            .map(|entry| entry.key().clone())
            .collect();
        for build_id in &build_ids {
            self.discard(build_id);
        }
        build_ids.len()
    }

    /// Number of builds with at least one pending entry
    pub fn len(&self) -> usize {
        let orphans = self
            .parameters
            .iter()
            .filter(|entry| !self.causes.contains_key(entry.key()))
            .count();
        self.causes.len() + orphans
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.causes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parameter(name: &str, value: &str) -> BuildParameter {
        BuildParameter {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_entries_are_consumed_once() {
        let store = ActionCorrelationStore::new();
        store.put(
            "b-1",
            vec![parameter("BRANCH", "main")],
            PipelineCause::new("ns", "demo-00001"),
        );
        assert_eq!(store.len(), 1);

        let (parameters, cause) = store.take("b-1").unwrap();
        assert_eq!(parameters[0].value, "main");
        assert_eq!(cause.name, "demo-00001");

        assert!(store.take("b-1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_maps_are_independent() {
        let store = ActionCorrelationStore::new();
        store.put_parameters("b-1", vec![parameter("A", "1")]);
        store.put_cause("b-2", PipelineCause::new("ns", "other-00002"));
        assert_eq!(store.len(), 2);

        assert!(store.take_cause("b-1").is_none());
        assert_eq!(store.take_parameters("b-1").unwrap().len(), 1);
        assert!(store.take_parameters("b-2").is_none());
        assert!(store.take_cause("b-2").is_some());
    }

    #[test]
    fn test_discard_removes_both() {
        let store = ActionCorrelationStore::new();
        store.put("b-1", vec![], PipelineCause::new("ns", "demo-00001"));
        store.discard("b-1");
        assert!(store.is_empty());
        assert!(store.take("b-1").is_none());
    }

    #[test]
    fn test_lookup_and_discard_by_pipeline() {
        let store = ActionCorrelationStore::new();
        store.put("b-1", vec![], PipelineCause::new("ns", "demo-00001"));
        store.put("b-2", vec![parameter("A", "1")], PipelineCause::new("ns", "demo-00001"));
        store.put("b-3", vec![], PipelineCause::new("ns2", "demo-00001"));

        let mine = NamespaceName::new("ns", "demo-00001");
        let found = store.build_id_for(&mine).unwrap();
        assert!(found == "b-1" || found == "b-2");
        assert!(store.build_id_for(&NamespaceName::new("ns", "demo-00002")).is_none());

        assert_eq!(store.discard_for(&mine), 2);
        assert!(store.build_id_for(&mine).is_none());
        assert_eq!(store.len(), 1);
        assert!(store.take("b-3").is_some());
    }
}
