//! # Instance Store
//!
//! The storage seam behind the bulk engines.
//!
//! The engines never mutate a store directly: a store call computes a
//! `WriteBatch` and hands it to `InstanceStore::commit`, which must apply it
//! atomically. Reads return owned instances so disk-backed stores can
//! implement the trait without lending internal buffers.

use crate::chunk::SerializedClassifierInstance;
use crate::RepoError;
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// WRITE BATCH
// =============================================================================

/// All effects of one store or delete call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    upserts: BTreeMap<String, SerializedClassifierInstance>,
    removals: BTreeSet<String>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an instance. A later upsert of the same id wins; an upsert
    /// cancels a staged removal.
    pub fn upsert(&mut self, instance: SerializedClassifierInstance) {
        self.removals.remove(&instance.id);
        self.upserts.insert(instance.id.clone(), instance);
    }

    /// Stage a removal. A removal cancels a staged upsert.
    pub fn remove(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.upserts.remove(&id);
        self.removals.insert(id);
    }

    /// The staged version of an instance, if any.
    #[must_use]
    pub fn staged(&self, id: &str) -> Option<&SerializedClassifierInstance> {
        self.upserts.get(id)
    }

    #[must_use]
    pub fn is_removed(&self, id: &str) -> bool {
        self.removals.contains(id)
    }

    pub fn upserts(&self) -> impl Iterator<Item = &SerializedClassifierInstance> + '_ {
        self.upserts.values()
    }

    pub fn removals(&self) -> impl Iterator<Item = &str> + '_ {
        self.removals.iter().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Storage abstraction for classifier instances.
pub trait InstanceStore {
    /// Lookup an instance by id. Returns an owned copy.
    fn get_instance(&self, id: &str) -> Result<Option<SerializedClassifierInstance>, RepoError>;

    /// Check if an instance exists.
    fn contains_instance(&self, id: &str) -> Result<bool, RepoError> {
        Ok(self.get_instance(id)?.is_some())
    }

    /// Ids of all partition roots, in the order they became roots.
    fn list_partition_root_ids(&self) -> Result<Vec<String>, RepoError>;

    /// Ids of all stored instances, sorted.
    fn instance_ids(&self) -> Result<Vec<String>, RepoError>;

    /// Apply a batch atomically: either every upsert and removal becomes
    /// visible or none does.
    fn commit(&mut self, batch: WriteBatch) -> Result<(), RepoError>;

    /// Write instances as they are.
    fn put_instances(
        &mut self,
        instances: impl IntoIterator<Item = SerializedClassifierInstance>,
    ) -> Result<(), RepoError>
    where
        Self: Sized,
    {
        let mut batch = WriteBatch::new();
        for instance in instances {
            batch.upsert(instance);
        }
        self.commit(batch)
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// In-memory store keyed by id.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    instances: BTreeMap<String, SerializedClassifierInstance>,
    roots: Vec<String>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl InstanceStore for MemoryStore {
    fn get_instance(&self, id: &str) -> Result<Option<SerializedClassifierInstance>, RepoError> {
        Ok(self.instances.get(id).cloned())
    }

    fn contains_instance(&self, id: &str) -> Result<bool, RepoError> {
        Ok(self.instances.contains_key(id))
    }

    fn list_partition_root_ids(&self) -> Result<Vec<String>, RepoError> {
        Ok(self.roots.clone())
    }

    fn instance_ids(&self) -> Result<Vec<String>, RepoError> {
        Ok(self.instances.keys().cloned().collect())
    }

    fn commit(&mut self, batch: WriteBatch) -> Result<(), RepoError> {
        let WriteBatch { upserts, removals } = batch;
        for id in &removals {
            self.instances.remove(id);
        }
        self.roots.retain(|id| !removals.contains(id));
        for (id, instance) in upserts {
            let is_root = instance.parent_id.is_none();
            let listed = self.roots.iter().position(|r| *r == id);
            match (is_root, listed) {
                (true, None) => self.roots.push(id.clone()),
                (false, Some(pos)) => {
                    self.roots.remove(pos);
                }
                _ => {}
            }
            self.instances.insert(id, instance);
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetaPointer;

    fn instance(id: &str, parent: Option<&str>) -> SerializedClassifierInstance {
        let i = SerializedClassifierInstance::new(id, MetaPointer::new("library", "1", "Book"));
        match parent {
            Some(p) => i.with_parent(p),
            None => i,
        }
    }

    #[test]
    fn batch_upsert_and_remove_cancel_each_other() {
        let mut batch = WriteBatch::new();
        batch.upsert(instance("a", None));
        batch.remove("a");
        assert!(batch.staged("a").is_none());
        assert!(batch.is_removed("a"));

        batch.upsert(instance("a", None));
        assert!(!batch.is_removed("a"));
        assert!(batch.staged("a").is_some());
    }

    #[test]
    fn commit_tracks_partition_roots() {
        let mut store = MemoryStore::new();
        store
            .put_instances([instance("p1", None), instance("c", Some("p1")), instance("p2", None)])
            .expect("put");

        assert_eq!(
            store.list_partition_root_ids().expect("roots"),
            vec!["p1".to_string(), "p2".to_string()]
        );

        // Attaching p2 under p1 removes it from the roots.
        store.put_instances([instance("p2", Some("p1"))]).expect("put");
        assert_eq!(store.list_partition_root_ids().expect("roots"), vec!["p1".to_string()]);
    }

    #[test]
    fn commit_applies_removals() {
        let mut store = MemoryStore::new();
        store
            .put_instances([instance("p", None), instance("c", Some("p"))])
            .expect("put");

        let mut batch = WriteBatch::new();
        batch.remove("p");
        batch.remove("c");
        store.commit(batch).expect("commit");

        assert!(store.is_empty());
        assert!(store.list_partition_root_ids().expect("roots").is_empty());
        assert!(!store.contains_instance("c").expect("contains"));
    }

    #[test]
    fn reads_are_owned_copies() {
        let mut store = MemoryStore::new();
        store.put_instances([instance("a", None)]).expect("put");

        let mut copy = store.get_instance("a").expect("get").expect("present");
        copy.parent_id = Some("elsewhere".into());

        let stored = store.get_instance("a").expect("get").expect("present");
        assert_eq!(stored.parent_id, None);
    }
}
