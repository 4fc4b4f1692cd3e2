//! # Bulk Store Engine
//!
//! Applies an incoming chunk to the repository state.
//!
//! Every call is planned against a read-only view of the store and produces
//! one `WriteBatch`; nothing is written until the plan is complete, so a
//! rejected chunk leaves the store untouched.
//!
//! ## REPLACE semantics
//!
//! - Each chunk instance overwrites the stored instance with the same id
//!   (all properties, containments, references and annotations).
//! - Stored instances not mentioned by the chunk are untouched, except for
//!   the list bookkeeping of moves and the removal of dropped subtrees.
//! - A node moved away from a parent outside the chunk is removed from that
//!   parent's lists.
//! - A node no longer listed by its chunk parent, and not listed again
//!   anywhere else in the chunk, is deleted with its subtree.

use crate::chunk::{SerializedChunk, SerializedClassifierInstance};
use crate::primitives::is_valid_id;
use crate::store::{InstanceStore, WriteBatch};
use crate::RepoError;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// STORE MODE
// =============================================================================

/// How an incoming chunk combines with stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreMode {
    /// Overwrite the full feature set of every instance in the chunk.
    #[default]
    Replace,
    /// Recognized but not implemented.
    Append,
}

impl StoreMode {
    /// Parse an optional textual mode; absent means `Replace`.
    pub fn parse(text: Option<&str>) -> Result<Self, RepoError> {
        text.map_or(Ok(Self::Replace), str::parse)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Append => "append",
        }
    }
}

impl FromStr for StoreMode {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            _ => Err(RepoError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// What a store or delete call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOutcome {
    /// Chunk instances that did not exist before.
    pub created: Vec<String>,
    /// Existing instances that were overwritten or had their lists adjusted.
    pub updated: Vec<String>,
    /// Instances deleted with a dropped subtree.
    pub removed: Vec<String>,
}

// =============================================================================
// PLANNING
// =============================================================================

/// Pending view over the store: staged instances shadow stored ones.
struct Plan<'s, S: InstanceStore + ?Sized> {
    store: &'s S,
    batch: WriteBatch,
}

impl<'s, S: InstanceStore + ?Sized> Plan<'s, S> {
    fn new(store: &'s S) -> Self {
        Self {
            store,
            batch: WriteBatch::new(),
        }
    }

    fn current(&self, id: &str) -> Result<Option<SerializedClassifierInstance>, RepoError> {
        if self.batch.is_removed(id) {
            return Ok(None);
        }
        match self.batch.staged(id) {
            Some(instance) => Ok(Some(instance.clone())),
            None => self.store.get_instance(id),
        }
    }

    /// Drop `id` from the lists of `owner`.
    fn detach(&mut self, owner: &str, id: &str) -> Result<(), RepoError> {
        if let Some(mut instance) = self.current(owner)? {
            if instance.contains(id) {
                instance.remove_contained(id);
                self.batch.upsert(instance);
            }
        }
        Ok(())
    }

    /// Stage removal of `root` and every stored descendant not in `keep`.
    fn remove_subtree(
        &mut self,
        root: &str,
        keep: &BTreeSet<&str>,
        removed: &mut Vec<String>,
    ) -> Result<(), RepoError> {
        let mut stack = vec![root.to_string()];
        while let Some(id) = stack.pop() {
            if keep.contains(id.as_str()) || self.batch.is_removed(&id) {
                continue;
            }
            if let Some(instance) = self.store.get_instance(&id)? {
                stack.extend(instance.contained_ids().map(str::to_string));
            }
            self.batch.remove(id.clone());
            removed.push(id);
        }
        Ok(())
    }
}

/// Reject chunks that cannot be applied.
fn validate<S: InstanceStore + ?Sized>(
    store: &S,
    chunk: &SerializedChunk,
) -> Result<(), RepoError> {
    chunk.validate().map_err(|e| match e {
        RepoError::DuplicateId(id) => RepoError::InvalidNodes(format!("duplicate id {id}")),
        other => other,
    })?;

    let mut listed: BTreeMap<&str, &str> = BTreeMap::new();
    for instance in chunk.instances() {
        if !is_valid_id(&instance.id) {
            return Err(RepoError::InvalidNodes(format!(
                "invalid node id {:?}",
                instance.id
            )));
        }
        for contained in instance.contained_ids() {
            if let Some(other) = listed.insert(contained, &instance.id) {
                return Err(RepoError::InvalidNodes(format!(
                    "{contained} is listed by both {other} and {}",
                    instance.id
                )));
            }
            match chunk.get_instance_by_id(contained) {
                Some(child) if child.parent_id.as_deref() != Some(instance.id.as_str()) => {
                    return Err(RepoError::InvalidNodes(format!(
                        "{contained} is listed by {} but declares parent {:?}",
                        instance.id, child.parent_id
                    )));
                }
                Some(_) => {}
                None if store.contains_instance(contained)? => {}
                None => {
                    return Err(RepoError::InvalidNodes(format!(
                        "{contained} listed by {} is neither in the chunk nor stored",
                        instance.id
                    )));
                }
            }
        }
    }

    for instance in chunk.instances() {
        let Some(parent_id) = instance.parent_id.as_deref() else {
            continue;
        };
        let parent_lists_it = match chunk.get_instance_by_id(parent_id) {
            Some(parent) => parent.contains(&instance.id),
            None => store
                .get_instance(parent_id)?
                .is_some_and(|parent| parent.contains(&instance.id)),
        };
        if !parent_lists_it {
            return Err(RepoError::InvalidNodes(format!(
                "{} declares parent {parent_id} which does not contain it",
                instance.id
            )));
        }
    }
    check_acyclic(store, chunk, &listed)
}

/// Parent of `id` once the chunk is applied: chunk instances keep their
/// declared parent, stored nodes listed by a chunk instance move under it,
/// every other stored node keeps its stored parent.
fn planned_parent<S: InstanceStore + ?Sized>(
    store: &S,
    chunk: &SerializedChunk,
    listed: &BTreeMap<&str, &str>,
    id: &str,
) -> Result<Option<String>, RepoError> {
    if let Some(instance) = chunk.get_instance_by_id(id) {
        return Ok(instance.parent_id.clone());
    }
    if let Some(lister) = listed.get(id) {
        return Ok(Some((*lister).to_string()));
    }
    Ok(store.get_instance(id)?.and_then(|i| i.parent_id))
}

/// Reject plans whose parent links form a cycle.
///
/// Walks the planned parent chain of every chunk instance and every node it
/// lists. Ids already proven to end at a root are not walked again.
fn check_acyclic<S: InstanceStore + ?Sized>(
    store: &S,
    chunk: &SerializedChunk,
    listed: &BTreeMap<&str, &str>,
) -> Result<(), RepoError> {
    let mut settled: BTreeSet<String> = BTreeSet::new();
    let starts = chunk
        .instances()
        .iter()
        .map(|i| i.id.as_str())
        .chain(listed.keys().copied());

    for start in starts {
        let mut path = Vec::new();
        let mut on_path = BTreeSet::new();
        let mut current = Some(start.to_string());
        while let Some(id) = current {
            if settled.contains(&id) {
                break;
            }
            if !on_path.insert(id.clone()) {
                return Err(RepoError::InvalidNodes(format!(
                    "cyclic parent chain through {start}"
                )));
            }
            current = planned_parent(store, chunk, listed, &id)?;
            path.push(id);
        }
        settled.extend(path);
    }
    Ok(())
}

/// Compute the write batch for a store call without touching the store.
pub fn plan_store<S: InstanceStore + ?Sized>(
    store: &S,
    chunk: &SerializedChunk,
    mode: StoreMode,
) -> Result<(WriteBatch, StoreOutcome), RepoError> {
    if mode != StoreMode::Replace {
        return Err(RepoError::UnsupportedStoreMode(mode.to_string()));
    }
    validate(store, chunk)?;

    let mut plan = Plan::new(store);
    let mut outcome = StoreOutcome::default();
    let mut dropped: Vec<String> = Vec::new();

    for instance in chunk.instances() {
        let previous = store.get_instance(&instance.id)?;
        match &previous {
            None => outcome.created.push(instance.id.clone()),
            Some(_) => outcome.updated.push(instance.id.clone()),
        }

        // Moved away from a parent outside the chunk.
        if let Some(old_parent) = previous.as_ref().and_then(|p| p.parent_id.as_deref()) {
            if instance.parent_id.as_deref() != Some(old_parent) && !chunk.contains_id(old_parent)
            {
                plan.detach(old_parent, &instance.id)?;
            }
        }

        let before: BTreeSet<&str> = previous
            .as_ref()
            .map(|p| p.contained_ids().collect())
            .unwrap_or_default();
        let after: BTreeSet<&str> = instance.contained_ids().collect();

        // Stored nodes newly listed here move under this instance.
        for added in after.difference(&before) {
            if chunk.contains_id(added) {
                continue;
            }
            if let Some(mut moved) = plan.current(added)? {
                if let Some(old_parent) = moved.parent_id.clone() {
                    if old_parent != instance.id && !chunk.contains_id(&old_parent) {
                        plan.detach(&old_parent, added)?;
                    }
                }
                moved.parent_id = Some(instance.id.clone());
                plan.batch.upsert(moved);
            }
        }

        dropped.extend(before.difference(&after).map(|id| id.to_string()));
        plan.batch.upsert(instance.clone());
    }

    // Dropped nodes survive only if the chunk lists or contains them.
    let keep: BTreeSet<&str> = chunk
        .instances()
        .iter()
        .flat_map(|i| i.contained_ids().chain(std::iter::once(i.id.as_str())))
        .collect();
    for id in &dropped {
        plan.remove_subtree(id, &keep, &mut outcome.removed)?;
    }

    for staged in plan.batch.upserts() {
        if !chunk.contains_id(&staged.id) {
            outcome.updated.push(staged.id.clone());
        }
    }

    Ok((plan.batch, outcome))
}

/// Apply a chunk to the store.
pub fn store<S: InstanceStore + ?Sized>(
    target: &mut S,
    chunk: &SerializedChunk,
    mode: StoreMode,
) -> Result<StoreOutcome, RepoError> {
    let (batch, outcome) = plan_store(target, chunk, mode)?;
    target.commit(batch)?;
    tracing::debug!(
        mode = %mode,
        created = outcome.created.len(),
        updated = outcome.updated.len(),
        removed = outcome.removed.len(),
        "store"
    );
    Ok(outcome)
}

// =============================================================================
// DELETE
// =============================================================================

/// Compute the write batch deleting the listed nodes with their subtrees.
///
/// Returns the batch, the outcome, and the requested ids the store does not
/// know.
pub fn plan_delete<S: InstanceStore + ?Sized>(
    store: &S,
    ids: &[String],
) -> Result<(WriteBatch, StoreOutcome, Vec<String>), RepoError> {
    if ids.is_empty() {
        return Err(RepoError::InvalidNodeIds(
            "at least one node id must be given".to_string(),
        ));
    }

    let mut plan = Plan::new(store);
    let mut outcome = StoreOutcome::default();
    let mut unknown = Vec::new();
    let mut parents = Vec::new();
    let keep = BTreeSet::new();

    for id in ids {
        match store.get_instance(id)? {
            None => unknown.push(id.clone()),
            Some(instance) => {
                if let Some(parent) = instance.parent_id {
                    parents.push((parent, id.clone()));
                }
                plan.remove_subtree(id, &keep, &mut outcome.removed)?;
            }
        }
    }

    for (parent, id) in parents {
        if !plan.batch.is_removed(&parent) {
            plan.detach(&parent, &id)?;
            if !outcome.updated.contains(&parent) {
                outcome.updated.push(parent);
            }
        }
    }

    Ok((plan.batch, outcome, unknown))
}

/// Delete the listed nodes with their subtrees. Returns the outcome and the
/// unknown ids.
pub fn delete<S: InstanceStore + ?Sized>(
    target: &mut S,
    ids: &[String],
) -> Result<(StoreOutcome, Vec<String>), RepoError> {
    let (batch, outcome, unknown) = plan_delete(target, ids)?;
    target.commit(batch)?;
    tracing::debug!(
        removed = outcome.removed.len(),
        unknown = unknown.len(),
        "delete"
    );
    Ok((outcome, unknown))
}

// =============================================================================
// TESTS
// =============================================================================
