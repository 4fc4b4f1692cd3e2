//! # Bulk Retrieval Engine
//!
//! Depth-bounded retrieval over partition containment trees.
//!
//! Traversal follows containment edges only. Annotations of an included
//! node are always included and inherit the owner's remaining budget, so
//! they never consume depth themselves.
//!
//! The result of a multi-id request is the union of the per-id traversals.
//! Every node is emitted once, at its first discovery. A node reached again
//! with a larger remaining budget is expanded again so its deeper
//! descendants are not lost.

use crate::chunk::{SerializedChunk, SerializedClassifierInstance};
use crate::store::InstanceStore;
use crate::RepoError;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

// =============================================================================
// DEPTH LIMIT
// =============================================================================

/// Maximum number of containment hops below a requested node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DepthLimit(Option<usize>);

impl DepthLimit {
    pub const UNBOUNDED: Self = Self(None);

    #[must_use]
    pub fn levels(levels: usize) -> Self {
        Self(Some(levels))
    }

    /// Parse a textual depth limit. `None` is unbounded; text must be a
    /// non-negative integer.
    pub fn parse(text: Option<&str>) -> Result<Self, RepoError> {
        match text {
            None => Ok(Self::UNBOUNDED),
            Some(raw) => raw
                .parse::<usize>()
                .map(Self::levels)
                .map_err(|_| RepoError::InvalidDepthLimit(raw.to_string())),
        }
    }

    #[must_use]
    pub fn get(self) -> Option<usize> {
        self.0
    }

    /// Budget of a child of a node with this budget, `None` when exhausted.
    fn descend(self) -> Option<Self> {
        match self.0 {
            None => Some(Self::UNBOUNDED),
            Some(0) => None,
            Some(n) => Some(Self(Some(n.saturating_sub(1)))),
        }
    }

    /// Strictly larger than `other`, unbounded being the largest.
    fn exceeds(self, other: Self) -> bool {
        match (self.0, other.0) {
            (None, Some(_)) => true,
            (Some(a), Some(b)) => a > b,
            _ => false,
        }
    }
}

impl From<Option<usize>> for DepthLimit {
    fn from(value: Option<usize>) -> Self {
        Self(value)
    }
}

impl fmt::Display for DepthLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(n) => write!(f, "{n}"),
            None => f.write_str("unbounded"),
        }
    }
}

// =============================================================================
// RETRIEVE
// =============================================================================

/// Result of a retrieve call: the chunk plus the requested ids the store
/// does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieval {
    pub chunk: SerializedChunk,
    pub unknown_ids: Vec<String>,
}

/// Retrieve the requested nodes and their descendants up to `depth`.
///
/// Fails with `InvalidNodeIds` on an empty request. Unknown ids are
/// reported in the result, not as errors.
pub fn retrieve<S: InstanceStore + ?Sized>(
    store: &S,
    ids: &[String],
    depth: DepthLimit,
    format_version: &str,
) -> Result<Retrieval, RepoError> {
    if ids.is_empty() {
        return Err(RepoError::InvalidNodeIds(
            "at least one node id must be requested".to_string(),
        ));
    }

    let mut unknown_ids = Vec::new();
    let mut seen_requests = BTreeSet::new();
    let mut queue = VecDeque::new();
    for id in ids {
        if !seen_requests.insert(id.as_str()) {
            continue;
        }
        if store.contains_instance(id)? {
            queue.push_back((id.clone(), depth));
        } else {
            unknown_ids.push(id.clone());
        }
    }

    // id -> largest budget it has been expanded with
    let mut budgets: HashMap<String, DepthLimit> = HashMap::new();
    let mut fetched: HashMap<String, SerializedClassifierInstance> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    while let Some((id, budget)) = queue.pop_front() {
        if let Some(previous) = budgets.get(&id) {
            if !budget.exceeds(*previous) {
                continue;
            }
        }
        budgets.insert(id.clone(), budget);

        if !fetched.contains_key(&id) {
            match store.get_instance(&id)? {
                Some(instance) => {
                    order.push(id.clone());
                    fetched.insert(id.clone(), instance);
                }
                None => {
                    tracing::warn!(id = %id, "contained node missing from store");
                    continue;
                }
            }
        }
        let Some(instance) = fetched.get(&id) else {
            continue;
        };

        for annotation in &instance.annotations {
            queue.push_back((annotation.clone(), budget));
        }
        if let Some(child_budget) = budget.descend() {
            for child in instance.children() {
                queue.push_back((child.to_string(), child_budget));
            }
        }
    }

    let mut chunk = SerializedChunk::new(format_version);
    for id in order {
        if let Some(instance) = fetched.remove(&id) {
            chunk.add_classifier_instance(instance)?;
        }
    }
    chunk.populate_used_languages();

    tracing::debug!(
        requested = ids.len(),
        depth = %depth,
        nodes = chunk.len(),
        unknown = unknown_ids.len(),
        "retrieve"
    );
    Ok(Retrieval { chunk, unknown_ids })
}

/// A chunk holding every partition root without its descendants.
pub fn partitions<S: InstanceStore + ?Sized>(
    store: &S,
    format_version: &str,
) -> Result<SerializedChunk, RepoError> {
    let mut chunk = SerializedChunk::new(format_version);
    for id in store.list_partition_root_ids()? {
        match store.get_instance(&id)? {
            Some(instance) => chunk.add_classifier_instance(instance)?,
            None => tracing::warn!(id = %id, "partition root missing from store"),
        }
    }
    chunk.populate_used_languages();
    tracing::debug!(partitions = chunk.len(), "partitions");
    Ok(chunk)
}

// =============================================================================
// TESTS
// =============================================================================
