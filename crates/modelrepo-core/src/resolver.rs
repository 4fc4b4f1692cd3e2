//! # Classifier Resolver / Instantiator
//!
//! Bidirectional bridge between a chunk and a `ModelGraph`.
//!
//! `to_graph` works in two passes: every instance is instantiated first,
//! then parent, containment, annotation and reference links are wired. Links
//! may therefore point at instances appearing later in the chunk.
//!
//! Dangling links are governed by three independent policies, one per link
//! dimension (parent, children, reference targets).

use crate::chunk::SerializedChunk;
use crate::graph::{Link, ModelGraph, Node, NodeIndex, ReferenceTarget};
use crate::language::{ClassifierKind, ClassifierRegistry};
use crate::primitives::{DEFAULT_FORMAT_VERSION, SUPPORTED_FORMAT_VERSIONS};
use crate::RepoError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

// =============================================================================
// POLICIES
// =============================================================================

/// What to do with a link whose target is neither in the chunk nor known
/// to exist elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableNodePolicy {
    /// Reject the chunk.
    #[default]
    Fail,
    /// Drop the link.
    Skip,
    /// Keep the link unresolved: the raw id for parents and children, a null
    /// target with its `resolveInfo` for references.
    #[serde(alias = "keep")]
    KeepUnresolved,
}

impl FromStr for UnavailableNodePolicy {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "skip" => Ok(Self::Skip),
            "keep" | "keep_unresolved" => Ok(Self::KeepUnresolved),
            other => Err(RepoError::ConfigError(format!(
                "unknown unavailable-node policy {other:?}"
            ))),
        }
    }
}

/// The three dangling-link policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverPolicies {
    pub parent: UnavailableNodePolicy,
    pub children: UnavailableNodePolicy,
    pub reference_target: UnavailableNodePolicy,
}

impl ResolverPolicies {
    /// Use the same policy for every dimension.
    #[must_use]
    pub fn all(policy: UnavailableNodePolicy) -> Self {
        Self {
            parent: policy,
            children: policy,
            reference_target: policy,
        }
    }
}

// =============================================================================
// INSTANTIATOR
// =============================================================================

/// Converts chunks into graphs and back, resolving classifiers through a
/// registry.
pub struct Instantiator<'r, R: ClassifierRegistry + ?Sized> {
    registry: &'r R,
    policies: ResolverPolicies,
    external_ids: BTreeSet<String>,
    format_version: String,
}

impl<'r, R: ClassifierRegistry + ?Sized> Instantiator<'r, R> {
    #[must_use]
    pub fn new(registry: &'r R) -> Self {
        Self {
            registry,
            policies: ResolverPolicies::default(),
            external_ids: BTreeSet::new(),
            format_version: DEFAULT_FORMAT_VERSION.to_string(),
        }
    }

    #[must_use]
    pub fn with_policies(mut self, policies: ResolverPolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Ids known to exist outside the chunk. Links to them are kept as
    /// `Link::External` and never reach the policies.
    #[must_use]
    pub fn with_external_ids(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.external_ids.extend(ids);
        self
    }

    /// Format version tag of chunks produced by `to_chunk`.
    #[must_use]
    pub fn with_format_version(mut self, version: impl Into<String>) -> Self {
        self.format_version = version.into();
        self
    }

    #[must_use]
    pub fn policies(&self) -> ResolverPolicies {
        self.policies
    }

    // =========================================================================
    // CHUNK -> GRAPH
    // =========================================================================

    /// Build a graph from a chunk. The roots of the result are
    /// `ModelGraph::roots()`.
    pub fn to_graph(&self, chunk: &SerializedChunk) -> Result<ModelGraph, RepoError> {
        if !SUPPORTED_FORMAT_VERSIONS.contains(&chunk.serialization_format_version.as_str()) {
            return Err(RepoError::DeserializationError(format!(
                "unsupported serialization format version {:?}",
                chunk.serialization_format_version
            )));
        }

        let mut graph = ModelGraph::new();

        // Pass 1: instantiate every node with its properties.
        for instance in chunk.instances() {
            let classifier = self
                .registry
                .resolve(&instance.classifier)
                .ok_or_else(|| RepoError::UnknownClassifier(instance.classifier.clone()))?;
            let mut node = Node::new(&instance.id, instance.classifier.clone(), classifier.kind);
            for entry in &instance.properties {
                let ty = classifier.property_type(&entry.property)?;
                let value = entry
                    .value
                    .as_deref()
                    .map(|raw| ty.decode(&entry.property, raw))
                    .transpose()?;
                node.set_property(entry.property.clone(), value);
            }
            graph.insert(node)?;
        }

        // Pass 2: wire links.
        for (pos, instance) in chunk.instances().iter().enumerate() {
            let index = NodeIndex(pos);
            let classifier = self
                .registry
                .resolve(&instance.classifier)
                .ok_or_else(|| RepoError::UnknownClassifier(instance.classifier.clone()))?;

            let parent = match &instance.parent_id {
                None => None,
                Some(parent_id) => self.resolve_parent(chunk, &graph, &instance.id, parent_id)?,
            };

            let mut containments = Vec::with_capacity(instance.containments.len());
            for value in &instance.containments {
                classifier.expect_containment(&value.containment)?;
                let mut links = Vec::with_capacity(value.children.len());
                for child in &value.children {
                    if let Some(link) = self.resolve_contained(
                        chunk,
                        &graph,
                        &instance.id,
                        child,
                        ClassifierKind::Concept,
                    )? {
                        links.push(link);
                    }
                }
                containments.push((value.containment.clone(), links));
            }

            let mut annotations = Vec::with_capacity(instance.annotations.len());
            for annotation in &instance.annotations {
                if let Some(link) = self.resolve_contained(
                    chunk,
                    &graph,
                    &instance.id,
                    annotation,
                    ClassifierKind::Annotation,
                )? {
                    annotations.push(link);
                }
            }

            let mut references = Vec::with_capacity(instance.references.len());
            for value in &instance.references {
                classifier.expect_reference(&value.reference)?;
                let mut targets = Vec::with_capacity(value.targets.len());
                for entry in &value.targets {
                    let target = match &entry.target {
                        None => Some(None),
                        Some(id) => self.resolve_reference_target(&graph, &instance.id, id)?,
                    };
                    if let Some(target) = target {
                        targets.push(ReferenceTarget {
                            target,
                            resolve_info: entry.resolve_info.clone(),
                        });
                    }
                }
                references.push((value.reference.clone(), targets));
            }

            if let Some(node) = graph.node_mut(index) {
                node.parent = parent;
                node.containments = containments;
                node.annotations = annotations;
                node.references = references;
            }
        }

        check_acyclic(&graph)?;
        tracing::debug!(nodes = graph.len(), roots = graph.roots().len(), "chunk instantiated");
        Ok(graph)
    }

    fn resolve_parent(
        &self,
        chunk: &SerializedChunk,
        graph: &ModelGraph,
        id: &str,
        parent_id: &str,
    ) -> Result<Option<Link>, RepoError> {
        if let Some(parent) = chunk.get_instance_by_id(parent_id) {
            if !parent.contains(id) {
                return Err(RepoError::InvalidNodes(format!(
                    "{id} lists {parent_id} as parent but {parent_id} does not contain it"
                )));
            }
            return Ok(graph.index_of(parent_id).map(Link::Node));
        }
        if self.external_ids.contains(parent_id) {
            return Ok(Some(Link::External(parent_id.to_string())));
        }
        match self.policies.parent {
            UnavailableNodePolicy::Fail => Err(RepoError::UnavailableParent {
                id: id.to_string(),
                parent: parent_id.to_string(),
            }),
            UnavailableNodePolicy::Skip => {
                tracing::warn!(id, parent = parent_id, "unavailable parent dropped");
                Ok(None)
            }
            UnavailableNodePolicy::KeepUnresolved => {
                tracing::warn!(id, parent = parent_id, "unavailable parent kept unresolved");
                Ok(Some(Link::External(parent_id.to_string())))
            }
        }
    }

    /// Resolve a child or annotation id. `Ok(None)` means the link is dropped.
    fn resolve_contained(
        &self,
        chunk: &SerializedChunk,
        graph: &ModelGraph,
        id: &str,
        contained_id: &str,
        expected: ClassifierKind,
    ) -> Result<Option<Link>, RepoError> {
        if let Some(contained) = chunk.get_instance_by_id(contained_id) {
            if contained.parent_id.as_deref() != Some(id) {
                return Err(RepoError::InvalidNodes(format!(
                    "{contained_id} is contained by {id} but declares parent {:?}",
                    contained.parent_id
                )));
            }
            let index = graph.index_of(contained_id);
            let kind = index.and_then(|ix| graph.node(ix)).map(|n| n.kind);
            if kind != Some(expected) {
                return Err(RepoError::InvalidNodes(format!(
                    "{contained_id} is not a valid {} of {id}",
                    match expected {
                        ClassifierKind::Concept => "child",
                        ClassifierKind::Annotation => "annotation",
                    }
                )));
            }
            return Ok(index.map(Link::Node));
        }
        if self.external_ids.contains(contained_id) {
            return Ok(Some(Link::External(contained_id.to_string())));
        }
        match self.policies.children {
            UnavailableNodePolicy::Fail => Err(RepoError::UnavailableChild {
                id: id.to_string(),
                child: contained_id.to_string(),
            }),
            UnavailableNodePolicy::Skip => {
                tracing::warn!(id, child = contained_id, "unavailable child dropped");
                Ok(None)
            }
            UnavailableNodePolicy::KeepUnresolved => {
                tracing::warn!(id, child = contained_id, "unavailable child kept unresolved");
                Ok(Some(Link::External(contained_id.to_string())))
            }
        }
    }

    /// Resolve a non-null reference target. The outer `None` drops the entry;
    /// `Some(None)` keeps it with a null target.
    fn resolve_reference_target(
        &self,
        graph: &ModelGraph,
        id: &str,
        target: &str,
    ) -> Result<Option<Option<Link>>, RepoError> {
        if let Some(index) = graph.index_of(target) {
            return Ok(Some(Some(Link::Node(index))));
        }
        if self.external_ids.contains(target) {
            return Ok(Some(Some(Link::External(target.to_string()))));
        }
        match self.policies.reference_target {
            UnavailableNodePolicy::Fail => Err(RepoError::UnavailableReferenceTarget {
                id: id.to_string(),
                target: target.to_string(),
            }),
            UnavailableNodePolicy::Skip => {
                tracing::warn!(id, target, "unavailable reference target dropped");
                Ok(None)
            }
            UnavailableNodePolicy::KeepUnresolved => {
                tracing::warn!(id, target, "unavailable reference target kept unresolved");
                Ok(Some(None))
            }
        }
    }

    // =========================================================================
    // GRAPH -> CHUNK
    // =========================================================================

    /// Flatten the subtrees below `roots` into a chunk.
    ///
    /// Every node reachable through containments and annotations is emitted
    /// once; the order of instances follows a pre-order walk.
    pub fn to_chunk(
        &self,
        graph: &ModelGraph,
        roots: &[NodeIndex],
    ) -> Result<SerializedChunk, RepoError> {
        let mut chunk = SerializedChunk::new(&self.format_version);
        let mut visited = BTreeSet::new();
        let mut stack: Vec<NodeIndex> = roots.iter().rev().copied().collect();

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let instance = graph.to_instance(current)?;
            if let Some(node) = graph.node(current) {
                let owned = node
                    .containments
                    .iter()
                    .flat_map(|(_, links)| links.iter())
                    .chain(node.annotations.iter());
                let mut next: Vec<NodeIndex> = owned
                    .filter_map(|link| match link {
                        Link::Node(ix) => Some(*ix),
                        Link::External(_) => None,
                    })
                    .collect();
                next.reverse();
                stack.extend(next);
            }
            chunk.add_classifier_instance(instance)?;
        }

        chunk.populate_used_languages();
        Ok(chunk)
    }

    /// Flatten the whole graph.
    pub fn graph_to_chunk(&self, graph: &ModelGraph) -> Result<SerializedChunk, RepoError> {
        self.to_chunk(graph, &graph.roots())
    }
}

/// Reject graphs whose parent links form a cycle.
fn check_acyclic(graph: &ModelGraph) -> Result<(), RepoError> {
    for (start, node) in graph.nodes() {
        let mut current = node.parent.clone();
        let mut steps = 0usize;
        while let Some(Link::Node(parent)) = current {
            if parent == start || steps > graph.len() {
                return Err(RepoError::InvalidNodes(format!(
                    "cyclic parent chain through {}",
                    node.id
                )));
            }
            steps = steps.saturating_add(1);
            current = graph.node(parent).and_then(|p| p.parent.clone());
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
