//! # Model Graph
//!
//! A navigable node graph built from a chunk.
//!
//! Nodes live in an arena and point at each other through `NodeIndex`
//! values, so parent/child cycles never become ownership cycles. Links to
//! nodes that are not part of the arena keep the raw id (`Link::External`).

use crate::chunk::{ReferenceEntry, SerializedClassifierInstance};
use crate::language::{ClassifierKind, PropertyValue};
use crate::{MetaPointer, RepoError};
use std::collections::BTreeMap;

// =============================================================================
// LINKS
// =============================================================================

/// Position of a node inside its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(pub usize);

/// An edge end: either a node of this graph or an id living elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    Node(NodeIndex),
    External(String),
}

/// One reference target. `target` is `None` for unresolved references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTarget {
    pub target: Option<Link>,
    pub resolve_info: Option<String>,
}

// =============================================================================
// NODE
// =============================================================================

/// A live classifier instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub classifier: MetaPointer,
    pub kind: ClassifierKind,
    pub parent: Option<Link>,
    pub properties: Vec<(MetaPointer, Option<PropertyValue>)>,
    pub containments: Vec<(MetaPointer, Vec<Link>)>,
    pub references: Vec<(MetaPointer, Vec<ReferenceTarget>)>,
    pub annotations: Vec<Link>,
}

impl Node {
    #[must_use]
    pub fn new(id: impl Into<String>, classifier: MetaPointer, kind: ClassifierKind) -> Self {
        Self {
            id: id.into(),
            classifier,
            kind,
            parent: None,
            properties: Vec::new(),
            containments: Vec::new(),
            references: Vec::new(),
            annotations: Vec::new(),
        }
    }

    /// Get a property value. `None` both when unset and null.
    #[must_use]
    pub fn property(&self, property: &MetaPointer) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|(mp, _)| mp == property)
            .and_then(|(_, v)| v.as_ref())
    }

    /// Set a property value, overwriting an existing entry in place.
    pub fn set_property(&mut self, property: MetaPointer, value: Option<PropertyValue>) {
        match self.properties.iter_mut().find(|(mp, _)| *mp == property) {
            Some(entry) => entry.1 = value,
            None => self.properties.push((property, value)),
        }
    }

    /// Children of one containment, in order.
    #[must_use]
    pub fn children_of(&self, containment: &MetaPointer) -> &[Link] {
        self.containments
            .iter()
            .find(|(mp, _)| mp == containment)
            .map(|(_, links)| links.as_slice())
            .unwrap_or(&[])
    }

    fn containment_mut(&mut self, containment: MetaPointer) -> &mut Vec<Link> {
        let pos = match self.containments.iter().position(|(mp, _)| *mp == containment) {
            Some(pos) => pos,
            None => {
                self.containments.push((containment, Vec::new()));
                self.containments.len() - 1
            }
        };
        &mut self.containments[pos].1
    }

    fn reference_mut(&mut self, reference: MetaPointer) -> &mut Vec<ReferenceTarget> {
        let pos = match self.references.iter().position(|(mp, _)| *mp == reference) {
            Some(pos) => pos,
            None => {
                self.references.push((reference, Vec::new()));
                self.references.len() - 1
            }
        };
        &mut self.references[pos].1
    }
}

// =============================================================================
// GRAPH
// =============================================================================

/// Arena of nodes indexed by id.
#[derive(Debug, Clone, Default)]
pub struct ModelGraph {
    nodes: Vec<Node>,
    by_id: BTreeMap<String, NodeIndex>,
}

impl ModelGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Fails with `DuplicateId` if the id is taken.
    pub fn insert(&mut self, node: Node) -> Result<NodeIndex, RepoError> {
        if self.by_id.contains_key(&node.id) {
            return Err(RepoError::DuplicateId(node.id));
        }
        let index = NodeIndex(self.nodes.len());
        self.by_id.insert(node.id.clone(), index);
        self.nodes.push(node);
        Ok(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the node with the given id.
    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.by_id.get(id).copied()
    }

    #[must_use]
    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index.0)
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> Option<&mut Node> {
        self.nodes.get_mut(index.0)
    }

    /// Lookup a node by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Node> {
        self.index_of(id).and_then(|ix| self.node(ix))
    }

    /// All nodes in arena order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &Node)> + '_ {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeIndex(i), n))
    }

    /// Nodes without a parent inside this graph, in arena order.
    #[must_use]
    pub fn roots(&self) -> Vec<NodeIndex> {
        self.nodes()
            .filter(|(_, n)| !matches!(n.parent, Some(Link::Node(_))))
            .map(|(ix, _)| ix)
            .collect()
    }

    /// The id a link points at.
    #[must_use]
    pub fn link_id<'a>(&'a self, link: &'a Link) -> Option<&'a str> {
        match link {
            Link::Node(ix) => self.node(*ix).map(|n| n.id.as_str()),
            Link::External(id) => Some(id.as_str()),
        }
    }

    fn require(&self, index: NodeIndex) -> Result<&Node, RepoError> {
        self.node(index)
            .ok_or_else(|| RepoError::InvalidNodes(format!("no node at index {}", index.0)))
    }

    fn require_mut(&mut self, index: NodeIndex) -> Result<&mut Node, RepoError> {
        self.nodes
            .get_mut(index.0)
            .ok_or_else(|| RepoError::InvalidNodes(format!("no node at index {}", index.0)))
    }

    // =========================================================================
    // LINKING
    // =========================================================================

    /// Append `child` to a containment of `parent` and set its parent link.
    pub fn add_child(
        &mut self,
        parent: NodeIndex,
        containment: MetaPointer,
        child: NodeIndex,
    ) -> Result<(), RepoError> {
        self.require(parent)?;
        self.require_mut(child)?.parent = Some(Link::Node(parent));
        self.require_mut(parent)?
            .containment_mut(containment)
            .push(Link::Node(child));
        Ok(())
    }

    /// Append an annotation to `owner` and set its parent link.
    pub fn add_annotation(
        &mut self,
        owner: NodeIndex,
        annotation: NodeIndex,
    ) -> Result<(), RepoError> {
        self.require(owner)?;
        self.require_mut(annotation)?.parent = Some(Link::Node(owner));
        self.require_mut(owner)?.annotations.push(Link::Node(annotation));
        Ok(())
    }

    /// Append a target to a reference of `source`.
    pub fn add_reference(
        &mut self,
        source: NodeIndex,
        reference: MetaPointer,
        target: ReferenceTarget,
    ) -> Result<(), RepoError> {
        self.require_mut(source)?
            .reference_mut(reference)
            .push(target);
        Ok(())
    }

    // =========================================================================
    // FLATTENING
    // =========================================================================

    /// Flatten one node back into its chunk form.
    pub fn to_instance(&self, index: NodeIndex) -> Result<SerializedClassifierInstance, RepoError> {
        let node = self.require(index)?;
        let ids = |links: &[Link]| -> Vec<String> {
            links
                .iter()
                .filter_map(|l| self.link_id(l))
                .map(str::to_string)
                .collect()
        };

        let mut instance = SerializedClassifierInstance::new(&node.id, node.classifier.clone());
        instance.parent_id = node
            .parent
            .as_ref()
            .and_then(|l| self.link_id(l))
            .map(str::to_string);
        for (property, value) in &node.properties {
            instance.set_property_value(property.clone(), value.as_ref().map(PropertyValue::encode));
        }
        for (containment, children) in &node.containments {
            instance.add_children(containment.clone(), ids(children));
        }
        for (reference, targets) in &node.references {
            let entries = targets
                .iter()
                .map(|t| {
                    ReferenceEntry::new(
                        t.target
                            .as_ref()
                            .and_then(|l| self.link_id(l))
                            .map(str::to_string),
                        t.resolve_info.clone(),
                    )
                })
                .collect();
            instance.add_reference_targets(reference.clone(), entries);
        }
        instance.annotations = ids(&node.annotations);
        Ok(instance)
    }
}

/// Structural equality: same ids, and per id the same classifier, parent and
/// ordered features. Arena order is irrelevant.
impl PartialEq for ModelGraph {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.nodes().all(|(ix, node)| {
                match (self.to_instance(ix), other.index_of(&node.id)) {
                    (Ok(mine), Some(theirs)) => other
                        .to_instance(theirs)
                        .is_ok_and(|instance| instance == mine),
                    _ => false,
                }
            })
    }
}

// =============================================================================
// TESTS
// =============================================================================
