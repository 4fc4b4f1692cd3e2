//! # Inspection
//!
//! Read-only views over a store: instance counts grouped by classifier or
//! language, and a consistency check of the parent/child bookkeeping.

use crate::chunk::SerializedClassifierInstance;
use crate::primitives::is_valid_id;
use crate::store::InstanceStore;
use crate::RepoError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// GROUPING
// =============================================================================

/// A classifier irrespective of its language version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassifierKey {
    pub language: String,
    pub key: String,
}

/// Ids of one group, truncated to the requested limit, and the full size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupResult {
    pub ids: BTreeSet<String>,
    pub size: usize,
}

impl GroupResult {
    fn add(&mut self, id: &str, limit: Option<usize>) {
        if limit.is_none_or(|l| self.ids.len() < l) {
            self.ids.insert(id.to_string());
        }
        self.size = self.size.saturating_add(1);
    }
}

fn group_by<S, K, F>(
    store: &S,
    limit: Option<usize>,
    key_of: F,
) -> Result<BTreeMap<K, GroupResult>, RepoError>
where
    S: InstanceStore + ?Sized,
    K: Ord,
    F: Fn(&SerializedClassifierInstance) -> K,
{
    let mut groups: BTreeMap<K, GroupResult> = BTreeMap::new();
    for id in store.instance_ids()? {
        if let Some(instance) = store.get_instance(&id)? {
            groups
                .entry(key_of(&instance))
                .or_default()
                .add(&instance.id, limit);
        }
    }
    Ok(groups)
}

/// Stored instances grouped by classifier. Each group lists at most `limit`
/// ids (the smallest ones); `None` lists all.
pub fn nodes_by_classifier<S: InstanceStore + ?Sized>(
    store: &S,
    limit: Option<usize>,
) -> Result<BTreeMap<ClassifierKey, GroupResult>, RepoError> {
    group_by(store, limit, |instance| ClassifierKey {
        language: instance.classifier.language.clone(),
        key: instance.classifier.key.clone(),
    })
}

/// Stored instances grouped by the language of their classifier.
pub fn nodes_by_language<S: InstanceStore + ?Sized>(
    store: &S,
    limit: Option<usize>,
) -> Result<BTreeMap<String, GroupResult>, RepoError> {
    group_by(store, limit, |instance| instance.classifier.language.clone())
}

// =============================================================================
// CONSISTENCY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IssueSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: IssueSeverity,
    pub message: String,
    /// Id of the offending node.
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    /// No error-level issue was found.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.issues
            .iter()
            .all(|issue| issue.severity != IssueSeverity::Error)
    }

    fn error(&mut self, subject: &str, message: String) {
        self.issues.push(Issue {
            severity: IssueSeverity::Error,
            message,
            subject: Some(subject.to_string()),
        });
    }

    fn warning(&mut self, subject: &str, message: String) {
        self.issues.push(Issue {
            severity: IssueSeverity::Warning,
            message,
            subject: Some(subject.to_string()),
        });
    }
}

/// Check the stored parent/child bookkeeping.
///
/// Reports invalid ids, nodes listed in more than one slot, children whose
/// parent disagrees with the listing node, parents that do not list their
/// children, partition roots with a parent, and nodes whose parent chain
/// loops or never reaches a partition root.
pub fn check_consistency<S: InstanceStore + ?Sized>(
    store: &S,
) -> Result<ValidationReport, RepoError> {
    let mut report = ValidationReport::default();
    let mut placements: BTreeMap<String, String> = BTreeMap::new();

    for id in store.instance_ids()? {
        let Some(node) = store.get_instance(&id)? else {
            continue;
        };
        if !is_valid_id(&node.id) {
            report.error(&node.id, format!("Invalid node id: {:?}", node.id));
        }

        let owner = node.id.as_str();
        let slots = node
            .containments
            .iter()
            .flat_map(|c| {
                c.children
                    .iter()
                    .map(move |child| (child, format!("{owner} at {}", c.containment)))
            })
            .chain(
                node.annotations
                    .iter()
                    .map(|a| (a, format!("{owner} among annotations"))),
            );
        for (contained, placement) in slots {
            if let Some(previous) = placements.get(contained) {
                report.error(
                    contained,
                    format!("{contained} is listed in multiple places: {previous} and {placement}"),
                );
            } else {
                placements.insert(contained.clone(), placement);
            }
            match store.get_instance(contained)? {
                Some(child) if child.parent_id.as_deref() != Some(node.id.as_str()) => {
                    report.error(
                        contained,
                        format!(
                            "{contained} is listed by {} but has {:?} as parent",
                            node.id, child.parent_id
                        ),
                    );
                }
                Some(_) => {}
                None => report.warning(
                    contained,
                    format!("{contained} is listed by {} but is not stored", node.id),
                ),
            }
        }

        if let Some(parent_id) = node.parent_id.as_deref() {
            if let Some(parent) = store.get_instance(parent_id)? {
                if !parent.contains(&node.id) {
                    report.error(
                        &node.id,
                        format!(
                            "{} lists {parent_id} as parent but {parent_id} does not contain it",
                            node.id
                        ),
                    );
                }
            }
        }
    }

    for root in store.list_partition_root_ids()? {
        if let Some(node) = store.get_instance(&root)? {
            if let Some(parent) = node.parent_id {
                report.error(&root, format!("partition root {root} has parent {parent}"));
            }
        }
    }

    check_ancestry(store, &mut report)?;

    tracing::debug!(issues = report.issues.len(), "consistency check");
    Ok(report)
}

/// Every stored node must reach a partition root by following parents.
/// A broken chain is reported once, on the first node that walks into it.
fn check_ancestry<S: InstanceStore + ?Sized>(
    store: &S,
    report: &mut ValidationReport,
) -> Result<(), RepoError> {
    let roots: BTreeSet<String> = store.list_partition_root_ids()?.into_iter().collect();
    let mut settled: BTreeSet<String> = BTreeSet::new();

    for id in store.instance_ids()? {
        let mut path = Vec::new();
        let mut on_path = BTreeSet::new();
        let mut current = id.clone();
        loop {
            if settled.contains(&current) {
                break;
            }
            if !on_path.insert(current.clone()) {
                report.error(&id, format!("{id} has a cyclic parent chain through {current}"));
                break;
            }
            let parent = store.get_instance(&current)?.map(|n| n.parent_id);
            path.push(current.clone());
            match parent {
                Some(Some(parent)) => current = parent,
                Some(None) => {
                    if !roots.contains(&current) {
                        report.error(
                            &id,
                            format!("{id} descends from {current} which is not a partition root"),
                        );
                    }
                    break;
                }
                None => {
                    report.error(&id, format!("{id} descends from missing node {current}"));
                    break;
                }
            }
        }
        settled.extend(path);
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
