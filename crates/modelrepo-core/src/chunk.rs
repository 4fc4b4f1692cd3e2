//! # Chunk Model
//!
//! The canonical, schema-agnostic transfer unit exchanged with the repository.
//!
//! A chunk is a value: it is produced by serializing a subtree or a store
//! request and consumed immediately by the counterpart engine. Instances are
//! kept in insertion order; order *within* an instance (children, reference
//! targets, annotations) is semantically significant.

use crate::{LanguageVersion, MetaPointer, RepoError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

// =============================================================================
// FEATURE VALUES
// =============================================================================

/// A primitive-encoded property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedPropertyValue {
    pub property: MetaPointer,
    pub value: Option<String>,
}

/// The ordered children of one containment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedContainmentValue {
    pub containment: MetaPointer,
    pub children: Vec<String>,
}

/// One target of a reference.
///
/// A null `target` with a non-null `resolve_info` is an unresolved reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceEntry {
    #[serde(rename = "reference")]
    pub target: Option<String>,
    pub resolve_info: Option<String>,
}

impl ReferenceEntry {
    #[must_use]
    pub fn new(target: Option<String>, resolve_info: Option<String>) -> Self {
        Self {
            target,
            resolve_info,
        }
    }

    /// Entry pointing at a node id.
    #[must_use]
    pub fn to(target: impl Into<String>) -> Self {
        Self::new(Some(target.into()), None)
    }
}

/// The ordered targets of one reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedReferenceValue {
    pub reference: MetaPointer,
    pub targets: Vec<ReferenceEntry>,
}

// =============================================================================
// CLASSIFIER INSTANCE
// =============================================================================

/// One node or annotation instance of a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedClassifierInstance {
    pub id: String,
    pub classifier: MetaPointer,
    #[serde(rename = "parent")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub properties: Vec<SerializedPropertyValue>,
    #[serde(default)]
    pub containments: Vec<SerializedContainmentValue>,
    #[serde(default)]
    pub references: Vec<SerializedReferenceValue>,
    #[serde(default)]
    pub annotations: Vec<String>,
}

impl SerializedClassifierInstance {
    /// Create an instance with no parent and no feature values.
    #[must_use]
    pub fn new(id: impl Into<String>, classifier: MetaPointer) -> Self {
        Self {
            id: id.into(),
            classifier,
            parent_id: None,
            properties: Vec::new(),
            containments: Vec::new(),
            references: Vec::new(),
            annotations: Vec::new(),
        }
    }

    /// Builder-style parent assignment.
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    /// Get the encoded value of a property. `None` both when unset and null.
    #[must_use]
    pub fn property_value(&self, property: &MetaPointer) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| &p.property == property)
            .and_then(|p| p.value.as_deref())
    }

    /// Set a property value, overwriting an existing entry in place.
    pub fn set_property_value(&mut self, property: MetaPointer, value: Option<String>) {
        match self.properties.iter_mut().find(|p| p.property == property) {
            Some(existing) => existing.value = value,
            None => self
                .properties
                .push(SerializedPropertyValue { property, value }),
        }
    }

    /// Append children to a containment, creating the entry on first use.
    pub fn add_children(&mut self, containment: MetaPointer, children: Vec<String>) {
        match self
            .containments
            .iter_mut()
            .find(|c| c.containment == containment)
        {
            Some(existing) => existing.children.extend(children),
            None => self.containments.push(SerializedContainmentValue {
                containment,
                children,
            }),
        }
    }

    /// Append targets to a reference, creating the entry on first use.
    pub fn add_reference_targets(&mut self, reference: MetaPointer, targets: Vec<ReferenceEntry>) {
        match self
            .references
            .iter_mut()
            .find(|r| r.reference == reference)
        {
            Some(existing) => existing.targets.extend(targets),
            None => self
                .references
                .push(SerializedReferenceValue { reference, targets }),
        }
    }

    pub fn add_annotation(&mut self, id: impl Into<String>) {
        self.annotations.push(id.into());
    }

    /// All containment children, containment by containment, in order.
    pub fn children(&self) -> impl Iterator<Item = &str> + '_ {
        self.containments
            .iter()
            .flat_map(|c| c.children.iter().map(String::as_str))
    }

    /// Children followed by annotations: every id this instance owns.
    pub fn contained_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.children()
            .chain(self.annotations.iter().map(String::as_str))
    }

    /// Check whether `id` is a child or an annotation of this instance.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.contained_ids().any(|c| c == id)
    }

    /// Remove `id` from every containment and from the annotations.
    pub fn remove_contained(&mut self, id: &str) {
        for containment in &mut self.containments {
            containment.children.retain(|c| c != id);
        }
        self.annotations.retain(|a| a != id);
    }

    /// Every meta pointer used by this instance: classifier first, then features.
    pub fn meta_pointers(&self) -> impl Iterator<Item = &MetaPointer> + '_ {
        std::iter::once(&self.classifier)
            .chain(self.properties.iter().map(|p| &p.property))
            .chain(self.containments.iter().map(|c| &c.containment))
            .chain(self.references.iter().map(|r| &r.reference))
    }
}

// =============================================================================
// CHUNK
// =============================================================================

/// The canonical transfer unit: a format-version tag, the languages in use,
/// and an ordered sequence of classifier instances.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedChunk {
    pub serialization_format_version: String,
    #[serde(default)]
    pub languages: Vec<LanguageVersion>,
    #[serde(rename = "nodes", default)]
    classifier_instances: Vec<SerializedClassifierInstance>,
    /// Lookup-only index: id -> position. Never iterated.
    #[serde(skip)]
    index: OnceLock<HashMap<String, usize>>,
}

impl PartialEq for SerializedChunk {
    fn eq(&self, other: &Self) -> bool {
        self.serialization_format_version == other.serialization_format_version
            && self.languages == other.languages
            && self.classifier_instances == other.classifier_instances
    }
}

impl Eq for SerializedChunk {}

impl SerializedChunk {
    /// Create an empty chunk tagged with the given format version.
    #[must_use]
    pub fn new(serialization_format_version: impl Into<String>) -> Self {
        Self {
            serialization_format_version: serialization_format_version.into(),
            ..Self::default()
        }
    }

    /// Build a chunk from instances, rejecting duplicate ids.
    pub fn from_instances(
        serialization_format_version: impl Into<String>,
        instances: impl IntoIterator<Item = SerializedClassifierInstance>,
    ) -> Result<Self, RepoError> {
        let mut chunk = Self::new(serialization_format_version);
        for instance in instances {
            chunk.add_classifier_instance(instance)?;
        }
        Ok(chunk)
    }

    fn index(&self) -> &HashMap<String, usize> {
        self.index.get_or_init(|| {
            let mut index = HashMap::with_capacity(self.classifier_instances.len());
            for (pos, instance) in self.classifier_instances.iter().enumerate() {
                index.entry(instance.id.clone()).or_insert(pos);
            }
            index
        })
    }

    /// Add a language entry. Adding an entry twice has no effect.
    pub fn add_language(&mut self, language: LanguageVersion) {
        if !self.languages.contains(&language) {
            self.languages.push(language);
        }
    }

    /// Append an instance.
    ///
    /// Fails with `DuplicateId` if an instance with the same id is present.
    pub fn add_classifier_instance(
        &mut self,
        instance: SerializedClassifierInstance,
    ) -> Result<(), RepoError> {
        if self.index().contains_key(&instance.id) {
            return Err(RepoError::DuplicateId(instance.id));
        }
        let pos = self.classifier_instances.len();
        if let Some(index) = self.index.get_mut() {
            index.insert(instance.id.clone(), pos);
        }
        self.classifier_instances.push(instance);
        Ok(())
    }

    /// Look up an instance by id.
    #[must_use]
    pub fn get_instance_by_id(&self, id: &str) -> Option<&SerializedClassifierInstance> {
        self.index()
            .get(id)
            .and_then(|&pos| self.classifier_instances.get(pos))
    }

    #[must_use]
    pub fn contains_id(&self, id: &str) -> bool {
        self.index().contains_key(id)
    }

    /// Instances in insertion order.
    #[must_use]
    pub fn instances(&self) -> &[SerializedClassifierInstance] {
        &self.classifier_instances
    }

    #[must_use]
    pub fn into_instances(self) -> Vec<SerializedClassifierInstance> {
        self.classifier_instances
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classifier_instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classifier_instances.is_empty()
    }

    /// Add a language entry for every meta pointer used by the instances.
    pub fn populate_used_languages(&mut self) {
        let used: Vec<LanguageVersion> = self
            .classifier_instances
            .iter()
            .flat_map(SerializedClassifierInstance::meta_pointers)
            .map(MetaPointer::language_version)
            .collect();
        for language in used {
            self.add_language(language);
        }
    }

    /// Check the chunk invariants that do not need a store or a registry:
    /// ids are unique and well-formed, meta pointers are complete and point
    /// into a listed language.
    pub fn validate(&self) -> Result<(), RepoError> {
        let mut seen = BTreeSet::new();
        for instance in &self.classifier_instances {
            if instance.id.is_empty() {
                return Err(RepoError::InvalidNodes("empty node id".to_string()));
            }
            if !seen.insert(instance.id.as_str()) {
                return Err(RepoError::DuplicateId(instance.id.clone()));
            }
            for mp in instance.meta_pointers() {
                if !mp.is_complete() {
                    return Err(RepoError::InvalidNodes(format!(
                        "incomplete meta pointer {} on {}",
                        mp, instance.id
                    )));
                }
                let language = mp.language_version();
                if !self.languages.contains(&language) {
                    return Err(RepoError::InvalidNodes(format!(
                        "{} uses language {} which the chunk does not list",
                        instance.id, language
                    )));
                }
            }
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

    fn concept(key: &str) -> MetaPointer {
        MetaPointer::new("library", "1", key)
    }

    #[test]
    fn add_language_is_idempotent() {
        let mut chunk = SerializedChunk::new("2023.1");
        chunk.add_language(LanguageVersion::new("library", "1"));
        chunk.add_language(LanguageVersion::new("library", "1"));
        chunk.add_language(LanguageVersion::new("library", "2"));

        assert_eq!(chunk.languages.len(), 2);
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut chunk = SerializedChunk::new("2023.1");
        chunk
            .add_classifier_instance(SerializedClassifierInstance::new("a", concept("Book")))
            .expect("first");

        let result =
            chunk.add_classifier_instance(SerializedClassifierInstance::new("a", concept("Book")));
        assert_eq!(result, Err(RepoError::DuplicateId("a".to_string())));
        assert_eq!(chunk.len(), 1);
    }

    #[test]
    fn lookup_by_id_after_appends() {
        let chunk = SerializedChunk::from_instances(
            "2023.1",
            ["a", "b", "c"]
                .into_iter()
                .map(|id| SerializedClassifierInstance::new(id, concept("Book"))),
        )
        .expect("chunk");

        assert_eq!(chunk.get_instance_by_id("b").map(|i| i.id.as_str()), Some("b"));
        assert!(chunk.get_instance_by_id("zzz").is_none());
    }

    #[test]
    fn lookup_works_on_deserialized_chunk() {
        let mut chunk = SerializedChunk::new("2023.1");
        chunk.add_language(LanguageVersion::new("library", "1"));
        chunk
            .add_classifier_instance(SerializedClassifierInstance::new("x", concept("Book")))
            .expect("add");

        let json = serde_json::to_string(&chunk).expect("encode");
        let decoded: SerializedChunk = serde_json::from_str(&json).expect("decode");

        assert!(decoded.contains_id("x"));
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn set_property_overwrites_in_place() {
        let mut instance = SerializedClassifierInstance::new("a", concept("Book"));
        instance.set_property_value(concept("title"), Some("Dune".into()));
        instance.set_property_value(concept("pages"), Some("412".into()));
        instance.set_property_value(concept("title"), Some("Emma".into()));

        assert_eq!(instance.properties.len(), 2);
        assert_eq!(instance.properties[0].property, concept("title"));
        assert_eq!(instance.property_value(&concept("title")), Some("Emma"));
    }

    #[test]
    fn remove_contained_drops_child_and_annotation() {
        let mut instance = SerializedClassifierInstance::new("a", concept("Library"));
        instance.add_children(concept("books"), vec!["b1".into(), "b2".into()]);
        instance.add_annotation("ann");

        assert!(instance.contains("b2"));
        instance.remove_contained("b2");
        instance.remove_contained("ann");

        assert_eq!(instance.children().collect::<Vec<_>>(), vec!["b1"]);
        assert!(instance.annotations.is_empty());
    }

    #[test]
    fn populate_used_languages_covers_features() {
        let mut instance = SerializedClassifierInstance::new("a", concept("Book"));
        instance.add_reference_targets(
            MetaPointer::new("people", "3", "author"),
            vec![ReferenceEntry::to("p1")],
        );
        let mut chunk = SerializedChunk::from_instances("2023.1", [instance]).expect("chunk");
        chunk.populate_used_languages();

        assert_eq!(
            chunk.languages,
            vec![
                LanguageVersion::new("library", "1"),
                LanguageVersion::new("people", "3"),
            ]
        );
        assert!(chunk.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unlisted_language() {
        let chunk = SerializedChunk::from_instances(
            "2023.1",
            [SerializedClassifierInstance::new("a", concept("Book"))],
        )
        .expect("chunk");

        assert!(matches!(chunk.validate(), Err(RepoError::InvalidNodes(_))));
    }

    #[test]
    fn validate_catches_duplicates_from_wire() {
        let json = r#"{"serializationFormatVersion":"2023.1","languages":[{"key":"library","version":"1"}],
            "nodes":[
              {"id":"a","classifier":{"language":"library","version":"1","key":"Book"},"parent":null},
              {"id":"a","classifier":{"language":"library","version":"1","key":"Book"},"parent":null}
            ]}"#;
        let chunk: SerializedChunk = serde_json::from_str(json).expect("decode");

        assert_eq!(chunk.validate(), Err(RepoError::DuplicateId("a".into())));
    }
}
