//! # Classifier Registry
//!
//! The schema of a model is data: classifiers and their features are looked
//! up at runtime by `MetaPointer` instead of being compiled in.
//!
//! Only what the resolver needs is modelled here: the kind of a classifier,
//! its features, and the primitive type of each property. Property values are
//! carried by the closed `PropertyValue` enum, one variant per primitive kind.

use crate::{MetaPointer, RepoError};
use std::collections::BTreeMap;

// =============================================================================
// PRIMITIVE TYPES & VALUES
// =============================================================================

/// Type of a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveType {
    Boolean,
    Integer,
    String,
    Json,
    /// Enumeration with the keys of its literals.
    Enumeration(Vec<String>),
}

/// A decoded property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Boolean(bool),
    Integer(i64),
    String(String),
    Json(serde_json::Value),
    /// Key of an enumeration literal.
    Enumeration(String),
}

impl PrimitiveType {
    /// Decode a primitive-encoded value.
    pub fn decode(&self, property: &MetaPointer, raw: &str) -> Result<PropertyValue, RepoError> {
        let invalid = || RepoError::InvalidPropertyValue {
            property: property.clone(),
            value: raw.to_string(),
        };
        match self {
            Self::Boolean => match raw {
                "true" => Ok(PropertyValue::Boolean(true)),
                "false" => Ok(PropertyValue::Boolean(false)),
                _ => Err(invalid()),
            },
            Self::Integer => raw
                .parse::<i64>()
                .map(PropertyValue::Integer)
                .map_err(|_| invalid()),
            Self::String => Ok(PropertyValue::String(raw.to_string())),
            Self::Json => serde_json::from_str(raw)
                .map(PropertyValue::Json)
                .map_err(|_| invalid()),
            Self::Enumeration(literals) => {
                if literals.iter().any(|l| l == raw) {
                    Ok(PropertyValue::Enumeration(raw.to_string()))
                } else {
                    Err(invalid())
                }
            }
        }
    }
}

impl PropertyValue {
    /// Primitive encoding of the value, the inverse of `PrimitiveType::decode`.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Boolean(b) => b.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::String(s) | Self::Enumeration(s) => s.clone(),
            Self::Json(v) => v.to_string(),
        }
    }
}

// =============================================================================
// CLASSIFIERS & FEATURES
// =============================================================================

/// Whether instances of a classifier are nodes or annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClassifierKind {
    Concept,
    Annotation,
}

/// What a feature holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureKind {
    Property(PrimitiveType),
    Containment,
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    pub meta_pointer: MetaPointer,
    pub kind: FeatureKind,
}

/// The type of a classifier instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    pub meta_pointer: MetaPointer,
    pub kind: ClassifierKind,
    features: Vec<Feature>,
}

impl Classifier {
    #[must_use]
    pub fn concept(meta_pointer: MetaPointer) -> Self {
        Self {
            meta_pointer,
            kind: ClassifierKind::Concept,
            features: Vec::new(),
        }
    }

    #[must_use]
    pub fn annotation(meta_pointer: MetaPointer) -> Self {
        Self {
            meta_pointer,
            kind: ClassifierKind::Annotation,
            features: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_property(mut self, meta_pointer: MetaPointer, ty: PrimitiveType) -> Self {
        self.features.push(Feature {
            meta_pointer,
            kind: FeatureKind::Property(ty),
        });
        self
    }

    #[must_use]
    pub fn with_containment(mut self, meta_pointer: MetaPointer) -> Self {
        self.features.push(Feature {
            meta_pointer,
            kind: FeatureKind::Containment,
        });
        self
    }

    #[must_use]
    pub fn with_reference(mut self, meta_pointer: MetaPointer) -> Self {
        self.features.push(Feature {
            meta_pointer,
            kind: FeatureKind::Reference,
        });
        self
    }

    /// Find a feature by meta pointer.
    #[must_use]
    pub fn feature(&self, meta_pointer: &MetaPointer) -> Option<&Feature> {
        self.features.iter().find(|f| &f.meta_pointer == meta_pointer)
    }

    pub fn features(&self) -> impl Iterator<Item = &Feature> + '_ {
        self.features.iter()
    }

    fn unknown(&self, feature: &MetaPointer) -> RepoError {
        RepoError::UnknownFeature {
            classifier: self.meta_pointer.clone(),
            feature: feature.clone(),
        }
    }

    /// Type of a property, failing if the feature is missing or not a property.
    pub fn property_type(&self, property: &MetaPointer) -> Result<&PrimitiveType, RepoError> {
        match self.feature(property).map(|f| &f.kind) {
            Some(FeatureKind::Property(ty)) => Ok(ty),
            _ => Err(self.unknown(property)),
        }
    }

    /// Fail unless `containment` is a containment of this classifier.
    pub fn expect_containment(&self, containment: &MetaPointer) -> Result<(), RepoError> {
        match self.feature(containment).map(|f| &f.kind) {
            Some(FeatureKind::Containment) => Ok(()),
            _ => Err(self.unknown(containment)),
        }
    }

    /// Fail unless `reference` is a reference of this classifier.
    pub fn expect_reference(&self, reference: &MetaPointer) -> Result<(), RepoError> {
        match self.feature(reference).map(|f| &f.kind) {
            Some(FeatureKind::Reference) => Ok(()),
            _ => Err(self.unknown(reference)),
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Resolves classifiers by meta pointer.
///
/// Implementations must be `Send + Sync` so a registry can be shared between
/// concurrent callers.
pub trait ClassifierRegistry: Send + Sync {
    fn resolve(&self, meta_pointer: &MetaPointer) -> Option<&Classifier>;
}

/// In-memory registry keyed by classifier meta pointer.
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    classifiers: BTreeMap<MetaPointer, Classifier>,
}

impl LanguageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a classifier, replacing any previous one with the same pointer.
    pub fn register(&mut self, classifier: Classifier) {
        self.classifiers
            .insert(classifier.meta_pointer.clone(), classifier);
    }

    #[must_use]
    pub fn with(mut self, classifier: Classifier) -> Self {
        self.register(classifier);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classifiers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classifiers.is_empty()
    }
}

impl ClassifierRegistry for LanguageRegistry {
    fn resolve(&self, meta_pointer: &MetaPointer) -> Option<&Classifier> {
        self.classifiers.get(meta_pointer)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn mp(key: &str) -> MetaPointer {
        MetaPointer::new("library", "1", key)
    }

    #[test]
    fn decode_each_primitive_kind() {
        let p = mp("p");
        assert_eq!(
            PrimitiveType::Boolean.decode(&p, "true"),
            Ok(PropertyValue::Boolean(true))
        );
        assert_eq!(
            PrimitiveType::Integer.decode(&p, "-12"),
            Ok(PropertyValue::Integer(-12))
        );
        assert_eq!(
            PrimitiveType::String.decode(&p, ""),
            Ok(PropertyValue::String(String::new()))
        );
        assert_eq!(
            PrimitiveType::Json.decode(&p, r#"{"a":[1,2]}"#),
            Ok(PropertyValue::Json(serde_json::json!({"a": [1, 2]})))
        );
        let colors = PrimitiveType::Enumeration(vec!["red".into(), "blue".into()]);
        assert_eq!(
            colors.decode(&p, "blue"),
            Ok(PropertyValue::Enumeration("blue".into()))
        );
    }

    #[test]
    fn decode_rejects_malformed_values() {
        let p = mp("p");
        assert!(PrimitiveType::Boolean.decode(&p, "yes").is_err());
        assert!(PrimitiveType::Integer.decode(&p, "1.5").is_err());
        assert!(PrimitiveType::Json.decode(&p, "{").is_err());
        assert!(
            PrimitiveType::Enumeration(vec!["red".into()])
                .decode(&p, "green")
                .is_err()
        );
    }

    #[test]
    fn encode_is_inverse_of_decode() {
        let p = mp("p");
        for (ty, raw) in [
            (PrimitiveType::Boolean, "false"),
            (PrimitiveType::Integer, "42"),
            (PrimitiveType::String, "hello world"),
            (PrimitiveType::Json, r#"{"b":1,"a":2}"#),
        ] {
            let value = ty.decode(&p, raw).expect("decode");
            assert_eq!(value.encode(), raw);
        }
    }

    #[test]
    fn feature_kinds_are_checked() {
        let book = Classifier::concept(mp("Book"))
            .with_property(mp("title"), PrimitiveType::String)
            .with_containment(mp("chapters"))
            .with_reference(mp("author"));

        assert!(book.property_type(&mp("title")).is_ok());
        assert!(book.expect_containment(&mp("chapters")).is_ok());
        assert!(book.expect_reference(&mp("author")).is_ok());
        assert!(matches!(
            book.expect_containment(&mp("author")),
            Err(RepoError::UnknownFeature { .. })
        ));
        assert!(book.property_type(&mp("missing")).is_err());
    }

    #[test]
    fn registry_resolves_registered_classifiers() {
        let registry = LanguageRegistry::new()
            .with(Classifier::concept(mp("Book")))
            .with(Classifier::annotation(mp("Comment")));

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.resolve(&mp("Comment")).map(|c| c.kind),
            Some(ClassifierKind::Annotation)
        );
        assert!(registry.resolve(&mp("Shelf")).is_none());
    }
}
