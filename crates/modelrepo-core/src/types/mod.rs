//! # Core Type Definitions
//!
//! This module contains the small value types shared by every component:
//! - Schema pointers (`MetaPointer`, `LanguageVersion`)
//! - Error types (`RepoError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module implement `Ord` so they can be used as keys of
//! `BTreeMap`/`BTreeSet` with a stable iteration order.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// META POINTER
// =============================================================================

/// Identifies a classifier or a feature independently of any in-memory schema.
///
/// Equality is structural on all three fields.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MetaPointer {
    /// Key of the language defining the element.
    pub language: String,
    /// Version of that language.
    pub version: String,
    /// Key of the element inside the language.
    pub key: String,
}

impl MetaPointer {
    /// Create a new meta pointer.
    #[must_use]
    pub fn new(
        language: impl Into<String>,
        version: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            language: language.into(),
            version: version.into(),
            key: key.into(),
        }
    }

    /// The language version this pointer refers into.
    #[must_use]
    pub fn language_version(&self) -> LanguageVersion {
        LanguageVersion::new(&self.language, &self.version)
    }

    /// A pointer is usable only when all three parts are present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.language.is_empty() && !self.version.is_empty() && !self.key.is_empty()
    }
}

impl fmt::Display for MetaPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.language, self.version, self.key)
    }
}

// =============================================================================
// LANGUAGE VERSION
// =============================================================================

/// A `(key, version)` language entry listed by a chunk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LanguageVersion {
    pub key: String,
    pub version: String,
}

impl LanguageVersion {
    #[must_use]
    pub fn new(key: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for LanguageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.version)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the repository core.
///
/// - Validation errors are detected before any state mutation
/// - Resolution errors are governed by the resolver policies
/// - The core never panics; all errors are recoverable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepoError {
    /// The list of node ids of a request is empty or malformed.
    #[error("Invalid node ids: {0}")]
    InvalidNodeIds(String),

    /// The depth limit of a retrieve request is not a non-negative integer.
    #[error("Invalid depth limit: {0:?}")]
    InvalidDepthLimit(String),

    /// The store mode is not recognized.
    #[error("Invalid store mode: {0:?}")]
    InvalidMode(String),

    /// The id count of an ids request is not a non-negative integer.
    #[error("Invalid id count: {0:?}")]
    InvalidCount(String),

    /// The nodes of a store request are malformed.
    #[error("Invalid nodes: {0}")]
    InvalidNodes(String),

    /// An instance with an already-present id was added to a chunk.
    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    /// The registry cannot resolve the classifier of an instance.
    #[error("Unknown classifier: {0}")]
    UnknownClassifier(MetaPointer),

    /// A classifier does not declare the given feature.
    #[error("Unknown feature {feature} on classifier {classifier}")]
    UnknownFeature {
        classifier: MetaPointer,
        feature: MetaPointer,
    },

    /// The declared parent of an instance is not available.
    #[error("Parent {parent} of {id} is not available")]
    UnavailableParent { id: String, parent: String },

    /// A declared child of an instance is not available.
    #[error("Child {child} of {id} is not available")]
    UnavailableChild { id: String, child: String },

    /// A declared reference target is not available.
    #[error("Reference target {target} of {id} is not available")]
    UnavailableReferenceTarget { id: String, target: String },

    /// A property value cannot be decoded with the type of its property.
    #[error("Invalid value {value:?} for property {property}")]
    InvalidPropertyValue { property: MetaPointer, value: String },

    /// The store mode is recognized but not supported.
    #[error("Unsupported store mode: {0}")]
    UnsupportedStoreMode(String),

    /// The id mapping is not bijective.
    #[error("Invalid id mapping: {0}")]
    InvalidIdMapping(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// The configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The store abstraction failed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A low-level bulk response was not ok.
    #[error("{0}")]
    Bulk(String),
}

impl RepoError {
    /// True for errors detected while validating request parameters.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidNodeIds(_)
                | Self::InvalidDepthLimit(_)
                | Self::InvalidMode(_)
                | Self::InvalidCount(_)
                | Self::InvalidNodes(_)
                | Self::DuplicateId(_)
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
