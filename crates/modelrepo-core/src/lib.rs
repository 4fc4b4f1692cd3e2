//! # modelrepo-core
//!
//! The data-access core of a language-agnostic model repository.
//!
//! Models are tree-shaped graphs whose schema is data. They travel as flat,
//! order-preserving chunks and are stored per partition.
//!
//! ## Components
//!
//! - `chunk`: the canonical transfer unit
//! - `resolver`: chunk <-> live node graph, with dangling-link policies
//! - `retrieval`: depth-bounded, deduplicated bulk retrieval
//! - `storing`: replace-mode bulk store and subtree delete
//! - `id_mapping`: transparent id translation around the bulk API
//! - `bulk`: low-level and high-level bulk API over a `Repository`
//!
//! ## Architectural Constraints
//!
//! - Engines are stateless; all shared state lives behind `InstanceStore`
//! - Every store call is committed as one atomic `WriteBatch`
//! - Has NO async, NO network dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod bulk;
pub mod chunk;
pub mod config;
pub mod formats;
pub mod graph;
pub mod id_mapping;
pub mod inspection;
pub mod language;
pub mod primitives;
pub mod resolver;
pub mod retrieval;
pub mod store;
pub mod storing;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{LanguageVersion, MetaPointer, RepoError};

// =============================================================================
// RE-EXPORTS: Chunk Model & Graph
// =============================================================================

pub use chunk::{
    ReferenceEntry, SerializedChunk, SerializedClassifierInstance, SerializedContainmentValue,
    SerializedPropertyValue, SerializedReferenceValue,
};
pub use graph::{Link, ModelGraph, Node, NodeIndex, ReferenceTarget};
pub use language::{
    Classifier, ClassifierKind, ClassifierRegistry, Feature, FeatureKind, LanguageRegistry,
    PrimitiveType, PropertyValue,
};
pub use resolver::{Instantiator, ResolverPolicies, UnavailableNodePolicy};

// =============================================================================
// RE-EXPORTS: Engines & Bulk API
// =============================================================================

pub use bulk::{
    Bulk, BulkLowLevel, BulkLowLevelWrapper, DeleteResponse, IdsResponse, PartitionsResponse,
    Repository, RetrieveResponse, StoreResponse,
};
pub use config::RepositoryConfig;
pub use id_mapping::{IdMapping, IdMappingWrapper};
pub use inspection::{ClassifierKey, GroupResult, Issue, IssueSeverity, ValidationReport};
pub use retrieval::{DepthLimit, Retrieval};
pub use store::{InstanceStore, MemoryStore, WriteBatch};
pub use storing::{StoreMode, StoreOutcome};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{BinaryCodec, ChunkHeader, Codec, JsonCodec};
