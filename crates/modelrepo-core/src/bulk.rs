//! # Bulk API
//!
//! The operation surface exposed to clients: `partitions`, `retrieve`,
//! `store`, `delete` and `ids`.
//!
//! Two flavours exist:
//!
//! - `BulkLowLevel` never fails. Each operation returns a response value with
//!   an `is_ok`/`error_message` pair and field-specific validity flags, so a
//!   caller across a process boundary can tell which parameter was wrong.
//! - `Bulk` returns `Result`. `BulkLowLevelWrapper` turns any low-level
//!   implementation into a high-level one, failing with `RepoError::Bulk`
//!   carrying the original message.
//!
//! `Repository` combines an `InstanceStore` with the retrieval and store
//! engines and implements the low-level surface.

use crate::chunk::SerializedChunk;
use crate::config::RepositoryConfig;
use crate::formats::BinaryCodec;
use crate::graph::ModelGraph;
use crate::inspection::{self, ClassifierKey, GroupResult, ValidationReport};
use crate::language::ClassifierRegistry;
use crate::primitives::MAX_IDS_PER_REQUEST;
use crate::resolver::Instantiator;
use crate::retrieval::{self, DepthLimit, Retrieval};
use crate::store::{InstanceStore, MemoryStore};
use crate::storing::{self, StoreMode, StoreOutcome};
use crate::RepoError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

// =============================================================================
// LOW-LEVEL RESPONSES
// =============================================================================

/// Response of `partitions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionsResponse {
    pub is_ok: bool,
    pub error_message: Option<String>,
    pub chunk: Option<SerializedChunk>,
}

impl PartitionsResponse {
    pub fn success(chunk: SerializedChunk) -> Self {
        Self {
            is_ok: true,
            error_message: None,
            chunk: Some(chunk),
        }
    }

    pub fn error(err: &RepoError) -> Self {
        Self {
            is_ok: false,
            error_message: Some(err.to_string()),
            chunk: None,
        }
    }
}

/// Response of `retrieve`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieveResponse {
    pub is_ok: bool,
    pub error_message: Option<String>,
    pub is_valid_node_ids: bool,
    pub is_valid_depth_limit: bool,
    pub unknown_node_ids: Vec<String>,
    pub chunk: Option<SerializedChunk>,
}

impl RetrieveResponse {
    pub fn success(retrieval: Retrieval) -> Self {
        Self {
            is_ok: true,
            error_message: None,
            is_valid_node_ids: true,
            is_valid_depth_limit: true,
            unknown_node_ids: retrieval.unknown_ids,
            chunk: Some(retrieval.chunk),
        }
    }

    pub fn error(err: &RepoError) -> Self {
        Self {
            is_ok: false,
            error_message: Some(err.to_string()),
            is_valid_node_ids: !matches!(err, RepoError::InvalidNodeIds(_)),
            is_valid_depth_limit: !matches!(err, RepoError::InvalidDepthLimit(_)),
            unknown_node_ids: Vec::new(),
            chunk: None,
        }
    }
}

/// Response of `store`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreResponse {
    pub is_ok: bool,
    pub error_message: Option<String>,
    pub is_valid_mode: bool,
    pub is_valid_nodes: bool,
}

impl StoreResponse {
    pub fn success() -> Self {
        Self {
            is_ok: true,
            error_message: None,
            is_valid_mode: true,
            is_valid_nodes: true,
        }
    }

    pub fn error(err: &RepoError) -> Self {
        Self {
            is_ok: false,
            error_message: Some(err.to_string()),
            is_valid_mode: !matches!(
                err,
                RepoError::InvalidMode(_) | RepoError::UnsupportedStoreMode(_)
            ),
            is_valid_nodes: !matches!(
                err,
                RepoError::InvalidNodes(_) | RepoError::DuplicateId(_)
            ),
        }
    }
}

/// Response of `delete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub is_ok: bool,
    pub error_message: Option<String>,
    pub is_valid_node_ids: bool,
    pub unknown_node_ids: Vec<String>,
}

impl DeleteResponse {
    pub fn success(unknown_node_ids: Vec<String>) -> Self {
        Self {
            is_ok: true,
            error_message: None,
            is_valid_node_ids: true,
            unknown_node_ids,
        }
    }

    pub fn error(err: &RepoError) -> Self {
        Self {
            is_ok: false,
            error_message: Some(err.to_string()),
            is_valid_node_ids: !matches!(err, RepoError::InvalidNodeIds(_)),
            unknown_node_ids: Vec::new(),
        }
    }
}

/// Response of `ids`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdsResponse {
    pub is_ok: bool,
    pub error_message: Option<String>,
    pub is_valid_count: bool,
    pub ids: Vec<String>,
}

impl IdsResponse {
    pub fn success(ids: Vec<String>) -> Self {
        Self {
            is_ok: true,
            error_message: None,
            is_valid_count: true,
            ids,
        }
    }

    pub fn error(err: &RepoError) -> Self {
        Self {
            is_ok: false,
            error_message: Some(err.to_string()),
            is_valid_count: !matches!(err, RepoError::InvalidCount(_)),
            ids: Vec::new(),
        }
    }
}

// =============================================================================
// TRAITS
// =============================================================================

/// Bulk operations reporting failures as data.
///
/// Textual parameters (`depth_limit`, `mode`, `count`) are validated by the
/// implementation, as they arrive from a wire format.
pub trait BulkLowLevel {
    fn partitions(&self) -> PartitionsResponse;

    /// `depth_limit` of `None` means unbounded.
    fn retrieve(&self, ids: &[String], depth_limit: Option<&str>) -> RetrieveResponse;

    /// `mode` of `None` means replace.
    fn store(&self, chunk: &SerializedChunk, mode: Option<&str>) -> StoreResponse;

    fn delete(&self, ids: &[String]) -> DeleteResponse;

    fn ids(&self, count: &str) -> IdsResponse;
}

impl<T: BulkLowLevel + ?Sized> BulkLowLevel for &T {
    fn partitions(&self) -> PartitionsResponse {
        (**self).partitions()
    }

    fn retrieve(&self, ids: &[String], depth_limit: Option<&str>) -> RetrieveResponse {
        (**self).retrieve(ids, depth_limit)
    }

    fn store(&self, chunk: &SerializedChunk, mode: Option<&str>) -> StoreResponse {
        (**self).store(chunk, mode)
    }

    fn delete(&self, ids: &[String]) -> DeleteResponse {
        (**self).delete(ids)
    }

    fn ids(&self, count: &str) -> IdsResponse {
        (**self).ids(count)
    }
}

/// Bulk operations returning `Result`.
pub trait Bulk {
    fn partitions(&self) -> Result<SerializedChunk, RepoError>;

    fn retrieve(
        &self,
        ids: &[String],
        depth_limit: Option<usize>,
    ) -> Result<SerializedChunk, RepoError>;

    fn store(&self, chunk: &SerializedChunk, mode: StoreMode) -> Result<(), RepoError>;

    fn delete(&self, ids: &[String]) -> Result<(), RepoError>;

    fn ids(&self, count: usize) -> Result<Vec<String>, RepoError>;
}

/// High-level view over a low-level implementation.
#[derive(Debug, Clone)]
pub struct BulkLowLevelWrapper<L> {
    inner: L,
}

impl<L: BulkLowLevel> BulkLowLevelWrapper<L> {
    pub fn new(inner: L) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }
}

fn failed(error_message: Option<String>) -> RepoError {
    RepoError::Bulk(error_message.unwrap_or_else(|| "bulk operation failed".to_string()))
}

impl<L: BulkLowLevel> Bulk for BulkLowLevelWrapper<L> {
    fn partitions(&self) -> Result<SerializedChunk, RepoError> {
        let response = self.inner.partitions();
        match (response.is_ok, response.chunk) {
            (true, Some(chunk)) => Ok(chunk),
            _ => Err(failed(response.error_message)),
        }
    }

    fn retrieve(
        &self,
        ids: &[String],
        depth_limit: Option<usize>,
    ) -> Result<SerializedChunk, RepoError> {
        let depth = depth_limit.map(|d| d.to_string());
        let response = self.inner.retrieve(ids, depth.as_deref());
        match (response.is_ok, response.chunk) {
            (true, Some(chunk)) => Ok(chunk),
            _ => Err(failed(response.error_message)),
        }
    }

    fn store(&self, chunk: &SerializedChunk, mode: StoreMode) -> Result<(), RepoError> {
        let response = self.inner.store(chunk, Some(mode.as_str()));
        if response.is_ok {
            Ok(())
        } else {
            Err(failed(response.error_message))
        }
    }

    fn delete(&self, ids: &[String]) -> Result<(), RepoError> {
        let response = self.inner.delete(ids);
        if response.is_ok {
            Ok(())
        } else {
            Err(failed(response.error_message))
        }
    }

    fn ids(&self, count: usize) -> Result<Vec<String>, RepoError> {
        let response = self.inner.ids(&count.to_string());
        if response.is_ok {
            Ok(response.ids)
        } else {
            Err(failed(response.error_message))
        }
    }
}

// =============================================================================
// REPOSITORY
// =============================================================================

/// A store plus the bulk engines.
///
/// Reads share the store; a store, delete or ids call holds it exclusively,
/// so overlapping writes are serialized and every batch is observed whole.
#[derive(Debug)]
pub struct Repository<S> {
    store: RwLock<S>,
    config: RepositoryConfig,
    /// Next candidate suffix for `ids`.
    next_id: Mutex<u64>,
}

impl Repository<MemoryStore> {
    /// Repository over an empty in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }
}

impl<S: InstanceStore> Repository<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, RepositoryConfig::default())
    }

    pub fn with_config(store: S, config: RepositoryConfig) -> Self {
        Self {
            store: RwLock::new(store),
            config,
            next_id: Mutex::new(1),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, S>, RepoError> {
        self.store
            .read()
            .map_err(|_| RepoError::StoreUnavailable("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, S>, RepoError> {
        self.store
            .write()
            .map_err(|_| RepoError::StoreUnavailable("store lock poisoned".to_string()))
    }

    /// Run a read-only closure against the store.
    pub fn with_store<T>(&self, f: impl FnOnce(&S) -> Result<T, RepoError>) -> Result<T, RepoError> {
        let store = self.read()?;
        f(&store)
    }

    pub fn list_partitions(&self) -> Result<SerializedChunk, RepoError> {
        let store = self.read()?;
        retrieval::partitions(&*store, &self.config.serialization_format_version)
    }

    pub fn retrieve_nodes(&self, ids: &[String], depth: DepthLimit) -> Result<Retrieval, RepoError> {
        let store = self.read()?;
        retrieval::retrieve(&*store, ids, depth, &self.config.serialization_format_version)
    }

    pub fn store_chunk(
        &self,
        chunk: &SerializedChunk,
        mode: StoreMode,
    ) -> Result<StoreOutcome, RepoError> {
        if chunk.serialization_format_version != self.config.serialization_format_version {
            return Err(RepoError::InvalidNodes(format!(
                "chunk format version {:?} does not match repository version {:?}",
                chunk.serialization_format_version, self.config.serialization_format_version
            )));
        }
        let mut store = self.write()?;
        storing::store(&mut *store, chunk, mode)
    }

    /// Delete nodes with their subtrees. Returns the unknown ids.
    pub fn delete_nodes(&self, ids: &[String]) -> Result<Vec<String>, RepoError> {
        let mut store = self.write()?;
        storing::delete(&mut *store, ids).map(|(_, unknown)| unknown)
    }

    /// Reserve `count` fresh ids, skipping ids already stored.
    ///
    /// Counts above [`MAX_IDS_PER_REQUEST`] are rejected before anything is
    /// allocated or locked.
    pub fn reserve_ids(&self, count: usize) -> Result<Vec<String>, RepoError> {
        if count > MAX_IDS_PER_REQUEST {
            return Err(RepoError::InvalidCount(format!(
                "{count} exceeds the limit of {MAX_IDS_PER_REQUEST}"
            )));
        }
        let mut next = self
            .next_id
            .lock()
            .map_err(|_| RepoError::StoreUnavailable("id counter lock poisoned".to_string()))?;
        let store = self.read()?;
        let mut ids = Vec::with_capacity(count);
        while ids.len() < count {
            let candidate = format!("{}{}", self.config.id_prefix, *next);
            *next = next.saturating_add(1);
            if !store.contains_instance(&candidate)? {
                ids.push(candidate);
            }
        }
        tracing::debug!(count, "ids reserved");
        Ok(ids)
    }

    /// An instantiator configured with this repository's policies and
    /// format version.
    pub fn instantiator<'r, R: ClassifierRegistry + ?Sized>(
        &self,
        registry: &'r R,
    ) -> Instantiator<'r, R> {
        Instantiator::new(registry)
            .with_policies(self.config.policies)
            .with_format_version(&self.config.serialization_format_version)
    }

    /// Binary codec bounded by the configured payload limit.
    #[must_use]
    pub fn binary_codec(&self) -> BinaryCodec {
        BinaryCodec::with_limit(self.config.max_payload_bytes)
    }

    /// Retrieve nodes as a live graph.
    ///
    /// Links leaving the retrieved subtree towards stored nodes (children
    /// cut by the depth limit, parents of the requested nodes, reference
    /// targets) are kept as external links.
    pub fn retrieve_graph<R: ClassifierRegistry + ?Sized>(
        &self,
        ids: &[String],
        depth: DepthLimit,
        registry: &R,
    ) -> Result<ModelGraph, RepoError> {
        let store = self.read()?;
        let retrieval =
            retrieval::retrieve(&*store, ids, depth, &self.config.serialization_format_version)?;
        let chunk = retrieval.chunk;

        let mut external = Vec::new();
        for instance in chunk.instances() {
            let linked = instance
                .contained_ids()
                .chain(instance.parent_id.as_deref())
                .chain(
                    instance
                        .references
                        .iter()
                        .flat_map(|r| r.targets.iter().filter_map(|t| t.target.as_deref())),
                );
            for id in linked {
                if !chunk.contains_id(id) && store.contains_instance(id)? {
                    external.push(id.to_string());
                }
            }
        }
        drop(store);

        self.instantiator(registry)
            .with_external_ids(external)
            .to_graph(&chunk)
    }

    pub fn nodes_by_classifier(
        &self,
        limit: Option<usize>,
    ) -> Result<BTreeMap<ClassifierKey, GroupResult>, RepoError> {
        self.with_store(|store| inspection::nodes_by_classifier(store, limit))
    }

    pub fn nodes_by_language(
        &self,
        limit: Option<usize>,
    ) -> Result<BTreeMap<String, GroupResult>, RepoError> {
        self.with_store(|store| inspection::nodes_by_language(store, limit))
    }

    pub fn check_consistency(&self) -> Result<ValidationReport, RepoError> {
        self.with_store(|store| inspection::check_consistency(store))
    }
}

impl<S: InstanceStore> BulkLowLevel for Repository<S> {
    fn partitions(&self) -> PartitionsResponse {
        match self.list_partitions() {
            Ok(chunk) => PartitionsResponse::success(chunk),
            Err(err) => PartitionsResponse::error(&err),
        }
    }

    fn retrieve(&self, ids: &[String], depth_limit: Option<&str>) -> RetrieveResponse {
        let depth = DepthLimit::parse(depth_limit);
        if ids.is_empty() {
            let err =
                RepoError::InvalidNodeIds("at least one node id must be requested".to_string());
            let mut response = RetrieveResponse::error(&err);
            if let Err(depth_err) = depth {
                response.is_valid_depth_limit = false;
                response.error_message = Some(format!("{err}; {depth_err}"));
            }
            return response;
        }
        match depth.and_then(|depth| self.retrieve_nodes(ids, depth)) {
            Ok(retrieval) => RetrieveResponse::success(retrieval),
            Err(err) => RetrieveResponse::error(&err),
        }
    }

    fn store(&self, chunk: &SerializedChunk, mode: Option<&str>) -> StoreResponse {
        match StoreMode::parse(mode).and_then(|mode| self.store_chunk(chunk, mode)) {
            Ok(_) => StoreResponse::success(),
            Err(err) => StoreResponse::error(&err),
        }
    }

    fn delete(&self, ids: &[String]) -> DeleteResponse {
        match self.delete_nodes(ids) {
            Ok(unknown) => DeleteResponse::success(unknown),
            Err(err) => DeleteResponse::error(&err),
        }
    }

    fn ids(&self, count: &str) -> IdsResponse {
        let result = count
            .parse::<usize>()
            .map_err(|_| RepoError::InvalidCount(count.to_string()))
            .and_then(|count| self.reserve_ids(count));
        match result {
            Ok(ids) => IdsResponse::success(ids),
            Err(err) => IdsResponse::error(&err),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
