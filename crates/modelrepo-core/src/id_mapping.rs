//! # Id Mapping
//!
//! Lets a client and the repository disagree on node-id spelling.
//!
//! `IdMapping` is an immutable bidirectional map, validated once at
//! construction. `IdMappingWrapper` decorates any `BulkLowLevel`
//! implementation: ids going in are translated external -> internal, ids
//! coming out internal -> external. Ids without an entry pass through.

use crate::bulk::{
    BulkLowLevel, DeleteResponse, IdsResponse, PartitionsResponse, RetrieveResponse,
    StoreResponse,
};
use crate::chunk::{SerializedChunk, SerializedClassifierInstance};
use crate::RepoError;
use std::collections::BTreeMap;

// =============================================================================
// MAPPING
// =============================================================================

/// Bijective map between external and internal ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMapping {
    to_internal: BTreeMap<String, String>,
    to_external: BTreeMap<String, String>,
}

impl IdMapping {
    /// Build from `(external, internal)` pairs.
    ///
    /// Fails with `InvalidIdMapping` if an id appears twice on either side.
    pub fn new<E, I>(pairs: impl IntoIterator<Item = (E, I)>) -> Result<Self, RepoError>
    where
        E: Into<String>,
        I: Into<String>,
    {
        let mut mapping = Self::default();
        for (external, internal) in pairs {
            let (external, internal) = (external.into(), internal.into());
            if mapping.to_internal.contains_key(&external) {
                return Err(RepoError::InvalidIdMapping(format!(
                    "external id {external} is mapped twice"
                )));
            }
            if mapping.to_external.contains_key(&internal) {
                return Err(RepoError::InvalidIdMapping(format!(
                    "internal id {internal} is mapped twice"
                )));
            }
            mapping
                .to_internal
                .insert(external.clone(), internal.clone());
            mapping.to_external.insert(internal, external);
        }
        Ok(mapping)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.to_internal.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_internal.is_empty()
    }

    #[must_use]
    pub fn to_internal<'a>(&'a self, external: &'a str) -> &'a str {
        self.to_internal
            .get(external)
            .map_or(external, String::as_str)
    }

    #[must_use]
    pub fn to_external<'a>(&'a self, internal: &'a str) -> &'a str {
        self.to_external
            .get(internal)
            .map_or(internal, String::as_str)
    }

    fn table(&self, direction: Direction) -> &BTreeMap<String, String> {
        match direction {
            Direction::ToInternal => &self.to_internal,
            Direction::ToExternal => &self.to_external,
        }
    }

    fn map_id(&self, id: &str, direction: Direction) -> String {
        self.table(direction)
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    fn map_ids(&self, ids: &[String], direction: Direction) -> Vec<String> {
        ids.iter().map(|id| self.map_id(id, direction)).collect()
    }

    pub fn ids_to_internal(&self, ids: &[String]) -> Vec<String> {
        self.map_ids(ids, Direction::ToInternal)
    }

    pub fn ids_to_external(&self, ids: &[String]) -> Vec<String> {
        self.map_ids(ids, Direction::ToExternal)
    }

    /// Rewrite every id-bearing field of a chunk: instance ids, parents,
    /// children, non-null reference targets and annotations.
    pub fn chunk_to_internal(&self, chunk: &SerializedChunk) -> Result<SerializedChunk, RepoError> {
        self.map_chunk(chunk, Direction::ToInternal)
    }

    pub fn chunk_to_external(&self, chunk: &SerializedChunk) -> Result<SerializedChunk, RepoError> {
        self.map_chunk(chunk, Direction::ToExternal)
    }

    fn map_chunk(
        &self,
        chunk: &SerializedChunk,
        direction: Direction,
    ) -> Result<SerializedChunk, RepoError> {
        let mut mapped = SerializedChunk::new(&chunk.serialization_format_version);
        for language in &chunk.languages {
            mapped.add_language(language.clone());
        }
        for instance in chunk.instances() {
            mapped.add_classifier_instance(self.map_instance(instance, direction))?;
        }
        Ok(mapped)
    }

    fn map_instance(
        &self,
        instance: &SerializedClassifierInstance,
        direction: Direction,
    ) -> SerializedClassifierInstance {
        let f = |id: &str| self.map_id(id, direction);
        let mut mapped = instance.clone();
        mapped.id = f(&instance.id);
        mapped.parent_id = instance.parent_id.as_deref().map(f);
        for containment in &mut mapped.containments {
            for child in &mut containment.children {
                *child = f(child.as_str());
            }
        }
        for reference in &mut mapped.references {
            for entry in &mut reference.targets {
                entry.target = entry.target.as_deref().map(f);
            }
        }
        for annotation in &mut mapped.annotations {
            *annotation = f(annotation.as_str());
        }
        mapped
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    ToInternal,
    ToExternal,
}

// =============================================================================
// WRAPPER
// =============================================================================

/// Decorates a low-level bulk implementation with id translation.
pub struct IdMappingWrapper<'m, L> {
    inner: L,
    mapping: &'m IdMapping,
}

impl<'m, L: BulkLowLevel> IdMappingWrapper<'m, L> {
    pub fn new(inner: L, mapping: &'m IdMapping) -> Self {
        Self { inner, mapping }
    }

    pub fn mapping(&self) -> &IdMapping {
        self.mapping
    }

    /// Map an outgoing chunk. Fails if translated ids collide.
    fn outgoing(&self, chunk: Option<SerializedChunk>) -> Result<Option<SerializedChunk>, RepoError> {
        chunk
            .map(|c| self.mapping.chunk_to_external(&c))
            .transpose()
    }
}

impl<L: BulkLowLevel> BulkLowLevel for IdMappingWrapper<'_, L> {
    fn partitions(&self) -> PartitionsResponse {
        let mut response = self.inner.partitions();
        match self.outgoing(response.chunk.take()) {
            Ok(chunk) => response.chunk = chunk,
            Err(err) => return PartitionsResponse::error(&err),
        }
        response
    }

    fn retrieve(&self, ids: &[String], depth_limit: Option<&str>) -> RetrieveResponse {
        let internal = self.mapping.ids_to_internal(ids);
        let mut response = self.inner.retrieve(&internal, depth_limit);
        response.unknown_node_ids = self.mapping.ids_to_external(&response.unknown_node_ids);
        match self.outgoing(response.chunk.take()) {
            Ok(chunk) => response.chunk = chunk,
            Err(err) => return RetrieveResponse::error(&err),
        }
        response
    }

    fn store(&self, chunk: &SerializedChunk, mode: Option<&str>) -> StoreResponse {
        match self.mapping.chunk_to_internal(chunk) {
            Ok(internal) => self.inner.store(&internal, mode),
            Err(err) => StoreResponse::error(&err),
        }
    }

    fn delete(&self, ids: &[String]) -> DeleteResponse {
        let internal = self.mapping.ids_to_internal(ids);
        let mut response = self.inner.delete(&internal);
        response.unknown_node_ids = self.mapping.ids_to_external(&response.unknown_node_ids);
        response
    }

    fn ids(&self, count: &str) -> IdsResponse {
        let mut response = self.inner.ids(count);
        response.ids = self.mapping.ids_to_external(&response.ids);
        response
    }
}

// =============================================================================
// TESTS
// =============================================================================
