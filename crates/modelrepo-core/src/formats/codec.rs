//! # Chunk Codecs
//!
//! Two encodings of `SerializedChunk`:
//!
//! - `JsonCodec`: the interchange JSON layout with camelCase keys
//!   (`serializationFormatVersion`, `languages`, `nodes`).
//! - `BinaryCodec`: header (5 bytes) + postcard payload.
//!   - 4 bytes: Magic ("MRCH")
//!   - 1 byte: Version
//!
//! Both codecs are pure transformations, no I/O. Decoding validates the
//! header and the payload size before parsing the payload.

use crate::chunk::SerializedChunk;
use crate::primitives::{
    BINARY_FORMAT_VERSION, BINARY_HEADER_LEN, DEFAULT_MAX_PAYLOAD_BYTES, MAGIC_BYTES,
};
use crate::RepoError;

/// Chunk <-> bytes.
pub trait Codec {
    fn encode(&self, chunk: &SerializedChunk) -> Result<Vec<u8>, RepoError>;

    fn decode(&self, bytes: &[u8]) -> Result<SerializedChunk, RepoError>;
}

// =============================================================================
// JSON
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Codec for JsonCodec {
    fn encode(&self, chunk: &SerializedChunk) -> Result<Vec<u8>, RepoError> {
        let result = if self.pretty {
            serde_json::to_vec_pretty(chunk)
        } else {
            serde_json::to_vec(chunk)
        };
        result.map_err(|e| RepoError::SerializationError(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<SerializedChunk, RepoError> {
        serde_json::from_slice(bytes).map_err(|e| RepoError::DeserializationError(e.to_string()))
    }
}

// =============================================================================
// BINARY
// =============================================================================

/// The header preceding a binary chunk payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl ChunkHeader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *MAGIC_BYTES,
            version: BINARY_FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), RepoError> {
        if &self.magic != MAGIC_BYTES {
            return Err(RepoError::DeserializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != BINARY_FORMAT_VERSION {
            return Err(RepoError::DeserializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version, BINARY_FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; BINARY_HEADER_LEN] {
        let [m0, m1, m2, m3] = self.magic;
        [m0, m1, m2, m3, self.version]
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RepoError> {
        match bytes {
            [m0, m1, m2, m3, version, ..] => Ok(Self {
                magic: [*m0, *m1, *m2, *m3],
                version: *version,
            }),
            _ => Err(RepoError::DeserializationError(
                "Header too short".to_string(),
            )),
        }
    }
}

impl Default for ChunkHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Framed postcard encoding.
#[derive(Debug, Clone, Copy)]
pub struct BinaryCodec {
    max_payload_bytes: usize,
}

impl BinaryCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_PAYLOAD_BYTES)
    }

    /// Codec refusing inputs larger than `max_payload_bytes`.
    #[must_use]
    pub fn with_limit(max_payload_bytes: usize) -> Self {
        Self { max_payload_bytes }
    }
}

impl Default for BinaryCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for BinaryCodec {
    fn encode(&self, chunk: &SerializedChunk) -> Result<Vec<u8>, RepoError> {
        let payload =
            postcard::to_stdvec(chunk).map_err(|e| RepoError::SerializationError(e.to_string()))?;
        if payload.len() > self.max_payload_bytes {
            return Err(RepoError::SerializationError(format!(
                "Payload size {} bytes exceeds maximum allowed {} bytes",
                payload.len(),
                self.max_payload_bytes
            )));
        }

        let mut bytes = Vec::with_capacity(BINARY_HEADER_LEN.saturating_add(payload.len()));
        bytes.extend_from_slice(&ChunkHeader::new().to_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<SerializedChunk, RepoError> {
        let header = ChunkHeader::from_bytes(bytes)?;
        let payload = bytes.get(BINARY_HEADER_LEN..).unwrap_or_default();
        if payload.len() > self.max_payload_bytes {
            return Err(RepoError::DeserializationError(format!(
                "Payload size {} bytes exceeds maximum allowed {} bytes",
                payload.len(),
                self.max_payload_bytes
            )));
        }
        header.validate()?;

        postcard::from_bytes(payload).map_err(|e| {
            RepoError::DeserializationError(format!("Failed to deserialize chunk: {e}"))
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
