//! # Primitives
//!
//! Compiled-in constants of the repository core.
//!
//! These values are immutable at runtime. Configurable defaults live in
//! `config`; everything here is part of the format contract.

/// Serialization format versions this core can read and write.
pub const SUPPORTED_FORMAT_VERSIONS: &[&str] = &["2023.1", "2024.1"];

/// Default serialization format version tag for produced chunks.
pub const DEFAULT_FORMAT_VERSION: &str = "2023.1";

/// Default prefix for ids handed out by `ids(count)`.
pub const DEFAULT_ID_PREFIX: &str = "id-";

/// Upper bound on the ids a single `ids(count)` call may reserve.
pub const MAX_IDS_PER_REQUEST: usize = 100_000;

/// Magic bytes for the binary chunk codec header.
pub const MAGIC_BYTES: &[u8; 4] = b"MRCH";

/// Current binary codec format version.
///
/// Increment this when making breaking changes to the binary layout.
pub const BINARY_FORMAT_VERSION: u8 = 1;

/// Length of the binary codec header (magic + version byte).
pub const BINARY_HEADER_LEN: usize = 5;

/// Default upper bound for a binary payload.
///
/// Checked before decoding so corrupted input cannot force large allocations.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 256 * 1024 * 1024;

// =============================================================================
// ID RULES
// =============================================================================

/// Node ids may only contain ASCII letters, digits, `_` and `-`.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
