//! # Formats
//!
//! Wire encodings of chunks. The engines are format-agnostic; a codec only
//! turns a chunk into bytes and back.

pub mod codec;

pub use codec::{BinaryCodec, ChunkHeader, Codec, JsonCodec};
