//! Shared protocol definitions for the `BoardSync` wire format.

pub mod entity;
pub mod event;
pub mod presence;

/// Error type for wire encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("encode error: {0}")]
    Encode(String),
    /// Deserialization failed.
    #[error("decode error: {0}")]
    Decode(String),
}
