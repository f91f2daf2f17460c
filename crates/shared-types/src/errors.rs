//! # Error Types
//!
//! Errors raised while decoding consensus-serialized data.

use thiserror::Error;

/// Errors that can occur while decoding wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// The input ended before the value was complete.
    #[error("Unexpected end of data: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// A CompactSize used a longer encoding than necessary.
    #[error("Non-canonical CompactSize encoding for value {0}")]
    NonCanonicalCompactSize(u64),

    /// A length-prefixed field exceeds its protocol limit.
    #[error("Field {field} too large: {len} (max: {max})")]
    Oversized {
        field: &'static str,
        len: u64,
        max: u64,
    },

    /// A field carried a value outside its allowed domain.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// A hex string could not be parsed.
    #[error("Invalid hex: {0}")]
    InvalidHex(String),
}
