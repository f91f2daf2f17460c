//! Framing errors.

use shared_types::EncodingError;
use thiserror::Error;

/// Errors raised while framing or parsing P2P messages.
///
/// Every variant produced by [`crate::WireCodec::try_parse`] is fatal to the
/// connection it came from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("magic bytes mismatch: {} != {}", hex::encode(got), hex::encode(expected))]
    BadMagic { expected: [u8; 4], got: [u8; 4] },

    #[error("oversized message {command}: {length} bytes (max: {max})")]
    Oversized {
        command: String,
        length: usize,
        max: usize,
    },

    #[error("got bad checksum for {command}: {} != {}", hex::encode(got), hex::encode(expected))]
    BadChecksum {
        command: String,
        expected: [u8; 4],
        got: [u8; 4],
    },

    /// Unregistered command in strict mode. `consumed` still covers the whole
    /// frame so a caller that chooses to continue can skip it.
    #[error("received unknown msgtype '{command}' ({consumed} bytes)")]
    UnknownCommand { command: String, consumed: usize },

    #[error("failed to decode {command} payload: {source}")]
    Payload {
        command: String,
        #[source]
        source: EncodingError,
    },

    #[error("command too long: {0} (max 12 bytes)")]
    CommandTooLong(String),

    #[error("unknown network: {0}")]
    UnknownNetwork(String),
}

impl FrameError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FrameError::BadMagic { .. } => "magic",
            FrameError::Oversized { .. } => "oversized",
            FrameError::BadChecksum { .. } => "checksum",
            FrameError::UnknownCommand { .. } => "unknown",
            FrameError::Payload { .. } => "payload",
            FrameError::CommandTooLong(_) => "command",
            FrameError::UnknownNetwork(_) => "network",
        }
    }
}
