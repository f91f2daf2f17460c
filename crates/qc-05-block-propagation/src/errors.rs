//! Error types for compact block construction and reconstruction.

use shared_types::{EncodingError, Hash256};
use thiserror::Error;

/// Errors building or converting compact block structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompactBlockError {
    #[error("Prefill index {index} out of range for block with {tx_count} transactions")]
    PrefillIndexOutOfRange { index: usize, tx_count: usize },

    #[error("Prefilled indices must be strictly increasing (position {position})")]
    PrefillNotIncreasing { position: usize },

    #[error("Transaction indices must be strictly increasing (position {position})")]
    IndicesNotIncreasing { position: usize },

    #[error("Requested index {index} out of range for block with {tx_count} transactions")]
    RequestIndexOutOfRange { index: usize, tx_count: usize },

    #[error("Differential index overflowed at position {position}")]
    IndexOverflow { position: usize },

    #[error("Compact block announces no transactions")]
    EmptyAnnouncement,

    #[error("Header mismatch: announced {announced}, block {block}")]
    HeaderMismatch { announced: Hash256, block: Hash256 },

    #[error("Prefilled transaction at index {index} does not match the block")]
    PrefilledMismatch { index: usize },

    #[error("Short ID at position {position} does not match block transaction {index}")]
    ShortIdMismatch { position: usize, index: usize },

    #[error("Transaction count mismatch: announced {announced}, block {block}")]
    CountMismatch { announced: usize, block: usize },

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

/// Errors while filling a partially downloaded block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconstructionError {
    #[error("Invalid compact block: {0}")]
    InvalidAnnouncement(#[from] CompactBlockError),

    #[error("blocktxn for wrong block: expected {expected}, got {got}")]
    BlockHashMismatch { expected: Hash256, got: Hash256 },

    #[error("blocktxn carries {got} transactions, {expected} were requested")]
    TransactionCountMismatch { expected: usize, got: usize },

    #[error("Reconstructed merkle root {computed} does not match header {expected}")]
    MerkleRootMismatch { expected: Hash256, computed: Hash256 },

    #[error("Block still missing {missing} transactions")]
    Incomplete { missing: usize },
}
