//! Invariant checks for compact block structures.
//!
//! - Prefilled and requested indices are strictly increasing.
//! - Prefilled indices address a transaction inside the block.
//! - `|prefilled| + |short_ids|` equals the block's transaction count.

use super::HeaderAndShortIDs;
use crate::errors::CompactBlockError;

/// Returns the first position whose index is not greater than its
/// predecessor, or `None` when the sequence is strictly increasing.
pub fn first_non_increasing(indices: &[usize]) -> Option<usize> {
    indices
        .windows(2)
        .position(|pair| pair[1] <= pair[0])
        .map(|p| p + 1)
}

/// Validate the prefilled layout of an announcement against its own
/// transaction count.
pub fn check_prefilled_layout(cmpct: &HeaderAndShortIDs) -> Result<(), CompactBlockError> {
    let tx_count = cmpct.tx_count();
    if tx_count == 0 {
        return Err(CompactBlockError::EmptyAnnouncement);
    }
    let indices: Vec<usize> = cmpct.prefilled.iter().map(|p| p.index).collect();
    if let Some(position) = first_non_increasing(&indices) {
        return Err(CompactBlockError::PrefillNotIncreasing { position });
    }
    if let Some(&index) = indices.iter().find(|&&i| i >= tx_count) {
        return Err(CompactBlockError::PrefillIndexOutOfRange { index, tx_count });
    }
    Ok(())
}

/// Completeness: every block position is covered exactly once.
pub fn covers_block(cmpct: &HeaderAndShortIDs, block_tx_count: usize) -> bool {
    cmpct.tx_count() == block_tx_count
}
