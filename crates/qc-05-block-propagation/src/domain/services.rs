//! Domain services for compact block relay.

use shared_types::{sha256, Block, BlockHeader, Encodable, Hash256};
use siphasher::sip::SipHasher24;
use std::hash::Hasher;

use super::{covers_block, HeaderAndShortIDs, ShortTxId};
use crate::errors::CompactBlockError;

/// Derive the SipHash keys for an announcement.
///
/// Formula: `h = SHA256(header ‖ nonce_le)`, `k0 = le_u64(h[0..8])`,
/// `k1 = le_u64(h[8..16])`. A single SHA-256, not the double hash used for
/// identifiers.
pub fn derive_siphash_keys(header: &BlockHeader, nonce: u64) -> (u64, u64) {
    let mut data = header.to_bytes();
    data.extend_from_slice(&nonce.to_le_bytes());
    let digest = sha256(&data);

    let mut k0 = [0u8; 8];
    let mut k1 = [0u8; 8];
    k0.copy_from_slice(&digest[0..8]);
    k1.copy_from_slice(&digest[8..16]);
    (u64::from_le_bytes(k0), u64::from_le_bytes(k1))
}

/// Calculate a short transaction ID.
///
/// Formula: `short_id = SipHash-2-4(k0, k1, txid) & 0xffffffffffff`, with the
/// txid fed in internal byte order.
///
/// Reference: BIP152 (Compact Block Relay)
pub fn calculate_short_id(k0: u64, k1: u64, tx_hash: &Hash256) -> ShortTxId {
    let mut hasher = SipHasher24::new_with_keys(k0, k1);
    hasher.write(tx_hash.as_bytes());
    ShortTxId::new(hasher.finish())
}

/// Check that `cmpct` is a faithful announcement of `block`: same header,
/// coinbase prefilled, prefilled transactions equal to the block's, and every
/// short ID matching the corresponding block transaction in order.
pub fn check_compactblock_construction(
    cmpct: &HeaderAndShortIDs,
    block: &Block,
) -> Result<(), CompactBlockError> {
    if cmpct.header != block.header {
        return Err(CompactBlockError::HeaderMismatch {
            announced: cmpct.block_hash(),
            block: block.block_hash(),
        });
    }
    if !covers_block(cmpct, block.transactions.len()) {
        return Err(CompactBlockError::CountMismatch {
            announced: cmpct.tx_count(),
            block: block.transactions.len(),
        });
    }
    match cmpct.prefilled.first() {
        Some(first) if first.index == 0 => {}
        _ => return Err(CompactBlockError::PrefilledMismatch { index: 0 }),
    }
    for prefilled in &cmpct.prefilled {
        match block.transactions.get(prefilled.index) {
            Some(tx) if *tx == prefilled.tx => {}
            _ => {
                return Err(CompactBlockError::PrefilledMismatch {
                    index: prefilled.index,
                })
            }
        }
    }

    let (k0, k1) = cmpct.siphash_keys();
    for (position, (index, short_id)) in cmpct
        .short_id_positions()
        .into_iter()
        .zip(&cmpct.short_ids)
        .enumerate()
    {
        let expected = calculate_short_id(k0, k1, &block.transactions[index].txid());
        if expected != *short_id {
            return Err(CompactBlockError::ShortIdMismatch { position, index });
        }
    }
    Ok(())
}
