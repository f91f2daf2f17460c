//! Rebuilding a block from a compact announcement.
//!
//! [`PartiallyDownloadedBlock`] matches announced short IDs against a pool of
//! known transactions, reports what is still missing as a
//! [`BlockTransactionsRequest`], and accepts the `blocktxn` answer. A bad
//! answer is rejected without touching the partial state, so the caller can
//! still fall back to requesting the full block.

use std::collections::{HashMap, HashSet};

use shared_types::{merkle_root, Block, BlockHeader, Hash256, Transaction};
use tracing::{debug, warn};

use super::{
    calculate_short_id, check_prefilled_layout, BlockTransactions, BlockTransactionsRequest,
    HeaderAndShortIDs, ShortTxId,
};
use crate::errors::ReconstructionError;

/// Several distinct transactions share one announced short ID.
///
/// Positions hit by a collision are left empty and requested explicitly;
/// picking one of the candidates is left to the node being tested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortIdCollision {
    pub short_id: ShortTxId,
    /// Absolute block position the short ID was announced for.
    pub position: usize,
    /// Pool transactions hashing to this short ID. Empty when the collision
    /// is between two positions of the announcement itself.
    pub candidates: Vec<Hash256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconstructionStatus {
    Complete,
    Incomplete { missing: Vec<usize> },
}

/// Block under reconstruction.
#[derive(Debug, Clone)]
pub struct PartiallyDownloadedBlock {
    header: BlockHeader,
    slots: Vec<Option<Transaction>>,
    collisions: Vec<ShortIdCollision>,
}

impl PartiallyDownloadedBlock {
    /// Start reconstruction from an announcement and the locally known
    /// transactions.
    ///
    /// Matching is positional: the n-th short ID is looked up for the n-th
    /// position that is not prefilled.
    pub fn init<'a, I>(cmpct: &HeaderAndShortIDs, pool: I) -> Result<Self, ReconstructionError>
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        check_prefilled_layout(cmpct)?;

        let (k0, k1) = cmpct.siphash_keys();
        let mut by_short_id: HashMap<ShortTxId, Vec<&'a Transaction>> = HashMap::new();
        let mut seen: HashSet<Hash256> = HashSet::new();
        for tx in pool {
            let txid = tx.txid();
            if !seen.insert(txid) {
                continue;
            }
            by_short_id
                .entry(calculate_short_id(k0, k1, &txid))
                .or_default()
                .push(tx);
        }

        let mut announced: HashMap<ShortTxId, usize> = HashMap::new();
        for id in &cmpct.short_ids {
            *announced.entry(*id).or_default() += 1;
        }

        let mut slots: Vec<Option<Transaction>> = vec![None; cmpct.tx_count()];
        for prefilled in &cmpct.prefilled {
            slots[prefilled.index] = Some(prefilled.tx.clone());
        }

        let mut collisions = Vec::new();
        for (position, short_id) in cmpct.short_id_positions().into_iter().zip(&cmpct.short_ids) {
            if announced.get(short_id).copied().unwrap_or(0) > 1 {
                collisions.push(ShortIdCollision {
                    short_id: *short_id,
                    position,
                    candidates: Vec::new(),
                });
                continue;
            }
            match by_short_id.get(short_id).map(Vec::as_slice) {
                Some([tx]) => slots[position] = Some((*tx).clone()),
                Some(candidates) if candidates.len() > 1 => {
                    collisions.push(ShortIdCollision {
                        short_id: *short_id,
                        position,
                        candidates: candidates.iter().map(|tx| tx.txid()).collect(),
                    });
                }
                _ => {}
            }
        }

        if !collisions.is_empty() {
            warn!(
                block = %cmpct.block_hash(),
                count = collisions.len(),
                "short ID collisions in compact block, affected positions will be requested"
            );
        }

        let partial = Self {
            header: cmpct.header,
            slots,
            collisions,
        };
        debug!(
            block = %partial.block_hash(),
            total = partial.slots.len(),
            missing = partial.missing_indices().len(),
            "initialized partially downloaded block"
        );
        Ok(partial)
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn block_hash(&self) -> Hash256 {
        self.header.block_hash()
    }

    pub fn collisions(&self) -> &[ShortIdCollision] {
        &self.collisions
    }

    /// Absolute positions still lacking a transaction, ascending.
    pub fn missing_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.is_none().then_some(i))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn status(&self) -> ReconstructionStatus {
        let missing = self.missing_indices();
        if missing.is_empty() {
            ReconstructionStatus::Complete
        } else {
            ReconstructionStatus::Incomplete { missing }
        }
    }

    /// The `getblocktxn` needed to finish this block, if any.
    pub fn request(&self) -> Option<BlockTransactionsRequest> {
        let missing = self.missing_indices();
        if missing.is_empty() {
            return None;
        }
        // Missing positions come out of an ascending scan, so they are
        // strictly increasing and the conversion cannot fail.
        BlockTransactionsRequest::from_absolute(self.block_hash(), &missing).ok()
    }

    /// Fill the missing positions from a `blocktxn` answer.
    ///
    /// On any mismatch (wrong block, wrong count, merkle root not matching
    /// the header) the partial block is left exactly as it was.
    pub fn fill(&mut self, response: &BlockTransactions) -> Result<Block, ReconstructionError> {
        let expected = self.block_hash();
        if response.block_hash != expected {
            return Err(ReconstructionError::BlockHashMismatch {
                expected,
                got: response.block_hash,
            });
        }
        let missing = self.missing_indices();
        if response.transactions.len() != missing.len() {
            return Err(ReconstructionError::TransactionCountMismatch {
                expected: missing.len(),
                got: response.transactions.len(),
            });
        }

        let mut candidate = self.slots.clone();
        for (index, tx) in missing.into_iter().zip(&response.transactions) {
            candidate[index] = Some(tx.clone());
        }
        let block = self.assemble(&candidate)?;
        self.slots = candidate;
        Ok(block)
    }

    /// Produce the block when nothing is missing.
    pub fn to_block(&self) -> Result<Block, ReconstructionError> {
        self.assemble(&self.slots)
    }

    fn assemble(&self, slots: &[Option<Transaction>]) -> Result<Block, ReconstructionError> {
        let transactions: Vec<Transaction> = slots.iter().flatten().cloned().collect();
        if transactions.len() != slots.len() {
            return Err(ReconstructionError::Incomplete {
                missing: slots.len() - transactions.len(),
            });
        }
        let txids: Vec<Hash256> = transactions.iter().map(Transaction::txid).collect();
        let computed = merkle_root(&txids);
        if computed != self.header.merkle_root {
            return Err(ReconstructionError::MerkleRootMismatch {
                expected: self.header.merkle_root,
                computed,
            });
        }
        Ok(Block {
            header: self.header,
            transactions,
        })
    }
}
