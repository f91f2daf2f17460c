//! # Compact Block Entities
//!
//! Wire structures for BIP152 compact block relay.
//!
//! ## Entities
//!
//! - [`ShortTxId`]: 6-byte keyed hash of a transaction id
//! - [`PrefilledTransaction`]: a transaction shipped in full inside an announcement
//! - [`HeaderAndShortIDs`]: announcement with absolute prefilled indices
//! - [`P2PHeaderAndShortIDs`]: the same announcement with differential indices,
//!   exactly as carried by the `cmpctblock` message
//! - [`BlockTransactionsRequest`]: `getblocktxn` payload (differential indices)
//! - [`BlockTransactions`]: `blocktxn` payload
//!
//! ## Index encoding
//!
//! Differential form stores the first index literally and every later index
//! as the gap to its predecessor minus one:
//!
//! ```text
//! absolute: [2, 3, 4, 9]
//! relative: [2, 0, 0, 4]
//! ```

use shared_types::{
    write_compact_size, write_vec, Block, BlockHeader, Decodable, Encodable, EncodingError, Hash256,
    Reader, Transaction,
};

use super::invariants::{check_prefilled_layout, first_non_increasing};
use super::services::{calculate_short_id, derive_siphash_keys};
use crate::errors::CompactBlockError;

/// Short IDs keep the low 48 bits of the SipHash output.
pub const SHORT_ID_MASK: u64 = 0xffff_ffff_ffff;

/// Largest absolute index accepted when decoding differential indices.
pub const MAX_TX_INDEX: u64 = u32::MAX as u64;

/// Short transaction ID (6 bytes on the wire, held in a `u64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ShortTxId(pub u64);

impl ShortTxId {
    pub const SIZE: usize = 6;

    pub fn new(raw: u64) -> Self {
        ShortTxId(raw & SHORT_ID_MASK)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Encodable for ShortTxId {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_le_bytes()[..Self::SIZE]);
    }
}

impl Decodable for ShortTxId {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        let raw = reader.read_array::<6>()?;
        let mut wide = [0u8; 8];
        wide[..Self::SIZE].copy_from_slice(&raw);
        Ok(ShortTxId(u64::from_le_bytes(wide)))
    }
}

/// Transaction inlined in an announcement.
///
/// `index` is absolute inside [`HeaderAndShortIDs`] and differential inside
/// [`P2PHeaderAndShortIDs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefilledTransaction {
    pub index: usize,
    pub tx: Transaction,
}

impl PrefilledTransaction {
    pub fn new(index: usize, tx: Transaction) -> Self {
        Self { index, tx }
    }
}

impl Encodable for PrefilledTransaction {
    fn encode(&self, out: &mut Vec<u8>) {
        write_compact_size(out, self.index as u64);
        self.tx.encode(out);
    }
}

impl Decodable for PrefilledTransaction {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            index: reader.read_compact_usize()?,
            tx: Transaction::decode(reader)?,
        })
    }
}

/// `cmpctblock` payload as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct P2PHeaderAndShortIDs {
    pub header: BlockHeader,
    pub nonce: u64,
    pub short_ids: Vec<ShortTxId>,
    /// Prefilled transactions with differential indices.
    pub prefilled: Vec<PrefilledTransaction>,
}

impl Encodable for P2PHeaderAndShortIDs {
    fn encode(&self, out: &mut Vec<u8>) {
        self.header.encode(out);
        out.extend_from_slice(&self.nonce.to_le_bytes());
        write_vec(out, &self.short_ids);
        write_vec(out, &self.prefilled);
    }
}

impl Decodable for P2PHeaderAndShortIDs {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            header: BlockHeader::decode(reader)?,
            nonce: reader.read_u64_le()?,
            short_ids: reader.read_vec()?,
            prefilled: reader.read_vec()?,
        })
    }
}

/// Compact block announcement with absolute prefilled indices.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderAndShortIDs {
    pub header: BlockHeader,
    pub nonce: u64,
    /// Sorted by index, each index unique and inside the block.
    pub prefilled: Vec<PrefilledTransaction>,
    /// One entry per non-prefilled transaction, in block order.
    pub short_ids: Vec<ShortTxId>,
}

impl HeaderAndShortIDs {
    /// Build an announcement for `block`.
    ///
    /// Index 0 (the coinbase) is always prefilled. `prefill` may be unsorted
    /// and may repeat entries; indices past the end of the block are rejected.
    pub fn from_block(block: &Block, nonce: u64, prefill: &[usize]) -> Result<Self, CompactBlockError> {
        let tx_count = block.transactions.len();
        let mut indices: Vec<usize> = Vec::with_capacity(prefill.len() + 1);
        indices.push(0);
        indices.extend_from_slice(prefill);
        indices.sort_unstable();
        indices.dedup();

        if let Some(&index) = indices.iter().find(|&&i| i >= tx_count) {
            return Err(CompactBlockError::PrefillIndexOutOfRange { index, tx_count });
        }

        let (k0, k1) = derive_siphash_keys(&block.header, nonce);
        let mut prefilled = Vec::with_capacity(indices.len());
        let mut short_ids = Vec::with_capacity(tx_count - indices.len());
        let mut next_prefill = indices.iter().peekable();
        for (i, tx) in block.transactions.iter().enumerate() {
            if next_prefill.peek() == Some(&&i) {
                next_prefill.next();
                prefilled.push(PrefilledTransaction::new(i, tx.clone()));
            } else {
                short_ids.push(calculate_short_id(k0, k1, &tx.txid()));
            }
        }

        Ok(Self {
            header: block.header,
            nonce,
            prefilled,
            short_ids,
        })
    }

    /// Number of transactions the announced block contains.
    pub fn tx_count(&self) -> usize {
        self.prefilled.len() + self.short_ids.len()
    }

    pub fn block_hash(&self) -> Hash256 {
        self.header.block_hash()
    }

    pub fn siphash_keys(&self) -> (u64, u64) {
        derive_siphash_keys(&self.header, self.nonce)
    }

    /// Positions (absolute) that carry a short ID rather than a transaction.
    pub fn short_id_positions(&self) -> Vec<usize> {
        let mut prefilled = self.prefilled.iter().map(|p| p.index).peekable();
        (0..self.tx_count())
            .filter(|i| {
                if prefilled.peek() == Some(i) {
                    prefilled.next();
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    /// Convert to the wire form with differential prefilled indices.
    pub fn to_p2p(&self) -> Result<P2PHeaderAndShortIDs, CompactBlockError> {
        let absolute: Vec<usize> = self.prefilled.iter().map(|p| p.index).collect();
        let relative = to_relative(&absolute)
            .map_err(|position| CompactBlockError::PrefillNotIncreasing { position })?;
        let prefilled = self
            .prefilled
            .iter()
            .zip(relative)
            .map(|(p, index)| PrefilledTransaction::new(index, p.tx.clone()))
            .collect();
        Ok(P2PHeaderAndShortIDs {
            header: self.header,
            nonce: self.nonce,
            short_ids: self.short_ids.clone(),
            prefilled,
        })
    }

    /// Convert from the wire form, resolving differential indices and
    /// validating them against the announced transaction count.
    pub fn from_p2p(p2p: &P2PHeaderAndShortIDs) -> Result<Self, CompactBlockError> {
        let relative: Vec<usize> = p2p.prefilled.iter().map(|p| p.index).collect();
        let absolute = to_absolute(&relative)?;
        let cmpct = Self {
            header: p2p.header,
            nonce: p2p.nonce,
            prefilled: p2p
                .prefilled
                .iter()
                .zip(absolute)
                .map(|(p, index)| PrefilledTransaction::new(index, p.tx.clone()))
                .collect(),
            short_ids: p2p.short_ids.clone(),
        };
        check_prefilled_layout(&cmpct)?;
        Ok(cmpct)
    }
}

/// `getblocktxn` payload. Indices are stored in differential form, the way
/// they travel on the wire; use [`BlockTransactionsRequest::to_absolute`] to
/// read them as block positions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockTransactionsRequest {
    pub block_hash: Hash256,
    pub indexes: Vec<usize>,
}

impl BlockTransactionsRequest {
    pub fn new(block_hash: Hash256, relative: Vec<usize>) -> Self {
        Self {
            block_hash,
            indexes: relative,
        }
    }

    /// Build a request from strictly increasing absolute indices.
    pub fn from_absolute(block_hash: Hash256, absolute: &[usize]) -> Result<Self, CompactBlockError> {
        let indexes = to_relative(absolute)
            .map_err(|position| CompactBlockError::IndicesNotIncreasing { position })?;
        Ok(Self {
            block_hash,
            indexes,
        })
    }

    pub fn to_absolute(&self) -> Result<Vec<usize>, CompactBlockError> {
        to_absolute(&self.indexes)
    }
}

impl Encodable for BlockTransactionsRequest {
    fn encode(&self, out: &mut Vec<u8>) {
        self.block_hash.encode(out);
        write_compact_size(out, self.indexes.len() as u64);
        for index in &self.indexes {
            write_compact_size(out, *index as u64);
        }
    }
}

impl Decodable for BlockTransactionsRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        let block_hash = Hash256::decode(reader)?;
        let count = reader.read_compact_usize()?;
        if count > reader.remaining() {
            return Err(EncodingError::UnexpectedEof {
                needed: count,
                remaining: reader.remaining(),
            });
        }
        let mut indexes = Vec::with_capacity(count);
        for _ in 0..count {
            indexes.push(reader.read_compact_usize()?);
        }
        Ok(Self {
            block_hash,
            indexes,
        })
    }
}

/// `blocktxn` payload: the requested transactions in request order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockTransactions {
    pub block_hash: Hash256,
    pub transactions: Vec<Transaction>,
}

impl BlockTransactions {
    pub fn new(block_hash: Hash256, transactions: Vec<Transaction>) -> Self {
        Self {
            block_hash,
            transactions,
        }
    }

    /// Answer `request` from `block`. Indices outside the block are an error.
    pub fn for_request(block: &Block, request: &BlockTransactionsRequest) -> Result<Self, CompactBlockError> {
        let tx_count = block.transactions.len();
        let transactions = request
            .to_absolute()?
            .into_iter()
            .map(|index| {
                block
                    .transactions
                    .get(index)
                    .cloned()
                    .ok_or(CompactBlockError::RequestIndexOutOfRange { index, tx_count })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(request.block_hash, transactions))
    }
}

impl Encodable for BlockTransactions {
    fn encode(&self, out: &mut Vec<u8>) {
        self.block_hash.encode(out);
        write_vec(out, &self.transactions);
    }
}

impl Decodable for BlockTransactions {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            block_hash: Hash256::decode(reader)?,
            transactions: reader.read_vec()?,
        })
    }
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Absolute → differential. On failure returns the position of the first
/// index that is not greater than its predecessor.
pub fn to_relative(absolute: &[usize]) -> Result<Vec<usize>, usize> {
    if let Some(position) = first_non_increasing(absolute) {
        return Err(position);
    }
    let mut last: Option<usize> = None;
    Ok(absolute
        .iter()
        .map(|&x| {
            let rel = match last {
                Some(prev) => x - prev - 1,
                None => x,
            };
            last = Some(x);
            rel
        })
        .collect())
}

/// Differential → absolute, rejecting results past [`MAX_TX_INDEX`].
pub fn to_absolute(relative: &[usize]) -> Result<Vec<usize>, CompactBlockError> {
    let mut next: u64 = 0;
    relative
        .iter()
        .enumerate()
        .map(|(position, &x)| {
            let abs = next
                .checked_add(x as u64)
                .filter(|&abs| abs <= MAX_TX_INDEX)
                .ok_or(CompactBlockError::IndexOverflow { position })?;
            next = abs + 1;
            Ok(abs as usize)
        })
        .collect()
}
