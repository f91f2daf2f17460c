//! # Core Domain Entities
//!
//! Bitcoin-Cash style chain primitives: no witness data, 80-byte headers,
//! double-SHA256 identifiers.
//!
//! ## Clusters
//!
//! - **Transactions**: `OutPoint`, `TxIn`, `TxOut`, `Transaction`
//! - **Blocks**: `BlockHeader`, `Block`, merkle root computation
//! - **Proof of work**: compact target decoding and a nonce search for
//!   regtest-difficulty headers

use crate::encoding::{write_var_bytes, write_vec, Decodable, Encodable, Reader};
use crate::errors::EncodingError;
use crate::hash::{sha256d, Hash256};

/// Upper bound on a scriptSig or scriptPubKey accepted when decoding.
pub const MAX_SCRIPT_BYTES: usize = 1_000_000;

/// Compact difficulty used by regtest (`0x207fffff`).
pub const REGTEST_BITS: u32 = 0x207f_ffff;

// =============================================================================
// CLUSTER A: TRANSACTIONS
// =============================================================================

/// Reference to a specific output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OutPoint {
    pub hash: Hash256,
    pub n: u32,
}

impl OutPoint {
    /// The null outpoint spent by coinbase transactions.
    pub const NULL: OutPoint = OutPoint {
        hash: Hash256::ZERO,
        n: u32::MAX,
    };

    pub fn new(hash: Hash256, n: u32) -> Self {
        Self { hash, n }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl Encodable for OutPoint {
    fn encode(&self, out: &mut Vec<u8>) {
        self.hash.encode(out);
        out.extend_from_slice(&self.n.to_le_bytes());
    }
}

impl Decodable for OutPoint {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            hash: Hash256::decode(reader)?,
            n: reader.read_u32_le()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn new(prevout: OutPoint, script_sig: Vec<u8>) -> Self {
        Self {
            prevout,
            script_sig,
            sequence: u32::MAX,
        }
    }
}

impl Encodable for TxIn {
    fn encode(&self, out: &mut Vec<u8>) {
        self.prevout.encode(out);
        write_var_bytes(out, &self.script_sig);
        out.extend_from_slice(&self.sequence.to_le_bytes());
    }
}

impl Decodable for TxIn {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            prevout: OutPoint::decode(reader)?,
            script_sig: reader.read_var_bytes("scriptSig", MAX_SCRIPT_BYTES)?,
            sequence: reader.read_u32_le()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxOut {
    /// Amount in satoshis.
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    pub fn new(value: i64, script_pubkey: Vec<u8>) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }
}

impl Encodable for TxOut {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value.to_le_bytes());
        write_var_bytes(out, &self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            value: reader.read_i64_le()?,
            script_pubkey: reader.read_var_bytes("scriptPubKey", MAX_SCRIPT_BYTES)?,
        })
    }
}

/// A transaction. Its identifier is derived from the serialized fields every
/// time [`Transaction::txid`] is called, so edits are always reflected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            version: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        }
    }
}

impl Transaction {
    /// Build a coinbase for `height` paying `value` to an anyone-can-spend
    /// `OP_TRUE` output. The height is pushed first in the scriptSig (BIP34).
    pub fn coinbase(height: u32, value: i64) -> Self {
        let mut script_sig = push_script_number(i64::from(height));
        // Padding keeps scriptSig at or above the 2-byte consensus minimum.
        script_sig.extend_from_slice(&[0x51, 0x51]);
        Self {
            version: 1,
            inputs: vec![TxIn::new(OutPoint::NULL, script_sig)],
            outputs: vec![TxOut::new(value, vec![0x51])],
            lock_time: 0,
        }
    }

    /// Build a transaction spending `prevout` into a single `OP_TRUE` output.
    pub fn spend(prevout: OutPoint, value: i64) -> Self {
        Self {
            version: 1,
            inputs: vec![TxIn::new(prevout, Vec::new())],
            outputs: vec![TxOut::new(value, vec![0x51])],
            lock_time: 0,
        }
    }

    pub fn txid(&self) -> Hash256 {
        sha256d(&self.to_bytes())
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    pub fn serialized_size(&self) -> usize {
        self.to_bytes().len()
    }
}

impl Encodable for Transaction {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        write_vec(out, &self.inputs);
        write_vec(out, &self.outputs);
        out.extend_from_slice(&self.lock_time.to_le_bytes());
    }
}

impl Decodable for Transaction {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            version: reader.read_i32_le()?,
            inputs: reader.read_vec()?,
            outputs: reader.read_vec()?,
            lock_time: reader.read_u32_le()?,
        })
    }
}

// =============================================================================
// CLUSTER B: BLOCKS
// =============================================================================

/// The 80-byte block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block_hash: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl Default for BlockHeader {
    fn default() -> Self {
        Self {
            version: 1,
            prev_block_hash: Hash256::ZERO,
            merkle_root: Hash256::ZERO,
            time: 0,
            bits: REGTEST_BITS,
            nonce: 0,
        }
    }
}

impl BlockHeader {
    pub const SIZE: usize = 80;

    pub fn block_hash(&self) -> Hash256 {
        sha256d(&self.to_bytes())
    }

    /// True when the header hash satisfies its own `bits` target.
    pub fn check_proof_of_work(&self) -> bool {
        match target_from_bits(self.bits) {
            Some(target) => hash_le_target(&self.block_hash(), &target),
            None => false,
        }
    }

    /// Increment the nonce until the header meets its target. Only practical
    /// for regtest-style difficulty.
    pub fn solve(&mut self) {
        while !self.check_proof_of_work() {
            self.nonce = self.nonce.wrapping_add(1);
        }
    }
}

impl Encodable for BlockHeader {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        self.prev_block_hash.encode(out);
        self.merkle_root.encode(out);
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&self.bits.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
    }
}

impl Decodable for BlockHeader {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            version: reader.read_i32_le()?,
            prev_block_hash: Hash256::decode(reader)?,
            merkle_root: Hash256::decode(reader)?,
            time: reader.read_u32_le()?,
            bits: reader.read_u32_le()?,
            nonce: reader.read_u32_le()?,
        })
    }
}

/// A header plus its ordered transactions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a block on top of `prev` with the merkle root already set.
    pub fn new(prev: Hash256, time: u32, transactions: Vec<Transaction>) -> Self {
        let mut block = Self {
            header: BlockHeader {
                prev_block_hash: prev,
                time,
                ..BlockHeader::default()
            },
            transactions,
        };
        block.rehash_merkle_root();
        block
    }

    pub fn block_hash(&self) -> Hash256 {
        self.header.block_hash()
    }

    pub fn compute_merkle_root(&self) -> Hash256 {
        let txids: Vec<Hash256> = self.transactions.iter().map(Transaction::txid).collect();
        merkle_root(&txids)
    }

    /// Recompute the header's merkle root from the current transactions.
    /// Required after any edit to the transaction list, because the header
    /// (and therefore the block hash) commits to it.
    pub fn rehash_merkle_root(&mut self) -> Hash256 {
        self.header.merkle_root = self.compute_merkle_root();
        self.header.merkle_root
    }

    pub fn has_valid_merkle_root(&self) -> bool {
        self.header.merkle_root == self.compute_merkle_root()
    }

    /// Recompute the merkle root and grind the nonce.
    pub fn solve(&mut self) {
        self.rehash_merkle_root();
        self.header.solve();
    }
}

impl Encodable for Block {
    fn encode(&self, out: &mut Vec<u8>) {
        self.header.encode(out);
        write_vec(out, &self.transactions);
    }
}

impl Decodable for Block {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            header: BlockHeader::decode(reader)?,
            transactions: reader.read_vec()?,
        })
    }
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Bitcoin merkle root: pairwise double-SHA256, duplicating the last entry of
/// odd-length levels. An empty list yields the zero hash.
pub fn merkle_root(hashes: &[Hash256]) -> Hash256 {
    if hashes.is_empty() {
        return Hash256::ZERO;
    }
    let mut level: Vec<Hash256> = hashes.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            if let Some(last) = level.last().copied() {
                level.push(last);
            }
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(&pair[0].0);
                buf[32..].copy_from_slice(&pair[1].0);
                sha256d(&buf)
            })
            .collect();
    }
    level[0]
}

/// Expand compact `bits` into a little-endian 256-bit target.
/// Returns `None` for negative or overflowing encodings.
pub fn target_from_bits(bits: u32) -> Option<[u8; 32]> {
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x007f_ffff;
    if bits & 0x0080_0000 != 0 && mantissa != 0 {
        return None;
    }
    let mut target = [0u8; 32];
    if exponent <= 3 {
        let value = mantissa >> (8 * (3 - exponent));
        target[..4].copy_from_slice(&value.to_le_bytes());
        return Some(target);
    }
    let shift = exponent - 3;
    for (i, byte) in mantissa.to_le_bytes()[..3].iter().enumerate() {
        let pos = shift + i;
        if pos >= 32 {
            if *byte != 0 {
                return None;
            }
            continue;
        }
        target[pos] = *byte;
    }
    Some(target)
}

fn hash_le_target(hash: &Hash256, target: &[u8; 32]) -> bool {
    for i in (0..32).rev() {
        if hash.0[i] != target[i] {
            return hash.0[i] < target[i];
        }
    }
    true
}

/// Minimal script-number push, as used for the BIP34 coinbase height.
fn push_script_number(n: i64) -> Vec<u8> {
    if n == 0 {
        return vec![0x00];
    }
    if (1..=16).contains(&n) {
        return vec![0x50 + n as u8];
    }
    let negative = n < 0;
    let mut abs = n.unsigned_abs();
    let mut data = Vec::new();
    while abs > 0 {
        data.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    if let Some(last) = data.last_mut() {
        if *last & 0x80 != 0 {
            data.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            *last |= 0x80;
        }
    }
    let mut script = Vec::with_capacity(data.len() + 1);
    script.push(data.len() as u8);
    script.extend_from_slice(&data);
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_tip() -> Hash256 {
        Hash256([0x11; 32])
    }

    #[test]
    fn test_header_is_80_bytes() {
        assert_eq!(BlockHeader::default().to_bytes().len(), BlockHeader::SIZE);
    }

    #[test]
    fn test_txid_tracks_field_edits() {
        let mut tx = Transaction::coinbase(5, 50);
        let before = tx.txid();
        tx.lock_time = 7;
        assert_ne!(tx.txid(), before);
    }

    #[test]
    fn test_merkle_root_goes_stale_until_rehash() {
        let mut block = Block::new(chain_tip(), 1_700_000_000, vec![Transaction::coinbase(1, 50)]);
        assert!(block.has_valid_merkle_root());

        block
            .transactions
            .push(Transaction::spend(OutPoint::new(chain_tip(), 0), 10));
        assert!(!block.has_valid_merkle_root());

        block.rehash_merkle_root();
        assert!(block.has_valid_merkle_root());
    }

    #[test]
    fn test_single_tx_merkle_root_is_txid() {
        let tx = Transaction::coinbase(1, 50);
        assert_eq!(merkle_root(&[tx.txid()]), tx.txid());
    }

    #[test]
    fn test_odd_merkle_level_duplicates_last() {
        let a = Hash256([1; 32]);
        let b = Hash256([2; 32]);
        let c = Hash256([3; 32]);
        assert_eq!(merkle_root(&[a, b, c]), merkle_root(&[a, b, c, c]));
    }

    #[test]
    fn test_block_decode_matches_encode() {
        let block = Block::new(
            chain_tip(),
            1_700_000_000,
            vec![
                Transaction::coinbase(300, 50),
                Transaction::spend(OutPoint::new(chain_tip(), 1), 25),
            ],
        );
        let decoded = Block::from_bytes(&block.to_bytes()).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.block_hash(), block.block_hash());
    }

    #[test]
    fn test_regtest_solve() {
        let mut block = Block::new(chain_tip(), 1_700_000_000, vec![Transaction::coinbase(2, 50)]);
        block.solve();
        assert!(block.header.check_proof_of_work());
    }

    #[test]
    fn test_target_from_bits() {
        let target = target_from_bits(0x1d00_ffff).unwrap();
        assert_eq!(target[26], 0xff);
        assert_eq!(target[27], 0xff);
        assert_eq!(target[28], 0x00);
        assert!(target_from_bits(0x0480_0001).is_none());
    }

    #[test]
    fn test_coinbase_height_push() {
        assert_eq!(push_script_number(1), vec![0x51]);
        assert_eq!(push_script_number(128), vec![0x02, 0x80, 0x00]);
        assert_eq!(push_script_number(300), vec![0x02, 0x2c, 0x01]);
        assert!(Transaction::coinbase(300, 50).is_coinbase());
    }
}
