//! # Shared Types Crate
//!
//! Chain primitives and consensus serialization shared by the wire codec,
//! the compact block codec and the peer harness.
//!
//! ## Design Principles
//!
//! - **Content-derived hashes**: `BlockHeader::block_hash` and
//!   `Transaction::txid` are computed from the current field values. There is
//!   no cached hash that a field mutation could silently leave stale.
//! - **Explicit recomputation**: the only derived field stored in a struct is
//!   the header's merkle root. `Block::rehash_merkle_root` rewrites it and
//!   `Block::has_valid_merkle_root` detects when it is out of date.
//! - **Bit-exact encoding**: `Encodable`/`Decodable` follow the little-endian,
//!   CompactSize-prefixed layout used on the P2P network.

pub mod encoding;
pub mod entities;
pub mod errors;
pub mod hash;

pub use encoding::{
    write_compact_size, write_var_bytes, write_var_str, write_vec, Decodable, Encodable, Reader,
};
pub use entities::*;
pub use errors::*;
pub use hash::{sha256, sha256d, Hash256};
