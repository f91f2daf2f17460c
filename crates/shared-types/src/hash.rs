//! 256-bit hash type and the SHA-256 helpers used throughout the protocol.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::encoding::{Decodable, Encodable, Reader};
use crate::errors::EncodingError;

/// A 32-byte hash stored in internal (wire) byte order.
///
/// `Display` prints the byte-reversed hex form that block explorers and RPC
/// interfaces use; `FromStr` parses that same form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The all-zero hash (used as "no parent" and "no stop hash").
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Parse the byte-reversed display form.
    pub fn from_hex(s: &str) -> Result<Self, EncodingError> {
        let bytes = hex::decode(s).map_err(|e| EncodingError::InvalidHex(e.to_string()))?;
        let mut out: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| EncodingError::InvalidHex(format!("{} bytes, expected 32", v.len())))?;
        out.reverse();
        Ok(Hash256(out))
    }

    /// Byte-reversed hex, matching `getbestblockhash` style output.
    pub fn to_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl FromStr for Hash256 {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Hash256(bytes)
    }
}

impl Encodable for Hash256 {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }
}

impl Decodable for Hash256 {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Hash256(reader.read_array::<32>()?))
    }
}

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Double SHA-256, the hash used for block and transaction identifiers and
/// for the P2P frame checksum.
pub fn sha256d(data: &[u8]) -> Hash256 {
    Hash256(Sha256::digest(Sha256::digest(data)).into())
}
