//! Payload structs for messages with more than one field.

use shared_types::{
    write_var_bytes, write_var_str, write_vec, BlockHeader, Decodable, Encodable, EncodingError,
    Hash256, Reader,
};

use super::types::{BlockLocator, NetAddress};
use crate::constants::{
    MAX_BLOOM_FILTER_SIZE, MAX_SCRIPT_ELEMENT_SIZE, MAX_SUBVERSION_LENGTH, MY_RELAY, MY_SUBVERSION,
    MY_VERSION, NODE_NETWORK, REJECT_MALFORMED,
};

/// `version` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: i32,
    pub services: u64,
    pub timestamp: i64,
    pub addr_recv: NetAddress,
    pub addr_from: NetAddress,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    /// Absent on the wire from very old peers; decoded as `false` then.
    pub relay: bool,
}

impl Default for VersionMessage {
    fn default() -> Self {
        Self {
            version: MY_VERSION,
            services: NODE_NETWORK,
            timestamp: 0,
            addr_recv: NetAddress::default(),
            addr_from: NetAddress::default(),
            nonce: 0,
            user_agent: MY_SUBVERSION.to_string(),
            start_height: -1,
            relay: MY_RELAY,
        }
    }
}

impl Encodable for VersionMessage {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.services.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        self.addr_recv.encode(out);
        self.addr_from.encode(out);
        out.extend_from_slice(&self.nonce.to_le_bytes());
        write_var_str(out, &self.user_agent);
        out.extend_from_slice(&self.start_height.to_le_bytes());
        out.push(u8::from(self.relay));
    }
}

impl Decodable for VersionMessage {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        let version = reader.read_i32_le()?;
        let services = reader.read_u64_le()?;
        let timestamp = reader.read_i64_le()?;
        let addr_recv = NetAddress::decode(reader)?;
        let addr_from = NetAddress::decode(reader)?;
        let nonce = reader.read_u64_le()?;
        let user_agent = reader.read_var_str("user_agent", MAX_SUBVERSION_LENGTH)?;
        let start_height = reader.read_i32_le()?;
        let relay = if reader.is_empty() {
            false
        } else {
            reader.read_bool()?
        };
        Ok(Self {
            version,
            services,
            timestamp,
            addr_recv,
            addr_from,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }
}

/// `getheaders` / `getblocks` payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocatorRequest {
    pub locator: BlockLocator,
    /// Zero means "as many as allowed".
    pub hash_stop: Hash256,
}

impl LocatorRequest {
    pub fn new(have: Vec<Hash256>, hash_stop: Hash256) -> Self {
        Self {
            locator: BlockLocator::new(have),
            hash_stop,
        }
    }
}

impl Encodable for LocatorRequest {
    fn encode(&self, out: &mut Vec<u8>) {
        self.locator.encode(out);
        self.hash_stop.encode(out);
    }
}

impl Decodable for LocatorRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            locator: BlockLocator::decode(reader)?,
            hash_stop: Hash256::decode(reader)?,
        })
    }
}

/// `reject` payload. `data` is present for rejected blocks and transactions
/// unless the code is `REJECT_MALFORMED`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RejectMessage {
    pub message: String,
    pub code: u8,
    pub reason: String,
    pub data: Option<Hash256>,
}

impl RejectMessage {
    fn carries_hash(message: &str, code: u8) -> bool {
        code != REJECT_MALFORMED && (message == "block" || message == "tx")
    }
}

impl Encodable for RejectMessage {
    fn encode(&self, out: &mut Vec<u8>) {
        write_var_str(out, &self.message);
        out.push(self.code);
        write_var_str(out, &self.reason);
        if Self::carries_hash(&self.message, self.code) {
            self.data.unwrap_or_default().encode(out);
        }
    }
}

impl Decodable for RejectMessage {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        let message = reader.read_var_str("reject message", 12)?;
        let code = reader.read_u8()?;
        let reason = reader.read_var_str("reject reason", 111)?;
        let data = if Self::carries_hash(&message, code) {
            Some(Hash256::decode(reader)?)
        } else {
            None
        };
        Ok(Self {
            message,
            code,
            reason,
            data,
        })
    }
}

/// `sendcmpct` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendCmpctMessage {
    /// High-bandwidth mode: announce new blocks with `cmpctblock` directly.
    pub announce: bool,
    pub version: u64,
}

impl Default for SendCmpctMessage {
    fn default() -> Self {
        Self {
            announce: false,
            version: 1,
        }
    }
}

impl Encodable for SendCmpctMessage {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(u8::from(self.announce));
        out.extend_from_slice(&self.version.to_le_bytes());
    }
}

impl Decodable for SendCmpctMessage {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            announce: reader.read_bool()?,
            version: reader.read_u64_le()?,
        })
    }
}

/// `filterload` payload (BIP37).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterLoadMessage {
    pub data: Vec<u8>,
    pub hash_funcs: u32,
    pub tweak: u32,
    pub flags: u8,
}

impl Encodable for FilterLoadMessage {
    fn encode(&self, out: &mut Vec<u8>) {
        write_var_bytes(out, &self.data);
        out.extend_from_slice(&self.hash_funcs.to_le_bytes());
        out.extend_from_slice(&self.tweak.to_le_bytes());
        out.push(self.flags);
    }
}

impl Decodable for FilterLoadMessage {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            data: reader.read_var_bytes("bloom filter", MAX_BLOOM_FILTER_SIZE)?,
            hash_funcs: reader.read_u32_le()?,
            tweak: reader.read_u32_le()?,
            flags: reader.read_u8()?,
        })
    }
}

/// `filteradd` payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterAddMessage {
    pub data: Vec<u8>,
}

impl Encodable for FilterAddMessage {
    fn encode(&self, out: &mut Vec<u8>) {
        write_var_bytes(out, &self.data);
    }
}

impl Decodable for FilterAddMessage {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            data: reader.read_var_bytes("filteradd element", MAX_SCRIPT_ELEMENT_SIZE)?,
        })
    }
}

/// `merkleblock` payload: a header plus a partial merkle tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MerkleBlockMessage {
    pub header: BlockHeader,
    pub total_transactions: u32,
    pub hashes: Vec<Hash256>,
    pub flags: Vec<u8>,
}

impl Encodable for MerkleBlockMessage {
    fn encode(&self, out: &mut Vec<u8>) {
        self.header.encode(out);
        out.extend_from_slice(&self.total_transactions.to_le_bytes());
        write_vec(out, &self.hashes);
        write_var_bytes(out, &self.flags);
    }
}

impl Decodable for MerkleBlockMessage {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            header: BlockHeader::decode(reader)?,
            total_transactions: reader.read_u32_le()?,
            hashes: reader.read_vec()?,
            flags: reader.read_var_bytes("merkle flags", usize::MAX)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_without_relay_byte() {
        let version = VersionMessage {
            nonce: 42,
            start_height: 7,
            ..VersionMessage::default()
        };
        let mut bytes = version.to_bytes();
        bytes.pop();
        let decoded = VersionMessage::from_bytes(&bytes).unwrap();
        assert!(!decoded.relay);
        assert_eq!(decoded.nonce, 42);
        assert_eq!(decoded.start_height, 7);
    }

    #[test]
    fn test_reject_hash_only_for_block_and_tx() {
        let with_hash = RejectMessage {
            message: "tx".to_string(),
            code: 0x10,
            reason: "bad-txns".to_string(),
            data: Some(Hash256([3; 32])),
        };
        let decoded = RejectMessage::from_bytes(&with_hash.to_bytes()).unwrap();
        assert_eq!(decoded, with_hash);

        let malformed = RejectMessage {
            message: "tx".to_string(),
            code: REJECT_MALFORMED,
            reason: "error parsing message".to_string(),
            data: None,
        };
        let bytes = malformed.to_bytes();
        assert_eq!(bytes.len(), 1 + 2 + 1 + 1 + malformed.reason.len());
        assert_eq!(RejectMessage::from_bytes(&bytes).unwrap(), malformed);
    }

    #[test]
    fn test_sendcmpct_layout() {
        let msg = SendCmpctMessage {
            announce: true,
            version: 1,
        };
        assert_eq!(msg.to_bytes(), vec![1, 1, 0, 0, 0, 0, 0, 0, 0]);
    }
}
