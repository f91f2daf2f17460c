//! Common structures embedded in several message payloads.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use shared_types::{
    write_compact_size, write_var_bytes, Decodable, Encodable, EncodingError, Hash256, Reader,
};

use crate::constants::{MAX_ADDRV2_SIZE, MSG_BLOCK, MSG_CMPCT_BLOCK, MSG_TX, MSG_TYPE_MASK, NODE_NETWORK};

/// Network address without a timestamp, as used in `version`.
///
/// IPv4 addresses are carried as IPv4-mapped IPv6; the port is big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetAddress {
    pub services: u64,
    pub ip: Ipv6Addr,
    pub port: u16,
}

impl Default for NetAddress {
    fn default() -> Self {
        Self {
            services: NODE_NETWORK,
            ip: Ipv4Addr::UNSPECIFIED.to_ipv6_mapped(),
            port: 0,
        }
    }
}

impl NetAddress {
    pub fn new(services: u64, ip: IpAddr, port: u16) -> Self {
        let ip = match ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        Self { services, ip, port }
    }

    pub fn from_socket_addr(services: u64, addr: SocketAddr) -> Self {
        Self::new(services, addr.ip(), addr.port())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        let ip = match self.ip.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(self.ip),
        };
        SocketAddr::new(ip, self.port)
    }
}

impl Encodable for NetAddress {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.services.to_le_bytes());
        out.extend_from_slice(&self.ip.octets());
        out.extend_from_slice(&self.port.to_be_bytes());
    }
}

impl Decodable for NetAddress {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            services: reader.read_u64_le()?,
            ip: Ipv6Addr::from(reader.read_array::<16>()?),
            port: reader.read_u16_be()?,
        })
    }
}

/// `addr` entry: a network address with a last-seen time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimedAddress {
    pub time: u32,
    pub address: NetAddress,
}

impl Encodable for TimedAddress {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.time.to_le_bytes());
        self.address.encode(out);
    }
}

impl Decodable for TimedAddress {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            time: reader.read_u32_le()?,
            address: NetAddress::decode(reader)?,
        })
    }
}

/// `addrv2` entry (BIP155). Services are CompactSize encoded and the address
/// is a network-tagged byte string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddrV2Entry {
    pub time: u32,
    pub services: u64,
    pub network: u8,
    pub addr: Vec<u8>,
    pub port: u16,
}

impl AddrV2Entry {
    pub fn ipv4(time: u32, services: u64, ip: Ipv4Addr, port: u16) -> Self {
        Self {
            time,
            services,
            network: crate::constants::NET_IPV4,
            addr: ip.octets().to_vec(),
            port,
        }
    }
}

impl Encodable for AddrV2Entry {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.time.to_le_bytes());
        write_compact_size(out, self.services);
        out.push(self.network);
        write_var_bytes(out, &self.addr);
        out.extend_from_slice(&self.port.to_be_bytes());
    }
}

impl Decodable for AddrV2Entry {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            time: reader.read_u32_le()?,
            services: reader.read_compact_size()?,
            network: reader.read_u8()?,
            addr: reader.read_var_bytes("addrv2 address", MAX_ADDRV2_SIZE)?,
            port: reader.read_u16_be()?,
        })
    }
}

/// Inventory vector entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Inventory {
    pub inv_type: u32,
    pub hash: Hash256,
}

impl Inventory {
    pub fn new(inv_type: u32, hash: Hash256) -> Self {
        Self { inv_type, hash }
    }

    pub fn tx(hash: Hash256) -> Self {
        Self::new(MSG_TX, hash)
    }

    pub fn block(hash: Hash256) -> Self {
        Self::new(MSG_BLOCK, hash)
    }

    pub fn compact_block(hash: Hash256) -> Self {
        Self::new(MSG_CMPCT_BLOCK, hash)
    }

    /// Type 0 is `ERROR` and never worth requesting.
    pub fn is_error(&self) -> bool {
        self.inv_type == 0
    }

    /// Type with the flag bits stripped.
    pub fn base_type(&self) -> u32 {
        self.inv_type & MSG_TYPE_MASK
    }
}

impl Encodable for Inventory {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.inv_type.to_le_bytes());
        self.hash.encode(out);
    }
}

impl Decodable for Inventory {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            inv_type: reader.read_u32_le()?,
            hash: Hash256::decode(reader)?,
        })
    }
}

/// Block locator: newest-first hashes the sender already has.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockLocator {
    pub version: i32,
    pub have: Vec<Hash256>,
}

impl BlockLocator {
    pub fn new(have: Vec<Hash256>) -> Self {
        Self {
            version: crate::constants::MY_VERSION,
            have,
        }
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.have.contains(hash)
    }
}

impl Encodable for BlockLocator {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        shared_types::write_vec(out, &self.have);
    }
}

impl Decodable for BlockLocator {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            version: reader.read_i32_le()?,
            have: reader.read_vec()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_net_address_layout() {
        let addr = NetAddress::new(NODE_NETWORK, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 18444);
        let bytes = addr.to_bytes();
        assert_eq!(bytes.len(), 26);
        assert_eq!(&bytes[8..20], &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff]);
        assert_eq!(&bytes[20..24], &[127, 0, 0, 1]);
        assert_eq!(&bytes[24..26], &18444u16.to_be_bytes());
        assert_eq!(addr.socket_addr().to_string(), "127.0.0.1:18444");
    }

    #[test]
    fn test_addrv2_rejects_oversized_address() {
        let entry = AddrV2Entry {
            time: 1,
            services: 1,
            network: crate::constants::NET_IPV6,
            addr: vec![0u8; MAX_ADDRV2_SIZE + 1],
            port: 8333,
        };
        assert!(matches!(
            AddrV2Entry::from_bytes(&entry.to_bytes()),
            Err(EncodingError::Oversized { .. })
        ));
    }

    #[test]
    fn test_inventory_masks_flags() {
        let inv = Inventory::new(MSG_BLOCK | (1 << 30), Hash256::ZERO);
        assert_eq!(inv.base_type(), MSG_BLOCK);
        assert!(!inv.is_error());
        assert!(Inventory::new(0, Hash256::ZERO).is_error());
    }
}
