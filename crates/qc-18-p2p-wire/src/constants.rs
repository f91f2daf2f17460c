//! Protocol constants.

/// Protocol version advertised in our `version` message.
pub const MY_VERSION: i32 = 70015;

/// Oldest peer protocol version the harness will talk to.
pub const MIN_VERSION_SUPPORTED: i32 = 60001;

/// User agent advertised in our `version` message.
pub const MY_SUBVERSION: &str = "/qc-p2p-harness:0.1.0/";

/// Relay flag advertised in our `version` message.
pub const MY_RELAY: bool = true;

// =============================================================================
// SERVICE BITS
// =============================================================================

pub const NODE_NETWORK: u64 = 1 << 0;
pub const NODE_GETUTXO: u64 = 1 << 1;
pub const NODE_BLOOM: u64 = 1 << 2;
pub const NODE_NETWORK_LIMITED: u64 = 1 << 10;

// =============================================================================
// INVENTORY TYPES
// =============================================================================

pub const MSG_TX: u32 = 1;
pub const MSG_BLOCK: u32 = 2;
pub const MSG_FILTERED_BLOCK: u32 = 3;
pub const MSG_CMPCT_BLOCK: u32 = 4;
/// Strips the high flag bits from an inventory type.
pub const MSG_TYPE_MASK: u32 = 0xffff_ffff >> 2;

// =============================================================================
// LIMITS
// =============================================================================

/// Most headers returned by one `headers` message.
pub const MAX_HEADERS_RESULTS: usize = 2000;

/// Most entries in one `inv`/`getdata`/`notfound`.
pub const MAX_INV_SIZE: usize = 50_000;

/// Most entries in one `addr`/`addrv2`.
pub const MAX_ADDR_TO_SEND: usize = 1000;

/// Longest `user_agent` accepted in `version`.
pub const MAX_SUBVERSION_LENGTH: usize = 256;

/// Longest address field in an `addrv2` entry (BIP155).
pub const MAX_ADDRV2_SIZE: usize = 512;

/// Longest bloom filter accepted in `filterload`.
pub const MAX_BLOOM_FILTER_SIZE: usize = 36_000;

/// Longest element accepted in `filteradd`.
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Default ceiling on a declared payload length. Frames larger than this are
/// rejected before their payload is awaited.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

// =============================================================================
// REJECT CODES
// =============================================================================

pub const REJECT_MALFORMED: u8 = 0x01;
pub const REJECT_INVALID: u8 = 0x10;
pub const REJECT_OBSOLETE: u8 = 0x11;
pub const REJECT_DUPLICATE: u8 = 0x12;
pub const REJECT_NONSTANDARD: u8 = 0x40;
pub const REJECT_INSUFFICIENTFEE: u8 = 0x42;
pub const REJECT_CHECKPOINT: u8 = 0x43;

// =============================================================================
// BIP155 NETWORK IDS
// =============================================================================

pub const NET_IPV4: u8 = 1;
pub const NET_IPV6: u8 = 2;
pub const NET_TORV2: u8 = 3;
pub const NET_TORV3: u8 = 4;
pub const NET_I2P: u8 = 5;
pub const NET_CJDNS: u8 = 6;
