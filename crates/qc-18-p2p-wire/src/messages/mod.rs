//! Typed P2P messages.
//!
//! [`Message`] carries one variant per supported command. Payload layouts
//! follow the reference node byte for byte; anything the codec does not
//! understand can still travel as [`Message::Raw`].

mod payloads;
mod types;

pub use payloads::*;
pub use types::*;

use std::fmt::Write as _;

use qc_05_block_propagation::{BlockTransactions, BlockTransactionsRequest, P2PHeaderAndShortIDs};
use shared_types::{
    write_compact_size, write_vec, Block, BlockHeader, Decodable, Encodable, EncodingError,
    Reader, Transaction,
};

use crate::constants::{MAX_ADDR_TO_SEND, MAX_HEADERS_RESULTS, MAX_INV_SIZE};

/// Longest message description written to the log.
pub const MAX_LOG_DESCRIPTION: usize = 500;

/// Every command the standard registry knows how to parse.
pub const STANDARD_COMMANDS: &[&str] = &[
    "version",
    "verack",
    "sendaddrv2",
    "addr",
    "addrv2",
    "inv",
    "getdata",
    "notfound",
    "getheaders",
    "getblocks",
    "headers",
    "block",
    "tx",
    "cmpctblock",
    "sendcmpct",
    "getblocktxn",
    "blocktxn",
    "mempool",
    "ping",
    "pong",
    "reject",
    "feefilter",
    "sendheaders",
    "getaddr",
    "filterload",
    "filteradd",
    "filterclear",
    "merkleblock",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionMessage),
    Verack,
    SendAddrV2,
    Addr(Vec<TimedAddress>),
    AddrV2(Vec<AddrV2Entry>),
    Inv(Vec<Inventory>),
    GetData(Vec<Inventory>),
    NotFound(Vec<Inventory>),
    GetHeaders(LocatorRequest),
    GetBlocks(LocatorRequest),
    Headers(Vec<BlockHeader>),
    Block(Block),
    Tx(Transaction),
    CmpctBlock(P2PHeaderAndShortIDs),
    SendCmpct(SendCmpctMessage),
    GetBlockTxn(BlockTransactionsRequest),
    BlockTxn(BlockTransactions),
    MemPool,
    Ping(u64),
    Pong(u64),
    Reject(RejectMessage),
    FeeFilter(i64),
    SendHeaders,
    GetAddr,
    FilterLoad(FilterLoadMessage),
    FilterAdd(FilterAddMessage),
    FilterClear,
    MerkleBlock(MerkleBlockMessage),
    /// A command carried without interpretation.
    Raw { command: String, payload: Vec<u8> },
}

impl Message {
    /// Command name as it appears in the frame header.
    pub fn command(&self) -> &str {
        match self {
            Message::Version(_) => "version",
            Message::Verack => "verack",
            Message::SendAddrV2 => "sendaddrv2",
            Message::Addr(_) => "addr",
            Message::AddrV2(_) => "addrv2",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::NotFound(_) => "notfound",
            Message::GetHeaders(_) => "getheaders",
            Message::GetBlocks(_) => "getblocks",
            Message::Headers(_) => "headers",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
            Message::CmpctBlock(_) => "cmpctblock",
            Message::SendCmpct(_) => "sendcmpct",
            Message::GetBlockTxn(_) => "getblocktxn",
            Message::BlockTxn(_) => "blocktxn",
            Message::MemPool => "mempool",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::Reject(_) => "reject",
            Message::FeeFilter(_) => "feefilter",
            Message::SendHeaders => "sendheaders",
            Message::GetAddr => "getaddr",
            Message::FilterLoad(_) => "filterload",
            Message::FilterAdd(_) => "filteradd",
            Message::FilterClear => "filterclear",
            Message::MerkleBlock(_) => "merkleblock",
            Message::Raw { command, .. } => command,
        }
    }

    /// Serialized payload, without the frame header.
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Message::Version(m) => m.encode(&mut out),
            Message::Verack
            | Message::SendAddrV2
            | Message::MemPool
            | Message::SendHeaders
            | Message::GetAddr
            | Message::FilterClear => {}
            Message::Addr(entries) => write_vec(&mut out, entries),
            Message::AddrV2(entries) => write_vec(&mut out, entries),
            Message::Inv(inv) | Message::GetData(inv) | Message::NotFound(inv) => {
                write_vec(&mut out, inv)
            }
            Message::GetHeaders(req) | Message::GetBlocks(req) => req.encode(&mut out),
            Message::Headers(headers) => {
                write_compact_size(&mut out, headers.len() as u64);
                for header in headers {
                    header.encode(&mut out);
                    // Each header travels as an empty block.
                    write_compact_size(&mut out, 0);
                }
            }
            Message::Block(block) => block.encode(&mut out),
            Message::Tx(tx) => tx.encode(&mut out),
            Message::CmpctBlock(cmpct) => cmpct.encode(&mut out),
            Message::SendCmpct(m) => m.encode(&mut out),
            Message::GetBlockTxn(req) => req.encode(&mut out),
            Message::BlockTxn(txs) => txs.encode(&mut out),
            Message::Ping(nonce) | Message::Pong(nonce) => {
                out.extend_from_slice(&nonce.to_le_bytes())
            }
            Message::Reject(m) => m.encode(&mut out),
            Message::FeeFilter(feerate) => out.extend_from_slice(&feerate.to_le_bytes()),
            Message::FilterLoad(m) => m.encode(&mut out),
            Message::FilterAdd(m) => m.encode(&mut out),
            Message::MerkleBlock(m) => m.encode(&mut out),
            Message::Raw { payload, .. } => out.extend_from_slice(payload),
        }
        out
    }

    /// Decode the payload of a standard command. Trailing bytes are ignored.
    ///
    /// Commands outside [`STANDARD_COMMANDS`] come back as [`Message::Raw`].
    pub fn decode_payload(command: &str, payload: &[u8]) -> Result<Message, EncodingError> {
        let mut reader = Reader::new(payload);
        let r = &mut reader;
        let message = match command {
            "version" => Message::Version(VersionMessage::decode(r)?),
            "verack" => Message::Verack,
            "sendaddrv2" => Message::SendAddrV2,
            "addr" => Message::Addr(read_bounded_vec(r, "addr", MAX_ADDR_TO_SEND)?),
            "addrv2" => Message::AddrV2(read_bounded_vec(r, "addrv2", MAX_ADDR_TO_SEND)?),
            "inv" => Message::Inv(read_bounded_vec(r, "inv", MAX_INV_SIZE)?),
            "getdata" => Message::GetData(read_bounded_vec(r, "getdata", MAX_INV_SIZE)?),
            "notfound" => Message::NotFound(read_bounded_vec(r, "notfound", MAX_INV_SIZE)?),
            "getheaders" => Message::GetHeaders(LocatorRequest::decode(r)?),
            "getblocks" => Message::GetBlocks(LocatorRequest::decode(r)?),
            "headers" => Message::Headers(read_headers(r)?),
            "block" => Message::Block(Block::decode(r)?),
            "tx" => Message::Tx(Transaction::decode(r)?),
            "cmpctblock" => Message::CmpctBlock(P2PHeaderAndShortIDs::decode(r)?),
            "sendcmpct" => Message::SendCmpct(SendCmpctMessage::decode(r)?),
            "getblocktxn" => Message::GetBlockTxn(BlockTransactionsRequest::decode(r)?),
            "blocktxn" => Message::BlockTxn(BlockTransactions::decode(r)?),
            "mempool" => Message::MemPool,
            "ping" => Message::Ping(r.read_u64_le()?),
            "pong" => Message::Pong(r.read_u64_le()?),
            "reject" => Message::Reject(RejectMessage::decode(r)?),
            "feefilter" => Message::FeeFilter(r.read_i64_le()?),
            "sendheaders" => Message::SendHeaders,
            "getaddr" => Message::GetAddr,
            "filterload" => Message::FilterLoad(FilterLoadMessage::decode(r)?),
            "filteradd" => Message::FilterAdd(FilterAddMessage::decode(r)?),
            "filterclear" => Message::FilterClear,
            "merkleblock" => Message::MerkleBlock(MerkleBlockMessage::decode(r)?),
            other => Message::Raw {
                command: other.to_string(),
                payload: payload.to_vec(),
            },
        };
        Ok(message)
    }

    /// Debug rendering for the log, cut at [`MAX_LOG_DESCRIPTION`] characters.
    pub fn log_description(&self) -> String {
        let mut full = String::new();
        let _ = write!(full, "{:?}", self);
        truncate_for_log(full)
    }
}

fn truncate_for_log(mut text: String) -> String {
    if let Some((cut, _)) = text.char_indices().nth(MAX_LOG_DESCRIPTION) {
        text.truncate(cut);
        text.push_str("... (msg truncated)");
    }
    text
}

fn read_bounded_vec<T: Decodable>(
    reader: &mut Reader<'_>,
    field: &'static str,
    max: usize,
) -> Result<Vec<T>, EncodingError> {
    let count = reader.read_compact_usize()?;
    if count > max {
        return Err(EncodingError::Oversized {
            field,
            len: count as u64,
            max: max as u64,
        });
    }
    if count > reader.remaining() {
        return Err(EncodingError::UnexpectedEof {
            needed: count,
            remaining: reader.remaining(),
        });
    }
    (0..count).map(|_| T::decode(reader)).collect()
}

/// `headers` entries are blocks; any transactions they carry are dropped.
fn read_headers(reader: &mut Reader<'_>) -> Result<Vec<BlockHeader>, EncodingError> {
    let count = reader.read_compact_usize()?;
    if count > MAX_HEADERS_RESULTS {
        return Err(EncodingError::Oversized {
            field: "headers",
            len: count as u64,
            max: MAX_HEADERS_RESULTS as u64,
        });
    }
    let mut headers = Vec::with_capacity(count.min(reader.remaining() / BlockHeader::SIZE));
    for _ in 0..count {
        headers.push(BlockHeader::decode(reader)?);
        let _discarded: Vec<Transaction> = reader.read_vec()?;
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Hash256;

    #[test]
    fn test_every_standard_command_roundtrips_its_name() {
        for command in STANDARD_COMMANDS {
            let empty_ok = matches!(
                *command,
                "verack" | "sendaddrv2" | "mempool" | "sendheaders" | "getaddr" | "filterclear"
            );
            if empty_ok {
                let message = Message::decode_payload(command, &[]).unwrap();
                assert_eq!(message.command(), *command);
                assert!(message.encode_payload().is_empty());
            }
        }
    }

    #[test]
    fn test_headers_carry_zero_tx_count() {
        let header = BlockHeader::default();
        let payload = Message::Headers(vec![header]).encode_payload();
        assert_eq!(payload.len(), 1 + BlockHeader::SIZE + 1);
        assert_eq!(payload[payload.len() - 1], 0);
        let decoded = Message::decode_payload("headers", &payload).unwrap();
        assert_eq!(decoded, Message::Headers(vec![header]));
    }

    #[test]
    fn test_headers_with_transactions_are_stripped() {
        let block = Block::new(Hash256::ZERO, 1, vec![Transaction::coinbase(1, 50)]);
        let mut payload = Vec::new();
        write_compact_size(&mut payload, 1);
        block.encode(&mut payload);
        let decoded = Message::decode_payload("headers", &payload).unwrap();
        assert_eq!(decoded, Message::Headers(vec![block.header]));
    }

    #[test]
    fn test_inv_over_limit_rejected() {
        let mut payload = Vec::new();
        write_compact_size(&mut payload, (MAX_INV_SIZE + 1) as u64);
        assert!(matches!(
            Message::decode_payload("inv", &payload),
            Err(EncodingError::Oversized { field: "inv", .. })
        ));
    }

    #[test]
    fn test_ping_truncated_payload() {
        assert!(matches!(
            Message::decode_payload("ping", &[1, 2, 3]),
            Err(EncodingError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_unknown_command_decodes_raw() {
        let message = Message::decode_payload("wtxidrelay", &[9]).unwrap();
        assert_eq!(
            message,
            Message::Raw {
                command: "wtxidrelay".to_string(),
                payload: vec![9]
            }
        );
        assert_eq!(message.encode_payload(), vec![9]);
    }

    #[test]
    fn test_log_description_truncated() {
        let message = Message::Raw {
            command: "big".to_string(),
            payload: vec![0xab; 1000],
        };
        let text = message.log_description();
        assert!(text.ends_with("... (msg truncated)"));
        assert_eq!(
            text.chars().count(),
            MAX_LOG_DESCRIPTION + "... (msg truncated)".len()
        );

        let short = Message::Ping(1).log_description();
        assert_eq!(short, "Ping(1)");
    }
}
