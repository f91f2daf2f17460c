//! Message handlers and the dispatch that drives them.
//!
//! Every incoming message is counted, stored as the last message of its
//! command, checked against the handshake sequence and then routed to the
//! handler method for its variant. The version/verack bookkeeping happens
//! before the handler is called, so overriding `on_version` never skips the
//! handshake.

use std::net::SocketAddr;

use qc_05_block_propagation::{BlockTransactions, BlockTransactionsRequest, P2PHeaderAndShortIDs};
use qc_18_p2p_wire::{
    AddrV2Entry, FilterAddMessage, FilterLoadMessage, Inventory, LocatorRequest,
    MerkleBlockMessage, Message, RejectMessage, SendCmpctMessage, TimedAddress, VersionMessage,
    MIN_VERSION_SUPPORTED,
};
use shared_types::{Block, BlockHeader, Transaction};
use tracing::warn;

use crate::connection::Link;
use crate::errors::{HarnessError, HarnessResult};
use crate::state::{HandshakeState, PeerState};

pub type HandlerResult = HarnessResult<()>;

/// Commands that may arrive before the node's `verack`.
const PRE_HANDSHAKE_COMMANDS: &[&str] = &["version", "verack", "reject", "sendaddrv2"];

/// What a handler can see and do while it processes one message.
///
/// Handlers run on the network thread with the peer's monitor held; sending
/// only queues bytes and never blocks.
pub struct PeerContext<'a> {
    state: &'a mut PeerState,
    link: &'a Link,
}

impl<'a> PeerContext<'a> {
    pub(crate) fn new(state: &'a mut PeerState, link: &'a Link) -> Self {
        Self { state, link }
    }

    pub fn state(&self) -> &PeerState {
        self.state
    }

    pub fn addr(&self) -> SocketAddr {
        self.link.addr()
    }

    pub fn send(&mut self, message: &Message) -> HandlerResult {
        self.link.send(self.state, message)
    }

    pub fn send_raw(&mut self, bytes: Vec<u8>) -> HandlerResult {
        self.link.send_raw(self.state, bytes)
    }

    /// Ask the network thread to drop the connection.
    pub fn disconnect(&self) {
        self.link.request_close();
    }

    /// `getdata` for every inventory entry that is not an error entry.
    pub fn request_inventory(&mut self, inv: &[Inventory]) -> HandlerResult {
        let want: Vec<Inventory> = inv.iter().filter(|i| !i.is_error()).copied().collect();
        if want.is_empty() {
            return Ok(());
        }
        self.send(&Message::GetData(want))
    }

    fn accept_version(&mut self, version: &VersionMessage) -> HandlerResult {
        if version.version < MIN_VERSION_SUPPORTED {
            return Err(HarnessError::Handler(format!(
                "version {} received, only versions >= {} are supported",
                version.version, MIN_VERSION_SUPPORTED
            )));
        }
        if self.link.support_addrv2() {
            self.send(&Message::SendAddrV2)?;
        }
        self.send(&Message::Verack)?;
        self.state.services = version.services;
        self.state.peer_version = Some(version.version);
        if self.state.handshake != HandshakeState::Established {
            self.state.handshake = HandshakeState::VersionReceived;
        }
        Ok(())
    }

    fn accept_verack(&mut self) {
        self.state.verack_received = true;
        self.state.handshake = HandshakeState::Established;
    }

    fn check_sequence(&mut self, command: &str) {
        if self.state.is_established() || PRE_HANDSHAKE_COMMANDS.contains(&command) {
            return;
        }
        let violation = format!("{command} received before verack");
        warn!(peer = %self.link.addr(), command, "protocol violation: message before handshake");
        self.state.protocol_violations.push(violation);
    }
}

/// Callbacks for incoming messages. Every method has a default, so a handler
/// only overrides what it cares about.
///
/// Returning an error records a handler failure and closes the connection.
#[allow(unused_variables)]
pub trait MessageHandler: Send + 'static {
    /// The socket is open and the initial `version` (if any) is queued.
    fn on_open(&mut self, ctx: &mut PeerContext<'_>) -> HandlerResult {
        Ok(())
    }

    /// The connection is gone. Sending is no longer possible.
    fn on_close(&mut self, state: &PeerState) {}

    fn on_version(&mut self, ctx: &mut PeerContext<'_>, msg: &VersionMessage) -> HandlerResult {
        Ok(())
    }

    fn on_verack(&mut self, ctx: &mut PeerContext<'_>) -> HandlerResult {
        Ok(())
    }

    fn on_sendaddrv2(&mut self, ctx: &mut PeerContext<'_>) -> HandlerResult {
        Ok(())
    }

    fn on_addr(&mut self, ctx: &mut PeerContext<'_>, addrs: &[TimedAddress]) -> HandlerResult {
        Ok(())
    }

    fn on_addrv2(&mut self, ctx: &mut PeerContext<'_>, addrs: &[AddrV2Entry]) -> HandlerResult {
        Ok(())
    }

    /// Requests everything announced.
    fn on_inv(&mut self, ctx: &mut PeerContext<'_>, inv: &[Inventory]) -> HandlerResult {
        ctx.request_inventory(inv)
    }

    fn on_getdata(&mut self, ctx: &mut PeerContext<'_>, inv: &[Inventory]) -> HandlerResult {
        Ok(())
    }

    fn on_notfound(&mut self, ctx: &mut PeerContext<'_>, inv: &[Inventory]) -> HandlerResult {
        Ok(())
    }

    fn on_getheaders(&mut self, ctx: &mut PeerContext<'_>, req: &LocatorRequest) -> HandlerResult {
        Ok(())
    }

    fn on_getblocks(&mut self, ctx: &mut PeerContext<'_>, req: &LocatorRequest) -> HandlerResult {
        Ok(())
    }

    fn on_headers(&mut self, ctx: &mut PeerContext<'_>, headers: &[BlockHeader]) -> HandlerResult {
        Ok(())
    }

    fn on_block(&mut self, ctx: &mut PeerContext<'_>, block: &Block) -> HandlerResult {
        Ok(())
    }

    fn on_tx(&mut self, ctx: &mut PeerContext<'_>, tx: &Transaction) -> HandlerResult {
        Ok(())
    }

    fn on_cmpctblock(
        &mut self,
        ctx: &mut PeerContext<'_>,
        cmpct: &P2PHeaderAndShortIDs,
    ) -> HandlerResult {
        Ok(())
    }

    fn on_sendcmpct(&mut self, ctx: &mut PeerContext<'_>, msg: &SendCmpctMessage) -> HandlerResult {
        Ok(())
    }

    fn on_getblocktxn(
        &mut self,
        ctx: &mut PeerContext<'_>,
        req: &BlockTransactionsRequest,
    ) -> HandlerResult {
        Ok(())
    }

    fn on_blocktxn(&mut self, ctx: &mut PeerContext<'_>, txs: &BlockTransactions) -> HandlerResult {
        Ok(())
    }

    fn on_mempool(&mut self, ctx: &mut PeerContext<'_>) -> HandlerResult {
        Ok(())
    }

    /// Answers with a `pong` carrying the same nonce.
    fn on_ping(&mut self, ctx: &mut PeerContext<'_>, nonce: u64) -> HandlerResult {
        ctx.send(&Message::Pong(nonce))
    }

    fn on_pong(&mut self, ctx: &mut PeerContext<'_>, nonce: u64) -> HandlerResult {
        Ok(())
    }

    fn on_reject(&mut self, ctx: &mut PeerContext<'_>, msg: &RejectMessage) -> HandlerResult {
        Ok(())
    }

    fn on_feefilter(&mut self, ctx: &mut PeerContext<'_>, feerate: i64) -> HandlerResult {
        Ok(())
    }

    fn on_sendheaders(&mut self, ctx: &mut PeerContext<'_>) -> HandlerResult {
        Ok(())
    }

    fn on_getaddr(&mut self, ctx: &mut PeerContext<'_>) -> HandlerResult {
        Ok(())
    }

    fn on_filterload(&mut self, ctx: &mut PeerContext<'_>, msg: &FilterLoadMessage) -> HandlerResult {
        Ok(())
    }

    fn on_filteradd(&mut self, ctx: &mut PeerContext<'_>, msg: &FilterAddMessage) -> HandlerResult {
        Ok(())
    }

    fn on_filterclear(&mut self, ctx: &mut PeerContext<'_>) -> HandlerResult {
        Ok(())
    }

    fn on_merkleblock(
        &mut self,
        ctx: &mut PeerContext<'_>,
        msg: &MerkleBlockMessage,
    ) -> HandlerResult {
        Ok(())
    }

    /// Commands registered as opaque in the message registry.
    fn on_other(&mut self, ctx: &mut PeerContext<'_>, command: &str, payload: &[u8]) -> HandlerResult {
        Ok(())
    }
}

/// Handler with only the default behavior.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPeer;

impl MessageHandler for DefaultPeer {}

/// Route one received message. The caller has already recorded it in
/// `PeerState`.
pub(crate) fn dispatch<H: MessageHandler>(
    handler: &mut H,
    ctx: &mut PeerContext<'_>,
    message: &Message,
) -> HandlerResult {
    ctx.check_sequence(message.command());
    match message {
        Message::Version(v) => {
            ctx.accept_version(v)?;
            handler.on_version(ctx, v)
        }
        Message::Verack => {
            ctx.accept_verack();
            handler.on_verack(ctx)
        }
        Message::SendAddrV2 => handler.on_sendaddrv2(ctx),
        Message::Addr(addrs) => handler.on_addr(ctx, addrs),
        Message::AddrV2(addrs) => handler.on_addrv2(ctx, addrs),
        Message::Inv(inv) => handler.on_inv(ctx, inv),
        Message::GetData(inv) => handler.on_getdata(ctx, inv),
        Message::NotFound(inv) => handler.on_notfound(ctx, inv),
        Message::GetHeaders(req) => handler.on_getheaders(ctx, req),
        Message::GetBlocks(req) => handler.on_getblocks(ctx, req),
        Message::Headers(headers) => handler.on_headers(ctx, headers),
        Message::Block(block) => handler.on_block(ctx, block),
        Message::Tx(tx) => handler.on_tx(ctx, tx),
        Message::CmpctBlock(cmpct) => handler.on_cmpctblock(ctx, cmpct),
        Message::SendCmpct(msg) => handler.on_sendcmpct(ctx, msg),
        Message::GetBlockTxn(req) => handler.on_getblocktxn(ctx, req),
        Message::BlockTxn(txs) => handler.on_blocktxn(ctx, txs),
        Message::MemPool => handler.on_mempool(ctx),
        Message::Ping(nonce) => handler.on_ping(ctx, *nonce),
        Message::Pong(nonce) => handler.on_pong(ctx, *nonce),
        Message::Reject(msg) => handler.on_reject(ctx, msg),
        Message::FeeFilter(feerate) => handler.on_feefilter(ctx, *feerate),
        Message::SendHeaders => handler.on_sendheaders(ctx),
        Message::GetAddr => handler.on_getaddr(ctx),
        Message::FilterLoad(msg) => handler.on_filterload(ctx, msg),
        Message::FilterAdd(msg) => handler.on_filteradd(ctx, msg),
        Message::FilterClear => handler.on_filterclear(ctx),
        Message::MerkleBlock(msg) => handler.on_merkleblock(ctx, msg),
        Message::Raw { command, payload } => handler.on_other(ctx, command, payload),
    }
}
