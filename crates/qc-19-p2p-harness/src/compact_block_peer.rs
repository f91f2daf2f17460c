//! Peer used by compact block relay tests.
//!
//! Records every `sendcmpct` and every block announcement, whichever way it
//! arrives (`cmpctblock`, `headers` or a block `inv`). Announcements are
//! never followed up with `getdata`; the driver decides what to request.

use std::collections::HashSet;
use std::time::Duration;

use qc_05_block_propagation::{HeaderAndShortIDs, P2PHeaderAndShortIDs, PartiallyDownloadedBlock};
use qc_18_p2p_wire::{Inventory, LocatorRequest, Message, SendCmpctMessage, MSG_BLOCK};
use shared_types::{Block, BlockHeader, Hash256, Transaction};

use crate::errors::HarnessResult;
use crate::handler::{HandlerResult, MessageHandler, PeerContext};
use crate::peer::Peer;

#[derive(Debug, Default, Clone)]
pub struct CompactBlockPeer {
    pub last_sendcmpct: Vec<SendCmpctMessage>,
    pub block_announced: bool,
    pub announced_blockhashes: HashSet<Hash256>,
}

impl CompactBlockPeer {
    pub fn new() -> Self {
        Self::default()
    }

    fn announce(&mut self, hash: Hash256) {
        self.block_announced = true;
        self.announced_blockhashes.insert(hash);
    }
}

impl MessageHandler for CompactBlockPeer {
    fn on_sendcmpct(&mut self, _ctx: &mut PeerContext<'_>, msg: &SendCmpctMessage) -> HandlerResult {
        self.last_sendcmpct.push(*msg);
        Ok(())
    }

    fn on_cmpctblock(
        &mut self,
        _ctx: &mut PeerContext<'_>,
        cmpct: &P2PHeaderAndShortIDs,
    ) -> HandlerResult {
        self.announce(cmpct.header.block_hash());
        Ok(())
    }

    fn on_headers(&mut self, _ctx: &mut PeerContext<'_>, headers: &[BlockHeader]) -> HandlerResult {
        // An empty headers message still counts as an answer.
        self.block_announced = true;
        for header in headers {
            self.announced_blockhashes.insert(header.block_hash());
        }
        Ok(())
    }

    fn on_inv(&mut self, _ctx: &mut PeerContext<'_>, inv: &[Inventory]) -> HandlerResult {
        for item in inv.iter().filter(|item| item.inv_type == MSG_BLOCK) {
            self.announce(item.hash);
        }
        Ok(())
    }
}

impl Peer<CompactBlockPeer> {
    /// Reset the announcement flag and forget the last inv, headers and
    /// cmpctblock.
    pub fn clear_block_announcement(&self) {
        self.with_handler(|peer, state| {
            peer.block_announced = false;
            for command in ["inv", "headers", "cmpctblock"] {
                state.last_message.remove(command);
            }
        });
    }

    pub fn get_headers(&self, locator: Vec<Hash256>, hash_stop: Hash256) -> HarnessResult<()> {
        self.send_message(&Message::GetHeaders(LocatorRequest::new(locator, hash_stop)))
    }

    pub fn send_header_for_blocks(&self, blocks: &[Block]) -> HarnessResult<()> {
        let headers = blocks.iter().map(|block| block.header).collect();
        self.send_message(&Message::Headers(headers))
    }

    /// `getheaders` and wait until the node answers with any announcement.
    pub fn request_headers_and_sync(
        &self,
        locator: Vec<Hash256>,
        hash_stop: Hash256,
        timeout: Duration,
    ) -> HarnessResult<()> {
        self.clear_block_announcement();
        self.get_headers(locator, hash_stop)?;
        self.wait_until("block announcement", timeout, |_, peer| peer.block_announced)?;
        self.clear_block_announcement();
        Ok(())
    }

    pub fn wait_for_block_announcement(&self, block_hash: Hash256, timeout: Duration) -> HarnessResult<()> {
        self.wait_until("announcement of block", timeout, |_, peer| {
            peer.announced_blockhashes.contains(&block_hash)
        })
    }

    /// Send something the node should punish us for and wait to be dropped.
    pub fn send_await_disconnect(&self, message: &Message, timeout: Duration) -> HarnessResult<()> {
        self.send_message(message)?;
        self.wait_for_disconnect(timeout)
    }

    /// Ask the node to announce new blocks with `cmpctblock`, using compact
    /// block `version`. The `getheaders` makes the node consider our tip
    /// synced first.
    pub fn request_cb_announcements(&self, tip: Hash256, version: u64, timeout: Duration) -> HarnessResult<()> {
        self.get_headers(vec![tip], Hash256::ZERO)?;
        self.send_and_ping(
            &Message::SendCmpct(SendCmpctMessage {
                announce: true,
                version,
            }),
            timeout,
        )
    }

    /// Start rebuilding the last announced compact block from `pool`.
    /// `None` if no `cmpctblock` has been received.
    ///
    /// Whatever is still missing can be requested with
    /// [`PartiallyDownloadedBlock::request`].
    pub fn reconstruct_last_cmpctblock<'a, I>(
        &self,
        pool: I,
    ) -> HarnessResult<Option<PartiallyDownloadedBlock>>
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let announced = self.with_state(|state, _| match state.last("cmpctblock") {
            Some(Message::CmpctBlock(cmpct)) => Some(cmpct.clone()),
            _ => None,
        });
        let Some(p2p) = announced else {
            return Ok(None);
        };
        let cmpct = HeaderAndShortIDs::from_p2p(&p2p)?;
        Ok(Some(PartiallyDownloadedBlock::init(&cmpct, pool)?))
    }
}
