//! A peer that serves blocks and transactions from its own store.
//!
//! The driver fills the store, announces the tip, and the handler answers
//! whatever the node asks for: `getdata` (tx, block, compact block),
//! `getheaders` and `getblocktxn`.

use std::collections::HashMap;
use std::time::Duration;

use qc_05_block_propagation::{
    BlockTransactions, BlockTransactionsRequest, HeaderAndShortIDs, RelayDepthPolicy, ServeMode,
};
use qc_18_p2p_wire::{
    Inventory, LocatorRequest, Message, MAX_HEADERS_RESULTS, MSG_BLOCK, MSG_CMPCT_BLOCK, MSG_TX,
};
use shared_types::{Block, BlockHeader, Hash256, Transaction};
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::errors::{HarnessError, HarnessResult};
use crate::handler::{HandlerResult, MessageHandler, PeerContext};
use crate::peer::{poll_until, Peer};

/// Read-only view of the node under test, used to check the outcome of a
/// submission. Typically backed by the node's RPC interface.
pub trait NodeObserver {
    fn best_block_hash(&self) -> HarnessResult<Hash256>;

    fn raw_mempool(&self) -> HarnessResult<Vec<Hash256>>;
}

/// Block and transaction store plus the handlers that serve it.
#[derive(Debug, Clone)]
pub struct DataStore {
    pub block_store: HashMap<Hash256, Block>,
    pub tx_store: HashMap<Hash256, Transaction>,
    /// Most recently added block; `getheaders` walks back from here.
    pub last_block_hash: Option<Hash256>,
    /// Every hash the node asked for with `getdata`, in arrival order.
    pub getdata_requests: Vec<Hash256>,
    policy: RelayDepthPolicy,
    max_headers_results: usize,
}

impl Default for DataStore {
    fn default() -> Self {
        Self {
            block_store: HashMap::new(),
            tx_store: HashMap::new(),
            last_block_hash: None,
            getdata_requests: Vec::new(),
            policy: RelayDepthPolicy::default(),
            max_headers_results: MAX_HEADERS_RESULTS,
        }
    }
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the depth and header limits from `config`.
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            policy: config.depth_policy(),
            max_headers_results: config.max_headers_results,
            ..Self::default()
        }
    }

    /// Store `block` and make it the tip.
    pub fn add_block(&mut self, block: Block) {
        let hash = block.block_hash();
        self.block_store.insert(hash, block);
        self.last_block_hash = Some(hash);
    }

    pub fn add_transaction(&mut self, tx: Transaction) {
        self.tx_store.insert(tx.txid(), tx);
    }

    /// Blocks between the tip and `hash` following stored parents, or `None`
    /// when `hash` is not on the tip's chain. The tip has depth 0.
    pub fn depth_of(&self, hash: &Hash256) -> Option<u32> {
        let mut current = self.last_block_hash?;
        let mut depth = 0u32;
        loop {
            if current == *hash {
                return Some(depth);
            }
            current = self.block_store.get(&current)?.header.prev_block_hash;
            depth = depth.checked_add(1)?;
        }
    }

    /// Headers answering `req`, oldest first. Empty when the store is.
    ///
    /// The walk starts at the tip and follows stored parents until a locator
    /// hash is reached (that header is included), the stop hash is reached,
    /// or a parent is missing. Only the entries nearest the locator are kept.
    pub fn headers_for(&self, req: &LocatorRequest) -> Vec<BlockHeader> {
        let Some(tip) = self.last_block_hash.and_then(|h| self.block_store.get(&h)) else {
            return Vec::new();
        };

        let mut walk = vec![tip.header];
        loop {
            let Some(last) = walk.last() else { break };
            if req.locator.contains(&last.block_hash()) {
                break;
            }
            let prev_hash = last.prev_block_hash;
            match self.block_store.get(&prev_hash) {
                Some(parent) => {
                    walk.push(parent.header);
                    if prev_hash == req.hash_stop {
                        break;
                    }
                }
                None => {
                    debug!(block = %prev_hash, "block hash not found in block store");
                    break;
                }
            }
        }

        walk.into_iter().rev().take(self.max_headers_results).collect()
    }

    fn serve_getdata(&self, ctx: &mut PeerContext<'_>, inv: &Inventory) -> HandlerResult {
        match inv.base_type() {
            MSG_TX => {
                if let Some(tx) = self.tx_store.get(&inv.hash) {
                    return ctx.send(&Message::Tx(tx.clone()));
                }
            }
            MSG_BLOCK => {
                if let Some(block) = self.block_store.get(&inv.hash) {
                    return ctx.send(&Message::Block(block.clone()));
                }
            }
            MSG_CMPCT_BLOCK => {
                if let Some(block) = self.block_store.get(&inv.hash) {
                    return self.serve_compact(ctx, block);
                }
            }
            _ => {}
        }
        debug!(inv_type = inv.inv_type, hash = %inv.hash, "getdata message type received");
        Ok(())
    }

    fn serve_compact(&self, ctx: &mut PeerContext<'_>, block: &Block) -> HandlerResult {
        let mode = self
            .depth_of(&block.block_hash())
            .map_or(ServeMode::FullBlock, |depth| self.policy.for_compact_getdata(depth));
        match mode {
            ServeMode::Compact => {
                let cmpct = HeaderAndShortIDs::from_block(block, rand::random(), &[0])?;
                ctx.send(&Message::CmpctBlock(cmpct.to_p2p()?))
            }
            ServeMode::FullBlock => ctx.send(&Message::Block(block.clone())),
        }
    }
}

impl MessageHandler for DataStore {
    fn on_getdata(&mut self, ctx: &mut PeerContext<'_>, inv: &[Inventory]) -> HandlerResult {
        for item in inv {
            self.getdata_requests.push(item.hash);
            self.serve_getdata(ctx, item)?;
        }
        Ok(())
    }

    fn on_getheaders(&mut self, ctx: &mut PeerContext<'_>, req: &LocatorRequest) -> HandlerResult {
        if self.block_store.is_empty() {
            return Ok(());
        }
        if !self.last_block_hash.is_some_and(|tip| self.block_store.contains_key(&tip)) {
            debug!(peer = %ctx.addr(), "getheaders without a stored tip");
            return Ok(());
        }
        let headers = self.headers_for(req);
        ctx.send(&Message::Headers(headers))
    }

    fn on_getblocktxn(
        &mut self,
        ctx: &mut PeerContext<'_>,
        req: &BlockTransactionsRequest,
    ) -> HandlerResult {
        let Some(block) = self.block_store.get(&req.block_hash) else {
            debug!(block = %req.block_hash, "getblocktxn for unknown block");
            return Ok(());
        };
        let mode = self
            .depth_of(&req.block_hash)
            .map_or(ServeMode::FullBlock, |depth| self.policy.for_getblocktxn(depth));
        match mode {
            ServeMode::Compact => match BlockTransactions::for_request(block, req) {
                Ok(response) => ctx.send(&Message::BlockTxn(response)),
                Err(e) => {
                    warn!(peer = %ctx.addr(), block = %req.block_hash, error = %e, "ignoring bad getblocktxn");
                    Ok(())
                }
            },
            ServeMode::FullBlock => ctx.send(&Message::Block(block.clone())),
        }
    }
}

/// Options for [`Peer::send_blocks_and_test`].
#[derive(Debug, Clone)]
pub struct BlockSubmission {
    /// The node's tip must move to the last block (otherwise must not).
    pub success: bool,
    /// Wait for the node to `getdata` the last block.
    pub request_block: bool,
    /// The node is expected to drop us instead of answering a ping.
    pub expect_disconnect: bool,
    /// Falls back to the peer's default timeout.
    pub timeout: Option<Duration>,
}

impl Default for BlockSubmission {
    fn default() -> Self {
        Self {
            success: true,
            request_block: true,
            expect_disconnect: false,
            timeout: None,
        }
    }
}

/// Options for [`Peer::send_txs_and_test`].
#[derive(Debug, Clone)]
pub struct TxSubmission {
    /// Every transaction must end up in the mempool (otherwise none may).
    pub success: bool,
    pub expect_disconnect: bool,
    pub timeout: Option<Duration>,
}

impl Default for TxSubmission {
    fn default() -> Self {
        Self {
            success: true,
            expect_disconnect: false,
            timeout: None,
        }
    }
}

impl Peer<DataStore> {
    /// Store `blocks`, announce the last one with `headers` and check whether
    /// the node's tip follows.
    pub fn send_blocks_and_test(
        &self,
        blocks: &[Block],
        observer: &impl NodeObserver,
        opts: &BlockSubmission,
    ) -> HarnessResult<()> {
        let Some(tip) = blocks.last() else {
            return Err(HarnessError::Assertion("no blocks to send".to_string()));
        };
        let tip_hash = tip.block_hash();
        let timeout = opts.timeout.unwrap_or_else(|| self.timeout());

        self.with_handler(|store, _| {
            for block in blocks {
                store.add_block(block.clone());
            }
        });
        info!(peer = %self.addr(), blocks = blocks.len(), tip = %tip_hash, "announcing blocks");
        self.send_message(&Message::Headers(vec![tip.header]))?;

        if opts.request_block {
            self.wait_until("getdata for announced block", timeout, |_, store| {
                store.getdata_requests.contains(&tip_hash)
            })?;
        }

        if opts.expect_disconnect {
            self.wait_for_disconnect(timeout)?;
        } else {
            self.sync_with_ping(timeout)?;
        }

        if opts.success {
            poll_until("node tip to reach announced block", timeout, || {
                Ok(observer.best_block_hash()? == tip_hash)
            })
        } else if observer.best_block_hash()? == tip_hash {
            Err(HarnessError::Assertion(format!("node accepted block {tip_hash}")))
        } else {
            Ok(())
        }
    }

    /// Store and send `txs`, then check the node's mempool.
    pub fn send_txs_and_test(
        &self,
        txs: &[Transaction],
        observer: &impl NodeObserver,
        opts: &TxSubmission,
    ) -> HarnessResult<()> {
        let timeout = opts.timeout.unwrap_or_else(|| self.timeout());
        self.with_handler(|store, _| {
            for tx in txs {
                store.add_transaction(tx.clone());
            }
        });
        for tx in txs {
            self.send_message(&Message::Tx(tx.clone()))?;
        }

        if opts.expect_disconnect {
            self.wait_for_disconnect(timeout)?;
        } else {
            self.sync_with_ping(timeout)?;
        }

        let mempool = observer.raw_mempool()?;
        for tx in txs {
            let txid = tx.txid();
            match (opts.success, mempool.contains(&txid)) {
                (true, false) => {
                    return Err(HarnessError::Assertion(format!("{txid} not found in mempool")))
                }
                (false, true) => {
                    return Err(HarnessError::Assertion(format!("{txid} tx found in mempool")))
                }
                _ => {}
            }
        }
        Ok(())
    }
}
