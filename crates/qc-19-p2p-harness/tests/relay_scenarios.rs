//! Block and transaction relay scenarios against a loopback mock node:
//! serving from the data store, fragmented frames, deep `getblocktxn`, the
//! submit-and-test helpers and compact block announcements.

mod common;

use std::sync::Arc;

use common::{config, MockNode, NodeConn, TIMEOUT};
use parking_lot::Mutex;
use qc_05_block_propagation::{
    BlockTransactionsRequest, HeaderAndShortIDs, ReconstructionStatus,
};
use qc_18_p2p_wire::{Inventory, LocatorRequest, Message, SendCmpctMessage, NODE_NETWORK};
use qc_19_p2p_harness::{
    BlockSubmission, CompactBlockPeer, DataStore, HarnessError, HarnessResult,
    NetworkThread, NodeObserver, Peer, TxSubmission,
};
use shared_types::{Block, Hash256, OutPoint, Transaction};

fn chain_from(prev: Hash256, start_height: u32, len: u32) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut prev = prev;
    for height in start_height..start_height + len {
        let block = Block::new(prev, 1_600_000_000 + height, vec![Transaction::coinbase(height, 50)]);
        prev = block.block_hash();
        blocks.push(block);
    }
    blocks
}

fn spends(count: u8) -> Vec<Transaction> {
    (1..=count)
        .map(|n| Transaction::spend(OutPoint::new(Hash256([n; 32]), 0), 1_000))
        .collect()
}

fn connect_store(node: &MockNode, network: &NetworkThread) -> (Peer<DataStore>, NodeConn) {
    let peer = network
        .connect(node.addr(), DataStore::from_config(&config()), &config())
        .unwrap();
    let mut conn = node.accept();
    conn.handshake(NODE_NETWORK);
    peer.wait_for_verack(TIMEOUT).unwrap();
    (peer, conn)
}

/// Node state shared between the mock node thread and the observer.
#[derive(Default)]
struct MockChain {
    tip: Mutex<Hash256>,
    mempool: Mutex<Vec<Hash256>>,
}

impl NodeObserver for MockChain {
    fn best_block_hash(&self) -> HarnessResult<Hash256> {
        Ok(*self.tip.lock())
    }

    fn raw_mempool(&self) -> HarnessResult<Vec<Hash256>> {
        Ok(self.mempool.lock().clone())
    }
}

// =============================================================================
// DATA STORE OVER THE WIRE
// =============================================================================

#[test]
fn test_store_answers_getheaders_and_getdata() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let (peer, mut conn) = connect_store(&node, &network);

    let blocks = chain_from(Hash256::ZERO, 1, 5);
    peer.with_handler(|store, _| {
        for block in &blocks {
            store.add_block(block.clone());
        }
    });

    conn.send(&Message::GetHeaders(LocatorRequest::new(
        vec![blocks[1].block_hash()],
        Hash256::ZERO,
    )));
    match conn.recv_command("headers") {
        Message::Headers(headers) => {
            let hashes: Vec<Hash256> = headers.iter().map(|h| h.block_hash()).collect();
            let expected: Vec<Hash256> = blocks[1..].iter().map(Block::block_hash).collect();
            assert_eq!(hashes, expected);
        }
        other => unreachable!("{other:?}"),
    }

    conn.send(&Message::GetData(vec![Inventory::block(blocks[3].block_hash())]));
    assert_eq!(conn.recv_command("block"), Message::Block(blocks[3].clone()));
    assert_eq!(
        peer.with_state(|_, store| store.getdata_requests.clone()),
        vec![blocks[3].block_hash()]
    );
}

#[test]
fn test_header_split_across_reads() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let (peer, mut conn) = connect_store(&node, &network);
    let baseline = peer.state().bytes_received;

    let frame = common::codec().frame(&Message::Ping(42)).unwrap();
    conn.send_bytes(&frame[..12]);
    peer.wait_until("first half", TIMEOUT, |state, _| {
        state.bytes_received == baseline + 12
    })
    .unwrap();
    assert_eq!(peer.state().count("ping"), 0);

    conn.send_bytes(&frame[12..]);
    assert_eq!(conn.recv_command("pong"), Message::Pong(42));
    let state = peer.state();
    assert_eq!(state.count("ping"), 1);
    assert_eq!(state.bytes_received, baseline + frame.len() as u64);
}

#[test]
fn test_deep_getblocktxn_gets_full_block() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let (peer, mut conn) = connect_store(&node, &network);

    let mut txs = vec![Transaction::coinbase(1, 50)];
    txs.extend(spends(3));
    let deep = Block::new(Hash256::ZERO, 1_600_000_001, txs);
    let rest = chain_from(deep.block_hash(), 2, 11);
    peer.with_handler(|store, _| {
        store.add_block(deep.clone());
        for block in &rest {
            store.add_block(block.clone());
        }
    });
    assert_eq!(peer.with_state(|_, store| store.depth_of(&deep.block_hash())), Some(11));

    let req = BlockTransactionsRequest::from_absolute(deep.block_hash(), &[1, 2]).unwrap();
    conn.send(&Message::GetBlockTxn(req));
    assert_eq!(conn.recv(), Message::Block(deep.clone()));

    // Within the limit the same request is answered with blocktxn.
    let shallow = &rest[rest.len() - 1];
    let req = BlockTransactionsRequest::from_absolute(shallow.block_hash(), &[0]).unwrap();
    conn.send(&Message::GetBlockTxn(req));
    match conn.recv() {
        Message::BlockTxn(response) => {
            assert_eq!(response.block_hash, shallow.block_hash());
            assert_eq!(response.transactions, shallow.transactions);
        }
        other => panic!("expected blocktxn, got {other:?}"),
    }
}

// =============================================================================
// SUBMIT AND TEST
// =============================================================================

#[test]
fn test_send_blocks_and_test_accepted() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let (peer, mut conn) = connect_store(&node, &network);
    let chain = Arc::new(MockChain::default());
    let blocks = chain_from(Hash256::ZERO, 1, 3);

    let node_chain = Arc::clone(&chain);
    let node_thread = std::thread::spawn(move || {
        let tip = match conn.recv_command("headers") {
            Message::Headers(headers) => headers[0].block_hash(),
            other => unreachable!("{other:?}"),
        };
        conn.send(&Message::GetData(vec![Inventory::block(tip)]));
        match conn.recv_command("block") {
            Message::Block(block) => *node_chain.tip.lock() = block.block_hash(),
            other => unreachable!("{other:?}"),
        }
        conn.answer_ping();
        conn
    });

    peer.send_blocks_and_test(&blocks, chain.as_ref(), &BlockSubmission::default())
        .unwrap();
    let _conn = node_thread.join().unwrap();
    assert_eq!(
        peer.with_state(|_, store| store.last_block_hash),
        Some(blocks[2].block_hash())
    );
}

#[test]
fn test_send_blocks_and_test_rejected() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let (peer, mut conn) = connect_store(&node, &network);
    let chain = Arc::new(MockChain::default());
    let blocks = chain_from(Hash256::ZERO, 1, 1);

    let node_thread = std::thread::spawn(move || {
        conn.recv_command("headers");
        conn.answer_ping();
        conn
    });

    let opts = BlockSubmission {
        success: false,
        request_block: false,
        ..BlockSubmission::default()
    };
    peer.send_blocks_and_test(&blocks, chain.as_ref(), &opts).unwrap();
    let mut conn = node_thread.join().unwrap();

    // Tip moved after all: a failure is reported.
    *chain.tip.lock() = blocks[0].block_hash();
    let node_thread = std::thread::spawn(move || {
        conn.recv_command("headers");
        conn.answer_ping();
        conn
    });
    let err = peer.send_blocks_and_test(&blocks, chain.as_ref(), &opts).unwrap_err();
    assert!(matches!(err, HarnessError::Assertion(_)));
    node_thread.join().unwrap();
}

#[test]
fn test_send_txs_and_test_checks_mempool() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let (peer, mut conn) = connect_store(&node, &network);
    let chain = Arc::new(MockChain::default());
    let txs = spends(2);

    let node_chain = Arc::clone(&chain);
    let node_thread = std::thread::spawn(move || {
        for _ in 0..2 {
            if let Message::Tx(tx) = conn.recv_command("tx") {
                node_chain.mempool.lock().push(tx.txid());
            }
        }
        conn.answer_ping();
        conn
    });
    peer.send_txs_and_test(&txs, chain.as_ref(), &TxSubmission::default())
        .unwrap();
    let mut conn = node_thread.join().unwrap();

    // Same transactions, but now they are expected to be refused.
    let node_thread = std::thread::spawn(move || {
        conn.recv_command("tx");
        conn.recv_command("tx");
        conn.answer_ping();
        conn
    });
    let opts = TxSubmission {
        success: false,
        ..TxSubmission::default()
    };
    let err = peer.send_txs_and_test(&txs, chain.as_ref(), &opts).unwrap_err();
    assert!(err.to_string().contains("tx found in mempool"));
    node_thread.join().unwrap();
}

// =============================================================================
// COMPACT BLOCKS
// =============================================================================

#[test]
fn test_compact_block_announcement_and_reconstruction() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let peer = network
        .connect(node.addr(), CompactBlockPeer::new(), &config())
        .unwrap();
    let mut conn = node.accept();
    conn.handshake(NODE_NETWORK);
    peer.wait_for_verack(TIMEOUT).unwrap();

    let tip_hash = chain_from(Hash256::ZERO, 1, 1)[0].block_hash();
    let mut txs = vec![Transaction::coinbase(2, 50)];
    txs.extend(spends(4));
    let block = Block::new(tip_hash, 1_600_000_002, txs);

    let announced = block.clone();
    let node_thread = std::thread::spawn(move || {
        match conn.recv() {
            Message::GetHeaders(req) => assert_eq!(req.locator.have, vec![tip_hash]),
            other => panic!("expected getheaders, got {other:?}"),
        }
        assert_eq!(
            conn.recv(),
            Message::SendCmpct(SendCmpctMessage {
                announce: true,
                version: 2
            })
        );
        conn.answer_ping();
        let cmpct = HeaderAndShortIDs::from_block(&announced, 11, &[]).unwrap();
        conn.send(&Message::CmpctBlock(cmpct.to_p2p().unwrap()));
        conn.send(&Message::SendCmpct(SendCmpctMessage {
            announce: false,
            version: 2,
        }));
        conn
    });

    peer.request_cb_announcements(tip_hash, 2, TIMEOUT).unwrap();
    peer.wait_for_block_announcement(block.block_hash(), TIMEOUT).unwrap();
    peer.wait_until("sendcmpct", TIMEOUT, |_, handler| !handler.last_sendcmpct.is_empty())
        .unwrap();
    let _conn = node_thread.join().unwrap();

    // Two of the four spends are already known locally.
    let pool = vec![block.transactions[1].clone(), block.transactions[3].clone()];
    let partial = peer.reconstruct_last_cmpctblock(&pool).unwrap().unwrap();
    assert_eq!(
        partial.status(),
        ReconstructionStatus::Incomplete { missing: vec![2, 4] }
    );

    peer.clear_block_announcement();
    let state = peer.with_state(|state, handler| (state.last("cmpctblock").is_none(), handler.block_announced));
    assert_eq!(state, (true, false));
    assert!(peer.reconstruct_last_cmpctblock(&pool).unwrap().is_none());
}

#[test]
fn test_request_headers_and_sync() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let peer = network
        .connect(node.addr(), CompactBlockPeer::new(), &config())
        .unwrap();
    let mut conn = node.accept();
    conn.handshake(NODE_NETWORK);
    peer.wait_for_verack(TIMEOUT).unwrap();
    let blocks = chain_from(Hash256::ZERO, 1, 2);

    let answer = blocks[1].header;
    let node_thread = std::thread::spawn(move || {
        conn.recv_command("getheaders");
        conn.send(&Message::Headers(vec![answer]));
        conn
    });
    peer.request_headers_and_sync(vec![blocks[0].block_hash()], Hash256::ZERO, TIMEOUT)
        .unwrap();
    let mut conn = node_thread.join().unwrap();

    assert!(peer.with_state(|_, handler| !handler.block_announced));
    assert!(peer.with_state(|_, handler| handler.announced_blockhashes.contains(&blocks[1].block_hash())));

    // Headers sent to the node arrive intact.
    peer.send_header_for_blocks(&blocks).unwrap();
    match conn.recv_command("headers") {
        Message::Headers(headers) => assert_eq!(headers.len(), 2),
        other => unreachable!("{other:?}"),
    }
}

#[test]
fn test_send_await_disconnect() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let peer = network
        .connect(node.addr(), CompactBlockPeer::new(), &config())
        .unwrap();
    let mut conn = node.accept();
    conn.handshake(NODE_NETWORK);
    peer.wait_for_verack(TIMEOUT).unwrap();

    // The node drops us as soon as it sees the block.
    let node_thread = std::thread::spawn(move || {
        conn.recv_command("block");
        drop(conn);
    });
    let invalid = chain_from(Hash256([6u8; 32]), 1, 1).remove(0);
    peer.send_await_disconnect(&Message::Block(invalid), TIMEOUT)
        .unwrap();
    node_thread.join().unwrap();
    assert!(!peer.is_connected());
}
