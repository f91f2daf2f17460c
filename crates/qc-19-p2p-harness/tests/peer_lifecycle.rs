//! Connection lifecycle against a loopback mock node: handshake, ping
//! synchronisation, default handlers, framing failures and disconnects.

mod common;

use std::time::Duration;

use common::{config, MockNode, TIMEOUT};
use qc_18_p2p_wire::{
    Inventory, Message, VersionMessage, MSG_TX, MY_VERSION, NODE_NETWORK, NODE_NETWORK_LIMITED,
};
use qc_19_p2p_harness::{
    CloseReason, DefaultPeer, HandlerResult, HandshakeState, HarnessConfig, HarnessError,
    MessageHandler, NetworkThread, PeerContext,
};
use shared_types::{Block, Hash256, Transaction};

// =============================================================================
// HANDSHAKE
// =============================================================================

#[test]
fn test_handshake_records_node_version() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let peer = network.connect(node.addr(), DefaultPeer, &config()).unwrap();
    let mut conn = node.accept();

    let ours = conn.handshake(NODE_NETWORK | NODE_NETWORK_LIMITED);
    assert_eq!(ours.version, MY_VERSION);
    assert_eq!(ours.addr_recv.socket_addr(), node.addr());

    peer.wait_for_verack(TIMEOUT).unwrap();
    let state = peer.state();
    assert_eq!(state.handshake, HandshakeState::Established);
    assert!(state.verack_received);
    assert_eq!(state.services, NODE_NETWORK | NODE_NETWORK_LIMITED);
    assert_eq!(state.peer_version, Some(MY_VERSION));
    assert!(state.protocol_violations.is_empty());
}

#[test]
fn test_addrv2_negotiated_before_verack() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let config = HarnessConfig {
        support_addrv2: true,
        ..config()
    };
    let _peer = network.connect(node.addr(), DefaultPeer, &config).unwrap();
    let mut conn = node.accept();

    assert!(matches!(conn.recv(), Message::Version(_)));
    conn.send(&Message::Version(VersionMessage::default()));
    assert_eq!(conn.recv(), Message::SendAddrV2);
    assert_eq!(conn.recv(), Message::Verack);
}

#[test]
fn test_old_version_is_handler_failure() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let peer = network.connect(node.addr(), DefaultPeer, &config()).unwrap();
    let mut conn = node.accept();

    conn.recv();
    conn.send(&Message::Version(VersionMessage {
        version: 60000,
        ..VersionMessage::default()
    }));

    peer.wait_for_disconnect(TIMEOUT).unwrap();
    let state = peer.state();
    assert_eq!(state.handler_failures.len(), 1);
    assert!(matches!(state.close_reason, Some(CloseReason::Handler(_))));
    assert!(matches!(
        peer.wait_for_verack(Duration::from_millis(200)),
        Err(HarnessError::HandlerFailed(_))
    ));
}

#[test]
fn test_message_before_verack_is_violation() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let peer = network.connect(node.addr(), DefaultPeer, &config()).unwrap();
    let mut conn = node.accept();

    conn.recv();
    conn.send(&Message::Version(VersionMessage::default()));
    conn.send(&Message::Ping(77));
    assert_eq!(conn.recv_command("pong"), Message::Pong(77));

    let state = peer.state();
    assert_eq!(state.protocol_violations, vec!["ping received before verack".to_string()]);
    assert!(state.connected);
    assert_eq!(state.handshake, HandshakeState::VersionReceived);
}

// =============================================================================
// PING / DEFAULT HANDLERS
// =============================================================================

#[test]
fn test_sync_with_ping_advances_counter() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let peer = network.connect(node.addr(), DefaultPeer, &config()).unwrap();
    let mut conn = node.accept();
    conn.handshake(NODE_NETWORK);
    peer.wait_for_verack(TIMEOUT).unwrap();

    let responder = std::thread::spawn(move || {
        let first = conn.answer_ping();
        let second = conn.answer_ping();
        (first, second, conn)
    });
    peer.sync_with_ping(TIMEOUT).unwrap();
    peer.sync_with_ping(TIMEOUT).unwrap();
    let (first, second, _conn) = responder.join().unwrap();

    assert_eq!((first, second), (1, 2));
    assert_eq!(peer.state().ping_counter, 3);
}

#[test]
fn test_stale_pong_does_not_satisfy_ping() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let peer = network.connect(node.addr(), DefaultPeer, &config()).unwrap();
    let mut conn = node.accept();
    conn.handshake(NODE_NETWORK);
    peer.wait_for_verack(TIMEOUT).unwrap();

    let responder = std::thread::spawn(move || {
        conn.recv_command("ping");
        conn.send(&Message::Pong(999));
        conn
    });
    let err = peer.sync_with_ping(Duration::from_millis(300)).unwrap_err();
    assert!(err.is_timeout());
    let _conn = responder.join().unwrap();
    assert_eq!(peer.state().ping_counter, 1);
}

#[test]
fn test_default_handlers_answer_ping_and_inv() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let peer = network.connect(node.addr(), DefaultPeer, &config()).unwrap();
    let mut conn = node.accept();
    conn.handshake(NODE_NETWORK);
    peer.wait_for_verack(TIMEOUT).unwrap();

    conn.send(&Message::Ping(5));
    assert_eq!(conn.recv(), Message::Pong(5));

    let tx_hash = Hash256([1u8; 32]);
    conn.send(&Message::Inv(vec![
        Inventory::new(0, Hash256([2u8; 32])),
        Inventory::new(MSG_TX, tx_hash),
    ]));
    assert_eq!(conn.recv(), Message::GetData(vec![Inventory::tx(tx_hash)]));

    peer.wait_for_inv(&Inventory::new(0, Hash256([2u8; 32])), TIMEOUT).unwrap();
    assert_eq!(peer.state().count("inv"), 1);
}

#[test]
fn test_wait_helpers_match_content() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let peer = network.connect(node.addr(), DefaultPeer, &config()).unwrap();
    let mut conn = node.accept();
    conn.handshake(NODE_NETWORK);
    peer.wait_for_verack(TIMEOUT).unwrap();

    let tx = Transaction::coinbase(3, 10);
    let block = Block::new(Hash256::ZERO, 1_700_000_000, vec![Transaction::coinbase(1, 50)]);
    conn.send(&Message::Tx(tx.clone()));
    conn.send(&Message::Block(block.clone()));
    conn.send(&Message::Headers(vec![block.header]));

    peer.wait_for_tx(tx.txid(), TIMEOUT).unwrap();
    peer.wait_for_block(block.block_hash(), TIMEOUT).unwrap();
    peer.wait_for_header(block.block_hash(), TIMEOUT).unwrap();
    assert!(peer
        .wait_for_block(Hash256([8u8; 32]), Duration::from_millis(100))
        .unwrap_err()
        .is_timeout());
}

// =============================================================================
// FAILURES
// =============================================================================

#[test]
fn test_bad_magic_closes_connection() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let peer = network.connect(node.addr(), DefaultPeer, &config()).unwrap();
    let mut conn = node.accept();
    conn.handshake(NODE_NETWORK);
    peer.wait_for_verack(TIMEOUT).unwrap();

    conn.send_bytes(&[0xde, 0xad, 0xbe, 0xef]);
    peer.wait_for_disconnect(TIMEOUT).unwrap();

    assert!(matches!(peer.state().close_reason, Some(CloseReason::Framing(_))));
    assert!(matches!(
        peer.send_message(&Message::Ping(1)),
        Err(HarnessError::NotConnected)
    ));
    assert!(conn.is_closed_by_peer());
}

#[test]
fn test_unknown_command_strict_vs_permissive() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();

    // Strict: fatal.
    let strict = network.connect(node.addr(), DefaultPeer, &config()).unwrap();
    let mut conn = node.accept();
    conn.handshake(NODE_NETWORK);
    strict.wait_for_verack(TIMEOUT).unwrap();
    conn.send_bytes(&common::codec().frame_raw("wtxidrelay2", b"xyz").unwrap());
    strict.wait_for_disconnect(TIMEOUT).unwrap();
    assert!(matches!(strict.state().close_reason, Some(CloseReason::Framing(_))));

    // Permissive: skipped and counted.
    let permissive_config = HarnessConfig {
        strict_message_types: false,
        ..config()
    };
    let permissive = network.connect(node.addr(), DefaultPeer, &permissive_config).unwrap();
    let mut conn = node.accept();
    conn.handshake(NODE_NETWORK);
    permissive.wait_for_verack(TIMEOUT).unwrap();
    conn.send_bytes(&common::codec().frame_raw("wtxidrelay2", b"xyz").unwrap());
    conn.send(&Message::Ping(9));
    assert_eq!(conn.recv(), Message::Pong(9));
    let state = permissive.state();
    assert_eq!(state.unknown_messages, 1);
    assert!(state.connected);
}

struct RejectsBlocks;

impl MessageHandler for RejectsBlocks {
    fn on_block(&mut self, _ctx: &mut PeerContext<'_>, block: &Block) -> HandlerResult {
        Err(HarnessError::Handler(format!("refusing block {}", block.block_hash())))
    }
}

#[test]
fn test_handler_error_closes_and_fails_waits() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let peer = network.connect(node.addr(), RejectsBlocks, &config()).unwrap();
    let mut conn = node.accept();
    conn.handshake(NODE_NETWORK);
    peer.wait_for_verack(TIMEOUT).unwrap();

    let block = Block::new(Hash256::ZERO, 1, vec![Transaction::coinbase(1, 50)]);
    conn.send(&Message::Block(block.clone()));
    peer.wait_for_disconnect(TIMEOUT).unwrap();

    let state = peer.state();
    assert_eq!(state.handler_failures.len(), 1);
    assert!(state.handler_failures[0].starts_with("block: refusing block"));
    // The predicate is checked before the failure.
    peer.wait_for_block(block.block_hash(), TIMEOUT).unwrap();
    assert!(matches!(
        peer.wait_for_tx(Hash256::ZERO, TIMEOUT),
        Err(HarnessError::HandlerFailed(_))
    ));
}

// =============================================================================
// DISCONNECT
// =============================================================================

#[test]
fn test_disconnect_is_idempotent() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let peer = network.connect(node.addr(), DefaultPeer, &config()).unwrap();
    let mut conn = node.accept();
    conn.handshake(NODE_NETWORK);
    peer.wait_for_verack(TIMEOUT).unwrap();

    peer.disconnect();
    peer.disconnect();
    peer.wait_for_disconnect(TIMEOUT).unwrap();
    peer.disconnect();

    assert_eq!(peer.state().close_reason, Some(CloseReason::LocalDisconnect));
    assert!(matches!(
        peer.send_raw(vec![0u8; 4]),
        Err(HarnessError::NotConnected)
    ));
    assert!(conn.is_closed_by_peer());
}

#[test]
fn test_disconnect_while_node_stops_reading() {
    const FRAME: usize = 8 * 1024 * 1024;

    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let peer = network.connect(node.addr(), DefaultPeer, &config()).unwrap();
    let mut conn = node.accept();
    conn.handshake(NODE_NETWORK);
    peer.wait_for_verack(TIMEOUT).unwrap();
    let sent_before = peer.state().bytes_sent;

    // The node never reads again, so the socket buffers fill up.
    for _ in 0..8 {
        peer.send_raw(vec![0u8; FRAME]).unwrap();
    }

    // Inbound traffic is still processed behind the stalled write.
    let tx = Transaction::coinbase(9, 10);
    conn.send(&Message::Tx(tx.clone()));
    peer.wait_for_tx(tx.txid(), TIMEOUT).unwrap();

    let state = peer.state();
    assert!(state.connected);
    assert!(state.bytes_sent - sent_before < 8 * FRAME as u64);

    peer.disconnect();
    peer.wait_for_disconnect(Duration::from_secs(3)).unwrap();
    assert_eq!(peer.state().close_reason, Some(CloseReason::LocalDisconnect));
}

#[test]
fn test_remote_close_is_recorded() {
    let node = MockNode::bind();
    let network = NetworkThread::start().unwrap();
    let peer = network.connect(node.addr(), DefaultPeer, &config()).unwrap();
    let mut conn = node.accept();
    conn.handshake(NODE_NETWORK);
    drop(conn);

    peer.wait_for_disconnect(TIMEOUT).unwrap();
    assert_eq!(peer.state().close_reason, Some(CloseReason::RemoteClosed));
}

#[test]
fn test_connect_refused() {
    let addr = {
        let node = MockNode::bind();
        node.addr()
    };
    let network = NetworkThread::start().unwrap();
    let result = network.connect(addr, DefaultPeer, &config());
    assert!(matches!(result, Err(HarnessError::ConnectFailed { .. })));
}

#[test]
fn test_network_shutdown_closes_peers() {
    let node = MockNode::bind();
    let mut network = NetworkThread::start().unwrap();
    let peer = network.connect(node.addr(), DefaultPeer, &config()).unwrap();
    let _conn = node.accept();

    network.close(TIMEOUT).unwrap();
    assert!(!peer.is_connected());
    assert_eq!(peer.state().close_reason, Some(CloseReason::Shutdown));
}
