//! In-process stand-in for the node under test.
//!
//! The listener is bound before the harness connects, so the TCP handshake
//! completes from the listen backlog and a test can script the node side on
//! its own thread with plain blocking sockets.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use qc_18_p2p_wire::{Message, MessageRegistry, NetworkMagic, ParseOutcome, VersionMessage, WireCodec};
use qc_19_p2p_harness::HarnessConfig;

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn codec() -> WireCodec {
    WireCodec::new(NetworkMagic::Regtest, Arc::new(MessageRegistry::standard()))
}

/// Harness config with short timeouts for loopback tests.
pub fn config() -> HarnessConfig {
    HarnessConfig {
        wait_timeout_secs: 10,
        connect_timeout_secs: 5,
        ..HarnessConfig::default()
    }
}

pub struct MockNode {
    listener: TcpListener,
}

impl MockNode {
    pub fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").expect("bind mock node"),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.listener.local_addr().expect("mock node address")
    }

    pub fn accept(&self) -> NodeConn {
        let (stream, _) = self.listener.accept().expect("accept harness connection");
        stream.set_read_timeout(Some(TIMEOUT)).expect("set read timeout");
        NodeConn {
            stream,
            codec: codec(),
            buffer: Vec::new(),
        }
    }
}

/// Node side of one connection.
pub struct NodeConn {
    stream: TcpStream,
    codec: WireCodec,
    buffer: Vec<u8>,
}

impl NodeConn {
    pub fn send(&mut self, message: &Message) {
        let frame = self.codec.frame(message).expect("frame message");
        self.send_bytes(&frame);
    }

    pub fn send_bytes(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("write to harness");
        self.stream.flush().expect("flush");
    }

    /// Next message from the harness. Panics on timeout or EOF.
    pub fn recv(&mut self) -> Message {
        loop {
            match self.codec.try_parse(&self.buffer).expect("harness sent a valid frame") {
                ParseOutcome::Message { message, consumed } => {
                    self.buffer.drain(..consumed);
                    return message;
                }
                ParseOutcome::Skipped { consumed, .. } => {
                    self.buffer.drain(..consumed);
                }
                ParseOutcome::NeedMoreData => {
                    let mut chunk = [0u8; 4096];
                    let n = self.stream.read(&mut chunk).expect("read from harness");
                    assert!(n > 0, "harness closed the connection");
                    self.buffer.extend_from_slice(&chunk[..n]);
                }
            }
        }
    }

    /// Skip messages until one with `command` arrives.
    pub fn recv_command(&mut self, command: &str) -> Message {
        loop {
            let message = self.recv();
            if message.command() == command {
                return message;
            }
        }
    }

    /// Answer the next `ping` with its `pong`.
    pub fn answer_ping(&mut self) -> u64 {
        match self.recv_command("ping") {
            Message::Ping(nonce) => {
                self.send(&Message::Pong(nonce));
                nonce
            }
            other => unreachable!("recv_command returned {other:?}"),
        }
    }

    /// Node half of the handshake. Returns the harness's `version`.
    pub fn handshake(&mut self, services: u64) -> VersionMessage {
        let theirs = match self.recv() {
            Message::Version(version) => version,
            other => panic!("expected version first, got {other:?}"),
        };
        self.send(&Message::Version(VersionMessage {
            services,
            start_height: 101,
            user_agent: "/mock-node:0.1/".to_string(),
            ..VersionMessage::default()
        }));
        self.send(&Message::Verack);
        match self.recv() {
            Message::Verack => {}
            other => panic!("expected verack, got {other:?}"),
        }
        theirs
    }

    /// True once the harness has closed its end.
    pub fn is_closed_by_peer(&mut self) -> bool {
        let mut chunk = [0u8; 1024];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    }
}
