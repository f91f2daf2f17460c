//! Per-peer state shared between the network thread and the driver.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use qc_18_p2p_wire::Message;

/// Handshake progress as seen from our side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Socket not open yet.
    Connecting,
    /// Socket open and our `version` queued.
    VersionSent,
    /// The node's `version` arrived and our `verack` went out.
    VersionReceived,
    /// The node's `verack` arrived.
    Established,
    Closed,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `disconnect()` was called.
    LocalDisconnect,
    /// The node closed the socket.
    RemoteClosed,
    Io(String),
    /// The codec rejected incoming bytes.
    Framing(String),
    /// A message handler returned an error.
    Handler(String),
    ConnectFailed(String),
    /// The network thread stopped underneath the connection.
    Shutdown,
}

impl CloseReason {
    /// Short label used for the disconnect metric.
    pub fn kind(&self) -> &'static str {
        match self {
            CloseReason::LocalDisconnect => "local",
            CloseReason::RemoteClosed => "remote",
            CloseReason::Io(_) => "io",
            CloseReason::Framing(_) => "framing",
            CloseReason::Handler(_) => "handler",
            CloseReason::ConnectFailed(_) => "connect",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::LocalDisconnect => f.write_str("disconnected locally"),
            CloseReason::RemoteClosed => f.write_str("closed by remote"),
            CloseReason::Io(e) => write!(f, "i/o error: {e}"),
            CloseReason::Framing(e) => write!(f, "framing error: {e}"),
            CloseReason::Handler(e) => write!(f, "handler error: {e}"),
            CloseReason::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            CloseReason::Shutdown => f.write_str("network thread shut down"),
        }
    }
}

/// Everything the harness tracks about one connection.
///
/// Only reachable through the peer's monitor lock.
#[derive(Debug, Clone)]
pub struct PeerState {
    pub addr: SocketAddr,
    pub handshake: HandshakeState,
    /// True while the socket is open.
    pub connected: bool,
    /// Service bits from the node's `version`.
    pub services: u64,
    /// Protocol version from the node's `version`.
    pub peer_version: Option<i32>,
    pub verack_received: bool,
    pub message_count: HashMap<String, u64>,
    /// Most recent message of each command.
    pub last_message: HashMap<String, Message>,
    pub bytes_received: u64,
    /// Bytes the socket has accepted. Frames still queued are not counted.
    pub bytes_sent: u64,
    /// Unregistered commands skipped in permissive mode.
    pub unknown_messages: u64,
    /// Messages that arrived out of handshake order.
    pub protocol_violations: Vec<String>,
    pub handler_failures: Vec<String>,
    pub close_reason: Option<CloseReason>,
    /// Nonce for the next `sync_with_ping`. Starts at 1.
    pub ping_counter: u64,
}

impl PeerState {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            handshake: HandshakeState::Connecting,
            connected: false,
            services: 0,
            peer_version: None,
            verack_received: false,
            message_count: HashMap::new(),
            last_message: HashMap::new(),
            bytes_received: 0,
            bytes_sent: 0,
            unknown_messages: 0,
            protocol_violations: Vec::new(),
            handler_failures: Vec::new(),
            close_reason: None,
            ping_counter: 1,
        }
    }

    pub fn count(&self, command: &str) -> u64 {
        self.message_count.get(command).copied().unwrap_or(0)
    }

    pub fn last(&self, command: &str) -> Option<&Message> {
        self.last_message.get(command)
    }

    pub fn is_established(&self) -> bool {
        self.handshake == HandshakeState::Established
    }

    pub fn is_closed(&self) -> bool {
        self.close_reason.is_some()
    }

    pub(crate) fn record_received(&mut self, message: &Message) {
        let command = message.command().to_string();
        *self.message_count.entry(command.clone()).or_insert(0) += 1;
        self.last_message.insert(command, message.clone());
    }
}
