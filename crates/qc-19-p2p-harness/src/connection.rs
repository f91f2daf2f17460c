//! One TCP connection to the node.
//!
//! The socket lives in a task on the network thread. The driver side talks
//! to it through a [`Link`]: framed bytes go down an unbounded channel and a
//! `watch` flag asks the task to drop the socket. Writes run beside reads,
//! so a node that stops reading cannot hold off a disconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use qc_18_p2p_wire::{Message, WireCodec};
use quantum_telemetry::{metric_inc, P2P_MESSAGES_SENT};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::errors::{HarnessError, HarnessResult};
use crate::handler::MessageHandler;
use crate::peer::Shared;
use crate::state::{CloseReason, PeerState};

const READ_CHUNK: usize = 64 * 1024;

/// Send side of a connection.
pub(crate) struct Link {
    addr: SocketAddr,
    codec: WireCodec,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    close_tx: watch::Sender<bool>,
    support_addrv2: bool,
}

/// Receive side of a connection, consumed by [`run`].
pub(crate) struct LinkReceivers {
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    close_rx: watch::Receiver<bool>,
}

#[cfg(test)]
impl LinkReceivers {
    /// Every frame queued so far, decoded with `codec`.
    pub(crate) fn drain_messages(&mut self, codec: &WireCodec) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            if let Ok(qc_18_p2p_wire::ParseOutcome::Message { message, .. }) = codec.try_parse(&frame) {
                messages.push(message);
            }
        }
        messages
    }
}

impl Link {
    pub(crate) fn new(addr: SocketAddr, codec: WireCodec, support_addrv2: bool) -> (Self, LinkReceivers) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);
        let link = Self {
            addr,
            codec,
            outbound,
            close_tx,
            support_addrv2,
        };
        let receivers = LinkReceivers {
            outbound: outbound_rx,
            close_rx,
        };
        (link, receivers)
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn codec(&self) -> &WireCodec {
        &self.codec
    }

    pub(crate) fn support_addrv2(&self) -> bool {
        self.support_addrv2
    }

    /// Queue the first message ahead of the connect. It is written as soon
    /// as the socket opens.
    pub(crate) fn queue_initial(&self, message: &Message) -> HarnessResult<()> {
        self.enqueue(message)
    }

    pub(crate) fn send(&self, state: &mut PeerState, message: &Message) -> HarnessResult<()> {
        if !state.connected {
            return Err(HarnessError::NotConnected);
        }
        self.enqueue(message)
    }

    pub(crate) fn send_raw(&self, state: &mut PeerState, bytes: Vec<u8>) -> HarnessResult<()> {
        if !state.connected {
            return Err(HarnessError::NotConnected);
        }
        debug!(peer = %self.addr, len = bytes.len(), "send raw bytes");
        self.push(bytes)
    }

    /// Idempotent; the task may already be gone.
    pub(crate) fn request_close(&self) {
        self.close_tx.send_replace(true);
    }

    fn enqueue(&self, message: &Message) -> HarnessResult<()> {
        let frame = self.codec.frame(message)?;
        debug!(peer = %self.addr, "send message: {}", message.log_description());
        metric_inc!(P2P_MESSAGES_SENT, &[message.command()]);
        self.push(frame)
    }

    fn push(&self, bytes: Vec<u8>) -> HarnessResult<()> {
        self.outbound
            .send(bytes)
            .map_err(|_| HarnessError::NotConnected)
    }
}

/// Marks the peer closed when the task ends, including when the runtime
/// drops it mid-await.
struct CloseGuard<'a, H: MessageHandler> {
    shared: &'a Shared<H>,
    reason: CloseReason,
}

impl<H: MessageHandler> Drop for CloseGuard<'_, H> {
    fn drop(&mut self) {
        self.shared.mark_closed(self.reason.clone());
    }
}

/// Connection task: connect, then shuttle bytes until either side closes.
pub(crate) async fn run<H: MessageHandler>(
    shared: Arc<Shared<H>>,
    receivers: LinkReceivers,
    connect_timeout: Duration,
) {
    let LinkReceivers {
        mut outbound,
        mut close_rx,
    } = receivers;
    let mut guard = CloseGuard {
        shared: &shared,
        reason: CloseReason::Shutdown,
    };
    let addr = shared.link().addr();
    debug!(peer = %addr, "connecting");

    let connect = tokio::time::timeout(connect_timeout, TcpStream::connect(addr));
    let stream = tokio::select! {
        _ = close_rx.changed() => {
            guard.reason = CloseReason::LocalDisconnect;
            return;
        }
        result = connect => match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                guard.reason = CloseReason::ConnectFailed(e.to_string());
                return;
            }
            Err(_) => {
                guard.reason = CloseReason::ConnectFailed(format!("timed out after {connect_timeout:?}"));
                return;
            }
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %addr, error = %e, "failed to set TCP_NODELAY");
    }
    info!(peer = %addr, "connected");
    if let Err(reason) = shared.mark_open() {
        guard.reason = reason;
        return;
    }

    let (mut reader, mut writer) = stream.into_split();
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    // Bytes count as sent once the socket has taken all of them.
    let writes = async {
        while let Some(bytes) = outbound.recv().await {
            writer.write_all(&bytes).await?;
            shared.record_bytes_sent(bytes.len());
        }
        Ok::<(), std::io::Error>(())
    };
    tokio::pin!(writes);

    guard.reason = loop {
        tokio::select! {
            _ = close_rx.changed() => break CloseReason::LocalDisconnect,
            written = &mut writes => match written {
                Ok(()) => break CloseReason::LocalDisconnect,
                Err(e) => break CloseReason::Io(e.to_string()),
            },
            read = reader.read(&mut chunk) => match read {
                Ok(0) => break CloseReason::RemoteClosed,
                Ok(n) => {
                    shared.record_bytes_received(n);
                    buffer.extend_from_slice(&chunk[..n]);
                    if let Err(reason) = shared.process_buffer(&mut buffer) {
                        break reason;
                    }
                }
                Err(e) => break CloseReason::Io(e.to_string()),
            },
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use qc_18_p2p_wire::{MessageRegistry, NetworkMagic};

    fn link() -> (Link, LinkReceivers) {
        let codec = WireCodec::new(NetworkMagic::Regtest, Arc::new(MessageRegistry::standard()));
        Link::new("127.0.0.1:18444".parse().unwrap(), codec, false)
    }

    #[test]
    fn test_send_requires_open_connection() {
        let (link, mut rx) = link();
        let mut state = PeerState::new(link.addr());
        assert!(matches!(
            link.send(&mut state, &Message::Verack),
            Err(HarnessError::NotConnected)
        ));
        assert!(matches!(
            link.send_raw(&mut state, vec![1, 2, 3]),
            Err(HarnessError::NotConnected)
        ));
        assert!(rx.outbound.try_recv().is_err());
    }

    #[test]
    fn test_initial_message_queued_before_connect() {
        let (link, mut rx) = link();
        link.queue_initial(&Message::Verack).unwrap();
        let frame = rx.outbound.try_recv().unwrap();
        assert_eq!(frame.len(), 24);
    }

    #[test]
    fn test_send_frames_message() {
        let (link, mut rx) = link();
        let mut state = PeerState::new(link.addr());
        state.connected = true;
        link.send(&mut state, &Message::Ping(3)).unwrap();
        let frame = rx.outbound.try_recv().unwrap();
        assert_eq!(&frame[4..8], b"ping");
        assert_eq!(frame.len(), 32);
    }

    #[test]
    fn test_request_close_is_idempotent() {
        let (link, rx) = link();
        link.request_close();
        link.request_close();
        assert!(*rx.close_rx.borrow());
    }
}
