//! Per-peer monitor and the driver-side handle.
//!
//! Each peer owns one `parking_lot::Mutex` around its [`PeerState`] and
//! handler, plus a `Condvar` that is notified after every change. The
//! network thread mutates state under the lock; the driver reads it under
//! the same lock and blocks on the condvar in [`Peer::wait_until`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use qc_18_p2p_wire::{Inventory, Message, ParseOutcome, WireCodec};
use quantum_telemetry::{
    metric_inc, P2P_BYTES_RECEIVED, P2P_BYTES_SENT, P2P_CONNECTIONS_OPEN, P2P_DISCONNECTS, P2P_FRAMING_ERRORS,
    P2P_MESSAGES_RECEIVED, P2P_UNKNOWN_MESSAGES,
};
use shared_types::Hash256;
use tracing::{debug, error, info, warn};

use crate::connection::Link;
use crate::errors::{HarnessError, HarnessResult};
use crate::handler::{dispatch, MessageHandler, PeerContext};
use crate::state::{CloseReason, HandshakeState, PeerState};

/// Polling interval for predicates that are not driven by peer traffic.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) struct PeerSlot<H> {
    pub(crate) state: PeerState,
    pub(crate) handler: H,
}

pub(crate) struct Shared<H> {
    slot: Mutex<PeerSlot<H>>,
    changed: Condvar,
    link: Link,
    version_queued: bool,
}

impl<H: MessageHandler> Shared<H> {
    pub(crate) fn new(state: PeerState, handler: H, link: Link, version_queued: bool) -> Self {
        Self {
            slot: Mutex::new(PeerSlot { state, handler }),
            changed: Condvar::new(),
            link,
            version_queued,
        }
    }

    pub(crate) fn link(&self) -> &Link {
        &self.link
    }

    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, PeerSlot<H>> {
        self.slot.lock()
    }

    fn notify(&self) {
        self.changed.notify_all();
    }

    /// Socket is up. Runs the handler's `on_open`.
    pub(crate) fn mark_open(&self) -> Result<(), CloseReason> {
        let mut slot = self.slot.lock();
        let PeerSlot { state, handler } = &mut *slot;
        state.connected = true;
        state.handshake = if self.version_queued {
            HandshakeState::VersionSent
        } else {
            HandshakeState::Connecting
        };
        P2P_CONNECTIONS_OPEN.inc();
        let result = handler.on_open(&mut PeerContext::new(state, &self.link));
        let outcome = result.map_err(|e| handler_failure(state, "open", e));
        drop(slot);
        self.notify();
        outcome
    }

    /// First call wins; later calls are ignored.
    pub(crate) fn mark_closed(&self, reason: CloseReason) {
        let mut slot = self.slot.lock();
        let PeerSlot { state, handler } = &mut *slot;
        if state.close_reason.is_some() {
            return;
        }
        let addr = state.addr;
        match &reason {
            CloseReason::Framing(_) | CloseReason::Handler(_) => {
                error!(peer = %addr, reason = %reason, "connection closed")
            }
            CloseReason::Io(_) | CloseReason::ConnectFailed(_) => {
                warn!(peer = %addr, reason = %reason, "connection lost")
            }
            _ => info!(peer = %addr, reason = %reason, "connection closed"),
        }
        if state.connected {
            P2P_CONNECTIONS_OPEN.dec();
        }
        metric_inc!(P2P_DISCONNECTS, &[reason.kind()]);
        if let CloseReason::Handler(failure) = &reason {
            state.handler_failures.push(failure.clone());
        }
        state.connected = false;
        state.handshake = HandshakeState::Closed;
        state.close_reason = Some(reason);
        handler.on_close(state);
        drop(slot);
        self.notify();
    }

    pub(crate) fn record_bytes_sent(&self, n: usize) {
        self.slot.lock().state.bytes_sent += n as u64;
        P2P_BYTES_SENT.inc_by(n as f64);
        self.notify();
    }

    pub(crate) fn record_bytes_received(&self, n: usize) {
        self.slot.lock().state.bytes_received += n as u64;
        P2P_BYTES_RECEIVED.inc_by(n as f64);
        self.notify();
    }

    /// Parse and deliver every complete frame in `buffer`.
    pub(crate) fn process_buffer(&self, buffer: &mut Vec<u8>) -> Result<(), CloseReason> {
        loop {
            match self.link.codec().try_parse(buffer) {
                Ok(ParseOutcome::NeedMoreData) => return Ok(()),
                Ok(ParseOutcome::Message { message, consumed }) => {
                    buffer.drain(..consumed);
                    self.deliver(message)?;
                }
                Ok(ParseOutcome::Skipped { command, consumed }) => {
                    buffer.drain(..consumed);
                    self.record_skipped(&command);
                }
                Err(e) => {
                    metric_inc!(P2P_FRAMING_ERRORS, &[e.kind()]);
                    error!(peer = %self.link.addr(), error = %e, "error reading message");
                    return Err(CloseReason::Framing(e.to_string()));
                }
            }
        }
    }

    fn deliver(&self, message: Message) -> Result<(), CloseReason> {
        let mut slot = self.slot.lock();
        let PeerSlot { state, handler } = &mut *slot;
        debug!(peer = %state.addr, "received message: {}", message.log_description());
        metric_inc!(P2P_MESSAGES_RECEIVED, &[message.command()]);
        state.record_received(&message);

        let result = dispatch(handler, &mut PeerContext::new(state, &self.link), &message);
        let outcome = result.map_err(|e| handler_failure(state, message.command(), e));
        drop(slot);
        self.notify();
        outcome
    }

    fn record_skipped(&self, command: &str) {
        warn!(peer = %self.link.addr(), command, "skipped unknown message type");
        P2P_UNKNOWN_MESSAGES.inc();
        self.slot.lock().state.unknown_messages += 1;
        self.notify();
    }
}

/// The failure lands in `handler_failures` when the close is recorded, so
/// waiters see it together with `connected == false`.
fn handler_failure(state: &PeerState, command: &str, e: HarnessError) -> CloseReason {
    error!(peer = %state.addr, command, error = %e, "error delivering message");
    CloseReason::Handler(format!("{command}: {e}"))
}

/// Driver handle for one connection. Cheap to clone.
pub struct Peer<H: MessageHandler> {
    shared: Arc<Shared<H>>,
    timeout: Duration,
}

impl<H: MessageHandler> Clone for Peer<H> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            timeout: self.timeout,
        }
    }
}

impl<H: MessageHandler> Peer<H> {
    pub(crate) fn new(shared: Arc<Shared<H>>, timeout: Duration) -> Self {
        Self { shared, timeout }
    }

    pub fn addr(&self) -> SocketAddr {
        self.shared.link().addr()
    }

    /// Default timeout for the wait helpers, from the harness config.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Codec used on this connection, for crafting raw frames.
    pub fn codec(&self) -> &WireCodec {
        self.shared.link().codec()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().state.connected
    }

    /// Snapshot of the peer state.
    pub fn state(&self) -> PeerState {
        self.shared.lock().state.clone()
    }

    /// Read state and handler under the lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&PeerState, &H) -> R) -> R {
        let slot = self.shared.lock();
        f(&slot.state, &slot.handler)
    }

    /// Mutate the handler (and state) under the lock. Waiters are woken
    /// afterwards.
    pub fn with_handler<R>(&self, f: impl FnOnce(&mut H, &mut PeerState) -> R) -> R {
        let result = {
            let mut slot = self.shared.lock();
            let PeerSlot { state, handler } = &mut *slot;
            f(handler, state)
        };
        self.shared.notify();
        result
    }

    pub fn clear_last_message(&self, command: &str) {
        self.with_handler(|_, state| state.last_message.remove(command));
    }

    pub fn send_message(&self, message: &Message) -> HarnessResult<()> {
        let mut slot = self.shared.lock();
        self.shared.link().send(&mut slot.state, message)
    }

    /// Send bytes exactly as given, typically built with
    /// [`WireCodec::frame_raw`].
    pub fn send_raw(&self, bytes: Vec<u8>) -> HarnessResult<()> {
        let mut slot = self.shared.lock();
        self.shared.link().send_raw(&mut slot.state, bytes)
    }

    /// Drop the connection. Safe to call repeatedly or after the node has
    /// already closed it.
    pub fn disconnect(&self) {
        self.shared.link().request_close();
    }

    /// Block until `predicate` holds, the timeout expires or a handler
    /// fails.
    pub fn wait_until<F>(&self, what: &str, timeout: Duration, mut predicate: F) -> HarnessResult<()>
    where
        F: FnMut(&PeerState, &H) -> bool,
    {
        self.try_wait_until(what, timeout, |state, handler| Ok(predicate(state, handler)))
    }

    /// Like [`wait_until`](Self::wait_until) with a predicate that can abort
    /// the wait early.
    pub fn try_wait_until<F>(&self, what: &str, timeout: Duration, mut predicate: F) -> HarnessResult<()>
    where
        F: FnMut(&PeerState, &H) -> HarnessResult<bool>,
    {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.lock();
        loop {
            if predicate(&slot.state, &slot.handler)? {
                return Ok(());
            }
            if let Some(failure) = slot.state.handler_failures.first() {
                return Err(HarnessError::HandlerFailed(failure.clone()));
            }
            if self.shared.changed.wait_until(&mut slot, deadline).timed_out() {
                if predicate(&slot.state, &slot.handler)? {
                    return Ok(());
                }
                return Err(HarnessError::timeout(what, timeout));
            }
        }
    }

    pub(crate) fn wait_for_open(&self, timeout: Duration) -> HarnessResult<()> {
        self.wait_until("connection", timeout, |state, _| {
            state.connected || state.is_closed()
        })?;
        // A connection that opened and dropped straight away is still
        // returned, so the caller can inspect why it closed.
        match self.state().close_reason {
            Some(CloseReason::ConnectFailed(reason)) => Err(HarnessError::ConnectFailed {
                addr: self.addr().to_string(),
                reason,
            }),
            _ => Ok(()),
        }
    }

    // =========================================================================
    // WAIT HELPERS
    // =========================================================================

    pub fn wait_for_disconnect(&self, timeout: Duration) -> HarnessResult<()> {
        self.wait_until("disconnect", timeout, |state, _| !state.connected)
    }

    pub fn wait_for_verack(&self, timeout: Duration) -> HarnessResult<()> {
        self.wait_until("verack", timeout, |state, _| state.count("verack") > 0)
    }

    pub fn wait_for_tx(&self, txid: Hash256, timeout: Duration) -> HarnessResult<()> {
        self.wait_until("tx", timeout, |state, _| {
            matches!(state.last("tx"), Some(Message::Tx(tx)) if tx.txid() == txid)
        })
    }

    pub fn wait_for_block(&self, block_hash: Hash256, timeout: Duration) -> HarnessResult<()> {
        self.wait_until("block", timeout, |state, _| {
            matches!(state.last("block"), Some(Message::Block(block)) if block.block_hash() == block_hash)
        })
    }

    /// Satisfied when the first header of the last `headers` message matches.
    pub fn wait_for_header(&self, block_hash: Hash256, timeout: Duration) -> HarnessResult<()> {
        self.wait_until("header", timeout, |state, _| match state.last("headers") {
            Some(Message::Headers(headers)) => headers
                .first()
                .is_some_and(|header| header.block_hash() == block_hash),
            _ => false,
        })
    }

    /// Fails immediately if the connection drops while waiting.
    pub fn wait_for_merkleblock(&self, block_hash: Hash256, timeout: Duration) -> HarnessResult<()> {
        self.try_wait_until("merkleblock", timeout, |state, _| {
            if !state.connected {
                return Err(HarnessError::NotConnected);
            }
            Ok(matches!(
                state.last("merkleblock"),
                Some(Message::MerkleBlock(mb)) if mb.header.block_hash() == block_hash
            ))
        })
    }

    /// Any `getdata` satisfies this; clear the last one first to wait for a
    /// fresh one.
    pub fn wait_for_getdata(&self, timeout: Duration) -> HarnessResult<()> {
        self.wait_until("getdata", timeout, |state, _| state.last("getdata").is_some())
    }

    /// Any `getheaders` satisfies this; clear the last one first to wait for
    /// a fresh one.
    pub fn wait_for_getheaders(&self, timeout: Duration) -> HarnessResult<()> {
        self.wait_until("getheaders", timeout, |state, _| {
            state.last("getheaders").is_some()
        })
    }

    /// Only the first entry of the last `inv` is compared.
    pub fn wait_for_inv(&self, expected: &Inventory, timeout: Duration) -> HarnessResult<()> {
        self.wait_until("inv", timeout, |state, _| match state.last("inv") {
            Some(Message::Inv(inv)) => inv.first() == Some(expected),
            _ => false,
        })
    }

    // =========================================================================
    // SENDING HELPERS
    // =========================================================================

    pub fn send_and_ping(&self, message: &Message, timeout: Duration) -> HarnessResult<()> {
        self.send_message(message)?;
        self.sync_with_ping(timeout)
    }

    /// Ping with the current counter as nonce and wait for the matching pong.
    /// The counter advances only on success.
    pub fn sync_with_ping(&self, timeout: Duration) -> HarnessResult<()> {
        let nonce = self.with_state(|state, _| state.ping_counter);
        self.send_message(&Message::Ping(nonce))?;
        self.wait_until("pong", timeout, |state, _| {
            matches!(state.last("pong"), Some(Message::Pong(n)) if *n == nonce)
        })?;
        self.shared.lock().state.ping_counter += 1;
        Ok(())
    }
}

/// Poll `predicate` until it holds or `timeout` expires. For conditions that
/// live outside any peer (node RPC state, for instance).
pub fn poll_until<F>(what: &str, timeout: Duration, mut predicate: F) -> HarnessResult<()>
where
    F: FnMut() -> HarnessResult<bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if predicate()? {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(HarnessError::timeout(what, timeout));
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_poll_until_succeeds_after_retries() {
        let calls = AtomicUsize::new(0);
        poll_until("three calls", Duration::from_secs(5), || {
            Ok(calls.fetch_add(1, Ordering::SeqCst) >= 2)
        })
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_poll_until_times_out() {
        let err = poll_until("never", Duration::from_millis(120), || Ok(false)).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_poll_until_propagates_error() {
        let err = poll_until("broken", Duration::from_secs(1), || {
            Err(HarnessError::Observer("rpc down".to_string()))
        })
        .unwrap_err();
        assert!(matches!(err, HarnessError::Observer(_)));
    }
}
