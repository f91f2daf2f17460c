//! # P2P Harness (qc-19)
//!
//! Simulated peers for scripting and observing a Bitcoin-family node over
//! its P2P interface.
//!
//! ## Threads
//!
//! ```text
//! ┌──────────── driver thread ────────────┐      ┌──── network thread ────┐
//! │ Peer::send_message ──frame──→ channel ─┼─────→│ connection task        │
//! │ Peer::wait_until   ←─condvar─ monitor ←┼──────│  read → parse → handler│
//! └────────────────────────────────────────┘      └────────────────────────┘
//! ```
//!
//! Each peer owns one monitor (mutex + condvar) guarding its [`PeerState`]
//! and its [`MessageHandler`]. The network thread updates both under the lock
//! and notifies; wait helpers re-check their predicate on every change.
//!
//! ## Peers
//!
//! - [`DefaultPeer`]: handshake, `getdata` for every `inv`, `pong` for `ping`
//! - [`DataStore`]: serves blocks, transactions, headers and compact blocks
//! - [`CompactBlockPeer`]: records block announcements and `sendcmpct`
//!
//! ## Example
//!
//! ```no_run
//! use qc_19_p2p_harness::{DefaultPeer, HarnessConfig, NetworkThread};
//!
//! let config = HarnessConfig::default();
//! let network = NetworkThread::start()?;
//! let peer = network.connect("127.0.0.1:18444".parse()?, DefaultPeer, &config)?;
//! peer.wait_for_verack(config.wait_timeout())?;
//! peer.sync_with_ping(config.wait_timeout())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod compact_block_peer;
pub mod config;
mod connection;
pub mod data_store;
pub mod errors;
pub mod handler;
pub mod network_thread;
pub mod peer;
pub mod state;

pub use compact_block_peer::CompactBlockPeer;
pub use config::{ConfigError, HarnessConfig};
pub use data_store::{BlockSubmission, DataStore, NodeObserver, TxSubmission};
pub use errors::{HarnessError, HarnessResult};
pub use handler::{DefaultPeer, HandlerResult, MessageHandler, PeerContext};
pub use network_thread::NetworkThread;
pub use peer::{poll_until, Peer};
pub use state::{CloseReason, HandshakeState, PeerState};
