//! # P2P Wire Protocol (qc-18)
//!
//! Everything needed to turn bytes on a socket into typed messages and back.
//!
//! ## Frame Layout
//!
//! ```text
//! ┌──────────┬──────────────────────┬──────────┬──────────┬─────────────┐
//! │ magic(4) │ command(12, NUL pad) │ len(4LE) │ cksum(4) │ payload     │
//! └──────────┴──────────────────────┴──────────┴──────────┴─────────────┘
//!                                     cksum = SHA256d(payload)[0..4]
//! ```
//!
//! ## Components
//!
//! - [`MessageRegistry`]: immutable command → payload parser table, built once
//!   and handed to the codec
//! - [`WireCodec`]: `frame` / `try_parse` over a receive buffer
//! - [`Message`]: one variant per supported command

pub mod codec;
pub mod constants;
pub mod errors;
pub mod messages;
pub mod network;
pub mod registry;

pub use codec::{MessageHeader, ParseOutcome, WireCodec, MESSAGE_HEADER_SIZE};
pub use constants::*;
pub use errors::FrameError;
pub use messages::*;
pub use network::NetworkMagic;
pub use registry::{MessageRegistry, PayloadParser};
