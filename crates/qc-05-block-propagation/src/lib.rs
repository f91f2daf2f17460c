//! # Block Propagation Subsystem (qc-05)
//!
//! BIP152 compact block relay as seen from a simulated peer: building and
//! parsing `cmpctblock` announcements, short transaction IDs, `getblocktxn`
//! index encoding and the bookkeeping needed to rebuild a block from an
//! announcement plus a transaction pool.
//!
//! ## Relay Flow
//!
//! ```text
//! [Announcer] ──cmpctblock──→ [Receiver]
//!                                 │ match short IDs against pool
//!                                 ↓
//!                  all found? ── yes ──→ block complete
//!                                 │ no
//!                                 ↓
//!             [Receiver] ──getblocktxn(missing)──→ [Announcer]
//!             [Receiver] ←──blocktxn(transactions)── [Announcer]
//!                                 │ merkle root check
//!                                 ↓
//!                   ok ──→ block complete / mismatch ──→ getdata(block)
//! ```
//!
//! ## Short-ID matching
//!
//! Matching is positional: the n-th announced short ID names the n-th block
//! position that is not prefilled. Colliding short IDs are reported, never
//! disambiguated; the affected positions are requested explicitly.

pub mod domain;
pub mod errors;

pub use domain::*;
pub use errors::{CompactBlockError, ReconstructionError};
