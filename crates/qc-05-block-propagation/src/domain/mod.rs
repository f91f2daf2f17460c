//! # Domain Layer for Block Propagation
//!
//! Pure protocol logic with no I/O dependencies.
//!
//! ## Contents
//!
//! - **entities**: Wire structures (`HeaderAndShortIDs`, `P2PHeaderAndShortIDs`,
//!   `BlockTransactionsRequest`, `BlockTransactions`)
//! - **services**: Key derivation, short ID calculation, construction checks
//! - **reconstruction**: `PartiallyDownloadedBlock`
//! - **value_objects**: Relay depth limits and serving decisions
//! - **invariants**: Index ordering and completeness checks
//!
//! ## Design Principles
//!
//! 1. **No I/O**: All functions are pure and synchronous
//! 2. **Explicit index forms**: absolute indices live in `HeaderAndShortIDs`,
//!    differential ones only in the wire structs

mod entities;
mod invariants;
mod reconstruction;
mod services;
mod value_objects;

pub use entities::*;
pub use invariants::*;
pub use reconstruction::*;
pub use services::*;
pub use value_objects::*;
