//! Harness errors.

use std::time::Duration;

use qc_05_block_propagation::{CompactBlockError, ReconstructionError};
use qc_18_p2p_wire::FrameError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// The connection is closed (or never opened); nothing can be sent.
    #[error("not connected")]
    NotConnected,

    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    #[error("failed to connect to {addr}: {reason}")]
    ConnectFailed { addr: String, reason: String },

    /// A message handler returned an error. The connection was closed.
    #[error("message handler failed: {0}")]
    HandlerFailed(String),

    /// Raised by a handler to reject a message it cannot process.
    #[error("{0}")]
    Handler(String),

    /// A driver-side expectation about the node did not hold.
    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("network thread error: {0}")]
    NetworkThread(String),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    CompactBlock(#[from] CompactBlockError),

    #[error(transparent)]
    Reconstruction(#[from] ReconstructionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Raised by a [`crate::NodeObserver`] when the node cannot be queried.
    #[error("node observer error: {0}")]
    Observer(String),
}

impl HarnessError {
    pub fn timeout(what: impl Into<String>, timeout: Duration) -> Self {
        HarnessError::Timeout {
            what: what.into(),
            timeout,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::Timeout { .. })
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
