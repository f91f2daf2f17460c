//! # Quantum Telemetry
//!
//! Logging and metrics for the P2P harness.
//!
//! ## Components
//!
//! - **Logs**: one global `tracing` subscriber, human-readable or JSON
//! - **Metrics**: Prometheus counters for message traffic, framing errors and
//!   connection lifecycle, rendered with [`gather_metrics`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quantum_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     init_telemetry(&TelemetryConfig::from_env()).expect("Failed to init telemetry");
//!     // Connections opened from here on are logged and counted
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `QC_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `QC_JSON_LOGS` | `false` | JSON formatted output |
//! | `QC_CONSOLE_OUTPUT` | `true` | Write logs to stderr |
//! | `QC_SERVICE_NAME` | `qc-p2p-harness` | Service name in the startup log |

mod config;
mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{
    gather_metrics, register_metrics, P2P_BYTES_RECEIVED, P2P_BYTES_SENT, P2P_CONNECTIONS_OPEN,
    P2P_DISCONNECTS, P2P_FRAMING_ERRORS, P2P_MESSAGES_RECEIVED, P2P_MESSAGES_SENT,
    P2P_UNKNOWN_MESSAGES, REGISTRY,
};
pub use tracing_setup::init_tracing;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Register metrics and install the global subscriber.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    register_metrics()?;
    init_tracing(config)
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}
