//! Prometheus metrics for the P2P harness.
//!
//! All metrics follow the naming convention: `qc_p2p_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., messages_received_total)
//! - **Gauge**: Value that can go up or down (e.g., connections_open)

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // MESSAGE TRAFFIC
    // =========================================================================

    /// Messages received, by command
    pub static ref P2P_MESSAGES_RECEIVED: CounterVec = CounterVec::new(
        Opts::new("qc_p2p_messages_received_total", "P2P messages received"),
        &["command"]
    ).expect("metric creation failed");

    /// Messages sent, by command
    pub static ref P2P_MESSAGES_SENT: CounterVec = CounterVec::new(
        Opts::new("qc_p2p_messages_sent_total", "P2P messages sent"),
        &["command"]
    ).expect("metric creation failed");

    /// Raw bytes read from sockets
    pub static ref P2P_BYTES_RECEIVED: Counter = Counter::new(
        "qc_p2p_received_bytes_total",
        "Bytes read from P2P sockets"
    ).expect("metric creation failed");

    /// Raw bytes written to sockets
    pub static ref P2P_BYTES_SENT: Counter = Counter::new(
        "qc_p2p_sent_bytes_total",
        "Bytes written to P2P sockets"
    ).expect("metric creation failed");

    // =========================================================================
    // ERRORS
    // =========================================================================

    /// Framing errors by kind
    pub static ref P2P_FRAMING_ERRORS: CounterVec = CounterVec::new(
        Opts::new("qc_p2p_framing_errors_total", "Frames rejected by the codec"),
        &["kind"]  // kind: magic/oversized/checksum/unknown/payload
    ).expect("metric creation failed");

    /// Unregistered commands skipped in permissive mode
    pub static ref P2P_UNKNOWN_MESSAGES: Counter = Counter::new(
        "qc_p2p_unknown_messages_total",
        "Unknown message types skipped"
    ).expect("metric creation failed");

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    /// Currently open connections
    pub static ref P2P_CONNECTIONS_OPEN: Gauge = Gauge::new(
        "qc_p2p_connections_open",
        "Number of currently open P2P connections"
    ).expect("metric creation failed");

    /// Closed connections by reason
    pub static ref P2P_DISCONNECTS: CounterVec = CounterVec::new(
        Opts::new("qc_p2p_disconnects_total", "Closed P2P connections"),
        &["reason"]  // reason: local/remote/io/framing/handler/connect
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Calling this more than once is harmless.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Traffic
        Box::new(P2P_MESSAGES_RECEIVED.clone()),
        Box::new(P2P_MESSAGES_SENT.clone()),
        Box::new(P2P_BYTES_RECEIVED.clone()),
        Box::new(P2P_BYTES_SENT.clone()),
        // Errors
        Box::new(P2P_FRAMING_ERRORS.clone()),
        Box::new(P2P_UNKNOWN_MESSAGES.clone()),
        // Connections
        Box::new(P2P_CONNECTIONS_OPEN.clone()),
        Box::new(P2P_DISCONNECTS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn gather_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
