//! p2p-probe: connect to a node, complete the handshake and report what it
//! says about itself.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use qc_18_p2p_wire::{Message, SendCmpctMessage};
use qc_19_p2p_harness::{DefaultPeer, HarnessConfig, NetworkThread};
use quantum_telemetry::{gather_metrics, init_telemetry, TelemetryConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "p2p-probe")]
#[command(about = "Handshake with a node over P2P and report its version info")]
struct Args {
    /// Node P2P address
    #[arg(default_value = "127.0.0.1:18444")]
    addr: SocketAddr,

    /// TOML harness config; defaults plus QC_* environment overrides otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Request high-bandwidth compact block announcements with this version
    #[arg(long)]
    cmpct_version: Option<u64>,

    /// Number of ping round trips to time
    #[arg(long, default_value = "1")]
    pings: u32,

    /// Print Prometheus metrics before exiting
    #[arg(long)]
    metrics: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_telemetry(&TelemetryConfig::for_component("probe")).context("failed to init telemetry")?;

    let config = match &args.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::from_env()?,
    };
    let timeout = config.wait_timeout();

    let mut network = NetworkThread::start()?;
    let peer = network
        .connect(args.addr, DefaultPeer, &config)
        .with_context(|| format!("failed to connect to {}", args.addr))?;
    peer.wait_for_verack(timeout).context("handshake did not complete")?;

    let state = peer.state();
    println!("peer:      {}", args.addr);
    println!("version:   {}", state.peer_version.unwrap_or_default());
    println!("services:  {:#x}", state.services);
    if let Some(Message::Version(version)) = state.last("version") {
        println!("agent:     {}", version.user_agent);
        println!("height:    {}", version.start_height);
    }

    if let Some(version) = args.cmpct_version {
        peer.send_and_ping(
            &Message::SendCmpct(SendCmpctMessage {
                announce: true,
                version,
            }),
            timeout,
        )?;
        info!(version, "requested compact block announcements");
    }

    for _ in 0..args.pings {
        let started = std::time::Instant::now();
        peer.sync_with_ping(timeout)?;
        println!("ping:      {:?}", started.elapsed());
    }

    let state = peer.state();
    if !state.protocol_violations.is_empty() {
        println!("violations: {:?}", state.protocol_violations);
    }
    println!("received:  {} bytes, sent: {} bytes", state.bytes_received, state.bytes_sent);

    peer.disconnect();
    peer.wait_for_disconnect(timeout)?;
    network.close(timeout)?;

    if args.metrics {
        print!("{}", gather_metrics()?);
    }
    Ok(())
}
