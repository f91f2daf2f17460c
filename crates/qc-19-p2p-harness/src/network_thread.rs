//! The single network thread that runs every connection.
//!
//! One OS thread owns a current-thread tokio runtime. Connections are tasks
//! on that runtime; the driver never touches a socket directly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use qc_18_p2p_wire::{Message, MessageRegistry, NetAddress, VersionMessage, MY_RELAY, MY_VERSION};
use quantum_telemetry::register_metrics;
use tokio::runtime::{Builder, Handle};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::connection::{self, Link};
use crate::errors::{HarnessError, HarnessResult};
use crate::handler::MessageHandler;
use crate::peer::{Peer, Shared};
use crate::state::PeerState;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to the running network thread.
pub struct NetworkThread {
    handle: Handle,
    registry: Arc<MessageRegistry>,
    shutdown_tx: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl NetworkThread {
    /// Start with the standard message registry.
    pub fn start() -> HarnessResult<Self> {
        Self::start_with_registry(MessageRegistry::standard())
    }

    /// Start with a custom registry, shared by every connection.
    pub fn start_with_registry(registry: MessageRegistry) -> HarnessResult<Self> {
        if let Err(e) = register_metrics() {
            warn!(error = %e, "failed to register p2p metrics");
        }

        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| HarnessError::NetworkThread(e.to_string()))?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let thread = std::thread::Builder::new()
            .name("p2p-network".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    while !*shutdown_rx.borrow() {
                        if shutdown_rx.changed().await.is_err() {
                            break;
                        }
                    }
                });
                // Dropping the runtime drops every connection task, which
                // marks its peer closed.
                drop(runtime);
            })
            .map_err(|e| HarnessError::NetworkThread(e.to_string()))?;

        info!("network thread started");
        Ok(Self {
            handle,
            registry: Arc::new(registry),
            shutdown_tx,
            thread: Some(thread),
        })
    }

    /// Runtime handle, for callers that need to schedule their own tasks.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    /// Open a connection to `addr` driven by `handler`.
    ///
    /// Returns once the socket is open. The `version` message (when
    /// `config.send_version` is set) is already queued at that point, so it
    /// is the first thing the node receives.
    pub fn connect<H: MessageHandler>(
        &self,
        addr: SocketAddr,
        handler: H,
        config: &HarnessConfig,
    ) -> HarnessResult<Peer<H>> {
        if self.thread.is_none() || *self.shutdown_tx.borrow() {
            return Err(HarnessError::NetworkThread("network thread is stopped".to_string()));
        }
        let codec = config.codec(Arc::clone(&self.registry))?;
        let (link, receivers) = Link::new(addr, codec, config.support_addrv2);

        let state = PeerState::new(addr);
        if config.send_version {
            link.queue_initial(&Message::Version(version_for(addr, config)))?;
        }

        let shared = Arc::new(Shared::new(state, handler, link, config.send_version));
        let peer = Peer::new(Arc::clone(&shared), config.wait_timeout());

        info!(peer = %addr, "connecting to node");
        self.handle
            .spawn(connection::run(shared, receivers, config.connect_timeout()));

        // The task always resolves within the connect timeout.
        peer.wait_for_open(config.connect_timeout() + Duration::from_secs(1))?;
        Ok(peer)
    }

    /// Stop the network thread and wait up to `timeout` for it to exit.
    pub fn close(&mut self, timeout: Duration) -> HarnessResult<()> {
        self.shutdown_tx.send_replace(true);
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        let deadline = Instant::now() + timeout;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                warn!(?timeout, "network thread did not stop in time");
                return Err(HarnessError::timeout("network thread shutdown", timeout));
            }
            std::thread::sleep(JOIN_POLL_INTERVAL);
        }
        thread
            .join()
            .map_err(|_| HarnessError::NetworkThread("network thread panicked".to_string()))?;
        info!("network thread stopped");
        Ok(())
    }
}

impl Drop for NetworkThread {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(e) = self.close(Duration::from_secs(5)) {
                warn!(error = %e, "network thread shutdown failed on drop");
            }
        }
    }
}

/// Our `version` for a connection to `addr`.
fn version_for(addr: SocketAddr, config: &HarnessConfig) -> VersionMessage {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();
    VersionMessage {
        version: MY_VERSION,
        services: config.services,
        timestamp,
        addr_recv: NetAddress::from_socket_addr(config.services, addr),
        addr_from: NetAddress::default(),
        nonce: rand::random(),
        user_agent: config.user_agent.clone(),
        start_height: config.start_height,
        relay: MY_RELAY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::DefaultPeer;

    #[test]
    fn test_version_uses_config() {
        let config = HarnessConfig {
            services: 9,
            start_height: 12,
            user_agent: "/probe:1.0/".to_string(),
            ..HarnessConfig::default()
        };
        let addr: SocketAddr = "127.0.0.1:18444".parse().unwrap();
        let version = version_for(addr, &config);
        assert_eq!(version.version, MY_VERSION);
        assert_eq!(version.services, 9);
        assert_eq!(version.start_height, 12);
        assert_eq!(version.user_agent, "/probe:1.0/");
        assert_eq!(version.addr_recv.socket_addr(), addr);
        assert!(version.timestamp > 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut network = NetworkThread::start().unwrap();
        network.close(Duration::from_secs(5)).unwrap();
        network.close(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_connect_after_close_fails() {
        let mut network = NetworkThread::start().unwrap();
        network.close(Duration::from_secs(5)).unwrap();
        let result = network.connect(
            "127.0.0.1:1".parse().unwrap(),
            DefaultPeer,
            &HarnessConfig::default(),
        );
        assert!(matches!(result, Err(HarnessError::NetworkThread(_))));
    }
}
