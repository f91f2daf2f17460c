//! Harness configuration.
//!
//! Loaded from TOML (every field optional), then overridden from `QC_*`
//! environment variables, then validated.
//!
//! ```toml
//! network = "regtest"
//! strict_message_types = true
//! max_message_size = 33554432
//! services = 1
//! user_agent = "/qc-p2p-harness:0.1.0/"
//! start_height = -1
//! support_addrv2 = false
//! send_version = true
//! wait_timeout_secs = 60
//! connect_timeout_secs = 10
//! max_cmpctblock_depth = 5
//! max_blocktxn_depth = 10
//! max_headers_results = 2000
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use qc_05_block_propagation::{RelayDepthPolicy, MAX_BLOCKTXN_DEPTH, MAX_CMPCTBLOCK_DEPTH};
use qc_18_p2p_wire::{
    MessageRegistry, NetworkMagic, WireCodec, DEFAULT_MAX_MESSAGE_SIZE, MAX_HEADERS_RESULTS,
    MESSAGE_HEADER_SIZE, MY_SUBVERSION, NODE_NETWORK,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {error}")]
    Io { path: String, error: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Network name (`regtest`, `mainnet`, ...) or 8 hex digits of magic
    pub network: String,
    /// Unknown message types close the connection instead of being skipped
    pub strict_message_types: bool,
    /// Largest declared payload accepted from the node
    pub max_message_size: usize,
    /// Service bits advertised in our `version`
    pub services: u64,
    /// User agent advertised in our `version`
    pub user_agent: String,
    /// Start height advertised in our `version`
    pub start_height: i32,
    /// Send `sendaddrv2` before `verack`
    pub support_addrv2: bool,
    /// Queue a `version` message as the first thing written on connect
    pub send_version: bool,
    /// Default timeout for wait helpers
    pub wait_timeout_secs: u64,
    /// Timeout for the TCP connect
    pub connect_timeout_secs: u64,
    /// Deepest block served as `cmpctblock` by the data-store peer
    pub max_cmpctblock_depth: u32,
    /// Deepest block served with `blocktxn` by the data-store peer
    pub max_blocktxn_depth: u32,
    /// Most headers returned by the data-store peer in one `headers`
    pub max_headers_results: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            network: "regtest".to_string(),
            strict_message_types: true,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            services: NODE_NETWORK,
            user_agent: MY_SUBVERSION.to_string(),
            start_height: -1,
            support_addrv2: false,
            send_version: true,
            wait_timeout_secs: 60,
            connect_timeout_secs: 10,
            max_cmpctblock_depth: MAX_CMPCTBLOCK_DEPTH,
            max_blocktxn_depth: MAX_BLOCKTXN_DEPTH,
            max_headers_results: MAX_HEADERS_RESULTS,
        }
    }
}

impl HarnessConfig {
    /// Load from a TOML file, apply environment overrides and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        let config = Self::parse(&content)?.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without touching the environment.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `QC_*` environment overrides. Unparseable values are logged and
    /// ignored.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(network) = lookup("QC_NETWORK") {
            info!(network = %network, "network overridden from environment");
            self.network = network;
        }
        if let Some(agent) = lookup("QC_USER_AGENT") {
            self.user_agent = agent;
        }
        override_parsed(&lookup, "QC_STRICT_MESSAGE_TYPES", &mut self.strict_message_types);
        override_parsed(&lookup, "QC_MAX_MESSAGE_SIZE", &mut self.max_message_size);
        override_parsed(&lookup, "QC_SERVICES", &mut self.services);
        override_parsed(&lookup, "QC_START_HEIGHT", &mut self.start_height);
        override_parsed(&lookup, "QC_SUPPORT_ADDRV2", &mut self.support_addrv2);
        override_parsed(&lookup, "QC_WAIT_TIMEOUT_SECS", &mut self.wait_timeout_secs);
        override_parsed(&lookup, "QC_CONNECT_TIMEOUT_SECS", &mut self.connect_timeout_secs);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.magic()?;
        if self.max_message_size < MESSAGE_HEADER_SIZE {
            return Err(ConfigError::Invalid {
                field: "max_message_size",
                reason: format!("must be at least {MESSAGE_HEADER_SIZE}"),
            });
        }
        if self.wait_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "wait_timeout_secs",
                reason: "cannot be 0".to_string(),
            });
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "connect_timeout_secs",
                reason: "cannot be 0".to_string(),
            });
        }
        if self.max_headers_results == 0 {
            return Err(ConfigError::Invalid {
                field: "max_headers_results",
                reason: "cannot be 0".to_string(),
            });
        }
        if self.user_agent.len() > qc_18_p2p_wire::MAX_SUBVERSION_LENGTH {
            return Err(ConfigError::Invalid {
                field: "user_agent",
                reason: "longer than 256 bytes".to_string(),
            });
        }
        Ok(())
    }

    pub fn magic(&self) -> Result<NetworkMagic, ConfigError> {
        self.network
            .parse()
            .map_err(|e: qc_18_p2p_wire::FrameError| ConfigError::Invalid {
                field: "network",
                reason: e.to_string(),
            })
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn depth_policy(&self) -> RelayDepthPolicy {
        RelayDepthPolicy {
            max_cmpctblock_depth: self.max_cmpctblock_depth,
            max_blocktxn_depth: self.max_blocktxn_depth,
        }
    }

    /// Codec for this network and size limit over `registry`.
    pub fn codec(&self, registry: Arc<MessageRegistry>) -> Result<WireCodec, ConfigError> {
        Ok(WireCodec::new(self.magic()?, registry)
            .with_max_message_size(self.max_message_size)
            .with_strict(self.strict_message_types))
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(key, value = %raw, "ignoring unparseable environment override"),
        }
    }
}
