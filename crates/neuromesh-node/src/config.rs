//! Configuration types for neuromesh-node.
//! Parsed from ~/.neuromesh/config.toml.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub transport: TransportSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_identity_key")]
    pub identity_key: String,
    /// Network magic. Every peer on a mesh must agree on it.
    #[serde(default = "default_magic")]
    pub magic: i32,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            identity_key: default_identity_key(),
            magic: default_magic(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSection {
    /// Listen address for inbound peers. None disables the acceptor.
    #[serde(default)]
    pub listen_addr: Option<String>,
    /// Hard-coded seed endpoints, "host:port".
    #[serde(default)]
    pub static_seeds: Vec<String>,
    /// DNS names whose A records seed the candidate store.
    #[serde(default)]
    pub dns_seeds: Vec<String>,
    /// Port assumed for DNS-discovered peers.
    #[serde(default = "default_seed_port")]
    pub seed_port: u16,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            listen_addr: None,
            static_seeds: Vec::new(),
            dns_seeds: Vec::new(),
            seed_port: default_seed_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySection {
    #[serde(default = "default_max_active")]
    pub max_active_peers: usize,
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_interval_secs: u64,
    /// Consecutive failures before a candidate enters its cooldown.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_failure_cooldown")]
    pub failure_cooldown_secs: u64,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            max_active_peers: default_max_active(),
            sweep_interval_secs: default_sweep_secs(),
            keepalive_interval_secs: default_keepalive_secs(),
            failure_threshold: default_failure_threshold(),
            failure_cooldown_secs: default_failure_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSection {
    /// Readiness-poll bound per channel tick.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub send_queue_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub recv_queue_capacity: usize,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            send_queue_capacity: default_queue_capacity(),
            recv_queue_capacity: default_queue_capacity(),
        }
    }
}

// Default value functions
fn default_identity_key() -> String {
    "~/.neuromesh/node.key".into()
}
fn default_magic() -> i32 {
    neuromesh_protocol::PROTOCOL_MAGIC
}
fn default_seed_port() -> u16 {
    neuromesh_protocol::DEFAULT_PEER_PORT
}
fn default_max_active() -> usize {
    neuromesh_discovery::DEFAULT_MAX_ACTIVE_PEERS
}
fn default_sweep_secs() -> u64 {
    60
}
fn default_keepalive_secs() -> u64 {
    5
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_failure_cooldown() -> u64 {
    300
}
fn default_poll_timeout_ms() -> u64 {
    1000
}
fn default_queue_capacity() -> usize {
    1000
}

impl NodeConfig {
    /// Load config from file, or fall back to defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.poll_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.discovery.sweep_interval_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.discovery.keepalive_interval_secs)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_secs(self.discovery.failure_cooldown_secs)
    }
}
