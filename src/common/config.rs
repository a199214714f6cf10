//! Configuration for the metakv coordinator

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Offset of the consensus (replicated log) port from the base port.
pub const CONSENSUS_PORT_SHIFT: u16 = 100;

/// Offset of the command protocol port from the base port.
pub const CMD_PORT_SHIFT: u16 = 200;

/// Coordinator configuration
///
/// A peer is addressed by a single base port; it listens for consensus
/// traffic at `base + CONSENSUS_PORT_SHIFT` and for commands at
/// `base + CMD_PORT_SHIFT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Local IP this peer announces
    pub local_ip: String,

    /// Base port (consensus and command ports are derived)
    pub local_port: u16,

    /// Seed peer IP for joining the ensemble
    #[serde(default)]
    pub seed_ip: String,

    /// Seed peer base port
    #[serde(default)]
    pub seed_port: u16,

    /// Data directory for the consensus engine
    pub data_path: PathBuf,

    /// Heartbeat timeout before a data node is marked DOWN (seconds)
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,

    /// Cron tick for the liveness sweep and leader poll (milliseconds)
    #[serde(default = "default_cron_interval")]
    pub cron_interval_ms: u64,

    /// Send/recv timeout on the leader redirect channel (milliseconds)
    #[serde(default = "default_redirect_timeout")]
    pub redirect_timeout_ms: u64,
}

fn default_node_timeout() -> u64 {
    30
}
fn default_cron_interval() -> u64 {
    1000
}
fn default_redirect_timeout() -> u64 {
    1000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            local_ip: "127.0.0.1".to_string(),
            local_port: 9000,
            seed_ip: String::new(),
            seed_port: 0,
            data_path: PathBuf::from("./meta-data"),
            node_timeout_secs: default_node_timeout(),
            cron_interval_ms: default_cron_interval(),
            redirect_timeout_ms: default_redirect_timeout(),
        }
    }
}

impl CoordinatorConfig {
    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CoordinatorConfig = serde_json::from_str(&content)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Save to a JSON file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.local_ip.is_empty() {
            return Err(crate::Error::InvalidConfig("local_ip is required".into()));
        }
        if self.local_port == 0 {
            return Err(crate::Error::InvalidConfig("local_port is required".into()));
        }
        if self.local_port > u16::MAX - CMD_PORT_SHIFT {
            return Err(crate::Error::InvalidConfig(format!(
                "local_port {} leaves no room for derived ports",
                self.local_port
            )));
        }
        if self.node_timeout_secs == 0 {
            return Err(crate::Error::InvalidConfig(
                "node_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Consensus listen address for this peer
    pub fn consensus_port(&self) -> u16 {
        self.local_port + CONSENSUS_PORT_SHIFT
    }

    /// Command listen address for this peer
    pub fn cmd_addr(&self) -> crate::Result<SocketAddr> {
        format!("{}:{}", self.local_ip, self.local_port + CMD_PORT_SHIFT)
            .parse()
            .map_err(|e| crate::Error::InvalidConfig(format!("bad local address: {}", e)))
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }

    pub fn cron_interval(&self) -> Duration {
        Duration::from_millis(self.cron_interval_ms)
    }

    pub fn redirect_timeout(&self) -> Duration {
        Duration::from_millis(self.redirect_timeout_ms)
    }
}
