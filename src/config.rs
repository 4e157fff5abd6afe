// Node Configuration
//
// Identity and bootstrap settings come from the process environment:
// NODE_ID (log label), NODE_IP and NODE_PORT (bind coordinates, also the
// wire identity), and an optional comma-separated SEED_NODES list.
// Protocol timing carries fixed defaults adjustable through the builder
// methods, mainly for tests that need tighter clocks.

use crate::error::{MeshError, Result};
use std::env;
use std::time::Duration;
use tracing::warn;

/// Cadence of the push-pull gossip loop.
pub const DEFAULT_GOSSIP_INTERVAL: Duration = Duration::from_secs(5);

/// Cadence of the failure-detector sweep.
pub const DEFAULT_DETECTOR_INTERVAL: Duration = Duration::from_secs(10);

/// Silence after which an alive node becomes suspect.
pub const DEFAULT_SUSPECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Silence after which a suspect node is declared dead.
pub const DEFAULT_DEAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Retention of a dead entry before it is evicted from the table.
pub const DEFAULT_EVICT_TIMEOUT: Duration = Duration::from_secs(120);

/// How long a joining node waits for the ack of one seed.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Runtime configuration of one cluster node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Human-readable label used in logs; the wire identity is `ip:port`.
    pub node_id: String,

    /// Address the UDP endpoint binds and advertises.
    pub ip: String,

    /// Port the UDP endpoint binds and advertises.
    pub port: u16,

    /// Bootstrap addresses (`ip:port`) contacted at startup.
    pub seed_nodes: Vec<String>,

    pub gossip_interval: Duration,
    pub detector_interval: Duration,
    pub suspect_timeout: Duration,
    pub dead_timeout: Duration,
    pub evict_timeout: Duration,
    pub join_timeout: Duration,
}

impl NodeConfig {
    /// Create a configuration with default protocol timing.
    pub fn new(node_id: &str, ip: &str, port: u16) -> Self {
        Self {
            node_id: node_id.to_string(),
            ip: ip.to_string(),
            port,
            seed_nodes: Vec::new(),
            gossip_interval: DEFAULT_GOSSIP_INTERVAL,
            detector_interval: DEFAULT_DETECTOR_INTERVAL,
            suspect_timeout: DEFAULT_SUSPECT_TIMEOUT,
            dead_timeout: DEFAULT_DEAD_TIMEOUT,
            evict_timeout: DEFAULT_EVICT_TIMEOUT,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }

    /// Read the configuration from the environment.
    ///
    /// NODE_ID, NODE_IP and NODE_PORT are mandatory; a missing or invalid
    /// value is a fatal startup error. SEED_NODES is optional and malformed
    /// tokens in it are skipped with a warning.
    pub fn from_env() -> Result<Self> {
        let node_id = require("NODE_ID")?;
        let ip = require("NODE_IP")?;
        let port_raw = require("NODE_PORT")?;
        let port: u16 = port_raw.parse().map_err(|_| {
            MeshError::Configuration(format!("NODE_PORT is not a valid port: {}", port_raw))
        })?;

        let mut config = Self::new(&node_id, &ip, port);
        if let Ok(raw) = env::var("SEED_NODES") {
            config.seed_nodes = parse_seed_list(&raw);
        }
        Ok(config)
    }

    /// Wire identity derived from the bind coordinates, so every peer
    /// observing this node's address computes the same id.
    pub fn wire_id(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Address the UDP endpoint binds on.
    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    pub fn with_seed(mut self, addr: &str) -> Self {
        self.seed_nodes.push(addr.to_string());
        self
    }

    pub fn with_gossip_interval(mut self, interval: Duration) -> Self {
        self.gossip_interval = interval;
        self
    }

    pub fn with_detector_interval(mut self, interval: Duration) -> Self {
        self.detector_interval = interval;
        self
    }

    pub fn with_failure_timeouts(
        mut self,
        suspect: Duration,
        dead: Duration,
        evict: Duration,
    ) -> Self {
        self.suspect_timeout = suspect;
        self.dead_timeout = dead;
        self.evict_timeout = evict;
        self
    }
}

fn require(key: &str) -> Result<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| MeshError::Configuration(format!("{} must be set in the environment", key)))
}

/// Split a comma-separated seed list, keeping only well-formed `ip:port`
/// tokens.
fn parse_seed_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|token| {
            let token = token.trim();
            if token.is_empty() {
                return None;
            }
            match token.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                    Some(token.to_string())
                }
                _ => {
                    warn!("Ignoring malformed seed address: {}", token);
                    None
                }
            }
        })
        .collect()
}
