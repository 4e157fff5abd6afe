// Cluster Membership Module
//
// Epidemic-style membership for a cluster of peers exchanging JSON datagrams
// over UDP. Every node keeps its own view of the cluster in a membership
// table and reconciles it with one random peer per gossip round, so joins,
// failures, and departures reach all live nodes within a bounded number of
// rounds.
//
// Components:
//
// - `membership`: the concurrency-safe table and its conflict-resolution merge
// - `proto`: the type-tagged wire envelopes
// - `transport`: the bound UDP endpoint and fire-and-forget sends
// - `gossip`: the periodic push-pull engine
// - `join` / `leave`: bootstrap handshake and departure hint
// - `failure`: the timeout-driven alive/suspect/dead lifecycle

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod failure;
pub mod gossip;
pub mod join;
pub mod leave;
pub mod membership;
pub mod proto;
pub mod transport;

// Re-exports
pub use failure::FailureDetector;
pub use gossip::GossipEngine;
pub use membership::MembershipTable;
pub use proto::Envelope;
pub use transport::Transceiver;

/// Shared handle to a node's membership table. Mutations take the write
/// half, snapshots and point queries the read half.
pub type SharedMembership = Arc<RwLock<MembershipTable>>;

/// Liveness state of a cluster node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    /// Node is responding to gossip.
    Alive,

    /// Node has been silent past the suspect threshold.
    Suspect,

    /// Node is considered failed and awaits eviction.
    Dead,
}

impl NodeHealth {
    /// Merge precedence: a higher-priority status may overwrite a
    /// lower-priority one on equal or older timestamps, never the reverse.
    pub fn priority(&self) -> u8 {
        match self {
            NodeHealth::Alive => 3,
            NodeHealth::Suspect => 2,
            NodeHealth::Dead => 1,
        }
    }
}

impl fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeHealth::Alive => write!(f, "alive"),
            NodeHealth::Suspect => write!(f, "suspect"),
            NodeHealth::Dead => write!(f, "dead"),
        }
    }
}

/// Wire value describing one cluster node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeDescriptor {
    /// Unique identity, canonically `ip:port`.
    pub id: String,

    /// Address peers use to reach this node.
    pub ip: String,

    /// Port peers use to reach this node.
    pub port: String,

    /// Liveness state as last observed.
    pub status: NodeHealth,

    /// RFC 3339 instant of the most recent positive evidence of liveness.
    pub last_seen: String,
}

impl NodeDescriptor {
    /// Create an alive descriptor. The id is derived from the network
    /// coordinates so any peer observing the same address computes the
    /// same identity.
    pub fn new(ip: &str, port: &str) -> Self {
        Self {
            id: format!("{}:{}", ip, port),
            ip: ip.to_string(),
            port: port.to_string(),
            status: NodeHealth::Alive,
            last_seen: now_rfc3339(),
        }
    }

    /// Datagram address of this node.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Parse the last-seen timestamp, if well-formed.
    pub fn last_seen_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.last_seen)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Current wall-clock time as an RFC 3339 string at second precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
