// Gossip Engine
//
// Periodic push-pull dissemination. Every tick refreshes the local heartbeat,
// picks one live peer uniformly at random, and pushes a digest of every
// non-dead entry. The receiver merges the digest, credits the sender with
// liveness, and answers with its own digest, so a single round trip converges
// both views onto a common superset.

use super::proto::Envelope;
use super::{transport, NodeDescriptor, NodeHealth, SharedMembership};
use crate::config::NodeConfig;
use rand::prelude::IndexedRandom;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, warn};

/// The periodic push half of the protocol.
pub struct GossipEngine {
    membership: SharedMembership,
    local_id: String,
    interval: Duration,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl GossipEngine {
    pub fn new(membership: SharedMembership, config: &NodeConfig) -> Self {
        Self {
            membership,
            local_id: config.wire_id(),
            interval: config.gossip_interval,
            shutdown_tx: None,
        }
    }

    /// Spawn the gossip loop.
    pub fn start(&mut self) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let engine = self.clone_for_task();
        tokio::spawn(async move {
            engine.run(shutdown_rx).await;
        });
    }

    /// Stop the gossip loop.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }

    async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut ticker = interval(self.interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    break;
                }

                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        debug!("Gossip engine stopped");
    }

    /// One gossip round: heartbeat, pick a partner, push the digest.
    async fn tick(&self) {
        // Implicit heartbeat: the self entry is refreshed before any
        // outbound message is composed.
        self.membership.write().await.update_last_seen(&self.local_id);

        let snapshot = self.membership.read().await.snapshot();
        let Some(sender) = snapshot.iter().find(|d| d.id == self.local_id).cloned() else {
            warn!("Local node missing from its own membership table");
            return;
        };

        let candidates = gossip_candidates(&snapshot, &self.local_id);
        let Some(target) = candidates.choose(&mut rand::rng()).cloned() else {
            debug!("No live peer available for gossip this round");
            return;
        };

        let digest = build_digest(&snapshot);
        debug!(
            "Gossiping {} entries to {} ({} known nodes)",
            digest.len(),
            target.id,
            snapshot.len()
        );

        let update = Envelope::GossipUpdate {
            sender,
            membership: digest,
        };
        if let Err(e) = transport::send_envelope(&update, &target.addr()).await {
            warn!("Gossip send to {} failed: {}", target.id, e);
        }
    }

    fn clone_for_task(&self) -> Self {
        Self {
            membership: self.membership.clone(),
            local_id: self.local_id.clone(),
            interval: self.interval,
            shutdown_tx: None,
        }
    }
}

/// Peers eligible for a gossip round: everyone but self and the dead.
/// Dead entries are starved of traffic while their eviction window runs.
pub fn gossip_candidates(snapshot: &[NodeDescriptor], local_id: &str) -> Vec<NodeDescriptor> {
    snapshot
        .iter()
        .filter(|d| d.id != local_id && d.status != NodeHealth::Dead)
        .cloned()
        .collect()
}

/// Outbound digest: every non-dead entry. Re-advertising a dead node would
/// resurrect it on peers that already evicted it.
pub fn build_digest(snapshot: &[NodeDescriptor]) -> Vec<NodeDescriptor> {
    snapshot
        .iter()
        .filter(|d| d.status != NodeHealth::Dead)
        .cloned()
        .collect()
}

/// Merge an inbound digest and credit the sender with liveness.
///
/// `reply_to` carries the datagram's source address for the pull half of the
/// exchange; join acks pass `None` so the bootstrap handshake does not echo
/// indefinitely.
pub async fn handle_digest(
    membership: SharedMembership,
    local_id: String,
    sender: NodeDescriptor,
    digest: Vec<NodeDescriptor>,
    reply_to: Option<SocketAddr>,
) {
    debug!(
        "Merging digest of {} entries from {}",
        digest.len(),
        sender.id
    );

    {
        let mut table = membership.write().await;
        // The table refuses entries carrying the local id, so a peer's view
        // of this node can never downgrade the self entry.
        for descriptor in digest {
            table.add_or_update(descriptor);
        }
        // Hearing from the sender at all is positive evidence of liveness.
        table.update_last_seen(&sender.id);
    }

    let Some(reply_to) = reply_to else {
        return;
    };

    let (reply_sender, snapshot) = {
        let table = membership.read().await;
        (table.local(), table.snapshot())
    };
    let Some(reply_sender) = reply_sender else {
        warn!("Local node {} not registered; gossip reply skipped", local_id);
        return;
    };

    let reply = Envelope::GossipUpdate {
        sender: reply_sender,
        membership: build_digest(&snapshot),
    };
    if let Err(e) = transport::send_envelope(&reply, &reply_to.to_string()).await {
        warn!("Gossip reply to {} failed: {}", reply_to, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MembershipTable;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn node(ip: &str, status: NodeHealth) -> NodeDescriptor {
        let mut descriptor = NodeDescriptor::new(ip, "9000");
        descriptor.status = status;
        descriptor
    }

    #[test]
    fn test_digest_excludes_dead() {
        let snapshot = vec![
            node("10.0.0.1", NodeHealth::Alive),
            node("10.0.0.2", NodeHealth::Suspect),
            node("10.0.0.3", NodeHealth::Dead),
        ];

        let digest = build_digest(&snapshot);

        assert_eq!(digest.len(), 2);
        assert!(digest.iter().all(|d| d.status != NodeHealth::Dead));
    }

    #[test]
    fn test_candidates_exclude_self_and_dead() {
        let snapshot = vec![
            node("10.0.0.1", NodeHealth::Alive),
            node("10.0.0.2", NodeHealth::Alive),
            node("10.0.0.3", NodeHealth::Suspect),
            node("10.0.0.4", NodeHealth::Dead),
        ];

        let candidates = gossip_candidates(&snapshot, "10.0.0.1:9000");

        let ids: Vec<&str> = candidates.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["10.0.0.2:9000", "10.0.0.3:9000"]);
    }

    #[tokio::test]
    async fn test_handle_digest_merges_and_credits_sender() {
        let membership: SharedMembership = Arc::new(RwLock::new(MembershipTable::new()));
        let local = NodeDescriptor::new("10.0.0.1", "9000");
        membership.write().await.register_local(local.clone());

        let mut stale_sender = node("10.0.0.2", NodeHealth::Suspect);
        stale_sender.last_seen = "2020-01-01T00:00:00Z".to_string();
        membership.write().await.add_or_update(stale_sender.clone());

        let digest = vec![stale_sender.clone(), node("10.0.0.3", NodeHealth::Alive)];
        handle_digest(
            membership.clone(),
            local.id.clone(),
            stale_sender,
            digest,
            None,
        )
        .await;

        let table = membership.read().await;
        assert_eq!(table.count(), 3);
        // The sender was heard from, so it is alive with a fresh timestamp.
        assert_eq!(table.status_of("10.0.0.2:9000"), Some(NodeHealth::Alive));
        assert!(table.last_seen_of("10.0.0.2:9000").unwrap() > "2020-01-01T00:00:00Z".to_string());
        assert_eq!(table.status_of("10.0.0.3:9000"), Some(NodeHealth::Alive));
    }

    #[tokio::test]
    async fn test_handle_digest_never_downgrades_self() {
        let membership: SharedMembership = Arc::new(RwLock::new(MembershipTable::new()));
        let local = NodeDescriptor::new("10.0.0.1", "9000");
        membership.write().await.register_local(local.clone());

        let mut poisoned_self = local.clone();
        poisoned_self.status = NodeHealth::Dead;
        poisoned_self.last_seen = "2999-01-01T00:00:00Z".to_string();
        let peer = node("10.0.0.2", NodeHealth::Alive);

        handle_digest(
            membership.clone(),
            local.id.clone(),
            peer,
            vec![poisoned_self],
            None,
        )
        .await;

        let table = membership.read().await;
        assert_eq!(table.status_of(&local.id), Some(NodeHealth::Alive));
        assert_ne!(
            table.last_seen_of(&local.id).unwrap(),
            "2999-01-01T00:00:00Z"
        );
    }
}
