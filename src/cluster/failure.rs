// Failure Detector
//
// Timeout-driven sweep over last-seen timestamps. A node silent past the
// suspect threshold becomes suspect, past the dead threshold it is declared
// dead, and once the retention window expires the entry is evicted outright.
// Any gossip heard during the suspect window heals the node back to alive
// through the merge path, which keeps transient packet loss from taking
// down live nodes.

use super::{NodeHealth, SharedMembership};
use crate::config::NodeConfig;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Periodic task driving the alive -> suspect -> dead -> evicted lifecycle.
pub struct FailureDetector {
    membership: SharedMembership,
    local_id: String,
    interval: Duration,
    suspect_timeout: Duration,
    dead_timeout: Duration,
    evict_timeout: Duration,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl FailureDetector {
    pub fn new(membership: SharedMembership, config: &NodeConfig) -> Self {
        Self {
            membership,
            local_id: config.wire_id(),
            interval: config.detector_interval,
            suspect_timeout: config.suspect_timeout,
            dead_timeout: config.dead_timeout,
            evict_timeout: config.evict_timeout,
            shutdown_tx: None,
        }
    }

    /// Spawn the detector loop.
    pub fn start(&mut self) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let detector = self.clone_for_task();
        tokio::spawn(async move {
            detector.run(shutdown_rx).await;
        });
    }

    /// Stop the detector loop.
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
                    self.sweep().await;
                }
            }
        }

        debug!("Failure detector stopped");
    }

    /// Inspect every remote entry and apply the clock-driven transitions.
    async fn sweep(&self) {
        let now = Utc::now();
        let snapshot = self.membership.read().await.snapshot();

        for node in snapshot {
            // The self entry is refreshed by the gossip tick and is never
            // judged here, even if the gossip engine is paused.
            if node.id == self.local_id {
                continue;
            }

            let Some(last_seen) = node.last_seen_at() else {
                warn!(
                    "Unparseable last-seen timestamp for {}: {}",
                    node.id, node.last_seen
                );
                continue;
            };
            let idle = now.signed_duration_since(last_seen).num_seconds();

            match node.status {
                NodeHealth::Alive if idle > self.suspect_timeout.as_secs() as i64 => {
                    self.membership.write().await.mark_suspect(&node.id);
                    warn!("Node {} is now suspect (silent for {}s)", node.id, idle);
                }
                NodeHealth::Suspect if idle > self.dead_timeout.as_secs() as i64 => {
                    self.membership.write().await.mark_dead(&node.id);
                    warn!("Node {} is now dead (silent for {}s)", node.id, idle);
                }
                NodeHealth::Dead if idle > self.evict_timeout.as_secs() as i64 => {
                    self.membership.write().await.remove(&node.id);
                    info!("Evicted dead node {} after {}s of silence", node.id, idle);
                }
                _ => {}
            }
        }
    }

    fn clone_for_task(&self) -> Self {
        Self {
            membership: self.membership.clone(),
            local_id: self.local_id.clone(),
            interval: self.interval,
            suspect_timeout: self.suspect_timeout,
            dead_timeout: self.dead_timeout,
            evict_timeout: self.evict_timeout,
            shutdown_tx: None,
        }
    }
}
