// Leave Protocol
//
// Best-effort departure broadcast run on graceful shutdown. Peers that
// receive the hint evict the node immediately; peers that miss it fall back
// to the failure detector's suspect/dead path. Suspect peers still get the
// hint since they may only be partitioned, dead ones are skipped.

use super::proto::Envelope;
use super::{transport, NodeHealth, SharedMembership};
use tracing::{debug, info, warn};

/// Tell every reachable peer this node is going away.
pub async fn broadcast_leave(membership: &SharedMembership, local_id: &str) {
    let snapshot = membership.read().await.snapshot();
    let hint = Envelope::Leave {
        sender: local_id.to_string(),
    };

    let mut sent = 0usize;
    let mut skipped = 0usize;
    for peer in snapshot.iter().filter(|d| d.id != local_id) {
        match peer.status {
            NodeHealth::Alive | NodeHealth::Suspect => {
                match transport::send_envelope(&hint, &peer.addr()).await {
                    Ok(()) => sent += 1,
                    Err(e) => warn!("Leave hint to {} failed: {}", peer.id, e),
                }
            }
            NodeHealth::Dead => {
                skipped += 1;
                debug!("Skipping dead peer {} for leave hint", peer.id);
            }
        }
    }

    info!("Leave broadcast complete: {} sent, {} skipped", sent, skipped);
}
