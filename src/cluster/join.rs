// Join Protocol
//
// Bootstrap handshake. A joining node sends its descriptor to a seed over an
// ephemeral socket and waits briefly for a `join_ack` carrying the seed's
// view. The handshake is best-effort and at most once per seed: seeds are
// already present in the local table at startup, so a lost ack only delays
// discovery until a regular gossip round reaches the seed.

use super::proto::Envelope;
use super::{transport, NodeDescriptor, SharedMembership};
use crate::error::{MeshError, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{info, warn};

/// Ask one seed for its view and merge the reply.
pub async fn send_join_request(
    seed_addr: &str,
    membership: &SharedMembership,
    ack_timeout: Duration,
) -> Result<()> {
    let local = membership
        .read()
        .await
        .local()
        .ok_or_else(|| MeshError::Network("Local node not registered".to_string()))?;

    let request = Envelope::Join {
        sender: local.clone(),
    };
    let payload = request.to_bytes()?;

    // The ack must come back on the same ephemeral socket the request left on.
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| MeshError::Network(format!("Failed to open join socket: {}", e)))?;
    socket
        .send_to(&payload, seed_addr)
        .await
        .map_err(|e| MeshError::Network(format!("Failed to send join to {}: {}", seed_addr, e)))?;
    info!("Join request sent to {}", seed_addr);

    let mut buffer = vec![0u8; transport::MAX_DATAGRAM];
    let (len, _) = timeout(ack_timeout, socket.recv_from(&mut buffer))
        .await
        .map_err(|_| {
            MeshError::Timeout(format!(
                "No join ack from {} within {:?}",
                seed_addr, ack_timeout
            ))
        })?
        .map_err(|e| MeshError::Network(format!("Failed to receive join ack: {}", e)))?;

    match Envelope::from_bytes(&buffer[..len])? {
        Envelope::JoinAck {
            sender,
            membership: digest,
        } => {
            let entries = digest.len();
            let mut table = membership.write().await;
            for descriptor in digest {
                table.add_or_update(descriptor);
            }
            table.update_last_seen(&sender.id);
            info!("Join ack from {} carried {} entries", seed_addr, entries);
            Ok(())
        }
        other => Err(MeshError::Network(format!(
            "Expected join ack from {}, got {}",
            seed_addr,
            other.kind()
        ))),
    }
}

/// Admit a joining node and answer with the current view.
pub async fn handle_join(
    joiner: NodeDescriptor,
    from: SocketAddr,
    membership: SharedMembership,
    local: NodeDescriptor,
) {
    info!("Join request from {} at {}", joiner.id, from);

    let (sender, snapshot) = {
        let mut table = membership.write().await;
        table.add_or_update(joiner);
        (table.local(), table.snapshot())
    };
    let Some(sender) = sender else {
        warn!("Local node {} not registered; join ack skipped", local.id);
        return;
    };

    let ack = Envelope::JoinAck {
        sender,
        membership: snapshot,
    };
    if let Err(e) = transport::send_envelope(&ack, &from.to_string()).await {
        warn!("Join ack to {} failed: {}", from, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{MembershipTable, NodeHealth};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    #[tokio::test]
    async fn test_handle_join_admits_and_acks() {
        let membership: SharedMembership = Arc::new(RwLock::new(MembershipTable::new()));
        let local = NodeDescriptor::new("127.0.0.1", "9000");
        membership.write().await.register_local(local.clone());

        // Stand in for the joiner's ephemeral socket.
        let joiner_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let joiner_addr = joiner_socket.local_addr().unwrap();
        let joiner = NodeDescriptor::new("10.0.0.2", "9000");

        handle_join(joiner.clone(), joiner_addr, membership.clone(), local.clone()).await;

        assert_eq!(
            membership.read().await.status_of(&joiner.id),
            Some(NodeHealth::Alive)
        );

        let mut buffer = vec![0u8; transport::MAX_DATAGRAM];
        let (len, _) = joiner_socket.recv_from(&mut buffer).await.unwrap();
        match Envelope::from_bytes(&buffer[..len]).unwrap() {
            Envelope::JoinAck {
                sender,
                membership: digest,
            } => {
                assert_eq!(sender.id, local.id);
                let ids: Vec<&str> = digest.iter().map(|d| d.id.as_str()).collect();
                assert!(ids.contains(&local.id.as_str()));
                assert!(ids.contains(&joiner.id.as_str()));
            }
            other => panic!("unexpected envelope: {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_send_join_request_times_out_without_seed() {
        let membership: SharedMembership = Arc::new(RwLock::new(MembershipTable::new()));
        membership
            .write()
            .await
            .register_local(NodeDescriptor::new("127.0.0.1", "9000"));

        // Nothing listens on the target port, so the ack never arrives.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let seed_addr = silent.local_addr().unwrap().to_string();

        let result = send_join_request(
            &seed_addr,
            &membership,
            Duration::from_millis(100),
        )
        .await;

        assert!(matches!(result, Err(MeshError::Timeout(_))));
    }
}
