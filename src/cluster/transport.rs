// Datagram Transceiver
//
// Single bound UDP endpoint per node. The reader loop copies each datagram
// out of the kernel buffer, parses the envelope, and hands it off: joins and
// digests run on spawned tasks so the loop never waits on merge work, leave
// hints are applied inline. Outbound sends open a short-lived socket, write
// the payload once, and close; gossip rounds repeat, so lost datagrams are
// never retransmitted.

use super::proto::Envelope;
use super::{gossip, join, NodeDescriptor, SharedMembership};
use crate::error::{MeshError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Upper bound for a serialized envelope (the UDP datagram limit).
pub const MAX_DATAGRAM: usize = 64 * 1024;

/// Receive buffer sized to the largest datagram accepted.
const RECV_BUFFER: usize = MAX_DATAGRAM;

/// The node's UDP endpoint and inbound dispatch loop.
pub struct Transceiver {
    socket: Arc<UdpSocket>,
    membership: SharedMembership,
    local: NodeDescriptor,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl Transceiver {
    /// Bind the node's UDP endpoint. A bind failure is fatal to startup.
    pub async fn bind(
        addr: &str,
        membership: SharedMembership,
        local: NodeDescriptor,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| MeshError::Network(format!("Failed to bind UDP endpoint {}: {}", addr, e)))?;
        info!("UDP endpoint listening on {}", addr);

        Ok(Self {
            socket: Arc::new(socket),
            membership,
            local,
            shutdown_tx: None,
        })
    }

    /// Address the endpoint actually bound, useful when port 0 was requested.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| MeshError::Network(format!("Failed to read bound address: {}", e)))
    }

    /// Spawn the reader loop.
    pub fn start(&mut self) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let transceiver = self.clone_for_task();
        tokio::spawn(async move {
            transceiver.run(shutdown_rx).await;
        });
    }

    /// Stop the reader loop.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }

    async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut buffer = vec![0u8; RECV_BUFFER];

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    break;
                }

                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) => self.dispatch(&buffer[..len], addr).await,
                        Err(e) => warn!("Error receiving datagram: {}", e),
                    }
                }
            }
        }

        debug!("Transceiver stopped");
    }

    /// Classify one inbound datagram and route it to its handler.
    async fn dispatch(&self, payload: &[u8], from: SocketAddr) {
        let envelope = match Envelope::from_bytes(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping unparseable datagram from {}: {}", from, e);
                return;
            }
        };

        match envelope {
            Envelope::Join { sender } => {
                let membership = self.membership.clone();
                let local = self.local.clone();
                tokio::spawn(async move {
                    join::handle_join(sender, from, membership, local).await;
                });
            }

            Envelope::Leave { sender } => {
                let removed = self.membership.write().await.remove(&sender);
                if removed {
                    info!("Node {} left the cluster", sender);
                }
            }

            Envelope::GossipUpdate {
                sender,
                membership: digest,
            } => {
                let membership = self.membership.clone();
                let local_id = self.local.id.clone();
                tokio::spawn(async move {
                    gossip::handle_digest(membership, local_id, sender, digest, Some(from)).await;
                });
            }

            Envelope::JoinAck {
                sender,
                membership: digest,
            } => {
                // Same merge as a gossip update, but never answered: replying
                // to the bootstrap ack would echo between the two nodes.
                let membership = self.membership.clone();
                let local_id = self.local.id.clone();
                tokio::spawn(async move {
                    gossip::handle_digest(membership, local_id, sender, digest, None).await;
                });
            }
        }
    }

    fn clone_for_task(&self) -> Self {
        Self {
            socket: self.socket.clone(),
            membership: self.membership.clone(),
            local: self.local.clone(),
            shutdown_tx: None,
        }
    }
}

/// Fire-and-forget send of one envelope.
///
/// Opens a short-lived outbound socket, writes the payload once, and drops
/// the socket. Payloads over the datagram limit are refused, never
/// fragmented.
pub async fn send_envelope(envelope: &Envelope, addr: &str) -> Result<()> {
    let payload = envelope.to_bytes()?;
    if payload.len() > MAX_DATAGRAM {
        return Err(MeshError::Network(format!(
            "{} payload of {} bytes exceeds the {} byte datagram limit",
            envelope.kind(),
            payload.len(),
            MAX_DATAGRAM
        )));
    }

    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| MeshError::Network(format!("Failed to open outbound socket: {}", e)))?;
    socket
        .send_to(&payload, addr)
        .await
        .map_err(|e| MeshError::Network(format!("Failed to send {} to {}: {}", envelope.kind(), addr, e)))?;

    Ok(())
}
