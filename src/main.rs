// # RustyMesh Node
//
// Entry point for the gossip membership daemon. Reads identity and seeds
// from the environment, binds the UDP endpoint, starts the protocol tasks,
// and broadcasts a leave hint on SIGINT/SIGTERM before exiting.

use rusty_mesh::cluster::{
    join, leave, FailureDetector, GossipEngine, MembershipTable, NodeDescriptor, SharedMembership,
    Transceiver,
};
use rusty_mesh::config::NodeConfig;
use log::warn;
use rusty_mesh::{Result, VERSION};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::RwLock;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    let config = match NodeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Fatal configuration error: {}", e);
            return Err(e);
        }
    };

    info!("Initializing rusty-mesh node {} (version {})", config.node_id, VERSION);

    let local = NodeDescriptor::new(&config.ip, &config.port.to_string());
    let membership: SharedMembership = Arc::new(RwLock::new(MembershipTable::new()));
    {
        let mut table = membership.write().await;
        table.register_local(local.clone());
        for seed in &config.seed_nodes {
            if let Some(descriptor) = seed_descriptor(seed) {
                // Pre-seeding keeps passive bootstrap working even when the
                // join handshake below is lost.
                table.add_or_update(descriptor);
            }
        }
    }

    if config.seed_nodes.is_empty() {
        info!("No seed nodes configured; waiting to be contacted");
    } else {
        info!(
            "Membership table primed with {} entries from {} seed token(s)",
            membership.read().await.count(),
            config.seed_nodes.len()
        );
    }

    print_banner(&config, &local);

    let mut transceiver =
        match Transceiver::bind(&config.bind_addr(), membership.clone(), local.clone()).await {
            Ok(transceiver) => transceiver,
            Err(e) => {
                error!("Fatal: {}", e);
                return Err(e);
            }
        };
    transceiver.start();

    // Active bootstrap: best-effort handshake with each seed.
    for seed in &config.seed_nodes {
        if seed == &local.id {
            continue;
        }
        if let Err(e) = join::send_join_request(seed, &membership, config.join_timeout).await {
            warn!(
                "Join via seed {} failed: {}; falling back to passive bootstrap",
                seed, e
            );
        }
    }

    let mut gossip_engine = GossipEngine::new(membership.clone(), &config);
    gossip_engine.start();

    let mut detector = FailureDetector::new(membership.clone(), &config);
    detector.start();

    info!("Node {} up as {}", config.node_id, local.id);

    wait_for_shutdown_signal().await;

    info!("Shutdown signal received; notifying peers");
    leave::broadcast_leave(&membership, &local.id).await;

    gossip_engine.stop().await;
    detector.stop().await;
    transceiver.stop().await;

    info!("Shutdown complete");
    Ok(())
}

/// Descriptor for one `ip:port` seed token, skipping the node itself.
fn seed_descriptor(seed: &str) -> Option<NodeDescriptor> {
    let (ip, port) = seed.rsplit_once(':')?;
    Some(NodeDescriptor::new(ip, port))
}

async fn wait_for_shutdown_signal() {
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

fn print_banner(config: &NodeConfig, local: &NodeDescriptor) {
    println!("╭─────────────────────────────────────────────────────────╮");
    println!("│  RustyMesh - Gossip Cluster Membership                  │");
    println!("├─────────────────────────────────────────────────────────┤");
    println!("│  Node label:   {:<40} │", config.node_id);
    println!("│  Wire id:      {:<40} │", local.id);
    println!("│  Bind address: {:<40} │", config.bind_addr());
    println!("│  Seed nodes:   {:<40} │", config.seed_nodes.len());
    println!(
        "│  Gossip tick:  {:<40} │",
        format!("{} seconds", config.gossip_interval.as_secs())
    );
    println!("╰─────────────────────────────────────────────────────────╯");
}
