//! knode-daemon: the Kademlia DHT network daemon.
//!
//! Single OS process running a single-threaded Tokio runtime: the engine's
//! routing table, value store, and dispatcher are `Rc<RefCell<_>>`-shared
//! and never cross a thread boundary, so the whole daemon runs inside one
//! `LocalSet`.

mod config;

use std::net::SocketAddr;

use knode_dht::Engine;
use knode_net::Channel;
use tracing::{error, info, warn};

use crate::config::DaemonConfig;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("knode=info".parse()?),
        )
        .init();

    let local = tokio::task::LocalSet::new();
    local.run_until(run()).await
}

async fn run() -> anyhow::Result<()> {
    info!("knode daemon starting");

    // 1. Load config.
    let config = DaemonConfig::load(None)?;
    let self_id = config.self_id()?;

    // 2. Bind the UDP socket.
    let bind_addr = SocketAddr::new(config.internal_ip, config.udp_port);
    let channel = Channel::bind(bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind UDP socket on {bind_addr}: {e}"))?;
    let bound_addr = channel.local_addr();
    info!(%bound_addr, id = %self_id, "UDP socket bound");
    if config.ipv6_bind.is_some() {
        warn!("ipv6_bind is configured but dual-stack binding is not yet implemented; ignoring");
    }

    // 3. Build the engine and start its event loop.
    let engine = Engine::new(self_id, channel, config.bucket_size);
    let loop_handle = engine.clone();
    tokio::task::spawn_local(async move { loop_handle.run().await });

    // 4. Bootstrap, or declare ourselves a bootstrap node.
    if config.bootstrap_peers.is_empty() {
        info!("no bootstrap peers configured; running as a bootstrap node");
    } else {
        match knode_dht::bootstrap_from_urls(&engine, &config.bootstrap_peers).await {
            Ok(()) => info!(
                peer_count = config.bootstrap_peers.len(),
                "bootstrap complete"
            ),
            Err(e) => error!(error = %e, "bootstrap failed; continuing with an empty routing table"),
        }
    }

    // 5. Run until interrupted.
    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");

    info!("knode daemon stopped");
    Ok(())
}
