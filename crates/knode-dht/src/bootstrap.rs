//! Bootstrap peer URL parsing and the join-the-network lifecycle.
//!
//! A bootstrap peer is named by a `knode://<40-hex>@<ip>:<port>` URL: a
//! 160-bit id (parsed case-insensitively), an `@`, and a literal IPv4 or
//! IPv6 socket address — no DNS resolution is performed.

use knode_id::{Endpoint, Id160};

use crate::node::Node;
use crate::{DhtError, Result};

const SCHEME: &str = "knode://";

/// Parse one `knode://<40-hex>@<ip>:<port>` URL into a [`Node`].
pub fn parse_peer_url(url: &str) -> Result<Node> {
    let rest = url
        .strip_prefix(SCHEME)
        .ok_or_else(|| DhtError::InvalidPeerUrl(url.to_string()))?;

    let (id_part, addr_part) = rest
        .split_once('@')
        .ok_or_else(|| DhtError::InvalidPeerUrl(url.to_string()))?;

    if id_part.len() != knode_id::BYTES * 2 {
        return Err(DhtError::InvalidPeerUrl(url.to_string()));
    }
    let mut bytes = [0u8; knode_id::BYTES];
    hex::decode_to_slice(id_part, &mut bytes)
        .map_err(|_| DhtError::InvalidPeerUrl(url.to_string()))?;
    let id = Id160::from_bytes(bytes);

    let socket_addr: std::net::SocketAddr = addr_part
        .parse()
        .map_err(|_| DhtError::InvalidPeerUrl(url.to_string()))?;
    let endpoint = Endpoint::new(socket_addr.ip(), socket_addr.port());

    Ok(Node::new(id, endpoint))
}

/// Parse a list of bootstrap peer URLs, failing on the first invalid one.
pub fn parse_peer_urls(urls: &[String]) -> Result<Vec<Node>> {
    urls.iter().map(|u| parse_peer_url(u)).collect()
}

/// Run the bootstrap lifecycle against the peers named by `urls` (an empty
/// list is not an error here: the caller is declaring itself a bootstrap
/// node, and [`crate::engine::Engine::bootstrap`] is simply never called).
pub async fn bootstrap_from_urls(engine: &crate::Engine, urls: &[String]) -> Result<()> {
    if urls.is_empty() {
        tracing::info!("no bootstrap peers configured; running as a bootstrap node");
        return Ok(());
    }
    let seeds = parse_peer_urls(urls)?;
    engine.bootstrap(seeds).await
}
