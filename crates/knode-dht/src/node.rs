//! A routing-table peer record.

use std::fmt;
use std::time::{Duration, Instant};

use knode_id::{Endpoint, Id160};

use crate::{NODE_FAILED_COMMS_BEFORE_STALE, NODE_INACTIVE_TIME_BEFORE_QUESTIONABLE};

/// A known peer: identity, address, and liveness bookkeeping.
///
/// Two nodes are considered equal when either their IDs *or* their endpoints
/// match — a peer that reappears under a new ID at a previously-known
/// address, or under the same ID at a new address, is still "the same node"
/// for bucket membership purposes.
#[derive(Clone, Debug)]
pub struct Node {
    /// The peer's 160-bit identity.
    pub id: Id160,
    /// The peer's last-known network address.
    pub endpoint: Endpoint,
    /// Consecutive failed requests since the last success.
    pub failed_requests: u32,
    /// When this peer was last heard from.
    pub last_seen: Instant,
}

impl Node {
    /// Construct a freshly-seen node.
    pub fn new(id: Id160, endpoint: Endpoint) -> Self {
        Self {
            id,
            endpoint,
            failed_requests: 0,
            last_seen: Instant::now(),
        }
    }

    /// Mark this node as seen right now, clearing its failure count.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.failed_requests = 0;
    }

    /// Record a failed request against this node.
    pub fn record_failure(&mut self) {
        self.failed_requests += 1;
    }

    /// A node is stale once it has failed `NODE_FAILED_COMMS_BEFORE_STALE`
    /// consecutive requests.
    pub fn is_stale(&self) -> bool {
        self.failed_requests >= NODE_FAILED_COMMS_BEFORE_STALE
    }

    /// A node is questionable once it has been silent longer than
    /// `NODE_INACTIVE_TIME_BEFORE_QUESTIONABLE`.
    pub fn is_questionable(&self) -> bool {
        self.last_seen.elapsed() > NODE_INACTIVE_TIME_BEFORE_QUESTIONABLE
    }

    /// How long it has been since this node was last seen.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id || self.endpoint == other.endpoint
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "knode://{}@{}:{}",
            self.id.to_hex(),
            self.endpoint.ip(),
            self.endpoint.port()
        )
    }
}
