//! The XOR-metric routing table.

use knode_id::Id160;

use crate::bucket::{AddOutcome, KBucket};
use crate::node::Node;
use crate::DEPTH_B;

/// The routing table: an ordered, disjoint cover of the 160-bit id space,
/// initialized with a single bucket and refined by splitting.
///
/// Buckets are ordered such that `self_node.id` always belongs to the last
/// one — the table only ever splits its last bucket.
pub struct RoutingTable {
    self_node: Node,
    k: usize,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    /// Construct a table for `self_node`, starting with one root bucket.
    pub fn new(self_node: Node, k: usize) -> Self {
        Self {
            self_node,
            k,
            buckets: vec![KBucket::root()],
        }
    }

    /// The local node this table routes around.
    pub fn self_node(&self) -> &Node {
        &self.self_node
    }

    /// Read-only access to the buckets, for iteration by the engine.
    pub fn buckets(&self) -> &[KBucket] {
        &self.buckets
    }

    /// Mutable access to a bucket by index, for the engine's refresh cycle.
    pub fn bucket_mut(&mut self, index: usize) -> Option<&mut KBucket> {
        self.buckets.get_mut(index)
    }

    /// The number of buckets currently in the table.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// The index of the one bucket whose prefix `id` falls under.
    pub fn bucket_index_for(&self, id: &Id160) -> usize {
        self.buckets
            .iter()
            .position(|b| b.contains_id(id))
            .expect("buckets form a disjoint cover of the id space")
    }

    /// Attempt to add `peer`. Returns `true` if accepted into a bucket's
    /// `live` list, `false` if it landed in a replacement cache (the bucket
    /// was full and not eligible for a split).
    pub fn add(&mut self, peer: Node) -> bool {
        if peer == self.self_node {
            return false;
        }

        let index = self.bucket_index_for(&peer.id);
        match self.buckets[index].add(peer.clone(), self.k) {
            AddOutcome::Accepted => true,
            AddOutcome::Rejected => {
                if self.split_allowed(index) {
                    let bucket = self.buckets.remove(index);
                    let (first, second) = bucket.split(&self.self_node.id);
                    self.buckets.insert(index, second);
                    self.buckets.insert(index, first);
                }
                false
            }
        }
    }

    fn split_allowed(&self, index: usize) -> bool {
        let bucket_count = self.buckets.len();
        let is_last_bucket = index == bucket_count - 1;
        let b = &self.buckets[index];

        let mut allowed =
            bucket_count < 160 && b.depth < DEPTH_B && (b.depth % DEPTH_B) != 0;
        allowed = allowed || is_last_bucket;
        allowed = allowed && !(bucket_count > 1 && index == 0);
        allowed
    }

    /// Record a failed request against `peer`. Returns `true` if the peer
    /// was consequently evicted for being stale.
    ///
    /// Buckets are searched from the tail (the self-bucket, most likely to
    /// hold a peer that was just contacted) backward.
    pub fn peer_timed_out(&mut self, peer_id: &Id160) -> bool {
        for bucket in self.buckets.iter_mut().rev() {
            if let Some(node) = bucket.live.iter_mut().find(|n| n.id == *peer_id) {
                node.record_failure();
                if node.is_stale() {
                    bucket.remove(peer_id);
                    return true;
                }
                return false;
            }
        }
        false
    }

    /// Collect up to `max` peers closest to `target`, sorted ascending by
    /// XOR distance, excluding `target` itself if present and never
    /// including `self_node`.
    pub fn find_neighbors(&self, target: &Id160, max: usize) -> Vec<Node> {
        let start = self.bucket_index_for(target);
        let mut out: Vec<Node> = Vec::new();

        out.extend(
            self.buckets[start]
                .live
                .iter()
                .filter(|n| n.id != *target)
                .cloned(),
        );

        let mut left = start as isize - 1;
        let mut right = start + 1;
        let mut take_left = true;
        while out.len() < max && (left >= 0 || right < self.buckets.len()) {
            if take_left && left >= 0 {
                out.extend(self.buckets[left as usize].live.iter().cloned());
                left -= 1;
            } else if !take_left && right < self.buckets.len() {
                out.extend(self.buckets[right].live.iter().cloned());
                right += 1;
            }
            take_left = !take_left;
            if left < 0 && right >= self.buckets.len() {
                break;
            }
        }

        out.retain(|n| n.id != self.self_node.id);
        out.sort_by_key(|n| n.id.distance(target));
        out.truncate(max);
        out
    }
}
