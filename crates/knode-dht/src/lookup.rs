//! Iterative lookup state machines.
//!
//! These types hold pure candidate-tracking state; they decide *what* to
//! send next but never perform I/O themselves — [`crate::engine::Engine`]
//! drives them from events delivered off the wire.

use std::collections::BTreeMap;

use knode_id::{Endpoint, Id160};

use crate::node::Node;
use crate::ALPHA;

/// A candidate's position in one iterative lookup's lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandidateState {
    /// Known but not yet queried.
    Unknown,
    /// A request has been sent; awaiting response or timeout.
    Contacted,
    /// Replied successfully.
    Responded,
    /// Timed out without a response.
    TimedOut,
}

/// One peer under consideration by a lookup task.
#[derive(Clone, Debug)]
pub struct Candidate {
    /// The candidate's identity.
    pub id: Id160,
    /// The candidate's network address.
    pub endpoint: Endpoint,
    /// Its current lifecycle state.
    pub state: CandidateState,
}

/// The candidate set shared by every iterative lookup kind: a map keyed by
/// XOR distance from `target` (unique, since XOR is a bijection for a fixed
/// target), plus an in-flight counter bounding concurrency to [`ALPHA`].
pub struct Candidates {
    target: Id160,
    self_id: Id160,
    by_distance: BTreeMap<Id160, Candidate>,
    in_flight: usize,
}

impl Candidates {
    /// Seed a fresh candidate set from the routing table's closest known
    /// peers to `target`.
    pub fn new(target: Id160, self_id: Id160, seeds: Vec<Node>) -> Self {
        let mut set = Self {
            target,
            self_id,
            by_distance: BTreeMap::new(),
            in_flight: 0,
        };
        for seed in seeds {
            set.offer(seed.id, seed.endpoint);
        }
        set
    }

    /// The target this lookup is searching for.
    pub fn target(&self) -> Id160 {
        self.target
    }

    /// Offer a newly-learned peer as a candidate, ignored if it is the local
    /// node, the target itself, or already known.
    pub fn offer(&mut self, id: Id160, endpoint: Endpoint) {
        if id == self.self_id {
            return;
        }
        let distance = id.distance(&self.target);
        self.by_distance.entry(distance).or_insert(Candidate {
            id,
            endpoint,
            state: CandidateState::Unknown,
        });
    }

    /// Mark up to `ALPHA - in_flight` `Unknown` candidates, nearest first, as
    /// `Contacted` and return them.
    pub fn next_batch(&mut self) -> Vec<Candidate> {
        let budget = ALPHA.saturating_sub(self.in_flight);
        let mut batch = Vec::with_capacity(budget);
        for candidate in self.by_distance.values_mut() {
            if batch.len() >= budget {
                break;
            }
            if candidate.state == CandidateState::Unknown {
                candidate.state = CandidateState::Contacted;
                batch.push(candidate.clone());
            }
        }
        self.in_flight += batch.len();
        batch
    }

    /// Record that `id` responded successfully.
    pub fn mark_responded(&mut self, id: Id160) {
        let distance = id.distance(&self.target);
        if let Some(c) = self.by_distance.get_mut(&distance) {
            if c.state == CandidateState::Contacted {
                self.in_flight = self.in_flight.saturating_sub(1);
            }
            c.state = CandidateState::Responded;
        }
    }

    /// Record that `id` timed out.
    pub fn mark_timed_out(&mut self, id: Id160) {
        let distance = id.distance(&self.target);
        if let Some(c) = self.by_distance.get_mut(&distance) {
            if c.state == CandidateState::Contacted {
                self.in_flight = self.in_flight.saturating_sub(1);
            }
            c.state = CandidateState::TimedOut;
        }
    }

    /// Whether no requests are outstanding and no unqueried candidates
    /// remain.
    pub fn is_complete(&self) -> bool {
        self.in_flight == 0
            && !self
                .by_distance
                .values()
                .any(|c| c.state == CandidateState::Unknown)
    }

    /// All `Responded` candidates, nearest first.
    pub fn responded(&self) -> Vec<Candidate> {
        self.by_distance
            .values()
            .filter(|c| c.state == CandidateState::Responded)
            .cloned()
            .collect()
    }

    /// Every candidate currently tracked, nearest first.
    pub fn all(&self) -> Vec<Candidate> {
        self.by_distance.values().cloned().collect()
    }
}

/// State for one `FIND_NODE` iterative lookup.
pub struct FindNodeLookup {
    /// The shared candidate set.
    pub candidates: Candidates,
}

impl FindNodeLookup {
    /// Start a lookup for `target`, seeded from `seeds`.
    pub fn new(target: Id160, self_id: Id160, seeds: Vec<Node>) -> Self {
        Self {
            candidates: Candidates::new(target, self_id, seeds),
        }
    }

    /// Whether the lookup has run to completion.
    pub fn is_complete(&self) -> bool {
        self.candidates.is_complete()
    }
}

/// State for one `FIND_VALUE` iterative lookup: a `FIND_NODE` lookup that
/// completes early if a value is found.
pub struct FindValueLookup {
    /// The shared candidate set.
    pub candidates: Candidates,
    /// The value found, once a peer returns one.
    pub found: Option<Vec<u8>>,
}

impl FindValueLookup {
    /// Start a lookup for `key`, seeded from `seeds`.
    pub fn new(key: Id160, self_id: Id160, seeds: Vec<Node>) -> Self {
        Self {
            candidates: Candidates::new(key, self_id, seeds),
            found: None,
        }
    }

    /// Whether the lookup has run to completion (a value was found, or the
    /// candidate set was exhausted).
    pub fn is_complete(&self) -> bool {
        self.found.is_some() || self.candidates.is_complete()
    }
}

/// State for one `STORE_VALUE` lookup: a `FIND_NODE` lookup whose completion
/// replicates the value to the nearest responded candidates.
pub struct StoreLookup {
    /// The shared candidate set.
    pub candidates: Candidates,
    /// The value being stored.
    pub value: Vec<u8>,
}

impl StoreLookup {
    /// Start a store lookup for `key`/`value`, seeded from `seeds`.
    pub fn new(key: Id160, value: Vec<u8>, self_id: Id160, seeds: Vec<Node>) -> Self {
        Self {
            candidates: Candidates::new(key, self_id, seeds),
            value,
        }
    }

    /// Whether the lookup has run to completion.
    pub fn is_complete(&self) -> bool {
        self.candidates.is_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn node(tag: u8) -> Node {
        let mut bytes = [0u8; knode_id::BYTES];
        bytes[0] = tag;
        Node::new(
            Id160::from_bytes(bytes),
            Endpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, tag)), 4000 + tag as u16),
        )
    }

    #[test]
    fn next_batch_respects_alpha() {
        let seeds: Vec<Node> = (1..=10u8).map(node).collect();
        let mut lookup = FindNodeLookup::new(Id160::MAX, node(0).id, seeds);
        let batch = lookup.candidates.next_batch();
        assert_eq!(batch.len(), ALPHA);
        assert!(lookup.candidates.next_batch().is_empty());
    }

    #[test]
    fn responding_frees_in_flight_budget() {
        let seeds: Vec<Node> = (1..=10u8).map(node).collect();
        let mut lookup = FindNodeLookup::new(Id160::MAX, node(0).id, seeds);
        let batch = lookup.candidates.next_batch();
        lookup.candidates.mark_responded(batch[0].id);
        let next = lookup.candidates.next_batch();
        assert_eq!(next.len(), 1);
    }

    #[test]
    fn completes_when_all_candidates_resolved() {
        let seeds: Vec<Node> = (1..=3u8).map(node).collect();
        let mut lookup = FindNodeLookup::new(Id160::MAX, node(0).id, seeds);
        let batch = lookup.candidates.next_batch();
        assert_eq!(batch.len(), 3);
        for c in &batch {
            lookup.candidates.mark_responded(c.id);
        }
        assert!(lookup.is_complete());
    }

    #[test]
    fn self_id_is_never_offered_as_a_candidate() {
        let self_node = node(0);
        let mut lookup = FindNodeLookup::new(Id160::MAX, self_node.id, vec![]);
        lookup.candidates.offer(self_node.id, self_node.endpoint);
        assert!(lookup.candidates.all().is_empty());
    }

    #[test]
    fn find_value_completes_once_a_value_is_found() {
        let seeds: Vec<Node> = (1..=3u8).map(node).collect();
        let mut lookup = FindValueLookup::new(Id160::MAX, node(0).id, seeds);
        assert!(!lookup.is_complete());
        lookup.found = Some(vec![1, 2, 3]);
        assert!(lookup.is_complete());
    }
}
