//! Ties the routing table, value store, and network together into one
//! cooperative event loop.
//!
//! State is split across two independently-borrowed `Rc<RefCell<_>>`s:
//! [`Network`] and [`DhtState`]. Response and timeout callbacks registered
//! with the dispatcher fire from deep inside `Network::tick`, while that
//! call still holds the network borrow — they touch only `DhtState`, and
//! any outbound send they trigger is deferred onto `DhtState::pending_actions`
//! rather than performed inline. The event loop drains that queue itself,
//! once per iteration, after its own network borrow has been released. A
//! `Notify` wakes the loop immediately when a caller or callback enqueues
//! work, rather than making it wait for the next datagram or timer.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use knode_id::{Endpoint, Id160};
use knode_net::Network;
use knode_wire::{Header, MessageBody};
use tokio::sync::{oneshot, Notify};
use tokio::time::MissedTickBehavior;

use crate::lookup::{Candidates, FindNodeLookup, FindValueLookup, StoreLookup};
use crate::node::Node;
use crate::routing::RoutingTable;
use crate::store::ValueStore;
use crate::{
    DhtError, Result, ALPHA, K, PERIODIC_REFRESH_TIMER, REDUNDANT_SAVE_COUNT, REQUEST_TIMEOUT,
};

type TaskId = u64;

/// One outbound action a callback deferred until the network borrow that was
/// active when it fired has been released.
enum PendingAction {
    /// Send a per-candidate lookup request, registering a dispatcher entry.
    SendRequest {
        task_id: TaskId,
        candidate_id: Id160,
        body: MessageBody,
        destination: Endpoint,
    },
    /// Echo `token` back to `destination` with no dispatcher registration.
    SendResponse {
        token: Id160,
        body: MessageBody,
        destination: Endpoint,
    },
    /// Send a request with no reply expected (`STORE_VALUE` replication).
    FireAndForget { body: MessageBody, destination: Endpoint },
    /// Ping a peer outside of any lookup, to refresh or evict it. Re-enqueued
    /// by its own `on_error` handler on every timeout that doesn't evict the
    /// peer, so the singleton ping task runs to completion unattended.
    Ping { peer_id: Id160, destination: Endpoint },
    /// Ping a peer on a caller's behalf, reporting the outcome back. Retried
    /// the same way as [`PendingAction::Ping`]; the reply only fires once
    /// the peer answers or is evicted.
    PingWithReply {
        peer_id: Id160,
        destination: Endpoint,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// One in-flight iterative task, carrying the caller's completion channel.
enum Task {
    FindNode(FindNodeLookup, Option<oneshot::Sender<Vec<Node>>>),
    FindValue(FindValueLookup, Option<oneshot::Sender<Option<Vec<u8>>>>),
    Store(StoreLookup, Option<oneshot::Sender<usize>>),
}

impl Task {
    fn candidates(&self) -> &Candidates {
        match self {
            Task::FindNode(l, _) => &l.candidates,
            Task::FindValue(l, _) => &l.candidates,
            Task::Store(l, _) => &l.candidates,
        }
    }

    fn candidates_mut(&mut self) -> &mut Candidates {
        match self {
            Task::FindNode(l, _) => &mut l.candidates,
            Task::FindValue(l, _) => &mut l.candidates,
            Task::Store(l, _) => &mut l.candidates,
        }
    }

    fn is_complete(&self) -> bool {
        match self {
            Task::FindNode(l, _) => l.is_complete(),
            Task::FindValue(l, _) => l.is_complete(),
            Task::Store(l, _) => l.is_complete(),
        }
    }
}

struct DhtState {
    routing: RoutingTable,
    store: ValueStore,
    tasks: HashMap<TaskId, Task>,
    next_task_id: TaskId,
    pending_actions: VecDeque<PendingAction>,
}

/// A cheap-to-clone handle shared by every deferred callback: the DHT state
/// plus the wakeup signal used to pull the event loop out of its current
/// `select!` as soon as there is a `PendingAction` to perform.
#[derive(Clone)]
struct Ctx {
    state: Rc<RefCell<DhtState>>,
    notify: Rc<Notify>,
}

impl Ctx {
    fn wake(&self) {
        self.notify.notify_one();
    }
}

/// The Kademlia DHT engine for one local node identity.
///
/// Cloning an `Engine` clones its `Rc` handles, not its state — every clone
/// refers to the same routing table, store, and network.
#[derive(Clone)]
pub struct Engine {
    local_id: Id160,
    network: Rc<RefCell<Network>>,
    ctx: Ctx,
}

impl Engine {
    /// Construct an engine bound to `channel`, with an empty routing table
    /// holding up to `k` live peers per bucket.
    pub fn new(local_id: Id160, channel: knode_net::Channel, k: usize) -> Self {
        let local_addr = channel.local_addr();
        let network = Network::new(local_id, channel);
        let self_node = Node::new(local_id, local_addr);
        let state = DhtState {
            routing: RoutingTable::new(self_node, k),
            store: ValueStore::new(),
            tasks: HashMap::new(),
            next_task_id: 0,
            pending_actions: VecDeque::new(),
        };
        Self {
            local_id,
            network: Rc::new(RefCell::new(network)),
            ctx: Ctx {
                state: Rc::new(RefCell::new(state)),
                notify: Rc::new(Notify::new()),
            },
        }
    }

    /// This engine's local identity.
    pub fn local_id(&self) -> Id160 {
        self.local_id
    }

    /// The endpoint this engine's socket is bound to.
    pub fn local_addr(&self) -> Endpoint {
        self.network.borrow().local_addr()
    }

    /// Seed the routing table with a peer directly, bypassing a lookup.
    ///
    /// Used by bootstrap to inject the configured seed peers before the
    /// self-lookup runs.
    pub fn seed_peer(&self, peer: Node) {
        self.ctx.state.borrow_mut().routing.add(peer);
    }

    /// A snapshot of the peers currently held in the routing table.
    pub fn known_peers(&self) -> Vec<Node> {
        self.ctx
            .state
            .borrow()
            .routing
            .buckets()
            .iter()
            .flat_map(|b| b.live.iter().cloned())
            .collect()
    }

    /// Drive this engine's network I/O, periodic refresh, and deferred
    /// action queue forever. Intended to be run as one cooperative task
    /// (e.g. via `tokio::task::LocalSet::spawn_local`) for the lifetime of
    /// the process.
    pub async fn run(&self) {
        let mut cursor: usize = 0;
        let mut refresh = tokio::time::interval(PERIODIC_REFRESH_TIMER);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let ctx = self.ctx.clone();
            let ctx_seen = self.ctx.clone();
            tokio::select! {
                result = async {
                    self.network.borrow_mut().tick(
                        move |sender, peer_id| Self::note_peer_seen(&ctx_seen, peer_id, sender),
                        move |sender, header, body| Self::handle_request(&ctx, sender, header, body),
                    ).await
                } => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "network tick failed");
                    }
                }
                _ = refresh.tick() => {
                    self.refresh_tick(&mut cursor);
                }
                _ = self.ctx.notify.notified() => {}
            }
            self.drain_pending_actions().await;
        }
    }

    /// Look up the `K` closest peers to `target`.
    pub async fn find_node(&self, target: Id160) -> Vec<Node> {
        let (tx, rx) = oneshot::channel();
        {
            let mut s = self.ctx.state.borrow_mut();
            let seeds = s.routing.find_neighbors(&target, K.max(ALPHA));
            let task_id = s.next_task_id;
            s.next_task_id += 1;
            let lookup = FindNodeLookup::new(target, self.local_id, seeds);
            s.tasks.insert(task_id, Task::FindNode(lookup, Some(tx)));
            Self::advance(&mut s, task_id, target);
        }
        self.ctx.wake();
        rx.await.unwrap_or_default()
    }

    /// Look up the value stored under `key`.
    pub async fn find_value(&self, key: Id160) -> Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut s = self.ctx.state.borrow_mut();
            if let Some(value) = s.store.get(&key) {
                return Ok(value.clone());
            }
            let seeds = s.routing.find_neighbors(&key, K.max(ALPHA));
            let task_id = s.next_task_id;
            s.next_task_id += 1;
            let lookup = FindValueLookup::new(key, self.local_id, seeds);
            s.tasks.insert(task_id, Task::FindValue(lookup, Some(tx)));
            Self::advance(&mut s, task_id, key);
        }
        self.ctx.wake();
        match rx.await {
            Ok(Some(value)) => Ok(value),
            Ok(None) | Err(_) => Err(DhtError::ValueNotFound),
        }
    }

    /// Store `value` under `key` at the nearest [`REDUNDANT_SAVE_COUNT`]
    /// peers discovered by a `FIND_NODE` lookup for `key`.
    pub async fn store_value(&self, key: Id160, value: Vec<u8>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut s = self.ctx.state.borrow_mut();
            let seeds = s.routing.find_neighbors(&key, K.max(ALPHA));
            let task_id = s.next_task_id;
            s.next_task_id += 1;
            let lookup = StoreLookup::new(key, value, self.local_id, seeds);
            s.tasks.insert(task_id, Task::Store(lookup, Some(tx)));
            Self::advance(&mut s, task_id, key);
        }
        self.ctx.wake();
        match rx.await {
            Ok(count) if count > 0 => Ok(()),
            _ => Err(DhtError::InitialPeerFailedToRespond),
        }
    }

    /// Ping `peer`, retrying on timeout until it either answers or is
    /// evicted from the routing table, and await that outcome.
    ///
    /// PING is a singleton task: a failed attempt calls `peer_timed_out`
    /// and, unless that evicts the peer, re-sends the ping rather than
    /// giving up after one round trip.
    ///
    /// Deferred onto `pending_actions` like every other outbound send: a
    /// direct network borrow held across this method's `.await` would race
    /// the `run()` loop's own borrow inside `Network::tick`.
    pub async fn ping(&self, peer: Node) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut s = self.ctx.state.borrow_mut();
            s.pending_actions.push_back(PendingAction::PingWithReply {
                peer_id: peer.id,
                destination: peer.endpoint,
                reply: tx,
            });
        }
        self.ctx.wake();
        rx.await
            .unwrap_or_else(|_| Err(DhtError::Transport("ping dropped".into())))
    }

    /// Run the bootstrap lifecycle against `seeds`: inject them into the
    /// routing table, self-lookup, then refresh every non-empty bucket.
    pub async fn bootstrap(&self, seeds: Vec<Node>) -> Result<()> {
        if seeds.is_empty() {
            return Err(DhtError::BootstrapFailed(
                "no bootstrap peers configured".to_string(),
            ));
        }
        for seed in seeds {
            self.seed_peer(seed);
        }

        self.find_node(self.local_id).await;

        let refresh_targets: Vec<Id160> = {
            let s = self.ctx.state.borrow();
            s.routing
                .buckets()
                .iter()
                .filter_map(|b| b.select_random().map(|n| n.id))
                .collect()
        };
        for target in refresh_targets {
            self.find_node(target).await;
        }
        Ok(())
    }

    fn refresh_tick(&self, cursor: &mut usize) {
        let mut s = self.ctx.state.borrow_mut();
        let bucket_count = s.routing.bucket_count();
        if bucket_count == 0 {
            return;
        }
        *cursor %= bucket_count;
        if let Some(bucket) = s.routing.buckets().get(*cursor) {
            if let Some(node) = bucket.least_recently_seen() {
                s.pending_actions.push_back(PendingAction::Ping {
                    peer_id: node.id,
                    destination: node.endpoint,
                });
            }
        }
        *cursor = (*cursor + 1) % bucket_count;

        let stale_targets: Vec<Id160> = s
            .routing
            .buckets()
            .iter()
            .filter(|b| b.time_since_last_updated() > crate::BUCKET_INACTIVE_TIME_BEFORE_REFRESH)
            .filter_map(|b| b.select_random().map(|n| n.id))
            .collect();
        drop(s);
        for target in stale_targets {
            let ctx = self.ctx.clone();
            let mut s = ctx.state.borrow_mut();
            let seeds = s.routing.find_neighbors(&target, K.max(ALPHA));
            let task_id = s.next_task_id;
            s.next_task_id += 1;
            let lookup = FindNodeLookup::new(target, self.local_id, seeds);
            s.tasks.insert(task_id, Task::FindNode(lookup, None));
            Self::advance(&mut s, task_id, target);
        }
        self.ctx.wake();
    }

    async fn drain_pending_actions(&self) {
        loop {
            let action = self.ctx.state.borrow_mut().pending_actions.pop_front();
            let Some(action) = action else { break };
            self.perform_action(action).await;
        }
    }

    async fn perform_action(&self, action: PendingAction) {
        match action {
            PendingAction::SendResponse { token, body, destination } => {
                if let Err(e) = self
                    .network
                    .borrow_mut()
                    .send_response(token, body, destination)
                    .await
                {
                    tracing::warn!(error = %e, %destination, "failed to send response");
                }
            }
            PendingAction::FireAndForget { body, destination } => {
                self.network
                    .borrow_mut()
                    .send_request_no_reply(body, destination)
                    .await;
            }
            PendingAction::Ping { peer_id, destination } => {
                let ctx = self.ctx.clone();
                self.network
                    .borrow_mut()
                    .send_request_with_reply(
                        MessageBody::PingReq,
                        destination,
                        REQUEST_TIMEOUT,
                        |_body| {},
                        move |_err| {
                            let evicted = ctx.state.borrow_mut().routing.peer_timed_out(&peer_id);
                            if !evicted {
                                ctx.state.borrow_mut().pending_actions.push_back(PendingAction::Ping {
                                    peer_id,
                                    destination,
                                });
                            }
                            ctx.wake();
                        },
                    )
                    .await;
            }
            PendingAction::PingWithReply { peer_id, destination, reply } => {
                let reply = Rc::new(RefCell::new(Some(reply)));
                let reply_err = reply.clone();
                let ctx = self.ctx.clone();
                self.network
                    .borrow_mut()
                    .send_request_with_reply(
                        MessageBody::PingReq,
                        destination,
                        REQUEST_TIMEOUT,
                        move |_body| {
                            if let Some(reply) = reply.borrow_mut().take() {
                                let _ = reply.send(Ok(()));
                            }
                        },
                        move |_err| {
                            let evicted = ctx.state.borrow_mut().routing.peer_timed_out(&peer_id);
                            if evicted {
                                if let Some(reply) = reply_err.borrow_mut().take() {
                                    let _ = reply.send(Err(DhtError::Transport("ping timed out".into())));
                                }
                            } else if let Some(reply) = reply_err.borrow_mut().take() {
                                ctx.state.borrow_mut().pending_actions.push_back(PendingAction::PingWithReply {
                                    peer_id,
                                    destination,
                                    reply,
                                });
                            }
                            ctx.wake();
                        },
                    )
                    .await;
            }
            PendingAction::SendRequest {
                task_id,
                candidate_id,
                body,
                destination,
            } => {
                let ctx_ok = self.ctx.clone();
                let ctx_err = self.ctx.clone();
                self.network
                    .borrow_mut()
                    .send_request_with_reply(
                        body,
                        destination,
                        REQUEST_TIMEOUT,
                        move |response| {
                            Self::on_task_response(&ctx_ok, task_id, candidate_id, response);
                        },
                        move |_err| {
                            Self::on_task_timeout(&ctx_err, task_id, candidate_id);
                        },
                    )
                    .await;
            }
        }
    }

    fn note_peer_seen(ctx: &Ctx, peer_id: Id160, sender: Endpoint) {
        let mut s = ctx.state.borrow_mut();
        let added = s.routing.add(Node::new(peer_id, sender));
        if !added {
            let ping_target = s
                .routing
                .buckets()
                .get(s.routing.bucket_index_for(&peer_id))
                .and_then(|b| b.least_recently_seen())
                .filter(|n| n.is_questionable())
                .map(|n| (n.id, n.endpoint));
            if let Some((lru_id, destination)) = ping_target {
                s.pending_actions
                    .push_back(PendingAction::Ping { peer_id: lru_id, destination });
            }
        }
        drop(s);
        ctx.wake();
    }

    fn handle_request(ctx: &Ctx, sender: Endpoint, header: Header, body: MessageBody) {
        let mut s = ctx.state.borrow_mut();
        match body {
            MessageBody::PingReq => {
                s.pending_actions.push_back(PendingAction::SendResponse {
                    token: header.token,
                    body: MessageBody::PingResp,
                    destination: sender,
                });
            }
            MessageBody::StoreReq { key, value } => {
                s.store.put(key, value);
            }
            MessageBody::FindNodeReq { target } => {
                let peers = s
                    .routing
                    .find_neighbors(&target, K)
                    .into_iter()
                    .map(|n| (n.id, n.endpoint))
                    .collect();
                s.pending_actions.push_back(PendingAction::SendResponse {
                    token: header.token,
                    body: MessageBody::FindNodeResp { peers },
                    destination: sender,
                });
            }
            MessageBody::FindValueReq { key } => {
                let body = match s.store.get(&key) {
                    Some(value) => MessageBody::FindValueResp { value: value.clone() },
                    None => {
                        let peers = s
                            .routing
                            .find_neighbors(&key, K)
                            .into_iter()
                            .map(|n| (n.id, n.endpoint))
                            .collect();
                        MessageBody::FindNodeResp { peers }
                    }
                };
                s.pending_actions.push_back(PendingAction::SendResponse {
                    token: header.token,
                    body,
                    destination: sender,
                });
            }
            MessageBody::PingResp | MessageBody::FindNodeResp | MessageBody::FindValueResp => {
                // Response bodies are routed to the dispatcher by
                // `Network::tick` itself and never reach this handler.
            }
        }
        drop(s);
        ctx.wake();
    }

    fn on_task_response(ctx: &Ctx, task_id: TaskId, candidate_id: Id160, body: MessageBody) {
        let mut s = ctx.state.borrow_mut();
        let target = match s.tasks.get(&task_id) {
            Some(task) => task.candidates().target(),
            None => return,
        };
        if let Some(task) = s.tasks.get_mut(&task_id) {
            match (task, body) {
                (Task::FindValue(lookup, _), MessageBody::FindValueResp { value }) => {
                    lookup.candidates.mark_responded(candidate_id);
                    lookup.found = Some(value);
                }
                (task, MessageBody::FindNodeResp { peers }) => {
                    let candidates = task.candidates_mut();
                    candidates.mark_responded(candidate_id);
                    for (id, endpoint) in peers {
                        candidates.offer(id, endpoint);
                    }
                }
                (task, _) => {
                    // An unexpected body shape for this task kind; still
                    // resolve the candidate so the lookup converges.
                    task.candidates_mut().mark_responded(candidate_id);
                }
            }
        }
        Self::advance(&mut s, task_id, target);
        drop(s);
        ctx.wake();
    }

    fn on_task_timeout(ctx: &Ctx, task_id: TaskId, candidate_id: Id160) {
        let mut s = ctx.state.borrow_mut();
        s.routing.peer_timed_out(&candidate_id);
        let target = match s.tasks.get(&task_id) {
            Some(task) => task.candidates().target(),
            None => return,
        };
        if let Some(task) = s.tasks.get_mut(&task_id) {
            task.candidates_mut().mark_timed_out(candidate_id);
        }
        Self::advance(&mut s, task_id, target);
        drop(s);
        ctx.wake();
    }

    /// Push the next batch of per-candidate requests for `task_id`, or
    /// finalize it if it has run to completion.
    fn advance(s: &mut DhtState, task_id: TaskId, target: Id160) {
        let Some(task) = s.tasks.get_mut(&task_id) else { return };
        if task.is_complete() {
            Self::finalize(s, task_id);
            return;
        }
        let is_find_value = matches!(task, Task::FindValue(..));
        let batch = task.candidates_mut().next_batch();
        for candidate in batch {
            let body = if is_find_value {
                MessageBody::FindValueReq { key: target }
            } else {
                MessageBody::FindNodeReq { target }
            };
            s.pending_actions.push_back(PendingAction::SendRequest {
                task_id,
                candidate_id: candidate.id,
                body,
                destination: candidate.endpoint,
            });
        }
    }

    fn finalize(s: &mut DhtState, task_id: TaskId) {
        let Some(task) = s.tasks.remove(&task_id) else { return };
        match task {
            Task::FindNode(lookup, reply) => {
                let peers: Vec<Node> = lookup
                    .candidates
                    .responded()
                    .into_iter()
                    .map(|c| Node::new(c.id, c.endpoint))
                    .collect();
                if let Some(reply) = reply {
                    let _ = reply.send(peers);
                }
            }
            Task::FindValue(lookup, reply) => {
                if let Some(reply) = reply {
                    let _ = reply.send(lookup.found);
                }
            }
            Task::Store(lookup, reply) => {
                let key = lookup.candidates.target();
                let mut targets = lookup.candidates.responded();
                targets.truncate(REDUNDANT_SAVE_COUNT);
                let stored_count = targets.len();
                for c in &targets {
                    s.pending_actions.push_back(PendingAction::FireAndForget {
                        body: MessageBody::StoreReq {
                            key,
                            value: lookup.value.clone(),
                        },
                        destination: c.endpoint,
                    });
                }
                if let Some(reply) = reply {
                    let _ = reply.send(stored_count);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knode_net::Channel;
    use std::time::Duration;
    use tokio::task::LocalSet;

    async fn engine() -> Engine {
        let channel = Channel::ipv4("127.0.0.1", 0).await.expect("bind");
        Engine::new(Id160::random(), channel, crate::K)
    }

    #[tokio::test]
    async fn ping_round_trip_between_two_engines() {
        LocalSet::new()
            .run_until(async {
                let a = engine().await;
                let b = engine().await;
                let b_addr = b.local_addr();
                let b_id = b.local_id();

                let a_loop = a.clone();
                let b_loop = b.clone();
                tokio::task::spawn_local(async move { a_loop.run().await });
                tokio::task::spawn_local(async move { b_loop.run().await });

                let result = a.ping(Node::new(b_id, b_addr)).await;
                assert!(result.is_ok());
            })
            .await;
    }

    #[tokio::test]
    async fn find_node_discovers_a_seeded_peer() {
        LocalSet::new()
            .run_until(async {
                let a = engine().await;
                let b = engine().await;
                let b_addr = b.local_addr();
                let b_id = b.local_id();

                let a_loop = a.clone();
                let b_loop = b.clone();
                tokio::task::spawn_local(async move { a_loop.run().await });
                tokio::task::spawn_local(async move { b_loop.run().await });

                a.seed_peer(Node::new(b_id, b_addr));
                let found = tokio::time::timeout(Duration::from_secs(2), a.find_node(b_id))
                    .await
                    .expect("lookup did not hang");
                assert!(found.iter().any(|n| n.id == b_id));
            })
            .await;
    }

    #[tokio::test]
    async fn store_then_find_value_round_trips_through_a_third_node() {
        LocalSet::new()
            .run_until(async {
                let a = engine().await;
                let b = engine().await;
                let key = Id160::random();
                let value = b"hello kademlia".to_vec();

                let a_loop = a.clone();
                let b_loop = b.clone();
                tokio::task::spawn_local(async move { a_loop.run().await });
                tokio::task::spawn_local(async move { b_loop.run().await });

                a.seed_peer(Node::new(b.local_id(), b.local_addr()));
                b.seed_peer(Node::new(a.local_id(), a.local_addr()));

                tokio::time::timeout(Duration::from_secs(2), a.store_value(key, value.clone()))
                    .await
                    .expect("store did not hang")
                    .expect("store found at least one responsive peer");

                // The StoreReq replication is fire-and-forget from a's run
                // loop; give it one scheduler turn to land on b.
                tokio::time::sleep(Duration::from_millis(50)).await;

                assert_eq!(b.ctx.state.borrow().store.get(&key), Some(&value));
            })
            .await;
    }

    #[tokio::test]
    async fn bootstrap_rejects_an_empty_seed_list() {
        let a = engine().await;
        let err = a.bootstrap(vec![]).await.unwrap_err();
        assert!(matches!(err, DhtError::BootstrapFailed(_)));
    }
}
