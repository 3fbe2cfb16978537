//! End-to-end scenarios spanning `knode-id`, `knode-net`, and `knode-dht`:
//! real engines talking over real loopback UDP sockets, not mocked wiring.

use std::time::Duration;

use knode_dht::{Engine, Node, RoutingTable};
use knode_id::{Endpoint, Id160};
use knode_net::Channel;
use tokio::task::LocalSet;

async fn engine() -> Engine {
    let channel = Channel::ipv4("127.0.0.1", 0).await.expect("bind");
    Engine::new(Id160::random(), channel, knode_dht::K)
}

fn node_with_tag(tag: u8) -> Node {
    let mut bytes = [0u8; knode_id::BYTES];
    bytes[0] = tag;
    Node::new(
        Id160::from_bytes(bytes),
        Endpoint::new(
            std::net::IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, tag)),
            4000 + tag as u16,
        ),
    )
}

/// Scenario 5: three nodes A, B, C form a connected graph; C stores a value
/// via A; B discovers it through a `FIND_VALUE` lookup that resolves in a
/// single round because A holds it directly.
#[tokio::test]
async fn find_value_succeeds_through_a_three_node_network() {
    LocalSet::new()
        .run_until(async {
            let a = engine().await;
            let b = engine().await;
            let c = engine().await;

            let a_loop = a.clone();
            let b_loop = b.clone();
            let c_loop = c.clone();
            tokio::task::spawn_local(async move { a_loop.run().await });
            tokio::task::spawn_local(async move { b_loop.run().await });
            tokio::task::spawn_local(async move { c_loop.run().await });

            let a_node = Node::new(a.local_id(), a.local_addr());
            b.seed_peer(a_node.clone());
            c.seed_peer(a_node);

            let key = Id160::random();
            let value = vec![0x01, 0x02];

            tokio::time::timeout(Duration::from_secs(2), c.store_value(key, value.clone()))
                .await
                .expect("store did not hang")
                .expect("C's store should reach at least A");

            let found = tokio::time::timeout(Duration::from_secs(2), b.find_value(key))
                .await
                .expect("find_value did not hang")
                .expect("B should find the value A is holding");
            assert_eq!(found, value);
        })
        .await;
}

/// Scenario 6, driven through the real ping path rather than calling
/// `peer_timed_out` directly: a peer that never answers is evicted from the
/// routing table after its second consecutive ping failure. PING is a
/// singleton task, so a single `ping` call retries internally until the
/// peer is evicted rather than giving up after one round trip.
#[tokio::test(start_paused = true)]
async fn ping_timeout_evicts_an_unreachable_peer_after_two_failures() {
    LocalSet::new()
        .run_until(async {
            let a = engine().await;
            let a_loop = a.clone();
            tokio::task::spawn_local(async move { a_loop.run().await });

            // An address nothing is listening on; every ping to it times out.
            let dead_channel = Channel::ipv4("127.0.0.1", 0).await.expect("bind dead channel");
            let dead_addr = dead_channel.local_addr();
            drop(dead_channel);
            let peer = Node::new(Id160::random(), dead_addr);

            a.seed_peer(peer.clone());
            assert!(a.known_peers().iter().any(|n| n.id == peer.id));

            assert!(a.ping(peer.clone()).await.is_err());
            assert!(
                !a.known_peers().iter().any(|n| n.id == peer.id),
                "ping retries internally after the first timeout and only reports back once the \
                 second consecutive failure evicts the peer"
            );
        })
        .await;
}

/// Scenario 3/4 parameters exactly: with `K=3` and 20 peers inserted, the
/// first bucket never splits more than once, while the table as a whole
/// grows past its initial single bucket.
#[tokio::test]
async fn routing_table_fills_then_refuses_a_second_split_of_bucket_zero() {
    let self_id = Id160::from_bytes([0xff; knode_id::BYTES]);
    let mut table = RoutingTable::new(Node::new(self_id, any_endpoint()), 3);

    for tag in 0..20u8 {
        table.add(node_with_tag(tag));
    }

    assert!(table.bucket_count() > 1, "20 peers at K=3 must force a split");

    // Bucket 0 (farthest from `self_id`) must never itself have re-split:
    // once a sibling split carries the table past one bucket, bucket 0 is
    // no longer the last bucket and `split_allowed` permanently excludes it.
    let far_id = {
        let mut bytes = [0u8; knode_id::BYTES];
        bytes[0] = 0x00;
        Id160::from_bytes(bytes)
    };
    let bucket0_prefix_size = {
        let idx = table.bucket_index_for(&far_id);
        table.buckets()[idx].prefix_size
    };
    assert!(bucket0_prefix_size <= 1, "bucket 0 split at most once");
}

fn any_endpoint() -> Endpoint {
    Endpoint::new(std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)), 0)
}

/// Bootstrap end to end: a fresh node joins via one seed, runs a self-lookup
/// and per-bucket refreshes, and ends up aware of the seed's other peers.
#[tokio::test]
async fn bootstrap_discovers_peers_beyond_the_seed() {
    LocalSet::new()
        .run_until(async {
            let seed = engine().await;
            let far = engine().await;
            let joining = engine().await;

            let seed_loop = seed.clone();
            let far_loop = far.clone();
            let joining_loop = joining.clone();
            tokio::task::spawn_local(async move { seed_loop.run().await });
            tokio::task::spawn_local(async move { far_loop.run().await });
            tokio::task::spawn_local(async move { joining_loop.run().await });

            seed.seed_peer(Node::new(far.local_id(), far.local_addr()));

            let seed_node = Node::new(seed.local_id(), seed.local_addr());
            tokio::time::timeout(Duration::from_secs(3), joining.bootstrap(vec![seed_node]))
                .await
                .expect("bootstrap did not hang")
                .expect("bootstrap with a non-empty seed list succeeds");

            let known_ids: Vec<Id160> = joining.known_peers().iter().map(|n| n.id).collect();
            assert!(known_ids.contains(&seed.local_id()));
            assert!(known_ids.contains(&far.local_id()));
        })
        .await;
}
