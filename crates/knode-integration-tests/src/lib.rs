//! Integration test crate for the Kademlia DHT.
//!
//! This crate has no library code — it only contains integration tests
//! that exercise end-to-end flows across `knode-id`, `knode-wire`,
//! `knode-net`, and `knode-dht`, running real engines over real loopback
//! UDP sockets rather than mocking the network.
