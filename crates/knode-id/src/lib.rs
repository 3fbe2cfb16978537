//! # knode-id
//!
//! Fundamental value types shared by every layer of the `knode` DHT:
//!
//! - [`Id160`] — the 160-bit node/key identifier and its XOR metric.
//! - [`Endpoint`] — an IP address + UDP port pair.
//!
//! These are kept in their own crate, below the wire, transport, and
//! protocol layers that consume them, so `knode-wire`, `knode-net`, and
//! `knode-dht` can all depend on this crate without depending on each other.

mod endpoint;
mod id160;

pub use endpoint::Endpoint;
pub use id160::{IdError, Id160, BITS, BYTES};
