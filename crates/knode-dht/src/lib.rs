//! # knode-dht
//!
//! The Kademlia DHT engine: the XOR-metric routing table with bucket
//! splitting and a replacement cache, the iterative lookup tasks
//! (`FIND_NODE` / `FIND_VALUE` / `STORE_VALUE`), bootstrap, liveness
//! (`PING`), and the engine that ties routing table + network + value store
//! together into one event loop.
//!
//! ## Key parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | `K` (bucket size) | 8 |
//! | `ALPHA` (lookup parallelism) | 3 |
//! | `DEPTH_B` | 5 |
//! | `REDUNDANT_SAVE_COUNT` | 3 |
//! | `NODE_FAILED_COMMS_BEFORE_STALE` | 2 |
//! | `NODE_INACTIVE_TIME_BEFORE_QUESTIONABLE` | 15 min |
//! | `PERIODIC_REFRESH_TIMER` | 6 s |
//! | `BUCKET_INACTIVE_TIME_BEFORE_REFRESH` | 1200 s |
//! | `REQUEST_TIMEOUT` | 2 s |
//! | `SAFE_PAYLOAD_SIZE` | 1452 B |
//! | `KEYSIZE_BITS` | 160 |

use std::time::Duration;

pub mod bootstrap;
pub mod bucket;
pub mod engine;
pub mod lookup;
pub mod node;
pub mod routing;
pub mod store;

pub use bootstrap::bootstrap_from_urls;
pub use bucket::{AddOutcome, KBucket};
pub use engine::Engine;
pub use node::Node;
pub use routing::RoutingTable;
pub use store::ValueStore;

/// Maximum number of live peers held by one k-bucket.
pub const K: usize = 8;

/// Lookup parallelism: concurrent in-flight requests per iterative task.
pub const ALPHA: usize = 3;

/// Depth below which bucket splitting is permitted outside the self-bucket,
/// enabling finer-grained routing near the local node's own id.
pub const DEPTH_B: u32 = 5;

/// Number of `Responded` candidates a `STORE_VALUE` lookup replicates to.
pub const REDUNDANT_SAVE_COUNT: usize = 3;

/// Consecutive failed requests after which a node is considered stale.
pub const NODE_FAILED_COMMS_BEFORE_STALE: u32 = 2;

/// How long a node may go unheard from before it is "questionable".
pub const NODE_INACTIVE_TIME_BEFORE_QUESTIONABLE: Duration = Duration::from_secs(15 * 60);

/// Interval between engine refresh ticks.
pub const PERIODIC_REFRESH_TIMER: Duration = Duration::from_secs(6);

/// How long a bucket may go unchanged before its refresh lookup fires.
pub const BUCKET_INACTIVE_TIME_BEFORE_REFRESH: Duration = Duration::from_secs(1200);

/// Deadline for a single dispatcher-registered request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest payload that fits in one safe UDP datagram.
pub const SAFE_PAYLOAD_SIZE: usize = knode_net::SAFE_PAYLOAD_SIZE;

/// Width, in bits, of a node/key identifier.
pub const KEYSIZE_BITS: u32 = knode_id::BITS;

/// Error kinds raised by the DHT engine.
#[derive(Debug, thiserror::Error)]
pub enum DhtError {
    /// An endpoint factory could not produce a requested-family endpoint.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A `FIND_VALUE` lookup exhausted its candidate set without finding
    /// the value.
    #[error("value not found")]
    ValueNotFound,

    /// A `STORE_VALUE` lookup found no `Responded` candidates to store to.
    #[error("initial peer failed to respond")]
    InitialPeerFailedToRespond,

    /// Bootstrap failed to discover any peers via its seed list.
    #[error("bootstrap failed: {0}")]
    BootstrapFailed(String),

    /// A bootstrap peer URL did not match `knode://<40-hex>@<ip>:<port>`.
    #[error("invalid bootstrap peer url: {0}")]
    InvalidPeerUrl(String),

    /// The underlying network layer reported a non-suppressed transport
    /// failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Convenience result type for DHT operations.
pub type Result<T> = std::result::Result<T, DhtError>;
