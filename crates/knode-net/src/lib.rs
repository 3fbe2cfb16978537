//! # knode-net
//!
//! The network layer of a `knode` peer: a UDP [`channel::Channel`], a
//! token-keyed, deadline-ordered [`dispatcher::Dispatcher`], and the
//! [`network::Network`] glue that ties codec, dispatcher, and channel into
//! the four operations the engine needs: send a request and await a reply,
//! fire a request with no reply expected, send a response, and drain one
//! inbound datagram.
//!
//! ## Architecture
//!
//! ```text
//! Engine (knode-dht)
//!     |
//!     v
//! Network               -- send_request_with_reply / send_response / process_one
//!     |        |
//!     v        v
//! Dispatcher  Channel    -- token -> handler map        -- UDP socket, 1452B buffer
//!     |
//!     v
//! knode-wire codec
//! ```

pub mod channel;
pub mod dispatcher;
pub mod network;

pub use channel::{Channel, SAFE_PAYLOAD_SIZE};
pub use dispatcher::{DispatchError, Dispatcher};
pub use network::Network;

/// Error types for network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// A send was attempted with a payload larger than [`SAFE_PAYLOAD_SIZE`].
    #[error("payload too large: {len} bytes exceeds the {max}-byte safe limit")]
    TooLarge {
        /// The payload's actual length.
        len: usize,
        /// The safe limit it exceeded.
        max: usize,
    },

    /// `resolve` found no endpoint for the requested host/family.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The underlying socket operation failed.
    #[error("I/O error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = NetError::TooLarge { len: 2000, max: 1452 };
        assert_eq!(
            err.to_string(),
            "payload too large: 2000 bytes exceeds the 1452-byte safe limit"
        );
    }
}
