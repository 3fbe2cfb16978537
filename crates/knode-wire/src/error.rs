//! Wire-decode error taxonomy.

/// Errors produced while decoding a header or message body.
///
/// All three variants are "drop the message" errors — none of them are
/// fatal to the engine, callers simply discard the datagram.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    /// The buffer ended before a complete value could be read.
    #[error("truncated message: needed {needed} more byte(s)")]
    Truncated {
        /// How many additional bytes would have been needed.
        needed: usize,
    },

    /// A decoded tag (message type, address family) was out of range.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The header's protocol version was not the one this node supports.
    #[error("unsupported protocol version {got}, expected {expected}")]
    ProtocolVersion {
        /// The version byte found on the wire.
        got: u8,
        /// The version this implementation supports.
        expected: u8,
    },
}
