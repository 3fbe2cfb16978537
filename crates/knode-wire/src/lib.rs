//! # knode-wire
//!
//! The binary wire format spoken between `knode` peers: a fixed header
//! (sender id, message type, correlation token) followed by a type-specific
//! body. Every integer is little-endian except `Id160`, which is written in
//! its natural big-endian byte order since it is a byte string, not an
//! integer the codec interprets.
//!
//! This crate only knows how to turn [`Header`] + [`MessageBody`] pairs into
//! bytes and back; it has no notion of sockets, timers, or routing tables —
//! those live in `knode-net` and `knode-dht`.

mod codec;
mod error;
mod header;
mod message;

pub use codec::{Reader, Writer};
pub use error::WireError;
pub use header::{Header, MessageType, HEADER_LEN, PROTOCOL_VERSION};
pub use message::{MessageBody, MAX_PEERS_HINT};

/// Encode a header and body pair into a single datagram payload.
pub fn encode(header: &Header, body: &MessageBody) -> Vec<u8> {
    let mut w = Writer::new();
    header.encode(&mut w);
    body.encode(&mut w);
    w.into_bytes()
}

/// Decode a datagram payload into its header and body.
pub fn decode(bytes: &[u8]) -> Result<(Header, MessageBody), WireError> {
    let mut r = Reader::new(bytes);
    let header = Header::decode(&mut r)?;
    let body = MessageBody::decode(header.message_type, &mut r)?;
    Ok((header, body))
}
