//! Fixed 41-byte message header.
//!
//! ```text
//! byte 0:      (version << 4) | message_type
//! bytes 1..21: sender id (Id160, big-endian)
//! bytes 21..41: correlation token (Id160, big-endian)
//! ```

use knode_id::Id160;

use crate::codec::{Reader, Writer};
use crate::error::WireError;

/// The only protocol version this implementation speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size in bytes of an encoded [`Header`].
pub const HEADER_LEN: usize = 1 + knode_id::BYTES * 2;

/// Message type discriminant, carried in the low nibble of the header's
/// first byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// `PING` request (header only).
    PingReq = 0,
    /// `PING` response (header only).
    PingResp = 1,
    /// `STORE` request: `{ key, value }`.
    StoreReq = 2,
    /// `FIND_NODE` request: `{ target }`.
    FindNodeReq = 3,
    /// `FIND_NODE` response: `{ peers }`.
    FindNodeResp = 4,
    /// `FIND_VALUE` request: `{ key }`.
    FindValueReq = 5,
    /// `FIND_VALUE` response: `{ value }`.
    FindValueResp = 6,
}

impl MessageType {
    fn from_nibble(n: u8) -> Result<Self, WireError> {
        match n {
            0 => Ok(Self::PingReq),
            1 => Ok(Self::PingResp),
            2 => Ok(Self::StoreReq),
            3 => Ok(Self::FindNodeReq),
            4 => Ok(Self::FindNodeResp),
            5 => Ok(Self::FindValueReq),
            6 => Ok(Self::FindValueResp),
            other => Err(WireError::Malformed(format!(
                "unknown message type {other}"
            ))),
        }
    }
}

/// The fixed header every message carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    /// The message type.
    pub message_type: MessageType,
    /// The id of the node that sent this message.
    pub sender: Id160,
    /// The correlation token pairing a request with its response.
    pub token: Id160,
}

impl Header {
    /// Build a new header for an outbound message.
    pub fn new(message_type: MessageType, sender: Id160, token: Id160) -> Self {
        Self {
            message_type,
            sender,
            token,
        }
    }

    /// Encode this header to its fixed 41-byte wire form.
    pub fn encode(&self, w: &mut Writer) {
        w.put_u8((PROTOCOL_VERSION << 4) | (self.message_type as u8));
        w.put_id(&self.sender);
        w.put_id(&self.token);
    }

    /// Decode a header from the front of `r`.
    ///
    /// Returns [`WireError::ProtocolVersion`] if the version nibble does not
    /// match [`PROTOCOL_VERSION`], and [`WireError::Malformed`] if the type
    /// nibble is out of range.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let tag = r.get_u8()?;
        let version = tag >> 4;
        if version != PROTOCOL_VERSION {
            return Err(WireError::ProtocolVersion {
                got: version,
                expected: PROTOCOL_VERSION,
            });
        }
        let message_type = MessageType::from_nibble(tag & 0x0f)?;
        let sender = r.get_id()?;
        let token = r.get_id()?;
        Ok(Self {
            message_type,
            sender,
            token,
        })
    }
}
