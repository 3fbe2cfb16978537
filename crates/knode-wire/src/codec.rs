//! Low-level little-endian primitives shared by [`crate::header`] and
//! [`crate::message`].
//!
//! All multi-byte integers are written least-significant-byte-first.
//! `Id160` is the one exception: it is written in its natural big-endian
//! byte order, since it already *is* a byte string, not an integer the
//! codec interprets.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use knode_id::{Endpoint, Id160};

use crate::error::WireError;

/// An append-only byte buffer writer.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the writer, returning the accumulated bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Append a single byte.
    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Append a `u16` in little-endian order.
    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a `u32` in little-endian order.
    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Append an `Id160` in its natural (big-endian) byte order.
    pub fn put_id(&mut self, id: &Id160) {
        self.buf.extend_from_slice(id.as_bytes());
    }

    /// Append a length-prefixed byte vector: `u32 LE length | bytes`.
    pub fn put_bytes(&mut self, data: &[u8]) {
        self.put_u32(data.len() as u32);
        self.buf.extend_from_slice(data);
    }

    /// Append a node: `id | port:u16 | address_tag:u8 | address_bytes`.
    pub fn put_node(&mut self, id: &Id160, endpoint: &Endpoint) {
        self.put_id(id);
        self.put_u16(endpoint.port());
        match endpoint.ip() {
            IpAddr::V4(v4) => {
                self.put_u8(1);
                self.buf.extend_from_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                self.put_u8(2);
                self.buf.extend_from_slice(&v6.octets());
            }
        }
    }
}

/// A cursor-based byte buffer reader.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Wrap `buf` for sequential reading from the start.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn require(&self, n: usize) -> Result<(), WireError> {
        let remaining = self.buf.len() - self.pos;
        if remaining < n {
            return Err(WireError::Truncated { needed: n - remaining });
        }
        Ok(())
    }

    /// Read a single byte.
    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        self.require(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    /// Read a little-endian `u16`.
    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        self.require(2)?;
        let v = u16::from_le_bytes(self.buf[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        Ok(v)
    }

    /// Read a little-endian `u32`.
    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        self.require(4)?;
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    /// Read a 20-byte `Id160`.
    pub fn get_id(&mut self) -> Result<Id160, WireError> {
        self.require(knode_id::BYTES)?;
        let mut bytes = [0u8; knode_id::BYTES];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + knode_id::BYTES]);
        self.pos += knode_id::BYTES;
        Ok(Id160::from_bytes(bytes))
    }

    /// Read a length-prefixed byte vector.
    pub fn get_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.get_u32()? as usize;
        self.require(len)?;
        let out = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(out)
    }

    /// Read a node: `id | port:u16 | address_tag:u8 | address_bytes`.
    pub fn get_node(&mut self) -> Result<(Id160, Endpoint), WireError> {
        let id = self.get_id()?;
        let port = self.get_u16()?;
        let tag = self.get_u8()?;
        let ip = match tag {
            1 => {
                self.require(4)?;
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
                self.pos += 4;
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            2 => {
                self.require(16)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&self.buf[self.pos..self.pos + 16]);
                self.pos += 16;
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => {
                return Err(WireError::Malformed(format!(
                    "unknown address tag {other}"
                )))
            }
        };
        Ok((id, Endpoint::new(ip, port)))
    }

    /// Return the remaining unread bytes without consuming them.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Returns whether every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }
}
