//! The 160-bit node/key identifier used throughout the DHT.
//!
//! `Id160` is a fixed-width big-endian byte string. Two ids are compared by
//! treating them as unsigned integers (equivalently, by lexicographic byte
//! order); the distance between two ids is their bitwise XOR.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;

/// Number of bits in an [`Id160`].
pub const BITS: u32 = 160;

/// Number of bytes in an [`Id160`].
pub const BYTES: usize = 20;

/// Errors produced while parsing or constructing an [`Id160`].
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    /// The hex string was not exactly 40 characters.
    #[error("hex id must be exactly {BYTES} bytes ({expected} hex chars), got {actual}")]
    HexLength {
        /// Expected character count (always `BYTES * 2`).
        expected: usize,
        /// Actual character count of the offending string.
        actual: usize,
    },

    /// The hex string contained a non-hex-digit character.
    #[error("invalid hex id: {0}")]
    HexInvalid(#[from] hex::FromHexError),
}

/// A 160-bit identifier: a node id or a DHT key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id160([u8; BYTES]);

impl Id160 {
    /// The all-zero id, the smallest value in the id space.
    pub const MIN: Id160 = Id160([0u8; BYTES]);

    /// The all-one id, the largest value in the id space.
    pub const MAX: Id160 = Id160([0xff; BYTES]);

    /// Build an id from its big-endian byte representation.
    pub const fn from_bytes(bytes: [u8; BYTES]) -> Self {
        Self(bytes)
    }

    /// Return the big-endian byte representation.
    pub const fn as_bytes(&self) -> &[u8; BYTES] {
        &self.0
    }

    /// Consume `self`, returning the big-endian byte representation.
    pub const fn into_bytes(self) -> [u8; BYTES] {
        self.0
    }

    /// Draw a uniformly random id.
    ///
    /// Correlation tokens and freshly-minted node identities both use this;
    /// token uniqueness depends on the underlying RNG being cryptographically
    /// uniform over the 160-bit space, which `rand::thread_rng` provides.
    pub fn random() -> Self {
        let mut bytes = [0u8; BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// The bitwise XOR distance between two ids.
    pub fn distance(&self, other: &Id160) -> Id160 {
        let mut out = [0u8; BYTES];
        for i in 0..BYTES {
            out[i] = self.0[i] ^ other.0[i];
        }
        Id160(out)
    }

    /// The number of leading zero bits (MSB first). Returns `160` for
    /// [`Id160::MIN`].
    pub fn leading_zero_bits(&self) -> u32 {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return (i as u32) * 8 + byte.leading_zeros();
            }
        }
        BITS
    }

    /// The value of the bit at `index` (0 = most significant bit).
    ///
    /// Panics if `index >= BITS`; only called internally with validated
    /// indices.
    fn bit_at(&self, index: u32) -> bool {
        let byte = self.0[(index / 8) as usize];
        let shift = 7 - (index % 8);
        (byte >> shift) & 1 == 1
    }

    /// The value of the bit at `index` (0 = most significant bit).
    ///
    /// Panics if `index >= BITS`.
    pub fn bit(&self, index: u32) -> bool {
        self.bit_at(index)
    }

    /// Returns whether `self`'s most-significant `prefix_len` bits equal
    /// `prefix`'s most-significant `prefix_len` bits.
    ///
    /// `prefix_len == 0` always matches (every id shares the empty prefix).
    pub fn shares_prefix(&self, prefix: &Id160, prefix_len: u32) -> bool {
        debug_assert!(prefix_len <= BITS);
        let full_bytes = (prefix_len / 8) as usize;
        if self.0[..full_bytes] != prefix.0[..full_bytes] {
            return false;
        }
        let remaining_bits = prefix_len % 8;
        if remaining_bits == 0 {
            return true;
        }
        let mask = 0xffu8 << (8 - remaining_bits);
        (self.0[full_bytes] & mask) == (prefix.0[full_bytes] & mask)
    }

    /// Render as a lowercase 40-character hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 40-character hex string (case-insensitive).
    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        if s.len() != BYTES * 2 {
            return Err(IdError::HexLength {
                expected: BYTES * 2,
                actual: s.len(),
            });
        }
        let mut bytes = [0u8; BYTES];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Render as a 160-character string of `'0'`/`'1'` characters, most
    /// significant bit first.
    pub fn bit_string(&self) -> String {
        let mut s = String::with_capacity(BITS as usize);
        for i in 0..BITS {
            s.push(if self.bit_at(i) { '1' } else { '0' });
        }
        s
    }
}

impl fmt::Debug for Id160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id160({})", self.to_hex())
    }
}

impl fmt::Display for Id160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Id160 {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let hex_str = "0102030405060708090a0b0c0d0e0f1011121314";
        let id = Id160::from_hex(hex_str).expect("valid hex");
        assert_eq!(id.to_hex(), hex_str);
    }

    #[test]
    fn hex_round_trip_uppercase() {
        let id = Id160::from_hex("0102030405060708090A0B0C0D0E0F1011121314").expect("valid hex");
        assert_eq!(id.to_hex(), "0102030405060708090a0b0c0d0e0f1011121314");
    }

    #[test]
    fn hex_wrong_length_errors() {
        assert!(matches!(
            Id160::from_hex("abcd"),
            Err(IdError::HexLength { .. })
        ));
    }

    #[test]
    fn hex_invalid_chars_error() {
        let bad = "zz02030405060708090a0b0c0d0e0f1011121314";
        assert!(matches!(Id160::from_hex(bad), Err(IdError::HexInvalid(_))));
    }

    #[test]
    fn distance_self_is_zero() {
        let a = Id160::random();
        assert_eq!(a.distance(&a), Id160::MIN);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = Id160::random();
        let b = Id160::random();
        assert_eq!(a.distance(&b), b.distance(&a));
    }

    #[test]
    fn distance_triangle_xor_identity() {
        let a = Id160::random();
        let b = Id160::random();
        let c = Id160::random();
        let lhs = a.distance(&b).distance(&b.distance(&c));
        assert_eq!(lhs, a.distance(&c));
    }

    #[test]
    fn xor_and_log_distance_example() {
        let mut a_bytes = [0u8; BYTES];
        a_bytes[BYTES - 1] = 0x01;
        let a = Id160::from_bytes(a_bytes);

        let mut b_bytes = [0u8; BYTES];
        b_bytes[BYTES - 1] = 0x03;
        let b = Id160::from_bytes(b_bytes);

        let dist = a.distance(&b);
        let mut expected = [0u8; BYTES];
        expected[BYTES - 1] = 0x02;
        assert_eq!(dist, Id160::from_bytes(expected));
        assert_eq!(dist.leading_zero_bits(), 158);
    }

    #[test]
    fn leading_zero_bits_all_zero_is_full_width() {
        assert_eq!(Id160::MIN.leading_zero_bits(), BITS);
    }

    #[test]
    fn leading_zero_bits_msb_set() {
        let mut bytes = [0u8; BYTES];
        bytes[0] = 0x80;
        assert_eq!(Id160::from_bytes(bytes).leading_zero_bits(), 0);
    }

    #[test]
    fn bit_reads_msb_first() {
        let mut bytes = [0u8; BYTES];
        bytes[0] = 0b1000_0001;
        let id = Id160::from_bytes(bytes);
        assert!(id.bit(0));
        assert!(!id.bit(1));
        assert!(id.bit(7));
    }

    #[test]
    fn shares_prefix_basic() {
        let mut a = [0u8; BYTES];
        a[0] = 0b1010_0000;
        let mut b = [0u8; BYTES];
        b[0] = 0b1010_1111;
        let id_a = Id160::from_bytes(a);
        let id_b = Id160::from_bytes(b);
        assert!(id_a.shares_prefix(&id_b, 4));
        assert!(!id_a.shares_prefix(&id_b, 5));
    }

    #[test]
    fn shares_prefix_zero_length_always_true() {
        let a = Id160::random();
        let b = Id160::random();
        assert!(a.shares_prefix(&b, 0));
    }

    #[test]
    fn ordering_matches_big_endian_integer() {
        let a = Id160::from_bytes([0u8; BYTES]);
        let mut bigger = [0u8; BYTES];
        bigger[0] = 1;
        let b = Id160::from_bytes(bigger);
        assert!(a < b);
    }

    #[test]
    fn bit_string_length_and_content() {
        let mut bytes = [0u8; BYTES];
        bytes[0] = 0x80;
        let id = Id160::from_bytes(bytes);
        let s = id.bit_string();
        assert_eq!(s.len(), BITS as usize);
        assert!(s.starts_with('1'));
        assert!(s[1..].chars().all(|c| c == '0'));
    }

    #[test]
    fn random_ids_are_distinct() {
        let a = Id160::random();
        let b = Id160::random();
        assert_ne!(a, b, "astronomically unlikely collision");
    }
}
