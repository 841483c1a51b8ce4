//! Minimal unsigned 256-bit arithmetic for masternode scores.
//!
//! Stored big-endian so the derived ordering is numeric ordering.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct U256([u8; 32]);

impl U256 {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Interpret a hash as a little-endian number, the way hash digests are
    /// folded into integers.
    pub fn from_le_bytes(bytes: [u8; 32]) -> Self {
        let mut be = bytes;
        be.reverse();
        Self(be)
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn to_le_bytes(&self) -> [u8; 32] {
        let mut le = self.0;
        le.reverse();
        le
    }

    /// Wrapping addition of a small value.
    pub fn wrapping_add_u32(&self, value: u32) -> Self {
        let mut out = self.0;
        let mut carry = value as u64;
        for byte in out.iter_mut().rev() {
            if carry == 0 {
                break;
            }
            let sum = *byte as u64 + (carry & 0xff);
            *byte = sum as u8;
            carry = (carry >> 8) + (sum >> 8);
        }
        Self(out)
    }

    /// `|self - other|`.
    pub fn abs_diff(&self, other: &Self) -> Self {
        let (big, small) = if self >= other { (self, other) } else { (other, self) };
        let mut out = [0u8; 32];
        let mut borrow = 0i16;
        for i in (0..32).rev() {
            let mut d = big.0[i] as i16 - small.0[i] as i16 - borrow;
            if d < 0 {
                d += 256;
                borrow = 1;
            } else {
                borrow = 0;
            }
            out[i] = d as u8;
        }
        Self(out)
    }
}

impl fmt::Debug for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U256({})", hex::encode(&self.0))
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}
