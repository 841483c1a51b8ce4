//! Collateral outpoint: the immutable identity of a masternode.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TxHash;

/// Reference to a transaction output (txid + output index).
///
/// Ordering is by txid then index, which is the tie-break order used
/// when ranking masternodes with equal scores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxHash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: TxHash, index: u32) -> Self {
        Self { txid, index }
    }

    /// Serialized form used inside hashes and signing payloads.
    pub fn to_bytes(&self) -> [u8; 36] {
        let mut out = [0u8; 36];
        out[..32].copy_from_slice(self.txid.as_bytes());
        out[32..].copy_from_slice(&self.index.to_le_bytes());
        out
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.txid, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_txid_then_index() {
        let a = OutPoint::new(TxHash::new([1; 32]), 5);
        let b = OutPoint::new(TxHash::new([1; 32]), 6);
        let c = OutPoint::new(TxHash::new([2; 32]), 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn short_string_has_dash_separator() {
        let op = OutPoint::new(TxHash::new([0; 32]), 3);
        assert!(op.to_string().ends_with("-3"));
    }
}
