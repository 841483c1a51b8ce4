//! Payee script: the locking script a masternode reward is paid to.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::PublicKey;

const OP_PUSH32: u8 = 0x20;
const OP_CHECKSIG: u8 = 0xac;

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PayeeScript(Vec<u8>);

impl PayeeScript {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Pay-to-pubkey script for a collateral key.
    pub fn for_key(key: &PublicKey) -> Self {
        let mut bytes = Vec::with_capacity(34);
        bytes.push(OP_PUSH32);
        bytes.extend_from_slice(key.as_bytes());
        bytes.push(OP_CHECKSIG);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this script locks to `key`.
    pub fn is_locked_to(&self, key: &PublicKey) -> bool {
        *self == Self::for_key(key)
    }
}

impl fmt::Debug for PayeeScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayeeScript({})", self)
    }
}

impl fmt::Display for PayeeScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}
