//! Heartbeat signed by a masternode's operational key.

use serde::{Deserialize, Serialize};

use apollon_crypto::{blake2b_256_multi, Signer};
use apollon_types::constants::NEW_START_REQUIRED_SECONDS;
use apollon_types::{BlockHash, MessageHash, OutPoint, PrivateKey, PublicKey, Signature, Timestamp};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub outpoint: OutPoint,
    /// Recent block the ping is anchored to.
    pub block_hash: BlockHash,
    pub sig_time: Timestamp,
    pub signature: Signature,
}

impl Ping {
    /// Unsigned ping.
    pub fn new(outpoint: OutPoint, block_hash: BlockHash, sig_time: Timestamp) -> Self {
        Self {
            outpoint,
            block_hash,
            sig_time,
            signature: Signature::EMPTY,
        }
    }

    pub fn hash(&self) -> MessageHash {
        MessageHash::new(blake2b_256_multi(&[
            &self.outpoint.to_bytes(),
            &self.sig_time.as_secs().to_le_bytes(),
        ]))
    }

    /// Bytes covered by the operational-key signature.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(36 + 32 + 8);
        out.extend_from_slice(&self.outpoint.to_bytes());
        out.extend_from_slice(self.block_hash.as_bytes());
        out.extend_from_slice(&self.sig_time.as_secs().to_le_bytes());
        out
    }

    pub fn sign(&mut self, key: &PrivateKey, signer: &dyn Signer) {
        self.signature = signer.sign(&self.signing_payload(), key);
    }

    pub fn verify_signature(&self, key: &PublicKey, signer: &dyn Signer) -> bool {
        signer.verify(&self.signing_payload(), &self.signature, key)
    }

    /// Pings older than the new-start threshold are purged.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.sig_time.elapsed_since(now) > NEW_START_REQUIRED_SECONDS
    }
}
