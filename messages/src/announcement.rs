//! Signed advertisement of a masternode's address and keys.

use serde::{Deserialize, Serialize};

use apollon_crypto::{blake2b_256_multi, key_id, Signer};
use apollon_types::{
    MessageHash, OutPoint, PayeeScript, PrivateKey, PublicKey, ServiceAddr, Signature, Timestamp,
};

use crate::Ping;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub outpoint: OutPoint,
    pub addr: ServiceAddr,
    /// Key that controls the collateral output.
    pub collateral_key: PublicKey,
    /// Hot key that signs pings and votes.
    pub operator_key: PublicKey,
    pub signature: Signature,
    pub sig_time: Timestamp,
    pub protocol_version: u32,
    pub last_ping: Option<Ping>,
    /// Set locally when replaying a quorum-confirmed announcement. Never sent.
    #[serde(skip)]
    pub recovery: bool,
}

impl Announcement {
    pub fn hash(&self) -> MessageHash {
        MessageHash::new(blake2b_256_multi(&[
            &self.outpoint.to_bytes(),
            self.collateral_key.as_bytes(),
            &self.sig_time.as_secs().to_le_bytes(),
        ]))
    }

    /// Bytes covered by the collateral-key signature.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut out = self.addr.to_bytes();
        out.extend_from_slice(&self.sig_time.as_secs().to_le_bytes());
        out.extend_from_slice(&key_id(&self.collateral_key));
        out.extend_from_slice(&key_id(&self.operator_key));
        out.extend_from_slice(&self.protocol_version.to_le_bytes());
        out
    }

    pub fn sign(&mut self, collateral_private: &PrivateKey, signer: &dyn Signer) {
        self.signature = signer.sign(&self.signing_payload(), collateral_private);
    }

    pub fn verify_signature(&self, signer: &dyn Signer) -> bool {
        signer.verify(&self.signing_payload(), &self.signature, &self.collateral_key)
    }

    pub fn payee(&self) -> PayeeScript {
        PayeeScript::for_key(&self.collateral_key)
    }
}
