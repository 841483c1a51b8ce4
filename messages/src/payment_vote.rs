//! A masternode's nomination of the payee for one block height.

use serde::{Deserialize, Serialize};

use apollon_crypto::{blake2b_256_multi, Signer};
use apollon_types::{MessageHash, OutPoint, PayeeScript, PrivateKey, PublicKey, Signature};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentVote {
    pub voter: OutPoint,
    pub height: u64,
    pub payee: PayeeScript,
    pub signature: Signature,
}

impl PaymentVote {
    pub fn new(voter: OutPoint, height: u64, payee: PayeeScript) -> Self {
        Self {
            voter,
            height,
            payee,
            signature: Signature::EMPTY,
        }
    }

    pub fn hash(&self) -> MessageHash {
        MessageHash::new(blake2b_256_multi(&[
            self.payee.as_bytes(),
            &self.height.to_le_bytes(),
            &self.voter.to_bytes(),
        ]))
    }

    pub fn signing_payload(&self) -> Vec<u8> {
        let mut out = self.voter.to_bytes().to_vec();
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(self.payee.as_bytes());
        out
    }

    pub fn sign(&mut self, operator_private: &PrivateKey, signer: &dyn Signer) {
        self.signature = signer.sign(&self.signing_payload(), operator_private);
    }

    pub fn verify_signature(&self, operator_key: &PublicKey, signer: &dyn Signer) -> bool {
        signer.verify(&self.signing_payload(), &self.signature, operator_key)
    }

    /// Votes are only relayed and tallied once their signature checked out.
    pub fn is_verified(&self) -> bool {
        !self.signature.is_empty()
    }

    pub fn mark_unverified(&mut self) {
        self.signature = Signature::EMPTY;
    }
}
