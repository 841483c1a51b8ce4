//! Proof that the node at an address controls a masternode's operational key.
//!
//! The requester sends address, nonce and anchor height. The prover fills
//! `prover_signature`; the requester then sets `verifier`, adds
//! `verifier_signature` and broadcasts the two-signature proof.

use serde::{Deserialize, Serialize};

use apollon_crypto::{blake2b_256_multi, Signer};
use apollon_types::{
    BlockHash, MessageHash, OutPoint, PrivateKey, PublicKey, ServiceAddr, Signature,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub prover: OutPoint,
    pub verifier: OutPoint,
    pub addr: ServiceAddr,
    pub nonce: u32,
    pub height: u64,
    pub prover_signature: Signature,
    pub verifier_signature: Signature,
}

impl Verification {
    pub fn request(addr: ServiceAddr, nonce: u32, height: u64) -> Self {
        Self {
            prover: OutPoint::default(),
            verifier: OutPoint::default(),
            addr,
            nonce,
            height,
            prover_signature: Signature::EMPTY,
            verifier_signature: Signature::EMPTY,
        }
    }

    pub fn hash(&self) -> MessageHash {
        MessageHash::new(blake2b_256_multi(&[
            &self.prover.to_bytes(),
            &self.verifier.to_bytes(),
            &self.addr.to_bytes(),
            &self.nonce.to_le_bytes(),
            &self.height.to_le_bytes(),
        ]))
    }

    /// Message signed by the prover: address, nonce, anchor hash.
    pub fn prover_payload(&self, block_hash: &BlockHash) -> Vec<u8> {
        let mut out = self.addr.to_bytes();
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(block_hash.as_bytes());
        out
    }

    /// Message co-signed by the verifier: the prover payload plus both outpoints.
    pub fn verifier_payload(&self, block_hash: &BlockHash) -> Vec<u8> {
        let mut out = self.prover_payload(block_hash);
        out.extend_from_slice(&self.prover.to_bytes());
        out.extend_from_slice(&self.verifier.to_bytes());
        out
    }

    pub fn sign_as_prover(&mut self, block_hash: &BlockHash, key: &PrivateKey, signer: &dyn Signer) {
        self.prover_signature = signer.sign(&self.prover_payload(block_hash), key);
    }

    pub fn sign_as_verifier(&mut self, block_hash: &BlockHash, key: &PrivateKey, signer: &dyn Signer) {
        self.verifier_signature = signer.sign(&self.verifier_payload(block_hash), key);
    }

    pub fn verify_prover(&self, block_hash: &BlockHash, key: &PublicKey, signer: &dyn Signer) -> bool {
        signer.verify(&self.prover_payload(block_hash), &self.prover_signature, key)
    }

    pub fn verify_verifier(&self, block_hash: &BlockHash, key: &PublicKey, signer: &dyn Signer) -> bool {
        signer.verify(&self.verifier_payload(block_hash), &self.verifier_signature, key)
    }

    /// Which of the three handshake legs this message is.
    pub fn phase(&self) -> VerificationPhase {
        if self.prover_signature.is_empty() {
            VerificationPhase::Request
        } else if self.verifier_signature.is_empty() {
            VerificationPhase::Reply
        } else {
            VerificationPhase::Broadcast
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationPhase {
    Request,
    Reply,
    Broadcast,
}

#[cfg(test)]
mod tests {
    use super::*;
    use apollon_crypto::{keypair_from_seed, Ed25519Signer};
    use apollon_types::TxHash;

    #[test]
    fn phases_follow_signatures() {
        let block = BlockHash::new([8; 32]);
        let prover = keypair_from_seed(&[1; 32]);
        let verifier = keypair_from_seed(&[2; 32]);
        let mut mnv = Verification::request(ServiceAddr::v4(1, 2, 3, 4, 8168), 42, 100);
        assert_eq!(mnv.phase(), VerificationPhase::Request);

        mnv.sign_as_prover(&block, &prover.private, &Ed25519Signer);
        assert_eq!(mnv.phase(), VerificationPhase::Reply);
        assert!(mnv.verify_prover(&block, &prover.public, &Ed25519Signer));

        mnv.prover = OutPoint::new(TxHash::new([1; 32]), 0);
        mnv.verifier = OutPoint::new(TxHash::new([2; 32]), 0);
        mnv.sign_as_verifier(&block, &verifier.private, &Ed25519Signer);
        assert_eq!(mnv.phase(), VerificationPhase::Broadcast);
        assert!(mnv.verify_verifier(&block, &verifier.public, &Ed25519Signer));
        assert!(!mnv.verify_verifier(&BlockHash::new([9; 32]), &verifier.public, &Ed25519Signer));
    }

    #[test]
    fn prover_signature_still_valid_after_outpoints_set() {
        let block = BlockHash::new([8; 32]);
        let prover = keypair_from_seed(&[1; 32]);
        let mut mnv = Verification::request(ServiceAddr::v4(1, 2, 3, 4, 8168), 1, 5);
        mnv.sign_as_prover(&block, &prover.private, &Ed25519Signer);
        mnv.prover = OutPoint::new(TxHash::new([1; 32]), 0);
        assert!(mnv.verify_prover(&block, &prover.public, &Ed25519Signer));
    }
}
