//! Address verification handshake.
//!
//! A top ranked masternode challenges other nodes at their announced
//! address. The node answering there signs the challenge with its operator
//! key; the challenger co-signs the answer and broadcasts it so every node
//! can reward the proven identity and penalize the others at that address.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use apollon_messages::{Verification, VerificationPhase, WireMessage};
use apollon_network::{FulfilledRequests, SyncView};
use apollon_providers::Services;
use apollon_registry::{Registry, Verdict};
use apollon_types::constants::{
    MAX_POSE_BLOCKS, MAX_POSE_CONNECTIONS, MAX_POSE_RANK, MIN_MNP_SECONDS, MIN_POSE_PROTO_VERSION,
};
use apollon_types::{MessageHash, OutPoint, PeerInfo, PrivateKey, ServiceAddr};
use apollon_utils::PendingRequestTracker;

use crate::error::VerificationError;

/// Fulfilled-request marker for challenges we sent.
pub const VERIFY_REQUEST: &str = "mnv-request";
/// Fulfilled-request marker for challenges we answered.
pub const VERIFY_REPLY: &str = "mnv-reply";
/// Fulfilled-request marker for addresses we finished verifying.
pub const VERIFY_DONE: &str = "mnv-done";

/// Lifetime of the markers above and of pending challenges.
pub const VERIFY_MARKER_SECONDS: u64 = MIN_MNP_SECONDS;

const VERIFY_NONCE_LIMIT: u64 = 999_999;

/// The masternode this process runs, as far as verification needs it.
pub struct LocalMasternode<'a> {
    pub outpoint: OutPoint,
    pub addr: ServiceAddr,
    pub operator_private: &'a PrivateKey,
}

#[derive(Default)]
pub struct PoseVerifier {
    /// Challenges we sent, keyed by the address we asked.
    we_asked: PendingRequestTracker<ServiceAddr, Verification>,
    seen: HashMap<MessageHash, Verification>,
}

impl PoseVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_requests(&self) -> usize {
        self.we_asked.len()
    }

    pub fn is_pending(&self, addr: &ServiceAddr) -> bool {
        self.we_asked.contains(addr)
    }

    pub fn has_seen(&self, hash: &MessageHash) -> bool {
        self.seen.contains_key(hash)
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Challenge this node's share of the network.
    ///
    /// Only nodes in the top [`MAX_POSE_RANK`] at `tip - 1` take part. Each
    /// one starts at an offset given by its own rank and steps through the
    /// ranking [`MAX_POSE_CONNECTIONS`] at a time, so the verifiers split the
    /// list between them. Returns how many challenges went out.
    pub fn do_full_verification_step(
        &mut self,
        local: Option<&LocalMasternode<'_>>,
        registry: &mut Registry,
        fulfilled: &mut FulfilledRequests,
        svc: &Services<'_>,
        sync: &SyncView,
    ) -> Result<usize, VerificationError> {
        let local = local.ok_or(VerificationError::NotMasternode)?;
        if !sync.synced {
            return Err(VerificationError::NotSynced);
        }
        let height = svc.tip().saturating_sub(1);
        if svc.block_hash(height).is_none() {
            return Err(VerificationError::UnknownBlock(height));
        }

        let ranks = registry.ranks(height, MIN_POSE_PROTO_VERSION, svc);
        let my_rank = ranks
            .iter()
            .find(|(_, node)| node.outpoint == local.outpoint)
            .map(|(rank, _)| *rank)
            .ok_or(VerificationError::Unranked(height))?;
        if my_rank as usize > MAX_POSE_RANK {
            return Err(VerificationError::NotInTop {
                rank: my_rank,
                limit: MAX_POSE_RANK,
            });
        }

        let mut sent = 0;
        let start = MAX_POSE_RANK + my_rank as usize - 1;
        for (_, node) in ranks.iter().skip(start).step_by(MAX_POSE_CONNECTIONS) {
            if node.is_pose_verified() || node.is_pose_banned() {
                continue;
            }
            if self.send_verify_request(node.addr, fulfilled, svc) {
                sent += 1;
                if sent >= MAX_POSE_CONNECTIONS {
                    break;
                }
            }
        }
        debug!(rank = my_rank, total = ranks.len(), sent, "verification step done");
        Ok(sent)
    }

    /// Connect to `addr` and challenge whoever answers there.
    pub fn send_verify_request(
        &mut self,
        addr: ServiceAddr,
        fulfilled: &mut FulfilledRequests,
        svc: &Services<'_>,
    ) -> bool {
        let now = svc.now();
        if fulfilled.has(addr, VERIFY_REQUEST, now) {
            debug!(%addr, "already challenged this address recently");
            return false;
        }
        let Some(peer) = svc.peers.connect(addr) else {
            debug!(%addr, "can't connect to masternode for verification");
            return false;
        };
        fulfilled.add_for(addr, VERIFY_REQUEST, VERIFY_MARKER_SECONDS, now);

        let nonce = svc.random.next_below(VERIFY_NONCE_LIMIT) as u32;
        let height = svc.tip().saturating_sub(1);
        let mnv = Verification::request(addr, nonce, height);
        self.we_asked
            .register(addr, mnv.clone(), VERIFY_MARKER_SECONDS, now);
        info!(%addr, %peer, nonce, height, "sending verification request");
        svc.peers.send(peer, WireMessage::Verify(mnv));
        true
    }

    /// Route an inbound `VERIFY` by how many signatures it carries.
    #[allow(clippy::too_many_arguments)]
    pub fn process_verify(
        &mut self,
        peer: &PeerInfo,
        mnv: Verification,
        local: Option<&LocalMasternode<'_>>,
        registry: &mut Registry,
        fulfilled: &mut FulfilledRequests,
        svc: &Services<'_>,
        sync: &SyncView,
    ) -> Verdict {
        if !sync.blockchain_synced {
            return Verdict::reject();
        }
        match mnv.phase() {
            VerificationPhase::Request => self.send_verify_reply(peer, mnv, local, fulfilled, svc),
            VerificationPhase::Reply => {
                self.process_verify_reply(peer, mnv, local, registry, fulfilled, svc)
            }
            VerificationPhase::Broadcast => self.process_verify_broadcast(mnv, registry, svc),
        }
    }

    /// Answer a challenge aimed at this node's address.
    pub fn send_verify_reply(
        &mut self,
        peer: &PeerInfo,
        mut mnv: Verification,
        local: Option<&LocalMasternode<'_>>,
        fulfilled: &mut FulfilledRequests,
        svc: &Services<'_>,
    ) -> Verdict {
        // someone may be using our address to confuse the challenger
        let Some(local) = local else {
            return Verdict::reject();
        };
        let now = svc.now();
        if fulfilled.has(peer.addr, VERIFY_REPLY, now) {
            debug!(peer = %peer.id, "peer asks for verification too often");
            return Verdict::penalize(20);
        }
        let Some(block_hash) = svc.block_hash(mnv.height) else {
            debug!(height = mnv.height, "can't answer verification for unknown block");
            return Verdict::reject();
        };

        mnv.addr = local.addr;
        mnv.sign_as_prover(&block_hash, local.operator_private, svc.signer);
        debug!(peer = %peer.id, nonce = mnv.nonce, "answering verification request");
        svc.peers.send(peer.id, WireMessage::Verify(mnv));
        fulfilled.add_for(peer.addr, VERIFY_REPLY, VERIFY_MARKER_SECONDS, now);
        Verdict::accept()
    }

    /// Check the answer to one of our challenges.
    ///
    /// The registry entry at the peer's address whose operator key signed
    /// the answer is the real one; every other entry there gets a PoSe
    /// point. When we run an activated masternode the proof is co-signed
    /// and broadcast.
    pub fn process_verify_reply(
        &mut self,
        peer: &PeerInfo,
        mut mnv: Verification,
        local: Option<&LocalMasternode<'_>>,
        registry: &mut Registry,
        fulfilled: &mut FulfilledRequests,
        svc: &Services<'_>,
    ) -> Verdict {
        let now = svc.now();
        if !fulfilled.has(peer.addr, VERIFY_REQUEST, now) {
            warn!(peer = %peer.id, "verification reply we never asked for");
            return Verdict::penalize(20);
        }
        let Some(asked) = self.we_asked.peek(&peer.addr) else {
            warn!(peer = %peer.id, "verification reply without a pending request");
            return Verdict::penalize(20);
        };
        if asked.nonce != mnv.nonce {
            warn!(peer = %peer.id, expected = asked.nonce, got = mnv.nonce, "verification nonce mismatch");
            return Verdict::penalize(20);
        }
        if asked.height != mnv.height {
            warn!(peer = %peer.id, expected = asked.height, got = mnv.height, "verification height mismatch");
            return Verdict::penalize(20);
        }
        let Some(block_hash) = svc.block_hash(mnv.height) else {
            debug!(height = mnv.height, "verification anchor block unknown");
            return Verdict::reject();
        };
        if fulfilled.has(peer.addr, VERIFY_DONE, now) {
            debug!(peer = %peer.id, "address already verified");
            return Verdict::penalize(20);
        }

        mnv.addr = peer.addr;
        let mut real = None;
        let mut impostors = Vec::new();
        for node in registry.iter().filter(|n| n.addr == peer.addr) {
            if real.is_none() && mnv.verify_prover(&block_hash, &node.operator_key, svc.signer) {
                real = Some((node.outpoint, node.is_pose_verified()));
            } else {
                impostors.push(node.outpoint);
            }
        }
        let Some((prover, verified)) = real else {
            warn!(addr = %peer.addr, "no masternode at this address signed the verification");
            return Verdict::penalize(20);
        };

        if !verified {
            registry.decrease_pose_score(&prover);
        }
        fulfilled.add_for(peer.addr, VERIFY_DONE, VERIFY_MARKER_SECONDS, now);
        info!(%prover, addr = %peer.addr, "verified masternode address");

        if let Some(local) = local {
            mnv.prover = prover;
            mnv.verifier = local.outpoint;
            mnv.sign_as_verifier(&block_hash, local.operator_private, svc.signer);
            if let Some(pending) = self.we_asked.peek_mut(&peer.addr) {
                *pending = mnv.clone();
            }
            self.seen.insert(mnv.hash(), mnv.clone());
            svc.peers.relay(WireMessage::Verify(mnv));
        }

        for outpoint in &impostors {
            registry.increase_pose_score(outpoint);
            debug!(%outpoint, addr = %peer.addr, "increased PoSe score of impostor");
        }
        Verdict::accept()
    }

    /// Apply a proof another masternode broadcast.
    pub fn process_verify_broadcast(
        &mut self,
        mnv: Verification,
        registry: &mut Registry,
        svc: &Services<'_>,
    ) -> Verdict {
        let hash = mnv.hash();
        if self.seen.contains_key(&hash) {
            return Verdict::reject();
        }
        self.seen.insert(hash, mnv.clone());

        let tip = svc.tip();
        if mnv.height + MAX_POSE_BLOCKS < tip {
            debug!(height = mnv.height, tip, "outdated verification broadcast");
            return Verdict::reject();
        }
        if mnv.prover == mnv.verifier {
            warn!(outpoint = %mnv.prover, "masternode claims to have verified itself");
            return Verdict::penalize(100);
        }
        let Some(block_hash) = svc.block_hash(mnv.height) else {
            debug!(height = mnv.height, "verification anchor block unknown");
            return Verdict::reject();
        };

        match registry.rank(&mnv.verifier, mnv.height, MIN_POSE_PROTO_VERSION, true, svc) {
            Some(rank) if rank as usize <= MAX_POSE_RANK => {}
            Some(rank) => {
                debug!(verifier = %mnv.verifier, rank, "verifier not in the top ranks");
                return Verdict::reject();
            }
            None => {
                debug!(verifier = %mnv.verifier, "can't rank verifier");
                return Verdict::reject();
            }
        }

        let (Some(prover), Some(verifier)) = (registry.get(&mnv.prover), registry.get(&mnv.verifier))
        else {
            debug!(prover = %mnv.prover, verifier = %mnv.verifier, "verification for unknown masternode");
            return Verdict::reject();
        };
        if prover.addr != mnv.addr {
            debug!(prover = %mnv.prover, addr = %mnv.addr, "verified address does not match prover");
            return Verdict::reject();
        }
        // the hash leaves out both signatures, a forged copy must not
        // shadow the genuine broadcast
        if !mnv.verify_prover(&block_hash, &prover.operator_key, svc.signer) {
            warn!(prover = %mnv.prover, "bad prover signature on verification broadcast");
            self.seen.remove(&hash);
            return Verdict::reject();
        }
        if !mnv.verify_verifier(&block_hash, &verifier.operator_key, svc.signer) {
            warn!(verifier = %mnv.verifier, "bad verifier signature on verification broadcast");
            self.seen.remove(&hash);
            return Verdict::reject();
        }

        if !prover.is_pose_verified() {
            registry.decrease_pose_score(&mnv.prover);
        }
        let impostors: Vec<OutPoint> = registry
            .iter()
            .filter(|n| n.addr == mnv.addr && n.outpoint != mnv.prover)
            .map(|n| n.outpoint)
            .collect();
        for outpoint in &impostors {
            registry.increase_pose_score(outpoint);
        }
        info!(
            prover = %mnv.prover,
            addr = %mnv.addr,
            penalized = impostors.len(),
            "applied verification broadcast"
        );
        svc.peers.relay(WireMessage::Verify(mnv));
        Verdict::accept()
    }

    /// Drop challenges and broadcasts anchored more than [`MAX_POSE_BLOCKS`]
    /// behind the tip.
    pub fn check_and_remove(&mut self, svc: &Services<'_>) {
        let floor = svc.tip().saturating_sub(MAX_POSE_BLOCKS);
        let expired = self.we_asked.sweep(svc.now()).len();
        self.we_asked.retain(|_, mnv| mnv.height >= floor);
        self.seen.retain(|_, mnv| mnv.height >= floor);
        debug!(
            expired,
            pending = self.we_asked.len(),
            seen = self.seen.len(),
            "swept verification state"
        );
    }

    pub fn clear(&mut self) {
        self.we_asked.clear();
        self.seen.clear();
    }
}
