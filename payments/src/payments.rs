//! Payment vote store, vote validation and per-block tallies.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use apollon_messages::{PaymentVote, SyncItem, WireMessage};
use apollon_network::{FulfilledRequests, SyncView};
use apollon_providers::Services;
use apollon_registry::{MasternodeIdentity, PayeeVotes, Registry, Verdict};
use apollon_types::constants::{
    MIN_BLOCKS_TO_STORE, MNPAYMENTS_LOW_DATA_VOTES, MNPAYMENTS_SIGNATURES_REQUIRED,
    MNPAYMENTS_SIGNATURES_TOTAL, PAYMENT_SCORE_LAG, PAYMENT_VOTE_MAX_FUTURE, SCHEDULED_WINDOW,
};
use apollon_types::{
    Amount, MessageHash, NetworkId, OutPoint, PayeeScript, PeerInfo, PrivateKey, Timestamp,
};

use crate::error::PaymentError;
use crate::selection::next_in_queue;
use crate::tally::BlockPayeeTally;

/// Fulfilled-request marker for vote sync requests.
pub const VOTE_SYNC_REQUEST: &str = "mnget";

/// Identity this node votes with.
#[derive(Clone, Copy)]
pub struct LocalVoter<'a> {
    pub outpoint: OutPoint,
    pub operator_private: &'a PrivateKey,
}

#[derive(Default, Serialize, Deserialize)]
pub struct MasternodePayments {
    votes: HashMap<MessageHash, PaymentVote>,
    tallies: BTreeMap<u64, BlockPayeeTally>,
    /// Every (voter, height) slot a verified vote has taken.
    voted: BTreeSet<(OutPoint, u64)>,
    #[serde(skip)]
    last_vote_activity: Option<Timestamp>,
}

impl MasternodePayments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks of votes to keep: a bit more than one full round.
    pub fn storage_limit(registry_size: usize) -> u64 {
        (registry_size as u64 * 5 / 4).max(MIN_BLOCKS_TO_STORE)
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    pub fn block_count(&self) -> usize {
        self.tallies.len()
    }

    pub fn tally(&self, height: u64) -> Option<&BlockPayeeTally> {
        self.tallies.get(&height)
    }

    pub fn last_vote_activity(&self) -> Option<Timestamp> {
        self.last_vote_activity
    }

    pub fn has_verified_vote(&self, hash: &MessageHash) -> bool {
        self.votes.get(hash).is_some_and(PaymentVote::is_verified)
    }

    /// Take `voter`'s slot at `height`. False if it is already taken.
    pub fn can_vote(&mut self, voter: OutPoint, height: u64) -> bool {
        self.voted.insert((voter, height))
    }

    pub fn best_payee(&self, height: u64) -> Option<PayeeScript> {
        self.tallies.get(&height)?.best_payee().cloned()
    }

    /// Store a vote and count it. Needs the block the voter was ranked at.
    pub fn add_vote(&mut self, vote: PaymentVote, svc: &Services<'_>) -> bool {
        let scored_at = vote.height.checked_sub(PAYMENT_SCORE_LAG);
        if scored_at.and_then(|h| svc.block_hash(h)).is_none() {
            return false;
        }
        let hash = vote.hash();
        if self.has_verified_vote(&hash) {
            return false;
        }
        self.tallies
            .entry(vote.height)
            .or_insert_with(|| BlockPayeeTally::new(vote.height))
            .add_vote(&vote);
        self.votes.insert(hash, vote);
        true
    }

    /// Whether `node` already is the best payee of another block in the
    /// window starting at the tip.
    pub fn is_scheduled(&self, node: &MasternodeIdentity, not_height: u64, tip: u64) -> bool {
        let payee = node.payee();
        (tip..=tip + SCHEDULED_WINDOW)
            .filter(|h| *h != not_height)
            .any(|h| {
                self.tallies
                    .get(&h)
                    .and_then(BlockPayeeTally::best_payee)
                    .is_some_and(|best| *best == payee)
            })
    }

    /// Winner for `height` per the payment queue, skipping scheduled nodes.
    pub fn next_in_queue(
        &self,
        registry: &Registry,
        height: u64,
        filter_recency: bool,
        svc: &Services<'_>,
    ) -> (Option<MasternodeIdentity>, usize) {
        let tip = svc.tip();
        next_in_queue(registry, height, filter_recency, svc, &|node| {
            self.is_scheduled(node, height, tip)
        })
    }

    /// Heights above this one are past the point where votes are checked
    /// strictly.
    fn validation_height(svc: &Services<'_>) -> u64 {
        svc.tip().max(svc.params.payments_validation_height)
    }

    /// Voter checks: known, recent enough protocol, ranked in the top.
    fn validate_vote(
        &self,
        peer: &PeerInfo,
        vote: &PaymentVote,
        registry: &mut Registry,
        is_masternode: bool,
        svc: &Services<'_>,
        sync: &SyncView,
    ) -> Verdict {
        let Some(voter_proto) = registry.get(&vote.voter).map(|n| n.protocol_version) else {
            debug!(voter = %vote.voter, "vote from unknown masternode");
            if sync.list_synced {
                registry.ask_for_mn(peer, vote.voter, svc);
            }
            return Verdict::reject();
        };

        let tip = svc.tip();
        let min_proto = if vote.height >= tip {
            svc.params.min_payments_proto()
        } else {
            svc.params.min_payments_proto_v1
        };
        if voter_proto < min_proto {
            debug!(voter = %vote.voter, proto = voter_proto, min_proto, "voter protocol too old");
            return Verdict::reject();
        }
        // only masternodes need the right winners of past blocks
        if !is_masternode && vote.height < tip {
            return Verdict::accept();
        }

        let Some(rank) = vote
            .height
            .checked_sub(PAYMENT_SCORE_LAG)
            .and_then(|h| registry.rank(&vote.voter, h, min_proto, false, svc))
        else {
            debug!(voter = %vote.voter, height = vote.height, "cannot rank voter");
            return Verdict::reject();
        };
        if rank as usize > MNPAYMENTS_SIGNATURES_TOTAL {
            if rank as usize > MNPAYMENTS_SIGNATURES_TOTAL * 2
                && vote.height > Self::validation_height(svc)
            {
                warn!(voter = %vote.voter, rank, "vote from masternode far outside the top");
                return Verdict::penalize(20);
            }
            debug!(voter = %vote.voter, rank, "voter not in the top");
            return Verdict::reject();
        }
        Verdict::accept()
    }

    /// Inbound vote from `peer`.
    pub fn process_vote(
        &mut self,
        peer: &PeerInfo,
        vote: PaymentVote,
        registry: &mut Registry,
        is_masternode: bool,
        svc: &Services<'_>,
        sync: &SyncView,
    ) -> Verdict {
        if peer.protocol_version < svc.params.min_payments_proto() {
            return Verdict::reject();
        }
        let hash = vote.hash();
        if self.votes.contains_key(&hash) {
            debug!(%hash, height = vote.height, "vote already seen");
            return Verdict::reject();
        }
        // remember it unverified so a replay is not processed twice
        let mut seen = vote.clone();
        seen.mark_unverified();
        self.votes.insert(hash, seen);

        let tip = svc.tip();
        let first = tip.saturating_sub(Self::storage_limit(registry.len()));
        if vote.height < first || vote.height > tip + PAYMENT_VOTE_MAX_FUTURE {
            debug!(height = vote.height, first, last = tip + PAYMENT_VOTE_MAX_FUTURE, "vote out of range");
            return Verdict::reject();
        }

        let verdict = self.validate_vote(peer, &vote, registry, is_masternode, svc, sync);
        if !verdict.accepted {
            return verdict;
        }
        let Some(operator_key) = registry.get(&vote.voter).map(|n| n.operator_key) else {
            registry.ask_for_mn(peer, vote.voter, svc);
            return Verdict::reject();
        };
        if !vote.verify_signature(&operator_key, svc.signer) {
            // the hash leaves out the signature, keep the genuine vote welcome
            self.votes.remove(&hash);
            // our entry or theirs may be outdated, ask for a fresh one
            registry.ask_for_mn(peer, vote.voter, svc);
            if sync.list_synced && vote.height > Self::validation_height(svc) {
                warn!(voter = %vote.voter, "invalid payment vote signature");
                return Verdict::penalize(20);
            }
            return Verdict::reject();
        }
        // only a verified vote may take the voter's slot
        if !self.can_vote(vote.voter, vote.height) {
            info!(voter = %vote.voter, height = vote.height, "masternode already voted");
            return Verdict::reject();
        }

        debug!(voter = %vote.voter, height = vote.height, payee = %vote.payee, "new payment vote");
        if !self.add_vote(vote.clone(), svc) {
            return Verdict::reject();
        }
        self.last_vote_activity = Some(svc.now());
        svc.peers.relay(WireMessage::PaymentVote(vote));
        Verdict::accept()
    }

    /// Vote for the winner of `height` when this node is in the top ranks.
    pub fn process_block(
        &mut self,
        height: u64,
        voter: Option<LocalVoter<'_>>,
        registry: &Registry,
        svc: &Services<'_>,
        sync: &SyncView,
    ) -> Result<PaymentVote, PaymentError> {
        let voter = voter.ok_or(PaymentError::NotMasternode)?;
        if !sync.list_synced {
            return Err(PaymentError::ListNotSynced);
        }
        let scored_at = height
            .checked_sub(PAYMENT_SCORE_LAG)
            .ok_or(PaymentError::UnknownBlock(height))?;
        let rank = registry
            .rank(&voter.outpoint, scored_at, svc.params.min_payments_proto(), false, svc)
            .ok_or(PaymentError::Unranked(voter.outpoint, scored_at))?;
        if rank as usize > MNPAYMENTS_SIGNATURES_TOTAL {
            return Err(PaymentError::NotInTop {
                rank,
                limit: MNPAYMENTS_SIGNATURES_TOTAL,
            });
        }

        let (winner, eligible) = self.next_in_queue(registry, height, true, svc);
        let winner = winner.ok_or(PaymentError::NoPayee(height))?;
        info!(height, winner = %winner.outpoint, eligible, rank, "voting for payee");

        let mut vote = PaymentVote::new(voter.outpoint, height, winner.payee());
        vote.sign(voter.operator_private, svc.signer);
        if !self.add_vote(vote.clone(), svc) {
            return Err(PaymentError::NotStored(height));
        }
        svc.peers.relay(WireMessage::PaymentVote(vote.clone()));
        Ok(vote)
    }

    /// Serve a vote sync request, once per peer per marker lifetime.
    pub fn handle_sync_request(
        &self,
        peer: &PeerInfo,
        fulfilled: &mut FulfilledRequests,
        svc: &Services<'_>,
        sync: &SyncView,
    ) -> Verdict {
        if !sync.synced {
            return Verdict::reject();
        }
        let now = svc.now();
        if fulfilled.has(peer.addr, VOTE_SYNC_REQUEST, now) {
            warn!(peer = %peer.id, "peer already asked for the payment votes");
            if svc.params.network == NetworkId::Test {
                return Verdict::reject();
            }
            return Verdict::penalize(20);
        }
        fulfilled.add(peer.addr, VOTE_SYNC_REQUEST, now);
        self.send_votes(peer, svc);
        Verdict::accept()
    }

    /// Send every verified vote for the upcoming blocks.
    fn send_votes(&self, peer: &PeerInfo, svc: &Services<'_>) {
        let tip = svc.tip();
        let mut count = 0u32;
        for tally in self.tallies.range(tip..=tip + PAYMENT_VOTE_MAX_FUTURE).map(|(_, t)| t) {
            for entry in tally.payees() {
                for hash in &entry.vote_hashes {
                    if let Some(vote) = self.votes.get(hash).filter(|v| v.is_verified()) {
                        svc.peers
                            .send(peer.id, WireMessage::PaymentVote(vote.clone()));
                        count += 1;
                    }
                }
            }
        }
        svc.peers.send(
            peer.id,
            WireMessage::SyncStatus {
                item: SyncItem::PaymentVotes,
                count,
            },
        );
        info!(peer = %peer.id, count, "sent payment votes");
    }

    /// Answer a request for every vote on specific heights.
    pub fn handle_block_request(&self, peer: &PeerInfo, heights: &[u64], svc: &Services<'_>) -> usize {
        let mut sent = 0;
        for tally in heights.iter().filter_map(|h| self.tallies.get(h)) {
            for entry in tally.payees() {
                for hash in &entry.vote_hashes {
                    if let Some(vote) = self.votes.get(hash).filter(|v| v.is_verified()) {
                        svc.peers
                            .send(peer.id, WireMessage::PaymentVote(vote.clone()));
                        sent += 1;
                    }
                }
            }
        }
        debug!(peer = %peer.id, requested = heights.len(), sent, "served payment block request");
        sent
    }

    /// Heights in the storage window we know nothing or too little about.
    pub fn low_data_heights(&self, registry_size: usize, svc: &Services<'_>) -> Vec<u64> {
        let Some(tip) = svc.chain.current_height() else {
            return Vec::new();
        };
        let limit = Self::storage_limit(registry_size);
        let first = tip.saturating_sub(limit - 1);
        let mut heights: Vec<u64> = (first..=tip)
            .filter(|h| !self.tallies.contains_key(h))
            .collect();

        for (height, tally) in &self.tallies {
            let decided = tally.max_votes() >= MNPAYMENTS_SIGNATURES_REQUIRED;
            if decided || tally.vote_count() >= MNPAYMENTS_LOW_DATA_VOTES {
                continue;
            }
            heights.push(*height);
        }
        heights.sort_unstable();
        heights
    }

    /// Ask `peer` for votes on blocks with missing or weak tallies.
    pub fn request_low_data(&self, peer: &PeerInfo, registry_size: usize, svc: &Services<'_>) {
        let heights = self.low_data_heights(registry_size, svc);
        if heights.is_empty() {
            return;
        }
        debug!(peer = %peer.id, blocks = heights.len(), "asking for low data payment blocks");
        svc.peers
            .send(peer.id, WireMessage::PaymentBlockRequest { heights });
    }

    pub fn is_enough_data(&self, registry_size: usize) -> bool {
        let limit = Self::storage_limit(registry_size);
        let average_votes = (MNPAYMENTS_SIGNATURES_TOTAL + MNPAYMENTS_SIGNATURES_REQUIRED) as u64 / 2;
        self.tallies.len() as u64 > limit && self.votes.len() as u64 > limit * average_votes
    }

    /// Coinbase check for `height`. Unknown heights accept anything.
    pub fn is_transaction_valid(
        &self,
        outputs: &[(PayeeScript, Amount)],
        height: u64,
        svc: &Services<'_>,
    ) -> bool {
        match self.tallies.get(&height) {
            Some(tally) => tally.is_transaction_valid(outputs, svc.chain.masternode_payment(height)),
            None => true,
        }
    }

    pub fn required_payments_string(&self, height: u64) -> String {
        self.tallies
            .get(&height)
            .map(BlockPayeeTally::required_payments_string)
            .unwrap_or_else(|| "Unknown".to_string())
    }

    /// Forget votes and tallies that fell out of the storage window.
    pub fn check_and_remove(&mut self, registry_size: usize, svc: &Services<'_>, sync: &SyncView) {
        if !sync.blockchain_synced {
            return;
        }
        let tip = svc.tip();
        let limit = Self::storage_limit(registry_size);
        let expired = |height: u64| tip.saturating_sub(height) > limit;

        let before = self.votes.len();
        self.votes.retain(|_, vote| !expired(vote.height));
        self.tallies.retain(|height, _| !expired(*height));
        self.voted.retain(|(_, height)| !expired(*height));
        debug!(removed = before - self.votes.len(), summary = %self, "payment votes pruned");
    }

    pub fn clear(&mut self) {
        self.votes.clear();
        self.tallies.clear();
        self.voted.clear();
    }
}

impl PayeeVotes for MasternodePayments {
    fn has_payee_with_votes(&self, height: u64, payee: &PayeeScript, min_votes: usize) -> bool {
        self.tallies
            .get(&height)
            .is_some_and(|t| t.has_payee_with_votes(payee, min_votes))
    }
}

impl fmt::Display for MasternodePayments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Votes: {}, Blocks: {}", self.votes.len(), self.tallies.len())
    }
}
