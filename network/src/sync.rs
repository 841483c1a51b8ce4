//! Staged sync of masternode data: sporks, the masternode list, then payment votes.
//!
//! The sync never awaits replies. Each tick inspects the connected peers and
//! returns the requests to make; replies arrive later as ordinary messages
//! and only show up here as "last activity" timestamps. A stage that sees
//! no activity for [`SYNC_TIMEOUT_SECONDS`] moves on, or fails outright if
//! nobody was even asked.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use apollon_types::constants::{
    SYNC_ENOUGH_PEERS, SYNC_FAILED_COOLDOWN, SYNC_MAX_HEADER_GAP, SYNC_SLEEP_RESET_SECONDS,
    SYNC_TICK_SECONDS, SYNC_TIMEOUT_SECONDS,
};
use apollon_types::{NetworkId, PeerId, PeerInfo, Timestamp};

use crate::{FulfilledRequests, NetworkError};

const SPORK_SYNC: &str = "spork-sync";
const LIST_SYNC: &str = "apollonnode-list-sync";
const PAYMENT_SYNC: &str = "apollonnode-payment-sync";
const FULL_SYNC: &str = "full-sync";

/// Attempts per stage used by the progress estimate.
const ATTEMPTS_PER_STAGE: f64 = 8.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStage {
    Initial,
    Sporks,
    List,
    PaymentVotes,
    Finished,
    /// Absorbing until the cooldown expires and the sync is reset.
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// The current stage completed (or timed out after some attempts).
    Advance,
    /// Skip straight to the end (dev network fast path).
    Finish,
    Fail,
    Reset,
}

impl SyncStage {
    /// The one transition function of the sync state machine.
    pub fn transition(self, event: SyncEvent) -> Result<SyncStage, NetworkError> {
        use SyncEvent::*;
        use SyncStage::*;
        match (self, event) {
            (_, Reset) => Ok(Initial),
            (_, Fail) => Ok(Failed),
            (Failed, Advance | Finish) => Err(NetworkError::IllegalTransition { from: self, event }),
            (_, Finish) => Ok(Finished),
            (Initial, Advance) => Ok(Sporks),
            (Sporks, Advance) => Ok(List),
            (List, Advance) => Ok(PaymentVotes),
            (PaymentVotes, Advance) => Ok(Finished),
            (Finished, Advance) => Ok(Finished),
        }
    }

    /// Numeric asset id as carried by `SYNC_STATUS` messages.
    pub fn asset_id(&self) -> i32 {
        match self {
            Self::Failed => -1,
            Self::Initial => 0,
            Self::Sporks => 1,
            Self::List => 2,
            Self::PaymentVotes => 3,
            Self::Finished => 999,
        }
    }

    pub fn asset_name(&self) -> &'static str {
        match self {
            Self::Initial => "APOLLONNODE_SYNC_INITIAL",
            Self::Sporks => "APOLLONNODE_SYNC_SPORKS",
            Self::List => "APOLLONNODE_SYNC_LIST",
            Self::PaymentVotes => "APOLLONNODE_SYNC_MNW",
            Self::Failed => "APOLLONNODE_SYNC_FAILED",
            Self::Finished => "APOLLONNODE_SYNC_FINISHED",
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Initial => "Synchronization pending...",
            Self::Sporks => "Synchronizing sporks...",
            Self::List => "Synchronizing apollonnodes...",
            Self::PaymentVotes => "Synchronizing apollonnode payments...",
            Self::Failed => "Synchronization failed",
            Self::Finished => "Synchronization finished",
        }
    }
}

/// What the node should do on behalf of the sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncAction {
    RequestSporks(PeerId),
    /// Ask for the full masternode list (registry `DsegUpdate`).
    RequestList(PeerId),
    RequestPaymentVotes { peer: PeerId, count: u32 },
    /// Ask for vote data on blocks we know little about.
    RequestLowData(PeerId),
    Disconnect(PeerId),
}

/// Snapshot of the sync flags other services gate on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncView {
    pub blockchain_synced: bool,
    pub list_synced: bool,
    pub votes_synced: bool,
    pub synced: bool,
    pub failed: bool,
}

impl SyncView {
    /// Everything synced. Handy for tests and offline tools.
    pub fn all_synced() -> Self {
        Self {
            blockchain_synced: true,
            list_synced: true,
            votes_synced: true,
            synced: true,
            failed: false,
        }
    }
}

/// Chain and peer facts the blockchain-synced heuristic looks at.
#[derive(Clone, Copy, Debug)]
pub struct BlockchainSyncInputs<'a> {
    pub now: Timestamp,
    pub tip: Option<u64>,
    pub tip_time: Option<Timestamp>,
    pub best_header: Option<u64>,
    pub header_time: Option<Timestamp>,
    pub peers: &'a [PeerInfo],
}

#[derive(Clone, Copy, Debug)]
pub struct SyncTickInputs<'a> {
    pub blockchain: BlockchainSyncInputs<'a>,
    /// Masternodes currently known to the registry.
    pub registry_size: usize,
    /// Whether the payment store already holds enough votes.
    pub enough_vote_data: bool,
    pub min_payments_proto: u32,
    /// Vote storage window, sent as the count hint of vote sync requests.
    pub storage_limit: u64,
    /// This node runs as a masternode.
    pub is_masternode: bool,
    pub last_list_activity: Option<Timestamp>,
    pub last_vote_activity: Option<Timestamp>,
}

pub struct MasternodeSync {
    network: NetworkId,
    stage: SyncStage,
    attempt: u32,
    asset_started: Timestamp,
    last_list: Timestamp,
    last_vote: Timestamp,
    last_failure: Timestamp,
    failures: u32,

    blockchain_synced: bool,
    first_block_accepted: bool,
    last_process: Timestamp,
    skipped: u32,
}

impl MasternodeSync {
    pub fn new(network: NetworkId, now: Timestamp) -> Self {
        Self {
            network,
            stage: SyncStage::Initial,
            attempt: 0,
            asset_started: now,
            last_list: now,
            last_vote: now,
            last_failure: Timestamp::EPOCH,
            failures: 0,
            blockchain_synced: false,
            first_block_accepted: false,
            last_process: now,
            skipped: 0,
        }
    }

    pub fn stage(&self) -> SyncStage {
        self.stage
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn asset_started(&self) -> Timestamp {
        self.asset_started
    }

    pub fn is_failed(&self) -> bool {
        self.stage == SyncStage::Failed
    }

    pub fn is_list_synced(&self) -> bool {
        self.stage.asset_id() > SyncStage::List.asset_id()
    }

    pub fn is_winners_list_synced(&self) -> bool {
        self.stage.asset_id() > SyncStage::PaymentVotes.asset_id()
    }

    pub fn is_synced(&self) -> bool {
        self.stage == SyncStage::Finished
    }

    /// Last computed blockchain-synced flag (no re-evaluation).
    pub fn blockchain_synced(&self) -> bool {
        self.blockchain_synced
    }

    pub fn view(&self) -> SyncView {
        SyncView {
            blockchain_synced: self.blockchain_synced,
            list_synced: self.is_list_synced(),
            votes_synced: self.is_winners_list_synced(),
            synced: self.is_synced(),
            failed: self.is_failed(),
        }
    }

    pub fn progress(&self) -> f64 {
        let done = self.attempt as f64 + (self.stage.asset_id() - 1) as f64 * ATTEMPTS_PER_STAGE;
        (done / (ATTEMPTS_PER_STAGE * 4.0)).clamp(0.0, 1.0)
    }

    pub fn added_list_item(&mut self, now: Timestamp) {
        self.last_list = self.last_list.max(now);
    }

    pub fn added_payment_vote(&mut self, now: Timestamp) {
        self.last_vote = self.last_vote.max(now);
    }

    pub fn reset(&mut self, now: Timestamp) {
        self.apply_or_log(SyncEvent::Reset, now);
    }

    pub fn fail(&mut self, now: Timestamp) {
        self.apply_or_log(SyncEvent::Fail, now);
    }

    fn apply_or_log(&mut self, event: SyncEvent, now: Timestamp) {
        if let Err(e) = self.apply(event, now) {
            debug!(stage = self.stage.asset_name(), error = %e, "sync transition refused");
        }
    }

    /// [`Self::switch_to_next_asset`] from the tick, where a refused
    /// transition leaves the stage as it is.
    fn advance(&mut self, now: Timestamp, peers: &[PeerInfo], fulfilled: &mut FulfilledRequests) {
        if let Err(e) = self.switch_to_next_asset(now, peers, fulfilled) {
            debug!(stage = self.stage.asset_name(), error = %e, "sync stage not advanced");
        }
    }

    fn apply(&mut self, event: SyncEvent, now: Timestamp) -> Result<(), NetworkError> {
        let next = self.stage.transition(event)?;
        match event {
            SyncEvent::Reset => {
                self.last_list = now;
                self.last_vote = now;
                self.last_failure = Timestamp::EPOCH;
                self.failures = 0;
            }
            SyncEvent::Fail => {
                self.last_failure = now;
                self.failures += 1;
                warn!(stage = self.stage.asset_name(), "masternode sync failed");
            }
            SyncEvent::Advance | SyncEvent::Finish => match next {
                SyncStage::List => self.last_list = now,
                SyncStage::PaymentVotes => self.last_vote = now,
                _ => {}
            },
        }
        self.stage = next;
        self.attempt = 0;
        self.asset_started = now;
        if matches!(event, SyncEvent::Advance | SyncEvent::Finish) {
            info!(stage = next.asset_name(), "masternode sync: starting stage");
        }
        Ok(())
    }

    /// Complete the current stage. Entering `Sporks` clears the per-peer
    /// markers of connected peers; finishing marks the peers that served us
    /// payment votes as fully synced.
    pub fn switch_to_next_asset(
        &mut self,
        now: Timestamp,
        peers: &[PeerInfo],
        fulfilled: &mut FulfilledRequests,
    ) -> Result<(), NetworkError> {
        let from = self.stage;
        self.apply(SyncEvent::Advance, now)?;
        match (from, self.stage) {
            (SyncStage::Initial, SyncStage::Sporks) => {
                for peer in peers {
                    for marker in [SPORK_SYNC, LIST_SYNC, PAYMENT_SYNC, FULL_SYNC] {
                        fulfilled.remove(peer.addr, marker);
                    }
                }
            }
            (SyncStage::PaymentVotes, SyncStage::Finished) => {
                for peer in peers {
                    if fulfilled.has(peer.addr, PAYMENT_SYNC, now) {
                        fulfilled.add(peer.addr, FULL_SYNC, now);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Whether a peer's reported heights look usable for syncing from.
    fn peer_at_same_height(tip: u64, peer: &PeerInfo) -> bool {
        let (Some(common), Some(sync)) = (peer.common_height, peer.sync_height) else {
            return false;
        };
        if tip.saturating_sub(1) > common {
            debug!(peer = %peer.id, tip, common, "skipping stuck peer");
            return false;
        }
        if tip + 1 < sync {
            debug!(peer = %peer.id, tip, sync, "skipping peer ahead of our blocks");
            return false;
        }
        true
    }

    /// Heuristic "is the host chain caught up" gate.
    ///
    /// Rate limited to one evaluation per tick outside the dev network.
    /// A gap of more than an hour since the last evaluation means the
    /// process slept, which resets the whole sync.
    pub fn is_blockchain_synced(&mut self, inputs: &BlockchainSyncInputs, block_accepted: bool) -> bool {
        let now = inputs.now;
        if now.diff(self.last_process) > SYNC_SLEEP_RESET_SECONDS as i64 {
            info!(was_synced = self.blockchain_synced, "long pause detected, resetting sync");
            self.reset(now);
            self.blockchain_synced = false;
        }

        let (Some(tip), Some(best_header)) = (inputs.tip, inputs.best_header) else {
            return false;
        };

        if block_accepted {
            if !self.is_synced() {
                // still downloading, re-evaluate once blocks stop arriving
                self.first_block_accepted = true;
                self.blockchain_synced = false;
                self.last_process = now;
                return false;
            }
        } else if self.network != NetworkId::Dev
            && now.diff(self.last_process) < SYNC_TICK_SECONDS as i64
        {
            self.skipped += 1;
            return self.blockchain_synced;
        }

        debug!(
            synced = self.blockchain_synced,
            skipped = self.skipped,
            "checking blockchain sync"
        );
        self.last_process = now;
        self.skipped = 0;

        if self.blockchain_synced {
            return true;
        }

        if inputs.peers.len() >= SYNC_ENOUGH_PEERS {
            let at_same_height = inputs
                .peers
                .iter()
                .filter(|p| Self::peer_at_same_height(tip, p))
                .count();
            if at_same_height >= SYNC_ENOUGH_PEERS {
                info!("found enough peers on the same height, blockchain synced");
                self.blockchain_synced = true;
                return true;
            }
        }

        if !self.first_block_accepted {
            self.blockchain_synced = false;
            return false;
        }

        let newest = match (inputs.tip_time, inputs.header_time) {
            (Some(a), Some(b)) => a.max(b),
            (Some(t), None) | (None, Some(t)) => t,
            (None, None) => return false,
        };
        self.blockchain_synced = best_header.saturating_sub(tip) < SYNC_MAX_HEADER_GAP
            && now.diff(newest) < self.network.max_tip_age() as i64;
        self.blockchain_synced
    }

    /// Log-only handler for `SYNC_STATUS` counts.
    pub fn process_sync_status(&self, peer: PeerId, asset_id: i32, count: u32) {
        if self.is_synced() || self.is_failed() {
            return;
        }
        info!(%peer, asset_id, count, "got inventory count");
    }

    /// One sync step. Called every [`SYNC_TICK_SECONDS`].
    pub fn process_tick(
        &mut self,
        inputs: &SyncTickInputs,
        fulfilled: &mut FulfilledRequests,
    ) -> Vec<SyncAction> {
        let mut actions = Vec::new();
        let now = inputs.blockchain.now;
        if inputs.blockchain.tip.is_none() {
            return actions;
        }

        if let Some(t) = inputs.last_list_activity {
            self.added_list_item(t);
        }
        if let Some(t) = inputs.last_vote_activity {
            self.added_payment_vote(t);
        }

        debug!(
            stage = self.stage.asset_name(),
            attempt = self.attempt,
            progress = self.progress(),
            registry = inputs.registry_size,
            "sync tick"
        );

        match self.stage {
            SyncStage::Finished if inputs.registry_size == 0 => {
                warn!("not enough data, restarting sync");
                self.reset(now);
            }
            SyncStage::Finished => return actions,
            SyncStage::Failed => {
                if self.last_failure.plus(SYNC_FAILED_COOLDOWN) < now {
                    self.reset(now);
                }
                return actions;
            }
            _ => {}
        }

        let synced = self.is_blockchain_synced(&inputs.blockchain, false);
        if self.network != NetworkId::Dev
            && !synced
            && self.stage.asset_id() > SyncStage::Sporks.asset_id()
        {
            self.last_list = now;
            self.last_vote = now;
            return actions;
        }

        let peers = inputs.blockchain.peers;
        if self.stage == SyncStage::Initial || (self.stage == SyncStage::Sporks && synced) {
            self.advance(now, peers, fulfilled);
        }

        for peer in peers {
            // masternode connections are short-lived, and inbound ones this
            // early are most likely masternode connections as well
            if peer.masternode_connection || (inputs.is_masternode && peer.inbound) {
                continue;
            }

            if self.network == NetworkId::Dev {
                self.dev_fast_path(peer, inputs, now, &mut actions);
                return actions;
            }

            if fulfilled.has(peer.addr, FULL_SYNC, now) {
                info!(peer = %peer.id, "disconnecting from recently synced peer");
                actions.push(SyncAction::Disconnect(peer.id));
                continue;
            }

            if !fulfilled.has(peer.addr, SPORK_SYNC, now) {
                fulfilled.add(peer.addr, SPORK_SYNC, now);
                debug!(peer = %peer.id, "requesting sporks");
                actions.push(SyncAction::RequestSporks(peer.id));
                continue;
            }

            match self.stage {
                SyncStage::List => {
                    if self.last_list < now.minus(SYNC_TIMEOUT_SECONDS) {
                        self.stage_timed_out(now, peers, fulfilled);
                        return actions;
                    }
                    if fulfilled.has(peer.addr, LIST_SYNC, now) {
                        continue;
                    }
                    fulfilled.add(peer.addr, LIST_SYNC, now);
                    if peer.protocol_version < inputs.min_payments_proto {
                        continue;
                    }
                    self.attempt += 1;
                    actions.push(SyncAction::RequestList(peer.id));
                    return actions;
                }
                SyncStage::PaymentVotes => {
                    if self.last_vote < now.minus(SYNC_TIMEOUT_SECONDS) {
                        self.stage_timed_out(now, peers, fulfilled);
                        return actions;
                    }
                    // ask at least two peers before trusting the local data
                    if self.attempt > 1 && inputs.enough_vote_data {
                        info!("found enough payment data");
                        self.advance(now, peers, fulfilled);
                        return actions;
                    }
                    if fulfilled.has(peer.addr, PAYMENT_SYNC, now) {
                        continue;
                    }
                    fulfilled.add(peer.addr, PAYMENT_SYNC, now);
                    if peer.protocol_version < inputs.min_payments_proto {
                        continue;
                    }
                    self.attempt += 1;
                    let count = u32::try_from(inputs.storage_limit).unwrap_or(u32::MAX);
                    actions.push(SyncAction::RequestPaymentVotes {
                        peer: peer.id,
                        count,
                    });
                    actions.push(SyncAction::RequestLowData(peer.id));
                    return actions;
                }
                _ => {}
            }
        }
        actions
    }

    fn stage_timed_out(&mut self, now: Timestamp, peers: &[PeerInfo], fulfilled: &mut FulfilledRequests) {
        info!(stage = self.stage.asset_name(), attempt = self.attempt, "sync stage timeout");
        if self.attempt == 0 {
            warn!(stage = self.stage.asset_name(), "failed to sync");
            self.fail(now);
        } else {
            self.advance(now, peers, fulfilled);
        }
    }

    fn dev_fast_path(
        &mut self,
        peer: &PeerInfo,
        inputs: &SyncTickInputs,
        now: Timestamp,
        actions: &mut Vec<SyncAction>,
    ) {
        match self.attempt {
            0..=2 => actions.push(SyncAction::RequestSporks(peer.id)),
            3 => actions.push(SyncAction::RequestList(peer.id)),
            4 | 5 => actions.push(SyncAction::RequestPaymentVotes {
                peer: peer.id,
                count: u32::try_from(inputs.registry_size).unwrap_or(u32::MAX),
            }),
            _ => {
                self.apply_or_log(SyncEvent::Finish, now);
            }
        }
        self.attempt += 1;
    }
}
