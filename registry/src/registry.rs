//! The list of known masternodes and the gossip bookkeeping around it.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use apollon_messages::{Announcement, Ping, SyncItem, WireMessage};
use apollon_network::SyncView;
use apollon_providers::Services;
use apollon_types::constants::{
    DSEG_UPDATE_SECONDS, EXPIRATION_SECONDS, LAST_PAID_MIN_VOTES, LAST_PAID_SCAN_BLOCKS,
    MAX_EXPECTED_INDEX_SIZE, MIN_INDEX_REBUILD_TIME, MIN_MNB_SECONDS, MIN_MNP_SECONDS,
    MNB_RECOVERY_MAX_ASK_ENTRIES, MNB_RECOVERY_QUORUM_REQUIRED, MNB_RECOVERY_QUORUM_TOTAL,
    MNB_RECOVERY_RETRY_SECONDS, MNB_RECOVERY_WAIT_SECONDS, NEW_START_REQUIRED_SECONDS,
    WATCHDOG_MAX_SECONDS,
};
use apollon_types::{
    MasternodeState, MessageHash, NetworkId, OutPoint, PayeeScript, PeerInfo, PublicKey,
    ServiceAddr, Timestamp,
};
use apollon_utils::PendingRequestTracker;

use crate::announce::{check_outpoint, check_ping, ping_simple_check, ping_time, simple_check};
use crate::ranking::rank_outpoints;
use crate::{
    CheckContext, LocalNode, MasternodeIdentity, MasternodeIndex, OutpointCheck, Verdict,
};

/// Lookup into the payment vote tallies, used to find when a node was last paid.
pub trait PayeeVotes {
    fn has_payee_with_votes(&self, height: u64, payee: &PayeeScript, min_votes: usize) -> bool;
}

/// Result of processing an announcement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnnounceOutcome {
    pub verdict: Verdict,
    /// The announcement carries this node's operational key and current
    /// protocol: a remote start happened and local activation should run.
    pub own_activated: bool,
}

impl AnnounceOutcome {
    fn of(verdict: Verdict, own_activated: bool) -> Self {
        Self {
            verdict,
            own_activated,
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
pub struct Registry {
    nodes: BTreeMap<OutPoint, MasternodeIdentity>,
    /// First-seen time and content of every announcement we processed.
    seen_announcements: HashMap<MessageHash, (Timestamp, Announcement)>,
    seen_pings: HashMap<MessageHash, Ping>,
    /// Peers that asked us for the full list.
    asked_us: PendingRequestTracker<ServiceAddr>,
    /// Peers we asked for the full list.
    we_asked: PendingRequestTracker<ServiceAddr>,
    we_asked_entry: PendingRequestTracker<(OutPoint, ServiceAddr)>,
    /// Outstanding recovery asks, keyed by the announcement hash, with the
    /// peers that have not answered yet.
    recovery_requests: PendingRequestTracker<MessageHash, BTreeSet<ServiceAddr>>,
    recovery_replies: HashMap<MessageHash, Vec<Announcement>>,
    #[serde(skip)]
    scheduled: Vec<(ServiceAddr, MessageHash)>,
    index: MasternodeIndex,
    #[serde(skip)]
    index_old: MasternodeIndex,
    #[serde(skip)]
    index_rebuilt: bool,
    #[serde(skip)]
    last_index_rebuild: Timestamp,
    last_watchdog_vote: Timestamp,
    #[serde(skip)]
    last_list_activity: Option<Timestamp>,
    #[serde(skip)]
    nodes_added: bool,
    #[serde(skip)]
    nodes_removed: bool,
    #[serde(skip, default = "first_run")]
    full_paid_scan: bool,
    #[serde(skip)]
    local: Option<LocalNode>,
}

fn first_run() -> bool {
    true
}

impl Registry {
    pub fn new() -> Self {
        Self {
            full_paid_scan: true,
            ..Default::default()
        }
    }

    /// Operational identity of this process, `None` unless it runs a masternode.
    pub fn set_local(&mut self, local: Option<LocalNode>) {
        self.local = local;
    }

    pub fn local(&self) -> Option<&LocalNode> {
        self.local.as_ref()
    }

    fn is_own(&self, operator_key: &PublicKey) -> bool {
        self.local
            .as_ref()
            .is_some_and(|l| l.operator_key == *operator_key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add(&mut self, node: MasternodeIdentity) -> bool {
        if self.nodes.contains_key(&node.outpoint) {
            return false;
        }
        debug!(outpoint = %node.outpoint, addr = %node.addr, count = self.nodes.len() + 1, "adding masternode");
        self.index.add(node.outpoint);
        self.nodes.insert(node.outpoint, node);
        self.nodes_added = true;
        true
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&MasternodeIdentity> {
        self.nodes.get(outpoint)
    }

    pub fn has(&self, outpoint: &OutPoint) -> bool {
        self.nodes.contains_key(outpoint)
    }

    pub fn find_by_operator_key(&self, key: &PublicKey) -> Option<&MasternodeIdentity> {
        self.nodes.values().find(|n| n.operator_key == *key)
    }

    pub fn find_by_payee(&self, payee: &PayeeScript) -> Option<&MasternodeIdentity> {
        self.nodes.values().find(|n| n.payee() == *payee)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MasternodeIdentity> {
        self.nodes.values()
    }

    /// Owned copies of every identity, for callers that must not hold a borrow.
    pub fn snapshot(&self) -> Vec<MasternodeIdentity> {
        self.nodes.values().cloned().collect()
    }

    /// State of a node; unknown nodes need a new start.
    pub fn node_state(&self, outpoint: &OutPoint) -> MasternodeState {
        self.nodes
            .get(outpoint)
            .map(|n| n.state())
            .unwrap_or(MasternodeState::NewStartRequired)
    }

    pub fn count_nodes(&self, min_proto: u32) -> usize {
        self.nodes
            .values()
            .filter(|n| n.protocol_version >= min_proto)
            .count()
    }

    pub fn count_enabled(&self, min_proto: u32) -> usize {
        self.nodes
            .values()
            .filter(|n| n.protocol_version >= min_proto && n.is_enabled())
            .count()
    }

    pub fn is_pinged_within(&self, outpoint: &OutPoint, secs: u64, at: Timestamp) -> bool {
        self.nodes
            .get(outpoint)
            .is_some_and(|n| n.is_pinged_within(secs, at))
    }

    pub fn set_last_paid(&mut self, outpoint: &OutPoint, block: u64, time: Timestamp) {
        if let Some(node) = self.nodes.get_mut(outpoint) {
            node.set_last_paid(block, time);
        }
    }

    pub fn increase_pose_score(&mut self, outpoint: &OutPoint) -> bool {
        match self.nodes.get_mut(outpoint) {
            Some(node) => {
                node.increase_pose_score();
                true
            }
            None => false,
        }
    }

    pub fn decrease_pose_score(&mut self, outpoint: &OutPoint) -> bool {
        match self.nodes.get_mut(outpoint) {
            Some(node) => {
                node.decrease_pose_score();
                true
            }
            None => false,
        }
    }

    /// When the registry last learned something during list sync.
    pub fn last_list_activity(&self) -> Option<Timestamp> {
        self.last_list_activity
    }

    fn note_list_activity(&mut self, now: Timestamp) {
        self.last_list_activity = Some(now);
    }

    /// Take the "nodes added since last call" flag.
    pub fn take_nodes_added(&mut self) -> bool {
        std::mem::take(&mut self.nodes_added)
    }

    pub fn seen_announcement(&self, hash: &MessageHash) -> Option<&Announcement> {
        self.seen_announcements.get(hash).map(|(_, mnb)| mnb)
    }

    pub fn seen_announcement_count(&self) -> usize {
        self.seen_announcements.len()
    }

    pub fn has_seen_ping(&self, hash: &MessageHash) -> bool {
        self.seen_pings.contains_key(hash)
    }

    pub fn seen_ping_count(&self) -> usize {
        self.seen_pings.len()
    }

    fn context(
        &self,
        outpoint: &OutPoint,
        operator_key: &PublicKey,
        svc: &Services<'_>,
        sync: &SyncView,
    ) -> CheckContext {
        let now = svc.now();
        CheckContext {
            now,
            tip: svc.tip(),
            collateral_unspent: svc.chain.utxo(outpoint).is_some(),
            registry_size: self.nodes.len(),
            min_payments_proto: svc.params.min_payments_proto(),
            proto_v1: svc.params.min_payments_proto_v1,
            proto_v2: svc.params.min_payments_proto_v2,
            is_own: self.is_own(operator_key),
            list_synced: sync.list_synced,
            watchdog_active: sync.synced && self.is_watchdog_active(now),
        }
    }

    /// Re-evaluate one node's state.
    pub fn check_node(
        &mut self,
        outpoint: &OutPoint,
        force: bool,
        svc: &Services<'_>,
        sync: &SyncView,
    ) {
        let Some(node) = self.nodes.get(outpoint) else {
            return;
        };
        let ctx = self.context(outpoint, &node.operator_key, svc, sync);
        if let Some(node) = self.nodes.get_mut(outpoint) {
            node.check(&ctx, force);
        }
    }

    pub fn check_all(&mut self, svc: &Services<'_>, sync: &SyncView) {
        let outpoints: Vec<OutPoint> = self.nodes.keys().copied().collect();
        for outpoint in outpoints {
            self.check_node(&outpoint, false, svc, sync);
        }
    }

    pub fn update_watchdog_vote_time(&mut self, outpoint: &OutPoint, now: Timestamp) {
        if let Some(node) = self.nodes.get_mut(outpoint) {
            node.last_watchdog_vote = now;
            self.last_watchdog_vote = now;
        }
    }

    /// Some masternode sent a watchdog vote recently.
    pub fn is_watchdog_active(&self, now: Timestamp) -> bool {
        now.diff(self.last_watchdog_vote) <= WATCHDOG_MAX_SECONDS as i64
    }

    /// Record a ping we produced ourselves.
    pub fn set_last_ping(&mut self, ping: Ping) {
        let Some(node) = self.nodes.get_mut(&ping.outpoint) else {
            return;
        };
        node.set_last_ping(ping.clone());
        let hash = node.to_announcement().hash();
        self.seen_pings.insert(ping.hash(), ping.clone());
        if let Some((_, seen)) = self.seen_announcements.get_mut(&hash) {
            seen.last_ping = Some(ping);
        }
    }

    fn scored(
        &self,
        height: u64,
        min_proto: u32,
        svc: &Services<'_>,
        keep: impl Fn(&MasternodeIdentity) -> bool,
    ) -> Option<Vec<OutPoint>> {
        let block_hash = svc.block_hash(height)?;
        let candidates = self
            .nodes
            .values()
            .filter(|n| n.protocol_version >= min_proto && keep(n))
            .map(|n| n.outpoint);
        Some(
            rank_outpoints(candidates, &block_hash)
                .into_iter()
                .map(|(_, op)| op)
                .collect(),
        )
    }

    /// 1-based rank of a node at `height`, `None` when unranked or the block
    /// is unknown.
    pub fn rank(
        &self,
        outpoint: &OutPoint,
        height: u64,
        min_proto: u32,
        only_active: bool,
        svc: &Services<'_>,
    ) -> Option<u32> {
        let ranked = self.scored(height, min_proto, svc, |n| !only_active || n.is_enabled())?;
        ranked
            .iter()
            .position(|op| op == outpoint)
            .map(|p| p as u32 + 1)
    }

    /// Every enabled node with its rank at `height`. Also stores the rank on
    /// each identity.
    pub fn ranks(
        &mut self,
        height: u64,
        min_proto: u32,
        svc: &Services<'_>,
    ) -> Vec<(u32, MasternodeIdentity)> {
        let Some(ranked) = self.scored(height, min_proto, svc, |n| n.is_enabled()) else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(ranked.len());
        for (i, outpoint) in ranked.iter().enumerate() {
            if let Some(node) = self.nodes.get_mut(outpoint) {
                node.rank = i as u32 + 1;
                out.push((node.rank, node.clone()));
            }
        }
        out
    }

    pub fn by_rank(
        &self,
        rank: u32,
        height: u64,
        min_proto: u32,
        only_active: bool,
        svc: &Services<'_>,
    ) -> Option<&MasternodeIdentity> {
        let ranked = self.scored(height, min_proto, svc, |n| !only_active || n.is_enabled())?;
        let outpoint = ranked.get((rank as usize).checked_sub(1)?)?;
        self.nodes.get(outpoint)
    }

    /// A random enabled node that is not in `excluded`.
    pub fn find_random_not_in(
        &self,
        excluded: &[OutPoint],
        min_proto: u32,
        svc: &Services<'_>,
    ) -> Option<&MasternodeIdentity> {
        let enabled = self.count_enabled(min_proto);
        if enabled <= excluded.len() {
            debug!(enabled, excluded = excluded.len(), "no masternode left to pick");
            return None;
        }
        let mut shuffled: Vec<&MasternodeIdentity> = self.nodes.values().collect();
        for i in (1..shuffled.len()).rev() {
            let j = svc.random.next_below(i as u64 + 1) as usize;
            shuffled.swap(i, j);
        }
        shuffled.into_iter().find(|n| {
            n.protocol_version >= min_proto && n.is_enabled() && !excluded.contains(&n.outpoint)
        })
    }

    /// Ask a peer for one entry we are missing, at most once per
    /// [`DSEG_UPDATE_SECONDS`].
    pub fn ask_for_mn(&mut self, peer: &PeerInfo, outpoint: OutPoint, svc: &Services<'_>) {
        let now = svc.now();
        let key = (outpoint, peer.addr);
        if self.we_asked_entry.is_pending(&key, now) {
            return;
        }
        if self.we_asked_entry.contains(&key) {
            info!(peer = %peer.id, %outpoint, "asking same peer for missing masternode entry again");
        } else {
            info!(peer = %peer.id, %outpoint, "asking peer for missing masternode entry");
        }
        self.we_asked_entry
            .register(key, (), DSEG_UPDATE_SECONDS, now);
        svc.peers.send(peer.id, WireMessage::GetList(Some(outpoint)));
    }

    /// Ask a peer for the full list.
    pub fn dseg_update(&mut self, peer: &PeerInfo, svc: &Services<'_>) {
        let now = svc.now();
        if svc.params.network == NetworkId::Live
            && !peer.addr.is_lan()
            && self.we_asked.is_pending(&peer.addr, now)
        {
            debug!(peer = %peer.id, "already asked peer for the list, skipping");
            return;
        }
        svc.peers.send(peer.id, WireMessage::GetList(None));
        self.we_asked
            .register(peer.addr, (), DSEG_UPDATE_SECONDS, now);
        debug!(peer = %peer.id, "asked peer for masternode list");
    }

    /// Serve a list request: everyone (`None`) or a single collateral.
    pub fn handle_get_list(
        &mut self,
        peer: &PeerInfo,
        request: Option<OutPoint>,
        svc: &Services<'_>,
        sync: &SyncView,
    ) -> Verdict {
        // heavy request, only served once fully synced
        if !sync.synced {
            return Verdict::reject();
        }
        let now = svc.now();
        if request.is_none() && !peer.addr.is_lan() && svc.params.network == NetworkId::Live {
            if self.asked_us.is_pending(&peer.addr, now) {
                warn!(peer = %peer.id, "peer already asked us for the list");
                return Verdict::penalize(34);
            }
            self.asked_us
                .register(peer.addr, (), DSEG_UPDATE_SECONDS, now);
        }

        let mut count = 0u32;
        for node in self.nodes.values() {
            if request.is_some_and(|wanted| wanted != node.outpoint) {
                continue;
            }
            if node.addr.is_lan() || node.state() == MasternodeState::UpdateRequired {
                continue;
            }
            let mnb = node.to_announcement();
            let hash = mnb.hash();
            svc.peers.send(peer.id, WireMessage::Announce(mnb.clone()));
            if let Some(ping) = &node.last_ping {
                svc.peers.send(peer.id, WireMessage::Ping(ping.clone()));
            }
            count += 1;
            self.seen_announcements.entry(hash).or_insert((now, mnb));

            if request.is_some() {
                debug!(peer = %peer.id, outpoint = %node.outpoint, "sent 1 masternode entry");
                return Verdict::accept();
            }
        }

        if request.is_none() {
            svc.peers.send(
                peer.id,
                WireMessage::SyncStatus {
                    item: SyncItem::List,
                    count,
                },
            );
            info!(peer = %peer.id, count, "sent masternode list");
        } else {
            debug!(peer = %peer.id, "no entry to send");
        }
        Verdict::accept()
    }

    /// Inbound ping from `peer`.
    pub fn process_ping(
        &mut self,
        peer: &PeerInfo,
        ping: Ping,
        svc: &Services<'_>,
        sync: &SyncView,
    ) -> Verdict {
        let hash = ping.hash();
        if self.seen_pings.contains_key(&hash) {
            return Verdict::reject();
        }
        self.seen_pings.insert(hash, ping.clone());
        debug!(outpoint = %ping.outpoint, "new ping");

        let known = self.nodes.get(&ping.outpoint).map(|n| n.state());
        if known == Some(MasternodeState::NewStartRequired) {
            return Verdict::reject();
        }
        let verdict = match known {
            Some(_) => self.check_ping_and_update(&ping, svc, sync),
            None => match ping_simple_check(&ping, svc) {
                v if v.accepted => Verdict::reject(),
                v => v,
            },
        };
        if verdict.is_penalty() {
            // the hash leaves out the signature, a bad copy must not shadow
            // the genuine ping
            self.seen_pings.remove(&hash);
        }
        if verdict.accepted || (known.is_some() && !verdict.is_penalty()) {
            return verdict;
        }
        // broken or unknown, the entry itself might be what we are missing
        self.ask_for_mn(peer, ping.outpoint, svc);
        verdict
    }

    /// Validate a standalone ping for a known node and store it.
    pub fn check_ping_and_update(
        &mut self,
        ping: &Ping,
        svc: &Services<'_>,
        sync: &SyncView,
    ) -> Verdict {
        let now = svc.now();
        let Some(node) = self.nodes.get(&ping.outpoint) else {
            return Verdict::reject();
        };
        let verdict = check_ping(ping, node, false, svc);
        if !verdict.accepted {
            return verdict;
        }
        let ctx = self.context(&node.outpoint, &node.operator_key, svc, sync);
        if !sync.list_synced && !node.is_pinged_within(EXPIRATION_SECONDS / 2, now) {
            debug!(outpoint = %ping.outpoint, "bumping list sync timeout");
            self.note_list_activity(now);
        }

        let Some(node) = self.nodes.get_mut(&ping.outpoint) else {
            return Verdict::reject();
        };
        node.set_last_ping(ping.clone());
        let hash = node.to_announcement().hash();
        if let Some((_, seen)) = self.seen_announcements.get_mut(&hash) {
            seen.last_ping = Some(ping.clone());
        }
        node.check(&ctx, true);
        if node.is_enabled() {
            debug!(outpoint = %ping.outpoint, "ping accepted and relayed");
            svc.peers.relay(WireMessage::Ping(ping.clone()));
        }
        Verdict::accept()
    }

    /// Process an announcement, from a peer or replayed by recovery.
    pub fn check_mnb_and_update_list(
        &mut self,
        from: Option<&PeerInfo>,
        mnb: Announcement,
        svc: &Services<'_>,
        sync: &SyncView,
    ) -> AnnounceOutcome {
        let now = svc.now();
        let hash = mnb.hash();

        if !mnb.recovery {
            if let Some((first_seen, seen)) = self.seen_announcements.get_mut(&hash) {
                // close to needing a new start, keep the sync alive for it
                let refresh_after = NEW_START_REQUIRED_SECONDS - MIN_MNP_SECONDS * 2;
                let refresh = now.diff(*first_seen) > refresh_after as i64;
                if refresh {
                    *first_seen = now;
                }
                let seen_ping = ping_time(seen);
                if refresh {
                    debug!(outpoint = %mnb.outpoint, "seen announcement refreshed");
                    self.note_list_activity(now);
                }
                if let Some(peer) = from {
                    self.collect_recovery_reply(peer, hash, mnb, seen_ping, svc, sync);
                }
                return AnnounceOutcome::of(Verdict::accept(), false);
            }
        }
        self.seen_announcements.insert(hash, (now, mnb.clone()));
        debug!(outpoint = %mnb.outpoint, "new announcement");

        let simple = simple_check(&mnb, svc);
        if !simple.verdict.accepted {
            return AnnounceOutcome::of(simple.verdict, false);
        }

        let mut own_activated = false;
        if let Some(existing) = self.nodes.get(&mnb.outpoint) {
            let old_hash = existing.to_announcement().hash();
            let (verdict, activated) = self.update_existing(&mnb, svc, sync);
            if !verdict.accepted {
                return AnnounceOutcome::of(verdict, false);
            }
            own_activated = activated;
            if old_hash != hash {
                self.seen_announcements.remove(&old_hash);
            }
        }

        let collateral_height = match check_outpoint(&mnb, self.local.as_ref(), svc) {
            OutpointCheck::Valid { collateral_height } => collateral_height,
            OutpointCheck::Own => return AnnounceOutcome::of(Verdict::reject(), own_activated),
            OutpointCheck::RetryLater => {
                self.seen_announcements.remove(&hash);
                return AnnounceOutcome::of(Verdict::reject(), own_activated);
            }
            OutpointCheck::Rejected(verdict) => {
                info!(outpoint = %mnb.outpoint, addr = %mnb.addr, "rejected masternode entry");
                return AnnounceOutcome::of(verdict, own_activated);
            }
        };

        let is_own = self.is_own(&mnb.operator_key);
        if is_own && mnb.protocol_version != svc.params.protocol_version {
            warn!(
                proto = mnb.protocol_version,
                expected = svc.params.protocol_version,
                "own announcement with wrong protocol version, re-activate the masternode"
            );
            return AnnounceOutcome::of(Verdict::reject(), false);
        }

        if !self.nodes.contains_key(&mnb.outpoint) {
            let mut node = MasternodeIdentity::from_announcement(&mnb, simple.ping_valid);
            node.set_collateral_block(collateral_height);
            self.add(node);
        }
        self.note_list_activity(now);
        if is_own {
            if let Some(node) = self.nodes.get_mut(&mnb.outpoint) {
                node.mark_own();
            }
            info!(outpoint = %mnb.outpoint, sig_time = %mnb.sig_time, addr = %mnb.addr, "got new entry for our own masternode");
            own_activated = true;
        }
        svc.peers.relay(WireMessage::Announce(mnb));
        AnnounceOutcome::of(Verdict::accept(), own_activated)
    }

    fn collect_recovery_reply(
        &mut self,
        peer: &PeerInfo,
        hash: MessageHash,
        mnb: Announcement,
        seen_ping: Timestamp,
        svc: &Services<'_>,
        sync: &SyncView,
    ) {
        let now = svc.now();
        if !self.recovery_requests.is_pending(&hash, now) {
            return;
        }
        // each asked peer gets one shot
        let asked = self
            .recovery_requests
            .peek_mut(&hash)
            .is_some_and(|pending| pending.remove(&peer.addr));
        if !asked || ping_time(&mnb) <= seen_ping {
            return;
        }
        let ctx = self.context(&mnb.outpoint, &mnb.operator_key, svc, sync);
        let mut projected = MasternodeIdentity::from_announcement(&mnb, true);
        projected.check(&ctx, true);
        debug!(%hash, addr = %peer.addr, state = %projected.state(), "recovery reply with newer ping");
        if projected.state().is_valid_for_auto_start() {
            self.recovery_replies.entry(hash).or_default().push(mnb);
        }
    }

    /// Merge a newer announcement into the node it refers to. Returns the
    /// verdict and whether this was a remote start of our own node.
    fn update_existing(
        &mut self,
        mnb: &Announcement,
        svc: &Services<'_>,
        sync: &SyncView,
    ) -> (Verdict, bool) {
        let now = svc.now();
        let Some(node) = self.nodes.get(&mnb.outpoint) else {
            return (Verdict::reject(), false);
        };
        if node.sig_time == mnb.sig_time && !mnb.recovery {
            return (Verdict::reject(), false);
        }
        if node.sig_time > mnb.sig_time {
            info!(outpoint = %mnb.outpoint, sig_time = %mnb.sig_time, existing = %node.sig_time, "announcement older than known entry");
            return (Verdict::reject(), false);
        }
        let ctx = self.context(&node.outpoint, &node.operator_key, svc, sync);

        let Some(node) = self.nodes.get_mut(&mnb.outpoint) else {
            return (Verdict::reject(), false);
        };
        node.check(&ctx, false);
        if node.is_pose_banned() {
            info!(outpoint = %mnb.outpoint, "announcement for PoSe-banned masternode");
            return (Verdict::reject(), false);
        }
        if node.collateral_key != mnb.collateral_key {
            warn!(outpoint = %mnb.outpoint, "announcement with mismatched collateral key");
            return (Verdict::penalize(33), false);
        }
        if !mnb.verify_signature(svc.signer) {
            warn!(outpoint = %mnb.outpoint, "announcement signature does not verify");
            return (Verdict::penalize(100), false);
        }

        let recent = node.is_broadcasted_within(MIN_MNB_SECONDS, now);
        let mut own_activated = false;
        if !recent || self.is_own(&mnb.operator_key) {
            info!(outpoint = %mnb.outpoint, addr = %mnb.addr, "got updated masternode entry");
            let (_, activated) = self.update_from_broadcast(mnb, svc, sync);
            own_activated = activated;
            self.note_list_activity(now);
        }
        (Verdict::accept(), own_activated)
    }

    /// Take over a newer announcement, including its ping when valid.
    fn update_from_broadcast(
        &mut self,
        mnb: &Announcement,
        svc: &Services<'_>,
        sync: &SyncView,
    ) -> (bool, bool) {
        let is_own = self.is_own(&mnb.operator_key);
        let ctx = self.context(&mnb.outpoint, &mnb.operator_key, svc, sync);
        let Some(node) = self.nodes.get_mut(&mnb.outpoint) else {
            return (false, false);
        };
        if !node.update_from_announcement(mnb) {
            return (false, false);
        }
        match &mnb.last_ping {
            None => node.last_ping = None,
            Some(ping) => {
                if check_ping(ping, node, true, svc).accepted {
                    node.set_last_ping(ping.clone());
                    self.seen_pings.insert(ping.hash(), ping.clone());
                }
            }
        }

        let mut own_activated = false;
        if is_own {
            node.mark_own();
            if mnb.protocol_version == svc.params.protocol_version {
                own_activated = true;
            } else {
                warn!(
                    proto = mnb.protocol_version,
                    expected = svc.params.protocol_version,
                    "own announcement with wrong protocol version, re-activate the masternode"
                );
                return (false, false);
            }
        }
        node.check(&ctx, false);
        (true, own_activated)
    }

    /// Store an announcement this process created itself.
    pub fn update_list(&mut self, mnb: Announcement, svc: &Services<'_>, sync: &SyncView) {
        let now = svc.now();
        let hash = mnb.hash();
        if let Some(ping) = &mnb.last_ping {
            self.seen_pings.insert(ping.hash(), ping.clone());
        }
        self.seen_announcements.insert(hash, (now, mnb.clone()));
        info!(outpoint = %mnb.outpoint, addr = %mnb.addr, "updating masternode list with own announcement");

        match self.nodes.get(&mnb.outpoint) {
            None => {
                let mut node = MasternodeIdentity::from_announcement(&mnb, mnb.last_ping.is_some());
                if let Some(utxo) = svc.chain.utxo(&mnb.outpoint) {
                    node.set_collateral_block(utxo.height);
                }
                if self.add(node) {
                    self.note_list_activity(now);
                }
            }
            Some(existing) => {
                let old_hash = existing.to_announcement().hash();
                let (updated, _) = self.update_from_broadcast(&mnb, svc, sync);
                if updated {
                    self.note_list_activity(now);
                    if old_hash != hash {
                        self.seen_announcements.remove(&old_hash);
                    }
                }
            }
        }
    }

    /// Periodic sweep: drop spent nodes, ask for recovery of nodes that need
    /// a new start, replay recoveries that reached quorum, expire bookkeeping.
    pub fn check_and_remove(&mut self, svc: &Services<'_>, sync: &SyncView) {
        if !sync.list_synced {
            return;
        }
        let now = svc.now();
        self.check_all(svc, sync);

        let spent: Vec<OutPoint> = self
            .nodes
            .values()
            .filter(|n| n.state() == MasternodeState::OutpointSpent)
            .map(|n| n.outpoint)
            .collect();
        for outpoint in spent {
            if let Some(node) = self.nodes.remove(&outpoint) {
                info!(%outpoint, addr = %node.addr, count = self.nodes.len(), "removing spent masternode");
                self.seen_announcements.remove(&node.to_announcement().hash());
                self.we_asked_entry.retain(|(op, _), _| *op != outpoint);
                self.nodes_removed = true;
            }
        }

        self.schedule_recovery(svc, sync);
        self.replay_recovered(svc, sync);

        // a request may be retried once the retry window passed
        self.recovery_requests
            .sweep(now.minus(MNB_RECOVERY_RETRY_SECONDS));
        self.asked_us.sweep(now);
        self.we_asked.sweep(now);
        self.we_asked_entry.sweep(now);
        self.seen_pings.retain(|_, ping| !ping.is_expired(now));

        info!(summary = %self, "registry maintenance done");
        if self.nodes_removed {
            self.check_and_rebuild_index(now);
            self.nodes_removed = false;
        }
    }

    fn schedule_recovery(&mut self, svc: &Services<'_>, sync: &SyncView) {
        let Some(tip) = svc.chain.current_height() else {
            return;
        };
        if !sync.synced {
            return;
        }
        let now = svc.now();
        let stuck: Vec<(OutPoint, MessageHash)> = self
            .nodes
            .values()
            .filter(|n| n.state() == MasternodeState::NewStartRequired)
            .map(|n| (n.outpoint, n.to_announcement().hash()))
            .collect();

        let mut budget = MNB_RECOVERY_MAX_ASK_ENTRIES;
        let mut rank_addrs: Option<Vec<ServiceAddr>> = None;
        for (outpoint, hash) in stuck {
            if budget == 0 {
                break;
            }
            if self.recovery_requests.contains(&hash) {
                continue;
            }
            if rank_addrs.is_none() {
                let height = svc.random.next_below(tip);
                rank_addrs = Some(
                    self.ranks(height, 0, svc)
                        .into_iter()
                        .map(|(_, n)| n.addr)
                        .collect(),
                );
            }
            let mut requested = BTreeSet::new();
            for addr in rank_addrs.iter().flatten() {
                if requested.len() >= MNB_RECOVERY_QUORUM_TOTAL {
                    break;
                }
                // do not get banned for asking too often
                if self.we_asked_entry.contains(&(outpoint, *addr)) {
                    continue;
                }
                requested.insert(*addr);
                self.scheduled.push((*addr, hash));
            }
            if !requested.is_empty() {
                info!(%outpoint, peers = requested.len(), "recovery initiated");
                budget -= 1;
            }
            self.recovery_requests
                .register(hash, requested, MNB_RECOVERY_WAIT_SECONDS, now);
        }
    }

    fn replay_recovered(&mut self, svc: &Services<'_>, sync: &SyncView) {
        let now = svc.now();
        let ready: Vec<MessageHash> = self
            .recovery_replies
            .keys()
            .filter(|hash| {
                self.recovery_requests
                    .expires_at(hash)
                    .map_or(true, |expires| expires < now)
            })
            .copied()
            .collect();
        for hash in ready {
            let Some(replies) = self.recovery_replies.remove(&hash) else {
                continue;
            };
            let count = replies.len();
            if count < MNB_RECOVERY_QUORUM_REQUIRED {
                debug!(%hash, count, "not enough recovery replies");
                continue;
            }
            if let Some(mut best) = newest_reply(replies) {
                info!(outpoint = %best.outpoint, count, "quorum agrees, reprocessing announcement");
                best.recovery = true;
                self.check_mnb_and_update_list(None, best, svc, sync);
            }
        }
    }

    /// Next address to connect to for recovery asks, with every announcement
    /// hash to ask it about.
    pub fn pop_scheduled_connection(&mut self) -> Option<(ServiceAddr, BTreeSet<MessageHash>)> {
        if self.scheduled.is_empty() {
            return None;
        }
        self.scheduled.sort();
        let front = self.scheduled[0].0;
        let same_addr = self
            .scheduled
            .iter()
            .take_while(|(addr, _)| *addr == front)
            .count();
        let hashes = self
            .scheduled
            .drain(..same_addr)
            .map(|(_, hash)| hash)
            .collect();
        Some((front, hashes))
    }

    /// Open one scheduled recovery connection and ask for the entries.
    /// Returns false when nothing was scheduled.
    pub fn process_scheduled_connection(&mut self, svc: &Services<'_>) -> bool {
        let Some((addr, hashes)) = self.pop_scheduled_connection() else {
            return false;
        };
        let Some(peer) = svc.peers.connect(addr) else {
            debug!(%addr, "could not connect for recovery request");
            return true;
        };
        for hash in hashes {
            if let Some((_, mnb)) = self.seen_announcements.get(&hash) {
                svc.peers
                    .send(peer, WireMessage::GetList(Some(mnb.outpoint)));
            }
        }
        true
    }

    pub fn index(&self) -> &MasternodeIndex {
        &self.index
    }

    /// Index from before the last rebuild, for translating old numbers.
    pub fn index_old(&self) -> &MasternodeIndex {
        &self.index_old
    }

    pub fn take_index_rebuilt(&mut self) -> bool {
        std::mem::take(&mut self.index_rebuilt)
    }

    pub fn check_and_rebuild_index(&mut self, now: Timestamp) {
        if now.diff(self.last_index_rebuild) < MIN_INDEX_REBUILD_TIME as i64 {
            return;
        }
        if self.index.len() <= MAX_EXPECTED_INDEX_SIZE {
            return;
        }
        if self.index.len() <= self.nodes.len() {
            return;
        }
        self.index_old = std::mem::take(&mut self.index);
        for outpoint in self.nodes.keys() {
            self.index.add(*outpoint);
        }
        self.index_rebuilt = true;
        self.last_index_rebuild = now;
        info!(size = self.index.len(), "rebuilt masternode index");
    }

    /// Scan back from the tip for the last block that paid each node.
    ///
    /// Scans the whole vote window on the first run and on non-masternodes,
    /// [`LAST_PAID_SCAN_BLOCKS`] otherwise.
    pub fn update_last_paid(
        &mut self,
        votes: &dyn PayeeVotes,
        storage_limit: u64,
        is_masternode: bool,
        winners_synced: bool,
        svc: &Services<'_>,
    ) {
        let Some(tip) = svc.chain.current_height() else {
            return;
        };
        let max_blocks = if self.full_paid_scan || !is_masternode {
            storage_limit
        } else {
            LAST_PAID_SCAN_BLOCKS
        };
        debug!(tip, max_blocks, first_run = self.full_paid_scan, "updating last paid");

        for node in self.nodes.values_mut() {
            let payee = node.payee();
            let mut height = tip;
            let mut scanned = 0;
            while height > node.last_paid_block && scanned < max_blocks {
                if votes.has_payee_with_votes(height, &payee, LAST_PAID_MIN_VOTES) {
                    let reward = svc.chain.masternode_payment(height);
                    let paid = svc
                        .chain
                        .coinbase_outputs(height)
                        .is_some_and(|outs| outs.iter().any(|(s, a)| *s == payee && *a == reward));
                    if paid {
                        let time = svc.chain.block_time_at(height).unwrap_or_default();
                        node.set_last_paid(height, time);
                        break;
                    }
                }
                height -= 1;
                scanned += 1;
            }
        }
        // every run is a first run until the winners list is synced
        self.full_paid_scan = !winners_synced;
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.seen_announcements.clear();
        self.seen_pings.clear();
        self.asked_us.clear();
        self.we_asked.clear();
        self.we_asked_entry.clear();
        self.recovery_requests.clear();
        self.recovery_replies.clear();
        self.scheduled.clear();
        self.index.clear();
        self.last_watchdog_vote = Timestamp::EPOCH;
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: HashSet<&OutPoint> = self.we_asked_entry.keys().map(|(op, _)| op).collect();
        write!(
            f,
            "Apollonnodes: {}, peers who asked us for Apollonnode list: {}, peers we asked for Apollonnode list: {}, entries in Apollonnode list we asked for: {}, apollonnode index size: {}",
            self.nodes.len(),
            self.asked_us.len(),
            self.we_asked.len(),
            entries.len(),
            self.index.len()
        )
    }
}

/// Reply with the newest ping; the earliest arrival wins a tie.
fn newest_reply(replies: Vec<Announcement>) -> Option<Announcement> {
    let mut best: Option<Announcement> = None;
    for reply in replies {
        let newer = best
            .as_ref()
            .map_or(true, |b| ping_time(&reply) > ping_time(b));
        if newer {
            best = Some(reply);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::announce::new_ping;
    use crate::announce::tests::{Fixture, NOW};
    use apollon_types::{Amount, KeyPair, PeerId};
    use apollon_providers::ChainState;

    fn peer(id: u64, addr: ServiceAddr) -> PeerInfo {
        PeerInfo::new(PeerId(id), addr, 90030)
    }

    fn remote_peer() -> PeerInfo {
        peer(1, ServiceAddr::v4(5, 5, 5, 5, 8168))
    }

    /// Announce masternode `n` with a clock set to `at`, processed at `NOW`.
    fn announced_node(
        fx: &Fixture,
        registry: &mut Registry,
        n: u8,
        at: u64,
    ) -> (Announcement, KeyPair) {
        fx.clock.set(at);
        let (mnb, operator) = fx.announce(n);
        fx.clock.set(NOW);
        let sync = SyncView::all_synced();
        let outcome =
            registry.check_mnb_and_update_list(Some(&remote_peer()), mnb.clone(), &fx.svc(), &sync);
        assert!(outcome.verdict.accepted);
        (mnb, operator)
    }

    /// Same, followed by a fresh ping so the node is enabled.
    fn enabled_node(
        fx: &Fixture,
        registry: &mut Registry,
        n: u8,
        at: u64,
    ) -> (Announcement, KeyPair) {
        let (mnb, operator) = announced_node(fx, registry, n, at);
        let ping = new_ping(mnb.outpoint, &operator.private, &fx.svc()).expect("ping");
        let sync = SyncView::all_synced();
        assert!(registry.process_ping(&remote_peer(), ping, &fx.svc(), &sync).accepted);
        (mnb, operator)
    }

    #[test]
    fn announcement_is_added_and_relayed_once() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let sync = SyncView::all_synced();
        let (mnb, _) = fx.announce(1);

        let outcome = registry.check_mnb_and_update_list(Some(&remote_peer()), mnb.clone(), &fx.svc(), &sync);
        assert_eq!(outcome, AnnounceOutcome::of(Verdict::accept(), false));
        assert_eq!(registry.len(), 1);
        assert_eq!(fx.peers.relayed().len(), 1);
        assert!(registry.last_list_activity().is_some());
        assert_eq!(registry.get(&mnb.outpoint).and_then(|n| n.collateral_block()), Some(10));

        // duplicate is accepted without relaying again
        let again = registry.check_mnb_and_update_list(Some(&remote_peer()), mnb, &fx.svc(), &sync);
        assert!(again.verdict.accepted);
        assert_eq!(fx.peers.relayed().len(), 1);
        assert!(!registry.add(registry.snapshot()[0].clone()));
    }

    #[test]
    fn foreign_embedded_ping_is_not_trusted() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let sync = SyncView::all_synced();
        let (mut mnb, _) = fx.announce(1);

        // someone else's key, for someone else's collateral
        let stranger = apollon_crypto::keypair_from_seed(&[99; 32]);
        let elsewhere = OutPoint::new(apollon_types::TxHash::new([42; 32]), 7);
        mnb.last_ping = Some(new_ping(elsewhere, &stranger.private, &fx.svc()).expect("ping"));
        let outcome = registry.check_mnb_and_update_list(Some(&remote_peer()), mnb.clone(), &fx.svc(), &sync);
        assert!(outcome.verdict.accepted);
        let node = registry.get(&mnb.outpoint).expect("admitted");
        assert!(node.last_ping.is_none());
        assert_eq!(node.state(), MasternodeState::Expired);

        // right outpoint, wrong signer
        let (mut mnb, _) = fx.announce(2);
        mnb.last_ping = Some(new_ping(mnb.outpoint, &stranger.private, &fx.svc()).expect("ping"));
        registry.check_mnb_and_update_list(Some(&remote_peer()), mnb.clone(), &fx.svc(), &sync);
        assert!(registry.get(&mnb.outpoint).expect("admitted").last_ping.is_none());

        // right signer, wrong outpoint
        let (mut mnb, own) = fx.announce(3);
        mnb.last_ping = Some(new_ping(elsewhere, &own.private, &fx.svc()).expect("ping"));
        registry.check_mnb_and_update_list(Some(&remote_peer()), mnb.clone(), &fx.svc(), &sync);
        assert!(registry.get(&mnb.outpoint).expect("admitted").last_ping.is_none());
    }

    #[test]
    fn young_collateral_is_forgotten_for_retry() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let sync = SyncView::all_synced();
        let (mnb, _) = fx.announce(1);
        fx.chain.add_utxo(
            mnb.outpoint,
            apollon_providers::Utxo {
                amount: fx.params.collateral,
                height: 199,
                script: mnb.payee(),
            },
        );
        let outcome = registry.check_mnb_and_update_list(Some(&remote_peer()), mnb.clone(), &fx.svc(), &sync);
        assert!(!outcome.verdict.accepted);
        assert!(registry.seen_announcement(&mnb.hash()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn newer_announcement_rotates_keys_and_drops_old_hash() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let sync = SyncView::all_synced();
        let (old, _) = enabled_node(&fx, &mut registry, 1, NOW - 1000);

        let (fresh, operator) = fx.announce(1);
        assert_ne!(fresh.hash(), old.hash());
        let outcome = registry.check_mnb_and_update_list(Some(&remote_peer()), fresh.clone(), &fx.svc(), &sync);
        assert!(outcome.verdict.accepted);
        let node = registry.get(&fresh.outpoint).expect("node");
        assert_eq!(node.sig_time, fresh.sig_time);
        assert_eq!(node.operator_key, operator.public);
        assert!(registry.seen_announcement(&old.hash()).is_none());
        assert!(registry.seen_announcement(&fresh.hash()).is_some());

        // replaying the older one is a no-op
        let outcome = registry.check_mnb_and_update_list(Some(&remote_peer()), old, &fx.svc(), &sync);
        assert_eq!(outcome.verdict, Verdict::reject());
    }

    #[test]
    fn mismatched_collateral_key_is_penalized() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let sync = SyncView::all_synced();
        let (mnb, _) = enabled_node(&fx, &mut registry, 1, NOW - 1000);

        let thief = apollon_crypto::keypair_from_seed(&[42; 32]);
        let mut forged = mnb.clone();
        forged.collateral_key = thief.public;
        forged.sig_time = Timestamp::new(NOW);
        forged.sign(&thief.private, &apollon_crypto::Ed25519Signer);
        let outcome = registry.check_mnb_and_update_list(Some(&remote_peer()), forged, &fx.svc(), &sync);
        assert_eq!(outcome.verdict, Verdict::penalize(33));
    }

    #[test]
    fn ping_for_known_node_is_relayed() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let (mnb, _) = enabled_node(&fx, &mut registry, 1, NOW - 1000);
        assert_eq!(registry.node_state(&mnb.outpoint), MasternodeState::Enabled);
        assert!(fx
            .peers
            .relayed()
            .iter()
            .any(|m| matches!(m, WireMessage::Ping(p) if p.outpoint == mnb.outpoint)));
        assert!(registry.is_pinged_within(&mnb.outpoint, 10, Timestamp::new(NOW)));
    }

    #[test]
    fn forged_ping_does_not_shadow_the_genuine_one() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let sync = SyncView::all_synced();
        let (mnb, operator) = enabled_node(&fx, &mut registry, 1, NOW - 1000);

        fx.clock.advance(MIN_MNP_SECONDS);
        let genuine = new_ping(mnb.outpoint, &operator.private, &fx.svc()).expect("ping");
        let mut forged = genuine.clone();
        forged.sign(&apollon_crypto::keypair_from_seed(&[99; 32]).private, &apollon_crypto::Ed25519Signer);

        let verdict = registry.process_ping(&remote_peer(), forged, &fx.svc(), &sync);
        assert_eq!(verdict, Verdict::penalize(33));
        assert!(!registry.has_seen_ping(&genuine.hash()));

        assert!(registry.process_ping(&remote_peer(), genuine.clone(), &fx.svc(), &sync).accepted);
        assert_eq!(registry.get(&mnb.outpoint).and_then(|n| n.last_ping.clone()), Some(genuine));
    }

    #[test]
    fn ping_for_unknown_node_asks_once() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let sync = SyncView::all_synced();
        let (outpoint, _, operator) = fx.masternode(3);
        let ping = new_ping(outpoint, &operator.private, &fx.svc()).expect("ping");
        let from = remote_peer();

        let verdict = registry.process_ping(&from, ping.clone(), &fx.svc(), &sync);
        assert!(!verdict.accepted);
        assert_eq!(
            fx.peers.sent_to(from.id),
            vec![WireMessage::GetList(Some(outpoint))]
        );

        // same ping again is deduplicated
        registry.process_ping(&from, ping, &fx.svc(), &sync);
        // a different ping within the re-ask window does not ask again
        fx.clock.advance(60);
        let other = new_ping(outpoint, &operator.private, &fx.svc()).expect("ping");
        registry.process_ping(&from, other, &fx.svc(), &sync);
        assert_eq!(fx.peers.sent_to(from.id).len(), 1);
    }

    #[test]
    fn get_list_serves_synced_peers_once() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let (a, _) = enabled_node(&fx, &mut registry, 1, NOW - 1000);
        enabled_node(&fx, &mut registry, 2, NOW - 1000);
        fx.peers.reset();
        let asker = peer(7, ServiceAddr::v4(6, 6, 6, 6, 8168));

        let unsynced = SyncView::default();
        assert_eq!(registry.handle_get_list(&asker, None, &fx.svc(), &unsynced), Verdict::reject());
        assert!(fx.peers.sent().is_empty());

        let sync = SyncView::all_synced();
        assert!(registry.handle_get_list(&asker, None, &fx.svc(), &sync).accepted);
        let sent = fx.peers.sent_to(asker.id);
        assert_eq!(sent.len(), 5);
        assert_eq!(
            sent.last(),
            Some(&WireMessage::SyncStatus { item: SyncItem::List, count: 2 })
        );

        assert_eq!(
            registry.handle_get_list(&asker, None, &fx.svc(), &sync),
            Verdict::penalize(34)
        );

        // single entries are always fine
        fx.peers.reset();
        assert!(registry.handle_get_list(&asker, Some(a.outpoint), &fx.svc(), &sync).accepted);
        assert_eq!(fx.peers.sent_to(asker.id).len(), 2);
    }

    #[test]
    fn list_is_requested_once_per_window() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let target = remote_peer();
        registry.dseg_update(&target, &fx.svc());
        registry.dseg_update(&target, &fx.svc());
        assert_eq!(fx.peers.sent_to(target.id), vec![WireMessage::GetList(None)]);

        let lan = peer(2, ServiceAddr::v4(10, 0, 0, 2, 8168));
        registry.dseg_update(&lan, &fx.svc());
        registry.dseg_update(&lan, &fx.svc());
        assert_eq!(fx.peers.sent_to(lan.id).len(), 2);

        fx.clock.advance(DSEG_UPDATE_SECONDS);
        registry.dseg_update(&target, &fx.svc());
        assert_eq!(fx.peers.sent_to(target.id).len(), 2);
    }

    #[test]
    fn spent_nodes_are_removed() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let sync = SyncView::all_synced();
        let (mnb, _) = enabled_node(&fx, &mut registry, 1, NOW - 1000);
        enabled_node(&fx, &mut registry, 2, NOW - 1000);

        fx.chain.spend(&mnb.outpoint);
        fx.clock.advance(10);
        registry.check_and_remove(&fx.svc(), &sync);
        assert_eq!(registry.len(), 1);
        assert!(!registry.has(&mnb.outpoint));
        assert!(registry.seen_announcement(&mnb.hash()).is_none());
    }

    #[test]
    fn maintenance_waits_for_list_sync() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let (mnb, _) = enabled_node(&fx, &mut registry, 1, NOW - 1000);
        fx.chain.spend(&mnb.outpoint);
        registry.check_and_remove(&fx.svc(), &SyncView::default());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn recovery_by_quorum_revives_node() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let sync = SyncView::all_synced();
        for n in 1..=9 {
            enabled_node(&fx, &mut registry, n, NOW - 1000);
        }
        // silent for longer than the new start threshold
        let (stuck, operator) = announced_node(&fx, &mut registry, 20, NOW - 20_000);
        fx.clock.advance(5);
        registry.check_and_remove(&fx.svc(), &sync);
        assert_eq!(registry.node_state(&stuck.outpoint), MasternodeState::NewStartRequired);

        let mut scheduled = Vec::new();
        while let Some((addr, hashes)) = registry.pop_scheduled_connection() {
            assert!(hashes.contains(&stuck.hash()));
            scheduled.push(addr);
        }
        assert_eq!(scheduled.len(), 9);

        // six of the asked peers saw a fresher ping
        let fresh = new_ping(stuck.outpoint, &operator.private, &fx.svc()).expect("ping");
        let mut reply = stuck.clone();
        reply.last_ping = Some(fresh);
        for (i, addr) in scheduled.iter().take(MNB_RECOVERY_QUORUM_REQUIRED).enumerate() {
            let from = peer(100 + i as u64, *addr);
            registry.check_mnb_and_update_list(Some(&from), reply.clone(), &fx.svc(), &sync);
        }
        // replies from peers we did not ask are ignored
        let stranger = peer(200, ServiceAddr::v4(9, 9, 9, 9, 8168));
        registry.check_mnb_and_update_list(Some(&stranger), reply.clone(), &fx.svc(), &sync);
        assert_eq!(registry.recovery_replies.get(&stuck.hash()).map(Vec::len), Some(6));

        fx.clock.advance(MNB_RECOVERY_WAIT_SECONDS + 1);
        registry.check_and_remove(&fx.svc(), &sync);
        assert_eq!(registry.node_state(&stuck.outpoint), MasternodeState::Enabled);
        assert!(registry.recovery_replies.is_empty());
    }

    #[test]
    fn recovery_needs_quorum() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let sync = SyncView::all_synced();
        for n in 1..=9 {
            enabled_node(&fx, &mut registry, n, NOW - 1000);
        }
        let (stuck, operator) = announced_node(&fx, &mut registry, 20, NOW - 20_000);
        fx.clock.advance(5);
        registry.check_and_remove(&fx.svc(), &sync);
        let (addr, _) = registry.pop_scheduled_connection().expect("scheduled");

        let mut reply = stuck.clone();
        reply.last_ping = Some(new_ping(stuck.outpoint, &operator.private, &fx.svc()).expect("ping"));
        registry.check_mnb_and_update_list(Some(&peer(100, addr)), reply, &fx.svc(), &sync);

        fx.clock.advance(MNB_RECOVERY_WAIT_SECONDS + 1);
        registry.check_and_remove(&fx.svc(), &sync);
        assert_eq!(registry.node_state(&stuck.outpoint), MasternodeState::NewStartRequired);
    }

    #[test]
    fn newest_reply_wins_and_first_breaks_ties() {
        let fx = Fixture::new();
        let (mnb, operator) = fx.announce(1);
        let mut a = mnb.clone();
        let mut b = mnb.clone();
        let mut c = mnb.clone();
        fx.clock.advance(100);
        a.last_ping = new_ping(mnb.outpoint, &operator.private, &fx.svc()).ok();
        b.last_ping = a.last_ping.clone();
        b.addr = ServiceAddr::v4(1, 1, 1, 1, 8168);
        fx.clock.advance(100);
        c.last_ping = new_ping(mnb.outpoint, &operator.private, &fx.svc()).ok();
        assert_eq!(newest_reply(vec![a.clone(), b.clone()]), Some(a.clone()));
        assert_eq!(newest_reply(vec![a, c.clone(), b]), Some(c));
        assert_eq!(newest_reply(Vec::new()), None);
    }

    #[test]
    fn ranks_are_consistent() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        for n in 1..=5 {
            enabled_node(&fx, &mut registry, n, NOW - 1000);
        }
        let ranks = registry.ranks(150, 0, &fx.svc());
        assert_eq!(ranks.len(), 5);
        for (rank, node) in &ranks {
            assert_eq!(registry.rank(&node.outpoint, 150, 0, true, &fx.svc()), Some(*rank));
            assert_eq!(
                registry.by_rank(*rank, 150, 0, true, &fx.svc()).map(|n| n.outpoint),
                Some(node.outpoint)
            );
            assert_eq!(registry.get(&node.outpoint).map(|n| n.rank), Some(*rank));
        }
        assert!(registry.ranks(10_000, 0, &fx.svc()).is_empty());
        assert_eq!(registry.by_rank(6, 150, 0, true, &fx.svc()), None);
    }

    #[test]
    fn random_pick_respects_exclusions() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let (a, _) = enabled_node(&fx, &mut registry, 1, NOW - 1000);
        let (b, _) = enabled_node(&fx, &mut registry, 2, NOW - 1000);
        let picked = registry
            .find_random_not_in(&[a.outpoint], 0, &fx.svc())
            .map(|n| n.outpoint);
        assert_eq!(picked, Some(b.outpoint));
        assert!(registry
            .find_random_not_in(&[a.outpoint, b.outpoint], 0, &fx.svc())
            .is_none());
    }

    #[test]
    fn scheduled_connections_group_by_address() {
        let mut registry = Registry::new();
        let x = ServiceAddr::v4(1, 1, 1, 1, 8168);
        let y = ServiceAddr::v4(2, 2, 2, 2, 8168);
        let h1 = MessageHash::new([1; 32]);
        let h2 = MessageHash::new([2; 32]);
        registry.scheduled = vec![(y, h1), (x, h2), (x, h1)];
        let (addr, hashes) = registry.pop_scheduled_connection().expect("first");
        assert_eq!(addr, x);
        assert_eq!(hashes, BTreeSet::from([h1, h2]));
        assert_eq!(registry.pop_scheduled_connection().map(|(a, _)| a), Some(y));
        assert!(registry.pop_scheduled_connection().is_none());
    }

    #[test]
    fn index_rebuild_needs_growth_and_cooldown() {
        let mut registry = Registry::new();
        for i in 0..=MAX_EXPECTED_INDEX_SIZE as u32 {
            registry
                .index
                .add(OutPoint::new(apollon_types::TxHash::new([7; 32]), i));
        }
        let live = MasternodeIdentity::from_announcement(
            &Fixture::new().announce(1).0,
            true,
        );
        registry.add(live.clone());

        let t = Timestamp::new(NOW);
        registry.check_and_rebuild_index(t);
        assert!(registry.take_index_rebuilt());
        assert_eq!(registry.index().len(), 1);
        assert_eq!(registry.index().index_of(&live.outpoint), Some(0));
        assert_eq!(registry.index_old().len(), MAX_EXPECTED_INDEX_SIZE + 2);

        // small index, nothing to do
        registry.check_and_rebuild_index(t.plus(MIN_INDEX_REBUILD_TIME));
        assert!(!registry.take_index_rebuilt());
    }

    struct Tally(Vec<(u64, PayeeScript)>);

    impl PayeeVotes for Tally {
        fn has_payee_with_votes(&self, height: u64, payee: &PayeeScript, _min: usize) -> bool {
            self.0.iter().any(|(h, p)| *h == height && p == payee)
        }
    }

    #[test]
    fn last_paid_needs_votes_and_exact_payment() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let (mnb, _) = enabled_node(&fx, &mut registry, 1, NOW - 1000);
        let payee = mnb.payee();
        let reward = fx.chain.masternode_payment(190);
        fx.chain.set_coinbase(190, vec![(payee.clone(), reward)]);
        fx.chain
            .set_coinbase(195, vec![(payee.clone(), reward + Amount::new(1))]);

        let votes = Tally(vec![(190, payee.clone()), (195, payee.clone())]);
        registry.update_last_paid(&votes, 5000, true, false, &fx.svc());
        let node = registry.get(&mnb.outpoint).expect("node");
        assert_eq!(node.last_paid_block, 190);
        assert_eq!(node.last_paid_time, fx.chain.block_time_at(190).unwrap_or_default());

        // no votes, no payment
        let (other, _) = enabled_node(&fx, &mut registry, 2, NOW - 1000);
        fx.chain.set_coinbase(198, vec![(other.payee(), reward)]);
        registry.update_last_paid(&Tally(Vec::new()), 5000, true, true, &fx.svc());
        assert_eq!(registry.get(&other.outpoint).map(|n| n.last_paid_block), Some(0));
    }

    #[test]
    fn summary_and_clear() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        enabled_node(&fx, &mut registry, 1, NOW - 1000);
        assert!(registry
            .to_string()
            .starts_with("Apollonnodes: 1, peers who asked us for Apollonnode list: 0"));
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.seen_announcement_count(), 0);
        assert!(registry.index().is_empty());
    }

    #[test]
    fn watchdog_activity() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let (mnb, _) = enabled_node(&fx, &mut registry, 1, NOW - 1000);
        let now = Timestamp::new(NOW);
        assert!(!registry.is_watchdog_active(now));
        registry.update_watchdog_vote_time(&mnb.outpoint, now);
        assert!(registry.is_watchdog_active(now.plus(WATCHDOG_MAX_SECONDS)));
        assert!(!registry.is_watchdog_active(now.plus(WATCHDOG_MAX_SECONDS + 1)));
    }

    #[test]
    fn own_announcement_reports_remote_start() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let sync = SyncView::all_synced();
        let (mnb, _) = fx.announce(1);
        registry.set_local(Some(LocalNode {
            operator_key: mnb.operator_key,
            outpoint: None,
        }));
        let outcome = registry.check_mnb_and_update_list(Some(&remote_peer()), mnb.clone(), &fx.svc(), &sync);
        assert_eq!(outcome, AnnounceOutcome::of(Verdict::accept(), true));
        assert!(registry.get(&mnb.outpoint).is_some_and(|n| n.is_pose_verified()));
    }

    #[test]
    fn registry_survives_bincode_round_trip() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let (mnb, _) = enabled_node(&fx, &mut registry, 1, NOW - 1000);
        let bytes = bincode::serialize(&registry).expect("encode");
        let restored: Registry = bincode::deserialize(&bytes).expect("decode");
        assert_eq!(restored.len(), 1);
        let node = restored.get(&mnb.outpoint).expect("node");
        assert_eq!(node.state(), MasternodeState::Enabled);
        assert_eq!(node.last_ping, registry.get(&mnb.outpoint).and_then(|n| n.last_ping.clone()));
        assert!(restored.seen_announcement(&mnb.hash()).is_some());
        assert!(restored.full_paid_scan);
    }
}
