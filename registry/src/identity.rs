//! One masternode as tracked by the registry.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use apollon_messages::{Announcement, Ping};
use apollon_types::constants::{
    CHECK_SECONDS, EXPIRATION_SECONDS, MIN_MNP_SECONDS, NEW_START_REQUIRED_SECONDS,
    POSE_BAN_MAX_SCORE, WATCHDOG_MAX_SECONDS,
};
use apollon_types::{
    MasternodeState, OutPoint, PayeeScript, PublicKey, ServiceAddr, Signature, Timestamp,
};

/// Facts a state evaluation depends on besides the identity itself.
#[derive(Clone, Copy, Debug)]
pub struct CheckContext {
    pub now: Timestamp,
    pub tip: u64,
    pub collateral_unspent: bool,
    pub registry_size: usize,
    pub min_payments_proto: u32,
    pub proto_v1: u32,
    pub proto_v2: u32,
    /// The identity carries this node's operational key.
    pub is_own: bool,
    pub list_synced: bool,
    /// Watchdog mode is globally active and the sync finished.
    pub watchdog_active: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    To(MasternodeState),
    Ban { until: u64 },
}

/// Result of one evaluation. `unban` lowers the PoSe score once the ban
/// height was reached; it combines with whatever transition follows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Evaluation {
    pub unban: bool,
    pub transition: Transition,
}

impl Evaluation {
    fn stay() -> Self {
        Self {
            unban: false,
            transition: Transition::Unchanged,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeIdentity {
    pub outpoint: OutPoint,
    pub addr: ServiceAddr,
    pub collateral_key: PublicKey,
    pub operator_key: PublicKey,
    pub last_ping: Option<Ping>,
    pub signature: Signature,
    pub sig_time: Timestamp,
    pub protocol_version: u32,
    state: MasternodeState,
    pose_score: i32,
    pose_ban_height: u64,
    pub last_paid_block: u64,
    pub last_paid_time: Timestamp,
    /// Height of the block that created the collateral output.
    collateral_block: Option<u64>,
    #[serde(skip)]
    last_checked: Option<Timestamp>,
    pub last_watchdog_vote: Timestamp,
    /// Position in the last computed ranking, 0 when unranked.
    pub rank: u32,
}

impl MasternodeIdentity {
    /// New identity from an announcement. An announcement whose embedded
    /// ping failed validation starts out expired and without a ping.
    pub fn from_announcement(mnb: &Announcement, ping_valid: bool) -> Self {
        let (state, last_ping) = if ping_valid && mnb.last_ping.is_some() {
            (MasternodeState::Enabled, mnb.last_ping.clone())
        } else {
            (MasternodeState::Expired, None)
        };
        Self {
            outpoint: mnb.outpoint,
            addr: mnb.addr,
            collateral_key: mnb.collateral_key,
            operator_key: mnb.operator_key,
            last_ping,
            signature: mnb.signature.clone(),
            sig_time: mnb.sig_time,
            protocol_version: mnb.protocol_version,
            state,
            pose_score: 0,
            pose_ban_height: 0,
            last_paid_block: 0,
            last_paid_time: Timestamp::EPOCH,
            collateral_block: None,
            last_checked: None,
            last_watchdog_vote: mnb.sig_time,
            rank: 0,
        }
    }

    /// Rebuild the announcement this identity was admitted from.
    pub fn to_announcement(&self) -> Announcement {
        Announcement {
            outpoint: self.outpoint,
            addr: self.addr,
            collateral_key: self.collateral_key,
            operator_key: self.operator_key,
            signature: self.signature.clone(),
            sig_time: self.sig_time,
            protocol_version: self.protocol_version,
            last_ping: self.last_ping.clone(),
            recovery: false,
        }
    }

    pub fn state(&self) -> MasternodeState {
        self.state
    }

    pub fn payee(&self) -> PayeeScript {
        PayeeScript::for_key(&self.collateral_key)
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    pub fn is_valid_for_payment(&self) -> bool {
        self.state.is_valid_for_payment()
    }

    pub fn pose_score(&self) -> i32 {
        self.pose_score
    }

    pub fn pose_ban_height(&self) -> u64 {
        self.pose_ban_height
    }

    pub fn is_pose_banned(&self) -> bool {
        self.state == MasternodeState::PoseBan
    }

    pub fn is_pose_verified(&self) -> bool {
        self.pose_score <= -POSE_BAN_MAX_SCORE
    }

    pub fn increase_pose_score(&mut self) {
        if self.pose_score < POSE_BAN_MAX_SCORE {
            self.pose_score += 1;
        }
    }

    pub fn decrease_pose_score(&mut self) {
        if self.pose_score > -POSE_BAN_MAX_SCORE {
            self.pose_score -= 1;
        }
    }

    /// Our own node never gets banned by its peers' opinion.
    pub fn mark_own(&mut self) {
        self.pose_score = -POSE_BAN_MAX_SCORE;
    }

    pub fn is_pinged_within(&self, secs: u64, at: Timestamp) -> bool {
        match &self.last_ping {
            Some(ping) => at.diff(ping.sig_time).unsigned_abs() < secs,
            None => false,
        }
    }

    pub fn is_broadcasted_within(&self, secs: u64, now: Timestamp) -> bool {
        now.diff(self.sig_time) < secs as i64
    }

    pub fn last_seen(&self) -> Timestamp {
        self.last_ping
            .as_ref()
            .map(|p| p.sig_time)
            .unwrap_or(self.sig_time)
    }

    pub fn collateral_block(&self) -> Option<u64> {
        self.collateral_block
    }

    pub fn set_collateral_block(&mut self, height: u64) {
        self.collateral_block = Some(height);
    }

    /// Confirmations of the collateral at `tip`, `None` until the creating
    /// block is known.
    pub fn collateral_age(&self, tip: u64) -> Option<u64> {
        self.collateral_block
            .map(|height| (tip + 1).saturating_sub(height))
    }

    pub fn set_last_ping(&mut self, ping: Ping) {
        self.last_ping = Some(ping);
    }

    pub fn set_last_paid(&mut self, block: u64, time: Timestamp) {
        self.last_paid_block = block;
        self.last_paid_time = time;
    }

    /// Take over the fields of a newer announcement. Returns `false` when
    /// the announcement is not newer and not a recovery replay.
    ///
    /// The embedded ping is handled by the caller, which has to validate it
    /// against the updated operational key.
    pub fn update_from_announcement(&mut self, mnb: &Announcement) -> bool {
        if mnb.sig_time <= self.sig_time && !mnb.recovery {
            return false;
        }
        self.operator_key = mnb.operator_key;
        self.sig_time = mnb.sig_time;
        self.signature = mnb.signature.clone();
        self.protocol_version = mnb.protocol_version;
        self.addr = mnb.addr;
        self.pose_score = 0;
        self.pose_ban_height = 0;
        self.last_checked = None;
        true
    }

    /// Decide the next state. Pure; see [`MasternodeIdentity::check`].
    pub fn evaluate(&self, ctx: &CheckContext) -> Evaluation {
        use MasternodeState::*;

        if self.state.is_terminal() {
            return Evaluation::stay();
        }
        if !ctx.collateral_unspent {
            return Evaluation {
                unban: false,
                transition: Transition::To(OutpointSpent),
            };
        }

        let mut unban = false;
        if self.state == PoseBan {
            if ctx.tip < self.pose_ban_height {
                return Evaluation::stay();
            }
            // back on probation, the usual checks decide the state
            unban = true;
        } else if self.pose_score >= POSE_BAN_MAX_SCORE {
            return Evaluation {
                unban: false,
                transition: Transition::Ban {
                    until: ctx.tip + ctx.registry_size as u64,
                },
            };
        }
        let to = |state| Evaluation {
            unban,
            transition: Transition::To(state),
        };

        let require_update = self.protocol_version < ctx.min_payments_proto
            || (ctx.is_own
                && (self.protocol_version < ctx.proto_v1 || self.protocol_version > ctx.proto_v2));
        if require_update {
            return to(UpdateRequired);
        }

        // keep old nodes around while the list syncs so they can get a ping in
        let wait_for_ping = !ctx.list_synced && !self.is_pinged_within(MIN_MNP_SECONDS, ctx.now);
        if wait_for_ping && !ctx.is_own && self.state.awaits_ping() {
            return Evaluation {
                unban,
                transition: Transition::Unchanged,
            };
        }

        if !wait_for_ping || ctx.is_own {
            if !self.is_pinged_within(NEW_START_REQUIRED_SECONDS, ctx.now) {
                return to(NewStartRequired);
            }
            if ctx.watchdog_active && ctx.now.diff(self.last_watchdog_vote) > WATCHDOG_MAX_SECONDS as i64
            {
                return to(WatchdogExpired);
            }
            if !self.is_pinged_within(EXPIRATION_SECONDS, ctx.now) {
                return to(Expired);
            }
        }

        let ping_time = self.last_ping.as_ref().map(|p| p.sig_time).unwrap_or_default();
        if ping_time.diff(self.sig_time) < MIN_MNP_SECONDS as i64 {
            return to(PreEnabled);
        }
        to(Enabled)
    }

    /// Re-evaluate the state, at most once per [`CHECK_SECONDS`] unless
    /// forced. Returns the previous state when it changed.
    pub fn check(&mut self, ctx: &CheckContext, force: bool) -> Option<MasternodeState> {
        if !force {
            if let Some(last) = self.last_checked {
                if ctx.now.diff(last) < CHECK_SECONDS as i64 {
                    return None;
                }
            }
        }
        self.last_checked = Some(ctx.now);

        let eval = self.evaluate(ctx);
        if eval.unban {
            info!(outpoint = %self.outpoint, "masternode is unbanned and back in list");
            self.decrease_pose_score();
        }
        let previous = self.state;
        match eval.transition {
            Transition::Unchanged => {}
            Transition::To(state) => self.state = state,
            Transition::Ban { until } => {
                self.state = MasternodeState::PoseBan;
                self.pose_ban_height = until;
                info!(outpoint = %self.outpoint, until, "masternode banned by PoSe");
            }
        }
        if previous != self.state {
            debug!(outpoint = %self.outpoint, from = %previous, to = %self.state, "masternode state changed");
            Some(previous)
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) fn force_state(&mut self, state: MasternodeState) {
        self.state = state;
    }
}
