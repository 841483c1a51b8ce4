//! Announcement and ping validation, and construction of our own.
//!
//! Everything here is a pure function of the message, the node it refers
//! to and the injected collaborators. Registry bookkeeping (seen maps,
//! relays) happens in [`crate::Registry`].

use tracing::{debug, warn};

use apollon_messages::{Announcement, Ping};
use apollon_providers::Services;
use apollon_types::constants::{
    MAX_FUTURE_SECONDS, MIN_MNP_SECONDS, PING_ANCHOR_DEPTH, PING_MAX_ANCHOR_AGE,
};
use apollon_types::{MasternodeState, OutPoint, PrivateKey, PublicKey, ServiceAddr, Timestamp};

use crate::{MasternodeIdentity, RegistryError, Verdict};

/// The operational identity of this process, when it runs a masternode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalNode {
    pub operator_key: PublicKey,
    /// Collateral once activation picked one.
    pub outpoint: Option<OutPoint>,
}

impl LocalNode {
    pub fn is_active(&self, outpoint: &OutPoint, operator_key: &PublicKey) -> bool {
        self.outpoint.as_ref() == Some(outpoint) && self.operator_key == *operator_key
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimpleCheck {
    pub verdict: Verdict,
    /// Whether the embedded ping passed its own checks. A bad ping does not
    /// reject the announcement; the node just starts out expired.
    pub ping_valid: bool,
}

/// Cheap checks that need no registry or UTXO state.
pub fn simple_check(mnb: &Announcement, svc: &Services<'_>) -> SimpleCheck {
    let now = svc.now();
    let network = svc.params.network;
    let reject = |verdict| SimpleCheck {
        verdict,
        ping_valid: false,
    };

    if !mnb.addr.is_valid_for(network) {
        debug!(outpoint = %mnb.outpoint, addr = %mnb.addr, "announcement with invalid address");
        return reject(Verdict::reject());
    }
    if mnb.sig_time > now.plus(MAX_FUTURE_SECONDS) {
        debug!(outpoint = %mnb.outpoint, "announcement signed too far in the future");
        return reject(Verdict::penalize(1));
    }

    let ping_valid = match &mnb.last_ping {
        Some(ping) => embedded_ping_valid(mnb, ping, svc),
        None => false,
    };

    if mnb.protocol_version < svc.params.min_payments_proto() {
        debug!(outpoint = %mnb.outpoint, proto = mnb.protocol_version, "announcement from outdated protocol");
        return reject(Verdict::reject());
    }
    if !svc.signer.is_valid_key(&mnb.collateral_key) || !svc.signer.is_valid_key(&mnb.operator_key) {
        warn!(outpoint = %mnb.outpoint, "announcement with malformed keys");
        return reject(Verdict::penalize(100));
    }
    if let Err(reason) = network.check_port(mnb.addr.port) {
        debug!(outpoint = %mnb.outpoint, %reason, "announcement port rejected");
        return reject(Verdict::reject());
    }

    SimpleCheck {
        verdict: Verdict::accept(),
        ping_valid,
    }
}

/// The embedded ping is not covered by the announcement signature, so it
/// must be signed by the announced operational key for the same outpoint.
fn embedded_ping_valid(mnb: &Announcement, ping: &Ping, svc: &Services<'_>) -> bool {
    if ping.outpoint != mnb.outpoint || !ping.verify_signature(&mnb.operator_key, svc.signer) {
        debug!(outpoint = %mnb.outpoint, "announcement carries a foreign ping");
        return false;
    }
    ping_simple_check(ping, svc).accepted
}

/// Result of the collateral check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutpointCheck {
    Valid { collateral_height: u64 },
    /// The announcement is for the masternode this process already runs.
    Own,
    Rejected(Verdict),
    /// Not enough confirmations yet. The caller forgets the announcement so
    /// it is processed again once it shows up later.
    RetryLater,
}

/// Expensive checks against the UTXO set.
pub fn check_outpoint(
    mnb: &Announcement,
    local: Option<&LocalNode>,
    svc: &Services<'_>,
) -> OutpointCheck {
    if local.is_some_and(|l| l.is_active(&mnb.outpoint, &mnb.operator_key)) {
        return OutpointCheck::Own;
    }
    if !mnb.verify_signature(svc.signer) {
        warn!(outpoint = %mnb.outpoint, "announcement signature does not verify");
        return OutpointCheck::Rejected(Verdict::penalize(100));
    }

    let Some(utxo) = svc.chain.utxo(&mnb.outpoint) else {
        debug!(outpoint = %mnb.outpoint, "announcement for missing collateral");
        return OutpointCheck::Rejected(Verdict::reject());
    };
    if utxo.amount != svc.params.collateral {
        debug!(outpoint = %mnb.outpoint, amount = %utxo.amount, "collateral has the wrong amount");
        return OutpointCheck::Rejected(Verdict::reject());
    }
    let min_conf = svc.params.min_confirmations;
    let confirmations = (svc.tip() + 1).saturating_sub(utxo.height);
    if confirmations < min_conf {
        debug!(outpoint = %mnb.outpoint, confirmations, min_conf, "collateral too young, will retry");
        return OutpointCheck::RetryLater;
    }
    if !utxo.script.is_locked_to(&mnb.collateral_key) {
        warn!(outpoint = %mnb.outpoint, "collateral key does not own the collateral");
        return OutpointCheck::Rejected(Verdict::penalize(33));
    }

    // the signature may not predate the block in which the collateral matured
    let conf_height = utxo.height + min_conf.saturating_sub(1);
    if let Some(conf_time) = svc.chain.block_time_at(conf_height) {
        if conf_time > mnb.sig_time {
            debug!(outpoint = %mnb.outpoint, %conf_time, sig_time = %mnb.sig_time, "announcement signed before collateral matured");
            return OutpointCheck::Rejected(Verdict::reject());
        }
    }

    OutpointCheck::Valid {
        collateral_height: utxo.height,
    }
}

/// Checks that need nothing but the ping and the chain.
pub fn ping_simple_check(ping: &Ping, svc: &Services<'_>) -> Verdict {
    if ping.sig_time > svc.now().plus(MAX_FUTURE_SECONDS) {
        debug!(outpoint = %ping.outpoint, "ping signed too far in the future");
        return Verdict::penalize(1);
    }
    if svc.chain.block_height(&ping.block_hash).is_none() {
        debug!(outpoint = %ping.outpoint, block = %ping.block_hash, "ping anchored to unknown block");
        return Verdict::reject();
    }
    Verdict::accept()
}

/// Validate a ping against the node it claims to come from.
///
/// `from_announcement` relaxes the state requirement for pings embedded in
/// a fresh announcement.
pub fn check_ping(
    ping: &Ping,
    node: &MasternodeIdentity,
    from_announcement: bool,
    svc: &Services<'_>,
) -> Verdict {
    if ping.outpoint != node.outpoint {
        return Verdict::reject();
    }
    let simple = ping_simple_check(ping, svc);
    if !simple.accepted {
        return simple;
    }
    if !from_announcement
        && matches!(
            node.state(),
            MasternodeState::UpdateRequired | MasternodeState::NewStartRequired
        )
    {
        debug!(outpoint = %ping.outpoint, state = %node.state(), "ping ignored in current state");
        return Verdict::reject();
    }

    let anchor = svc.chain.block_height(&ping.block_hash).unwrap_or(0);
    if anchor + PING_MAX_ANCHOR_AGE < svc.tip() {
        debug!(outpoint = %ping.outpoint, anchor, "ping anchor too old");
        return Verdict::reject();
    }
    if node.is_pinged_within(MIN_MNP_SECONDS - 60, ping.sig_time) {
        debug!(outpoint = %ping.outpoint, "ping arrived too early");
        return Verdict::reject();
    }
    if !ping.verify_signature(&node.operator_key, svc.signer) {
        warn!(outpoint = %ping.outpoint, "ping signature does not verify");
        return Verdict::penalize(33);
    }
    Verdict::accept()
}

/// Keys for signing a fresh announcement.
pub struct AnnouncementKeys<'a> {
    pub collateral_public: PublicKey,
    pub collateral_private: &'a PrivateKey,
    pub operator_public: PublicKey,
    pub operator_private: &'a PrivateKey,
}

/// Ping anchored [`PING_ANCHOR_DEPTH`] blocks behind the tip, signed with
/// the operational key.
pub fn new_ping(
    outpoint: OutPoint,
    operator_private: &PrivateKey,
    svc: &Services<'_>,
) -> Result<Ping, RegistryError> {
    let anchor_height = svc
        .chain
        .current_height()
        .and_then(|tip| tip.checked_sub(PING_ANCHOR_DEPTH))
        .ok_or(RegistryError::NoAnchorBlock)?;
    let anchor = svc
        .block_hash(anchor_height)
        .ok_or(RegistryError::NoAnchorBlock)?;
    let mut ping = Ping::new(outpoint, anchor, svc.now());
    ping.sign(operator_private, svc.signer);
    Ok(ping)
}

/// Build and sign an announcement for a collateral we control.
///
/// `chain_synced` is true when the chain is synced or signing happens
/// offline on purpose.
pub fn create_announcement(
    outpoint: OutPoint,
    addr: ServiceAddr,
    keys: &AnnouncementKeys<'_>,
    chain_synced: bool,
    svc: &Services<'_>,
) -> Result<Announcement, RegistryError> {
    if !chain_synced {
        return Err(RegistryError::NotSynced);
    }
    let network = svc.params.network;
    if !addr.is_valid_for(network) {
        return Err(RegistryError::InvalidAddress(addr));
    }
    network
        .check_port(addr.port)
        .map_err(RegistryError::InvalidPort)?;

    let ping = new_ping(outpoint, keys.operator_private, svc)?;
    let mut mnb = Announcement {
        outpoint,
        addr,
        collateral_key: keys.collateral_public,
        operator_key: keys.operator_public,
        signature: Default::default(),
        sig_time: svc.now(),
        protocol_version: svc.params.protocol_version,
        last_ping: Some(ping),
        recovery: false,
    };
    mnb.sign(keys.collateral_private, svc.signer);
    if !mnb.verify_signature(svc.signer) {
        return Err(RegistryError::SigningFailed(outpoint));
    }
    debug!(%outpoint, %addr, "created announcement");
    Ok(mnb)
}

/// Sig time of the announcement's embedded ping, epoch when missing.
pub(crate) fn ping_time(mnb: &Announcement) -> Timestamp {
    mnb.last_ping
        .as_ref()
        .map(|p| p.sig_time)
        .unwrap_or_default()
}
