//! Activation of the apollonnode this process runs.
//!
//! [`ActiveMasternode::manage_state`] is re-evaluated on a timer. It waits
//! for the chain, works out the public address, and then either adopts an
//! announcement made remotely (by the wallet holding the collateral) or, if
//! the local wallet holds the collateral itself, announces on its own.
//! Once started it keeps the node alive with pings.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use apollon_messages::WireMessage;
use apollon_network::SyncView;
use apollon_payments::LocalVoter;
use apollon_providers::{Services, Wallet};
use apollon_registry::{create_announcement, new_ping, AnnouncementKeys, LocalNode, Registry};
use apollon_types::constants::MIN_MNP_SECONDS;
use apollon_types::{KeyPair, MasternodeState, OutPoint, PublicKey, ServiceAddr};
use apollon_verification::LocalMasternode;

/// How this node got, or will get, its announcement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MasternodeType {
    Unknown,
    /// Announced by another wallet; we only hold the operational key.
    Remote,
    /// The local wallet holds the collateral and announces itself.
    Local,
}

impl MasternodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Remote => "REMOTE",
            Self::Local => "LOCAL",
        }
    }
}

/// Why the node cannot run as an apollonnode right now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotCapableReason {
    ListenDisabled,
    NoPeers,
    NoExternalAddress,
    InvalidPort(String),
    CannotConnect(ServiceAddr),
    ProtocolVersion { announced: u32, ours: u32 },
    AddressMismatch { announced: ServiceAddr, ours: ServiceAddr },
    WrongState(MasternodeState),
    NotInList,
    WalletLocked,
    NoCollateral,
    AnnouncementFailed(String),
}

impl fmt::Display for NotCapableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListenDisabled => f.write_str(
                "Apollonnode must accept connections from outside. Make sure listening is enabled.",
            ),
            Self::NoPeers => f.write_str(
                "Can't detect valid external address. Will retry when there are some connections available.",
            ),
            Self::NoExternalAddress => f.write_str(
                "Can't detect valid external address. Please consider using the external_address option if problem persists. Make sure to use IPv4 address only.",
            ),
            Self::InvalidPort(reason) => f.write_str(reason),
            Self::CannotConnect(addr) => write!(f, "Could not connect to {addr}"),
            Self::ProtocolVersion { announced, ours } => {
                write!(f, "Invalid protocol version {announced}, expected {ours}")
            }
            Self::AddressMismatch { announced, ours } => write!(
                f,
                "Broadcasted IP {announced} doesn't match our external address {ours}. Make sure you issued a new broadcast if IP of this apollonnode changed recently."
            ),
            Self::WrongState(state) => write!(f, "Apollonnode in {state} state"),
            Self::NotInList => f.write_str("Apollonnode not in apollonnode list"),
            Self::WalletLocked => f.write_str("Wallet is locked."),
            Self::NoCollateral => f.write_str("Wallet has no suitable collateral."),
            Self::AnnouncementFailed(reason) => {
                write!(f, "Error creating apollonnode broadcast: {reason}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActiveState {
    Initial,
    SyncInProcess,
    InputTooNew { confirmations: u64, required: u64 },
    NotCapable(NotCapableReason),
    Started,
}

impl ActiveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::SyncInProcess => "SYNC_IN_PROCESS",
            Self::InputTooNew { .. } => "INPUT_TOO_NEW",
            Self::NotCapable(_) => "NOT_CAPABLE",
            Self::Started => "STARTED",
        }
    }

    /// Human-readable status line.
    pub fn status(&self) -> String {
        match self {
            Self::Initial => "Node just started, not yet activated".to_string(),
            Self::SyncInProcess => {
                "Sync in progress. Must wait until sync is complete to start Apollonnode".to_string()
            }
            Self::InputTooNew { required, .. } => {
                format!("Apollonnode input must have at least {required} confirmations")
            }
            Self::NotCapable(reason) => format!("Not capable apollonnode: {reason}"),
            Self::Started => "Apollonnode successfully started".to_string(),
        }
    }
}

pub struct ActiveMasternode {
    operator: KeyPair,
    /// Address from the config, overrides detection.
    configured_addr: Option<ServiceAddr>,
    kind: MasternodeType,
    state: ActiveState,
    outpoint: Option<OutPoint>,
    service: Option<ServiceAddr>,
    pinger_enabled: bool,
}

impl ActiveMasternode {
    pub fn new(operator: KeyPair, configured_addr: Option<ServiceAddr>) -> Self {
        Self {
            operator,
            configured_addr,
            kind: MasternodeType::Unknown,
            state: ActiveState::Initial,
            outpoint: None,
            service: None,
            pinger_enabled: false,
        }
    }

    pub fn kind(&self) -> MasternodeType {
        self.kind
    }

    pub fn state(&self) -> &ActiveState {
        &self.state
    }

    pub fn status(&self) -> String {
        self.state.status()
    }

    pub fn outpoint(&self) -> Option<OutPoint> {
        self.outpoint
    }

    pub fn service(&self) -> Option<ServiceAddr> {
        self.service
    }

    pub fn operator_key(&self) -> PublicKey {
        self.operator.public
    }

    pub fn operator(&self) -> &KeyPair {
        &self.operator
    }

    pub fn is_started(&self) -> bool {
        self.state == ActiveState::Started
    }

    /// Identity used to answer and send verification challenges.
    pub fn local_masternode(&self) -> Option<LocalMasternode<'_>> {
        match (self.is_started(), self.outpoint, self.service) {
            (true, Some(outpoint), Some(addr)) => Some(LocalMasternode {
                outpoint,
                addr,
                operator_private: &self.operator.private,
            }),
            _ => None,
        }
    }

    /// Identity used to sign payment votes.
    pub fn local_voter(&self) -> Option<LocalVoter<'_>> {
        let outpoint = self.outpoint.filter(|_| self.is_started())?;
        Some(LocalVoter {
            outpoint,
            operator_private: &self.operator.private,
        })
    }

    fn set_state(&mut self, next: ActiveState) {
        if self.state != next {
            match &next {
                ActiveState::NotCapable(reason) => {
                    warn!(from = self.state.as_str(), %reason, "apollonnode not capable")
                }
                _ => info!(from = self.state.as_str(), to = next.as_str(), "apollonnode state"),
            }
        }
        self.state = next;
    }

    fn not_capable(&mut self, reason: NotCapableReason) {
        self.set_state(ActiveState::NotCapable(reason));
    }

    fn start(&mut self, outpoint: OutPoint, service: ServiceAddr, registry: &mut Registry) {
        self.outpoint = Some(outpoint);
        self.service = Some(service);
        self.pinger_enabled = true;
        registry.set_local(Some(LocalNode {
            operator_key: self.operator.public,
            outpoint: Some(outpoint),
        }));
        self.set_state(ActiveState::Started);
    }

    /// One activation pass, then a ping if one is due.
    pub fn manage_state(
        &mut self,
        registry: &mut Registry,
        sync: &SyncView,
        wallet: Option<&dyn Wallet>,
        svc: &Services<'_>,
    ) {
        debug!(kind = self.kind.as_str(), state = self.state.as_str(), "managing apollonnode state");
        if !sync.blockchain_synced {
            self.set_state(ActiveState::SyncInProcess);
            return;
        }
        if self.state == ActiveState::SyncInProcess {
            self.set_state(ActiveState::Initial);
        }

        if self.kind == MasternodeType::Unknown {
            self.manage_initial(wallet, svc);
        }
        match self.kind {
            MasternodeType::Remote => self.manage_remote(registry, svc),
            MasternodeType::Local => {
                // a remote start by the collateral wallet takes precedence
                self.manage_remote(registry, svc);
                if !self.is_started() {
                    self.manage_local(registry, sync, wallet, svc);
                }
            }
            MasternodeType::Unknown => {}
        }

        self.send_ping(registry, svc);
    }

    fn manage_initial(&mut self, wallet: Option<&dyn Wallet>, svc: &Services<'_>) {
        if !svc.peers.is_listening() {
            self.not_capable(NotCapableReason::ListenDisabled);
            return;
        }

        let network = svc.params.network;
        let service = match self.configured_addr {
            Some(addr) => addr,
            None => {
                if svc.peers.connected_peers().is_empty() {
                    self.not_capable(NotCapableReason::NoPeers);
                    return;
                }
                match svc.peers.external_address().filter(|a| a.is_valid_for(network)) {
                    Some(addr) => addr,
                    None => {
                        self.not_capable(NotCapableReason::NoExternalAddress);
                        return;
                    }
                }
            }
        };
        if !service.is_valid_for(network) {
            self.not_capable(NotCapableReason::NoExternalAddress);
            return;
        }
        if let Err(reason) = network.check_port(service.port) {
            self.not_capable(NotCapableReason::InvalidPort(reason));
            return;
        }

        info!(%service, "checking inbound connection");
        if svc.peers.connect(service).is_none() {
            self.not_capable(NotCapableReason::CannotConnect(service));
            return;
        }

        self.service = Some(service);
        self.kind = MasternodeType::Remote;

        if let Some(wallet) = wallet {
            if !wallet.is_locked()
                && wallet.balance() >= svc.params.collateral
                && wallet.collateral(None).is_some()
            {
                self.kind = MasternodeType::Local;
            }
        }
        info!(kind = self.kind.as_str(), %service, "apollonnode type resolved");
    }

    fn manage_remote(&mut self, registry: &mut Registry, svc: &Services<'_>) {
        let Some(node) = registry.find_by_operator_key(&self.operator.public) else {
            self.not_capable(NotCapableReason::NotInList);
            return;
        };
        let (outpoint, addr, protocol, state) =
            (node.outpoint, node.addr, node.protocol_version, node.state());

        let ours = svc.params.protocol_version;
        if protocol != ours {
            self.not_capable(NotCapableReason::ProtocolVersion {
                announced: protocol,
                ours,
            });
            return;
        }
        if let Some(service) = self.service.filter(|s| *s != addr) {
            self.not_capable(NotCapableReason::AddressMismatch {
                announced: addr,
                ours: service,
            });
            return;
        }
        if !state.is_valid_for_auto_start() {
            self.not_capable(NotCapableReason::WrongState(state));
            return;
        }
        if !self.is_started() {
            info!(%outpoint, %addr, "apollonnode started remotely");
            self.start(outpoint, addr, registry);
        }
    }

    fn manage_local(
        &mut self,
        registry: &mut Registry,
        sync: &SyncView,
        wallet: Option<&dyn Wallet>,
        svc: &Services<'_>,
    ) {
        let Some(wallet) = wallet else {
            self.not_capable(NotCapableReason::NoCollateral);
            return;
        };
        if wallet.is_locked() {
            self.not_capable(NotCapableReason::WalletLocked);
            return;
        }
        let Some(keys) = wallet.collateral(None) else {
            self.not_capable(NotCapableReason::NoCollateral);
            return;
        };
        let Some(service) = self.service else {
            self.not_capable(NotCapableReason::NoExternalAddress);
            return;
        };

        let required = svc.params.min_confirmations;
        let confirmations = svc.chain.confirmations(&keys.outpoint).unwrap_or(0);
        if confirmations < required {
            self.set_state(ActiveState::InputTooNew {
                confirmations,
                required,
            });
            return;
        }

        wallet.lock_coin(keys.outpoint);
        let announce_keys = AnnouncementKeys {
            collateral_public: keys.public,
            collateral_private: &keys.private,
            operator_public: self.operator.public,
            operator_private: &self.operator.private,
        };
        let mnb = match create_announcement(
            keys.outpoint,
            service,
            &announce_keys,
            sync.blockchain_synced,
            svc,
        ) {
            Ok(mnb) => mnb,
            Err(e) => {
                self.not_capable(NotCapableReason::AnnouncementFailed(e.to_string()));
                return;
            }
        };

        info!(outpoint = %keys.outpoint, %service, "apollonnode started locally");
        self.start(keys.outpoint, service, registry);
        registry.update_list(mnb.clone(), svc, sync);
        svc.peers.relay(WireMessage::Announce(mnb));
    }

    /// Sign and relay a fresh ping when the last one is old enough.
    pub fn send_ping(&mut self, registry: &mut Registry, svc: &Services<'_>) -> bool {
        if !self.pinger_enabled {
            debug!(state = self.state.as_str(), "pinger not enabled");
            return false;
        }
        let Some(outpoint) = self.outpoint else {
            return false;
        };
        if !registry.has(&outpoint) {
            self.not_capable(NotCapableReason::NotInList);
            return false;
        }
        let ping = match new_ping(outpoint, &self.operator.private, svc) {
            Ok(ping) => ping,
            Err(e) => {
                warn!(%outpoint, error = %e, "cannot create ping");
                return false;
            }
        };
        if registry.is_pinged_within(&outpoint, MIN_MNP_SECONDS, ping.sig_time) {
            debug!(%outpoint, "too early to send apollonnode ping");
            return false;
        }
        info!(%outpoint, "relaying ping");
        registry.set_last_ping(ping.clone());
        svc.peers.relay(WireMessage::Ping(ping));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, NOW, TIP};
    use apollon_crypto::keypair_from_seed;
    use apollon_types::{Amount, PeerId, TxHash};

    fn synced() -> SyncView {
        SyncView::all_synced()
    }

    fn operator(n: u8) -> KeyPair {
        keypair_from_seed(&[n.wrapping_add(100); 32])
    }

    fn relayed_pings(fx: &Fixture) -> usize {
        fx.peers
            .relayed()
            .iter()
            .filter(|m| matches!(m, WireMessage::Ping(_)))
            .count()
    }

    #[test]
    fn waits_for_blockchain_sync() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let mut mn = ActiveMasternode::new(operator(1), Some(fx.addr(1)));
        mn.manage_state(&mut registry, &SyncView::default(), None, &fx.svc());
        assert_eq!(mn.state(), &ActiveState::SyncInProcess);
        assert_eq!(
            mn.status(),
            "Sync in progress. Must wait until sync is complete to start Apollonnode"
        );
    }

    #[test]
    fn adopts_remote_announcement() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let (outpoint, _) = fx.add_node(&mut registry, 1, NOW - 2000);
        fx.peers.set_reachable(fx.addr(1), PeerId(50));

        let mut mn = ActiveMasternode::new(operator(1), Some(fx.addr(1)));
        mn.manage_state(&mut registry, &synced(), None, &fx.svc());
        assert_eq!(mn.kind(), MasternodeType::Remote);
        assert!(mn.is_started());
        assert_eq!(mn.outpoint(), Some(outpoint));
        assert_eq!(registry.local().and_then(|l| l.outpoint), Some(outpoint));
        assert_eq!(mn.status(), "Apollonnode successfully started");

        // pinged at announcement time, nothing to send yet
        assert_eq!(relayed_pings(&fx), 0);
        fx.clock.advance(MIN_MNP_SECONDS + 1);
        assert!(mn.send_ping(&mut registry, &fx.svc()));
        assert_eq!(relayed_pings(&fx), 1);
        assert!(!mn.send_ping(&mut registry, &fx.svc()));
    }

    #[test]
    fn remote_mismatches_are_not_capable() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        fx.add_node(&mut registry, 1, NOW - 2000);
        let elsewhere = fx.addr(9);
        fx.peers.set_reachable(elsewhere, PeerId(50));

        let mut mn = ActiveMasternode::new(operator(1), Some(elsewhere));
        mn.manage_state(&mut registry, &synced(), None, &fx.svc());
        assert!(matches!(
            mn.state(),
            ActiveState::NotCapable(NotCapableReason::AddressMismatch { .. })
        ));

        let mut stranger = ActiveMasternode::new(operator(7), Some(elsewhere));
        stranger.manage_state(&mut registry, &synced(), None, &fx.svc());
        assert_eq!(
            stranger.status(),
            "Not capable apollonnode: Apollonnode not in apollonnode list"
        );
    }

    #[test]
    fn address_detection_failures() {
        let fx = Fixture::new();
        let mut registry = Registry::new();

        let mut mn = ActiveMasternode::new(operator(1), None);
        mn.manage_state(&mut registry, &synced(), None, &fx.svc());
        assert_eq!(mn.state(), &ActiveState::NotCapable(NotCapableReason::NoPeers));
        assert_eq!(mn.kind(), MasternodeType::Unknown);

        let mut wrong_port = ActiveMasternode::new(operator(1), Some(ServiceAddr::v4(8, 8, 1, 1, 9999)));
        wrong_port.manage_state(&mut registry, &synced(), None, &fx.svc());
        assert!(matches!(
            wrong_port.state(),
            ActiveState::NotCapable(NotCapableReason::InvalidPort(_))
        ));

        let mut unreachable = ActiveMasternode::new(operator(1), Some(fx.addr(1)));
        unreachable.manage_state(&mut registry, &synced(), None, &fx.svc());
        assert_eq!(
            unreachable.state(),
            &ActiveState::NotCapable(NotCapableReason::CannotConnect(fx.addr(1)))
        );

        fx.peers.set_listening(false);
        let mut deaf = ActiveMasternode::new(operator(1), Some(fx.addr(1)));
        deaf.manage_state(&mut registry, &synced(), None, &fx.svc());
        assert_eq!(deaf.state(), &ActiveState::NotCapable(NotCapableReason::ListenDisabled));
    }

    #[test]
    fn local_collateral_announces_itself() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let outpoint = OutPoint::new(TxHash::new([42; 32]), 0);
        fx.fund_wallet(outpoint, [42; 32], 10);
        fx.peers.set_reachable(fx.addr(42), PeerId(50));

        let mut mn = ActiveMasternode::new(operator(42), Some(fx.addr(42)));
        mn.manage_state(&mut registry, &synced(), Some(&*fx.wallet), &fx.svc());
        assert_eq!(mn.kind(), MasternodeType::Local);
        assert!(mn.is_started());
        assert!(fx.wallet.is_coin_locked(&outpoint));
        assert!(registry.has(&outpoint));
        assert!(fx
            .peers
            .relayed()
            .iter()
            .any(|m| matches!(m, WireMessage::Announce(a) if a.outpoint == outpoint)));
    }

    #[test]
    fn young_collateral_waits() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let outpoint = OutPoint::new(TxHash::new([42; 32]), 0);
        fx.fund_wallet(outpoint, [42; 32], TIP);
        fx.peers.set_reachable(fx.addr(42), PeerId(50));

        let mut mn = ActiveMasternode::new(operator(42), Some(fx.addr(42)));
        mn.manage_state(&mut registry, &synced(), Some(&*fx.wallet), &fx.svc());
        let required = fx.params.min_confirmations;
        assert_eq!(
            mn.state(),
            &ActiveState::InputTooNew {
                confirmations: 1,
                required
            }
        );
        assert_eq!(
            mn.status(),
            format!("Apollonnode input must have at least {required} confirmations")
        );
        assert!(!registry.has(&outpoint));
    }

    #[test]
    fn small_balance_stays_remote() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let outpoint = OutPoint::new(TxHash::new([42; 32]), 0);
        fx.fund_wallet(outpoint, [42; 32], 10);
        fx.wallet.set_balance(Amount::coins(10));
        fx.peers.set_reachable(fx.addr(42), PeerId(50));

        let mut mn = ActiveMasternode::new(operator(42), Some(fx.addr(42)));
        mn.manage_state(&mut registry, &synced(), Some(&*fx.wallet), &fx.svc());
        assert_eq!(mn.kind(), MasternodeType::Remote);
        assert_eq!(mn.state(), &ActiveState::NotCapable(NotCapableReason::NotInList));
    }

    #[test]
    fn lost_registry_entry_stops_pinging() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        fx.add_node(&mut registry, 1, NOW - 2000);
        fx.peers.set_reachable(fx.addr(1), PeerId(50));
        let mut mn = ActiveMasternode::new(operator(1), Some(fx.addr(1)));
        mn.manage_state(&mut registry, &synced(), None, &fx.svc());
        assert!(mn.is_started());

        registry.clear();
        fx.clock.advance(MIN_MNP_SECONDS + 1);
        assert!(!mn.send_ping(&mut registry, &fx.svc()));
        assert_eq!(mn.state(), &ActiveState::NotCapable(NotCapableReason::NotInList));
    }
}
