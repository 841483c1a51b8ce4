//! The services one node runs, and the collaborators they talk to.
//!
//! [`MasternodeCore`] owns every piece of mutable apollonnode state. The
//! node keeps it behind a single `tokio::sync::Mutex`, so message handlers,
//! the maintenance loop and admin calls never hold two locks at once.
//! [`Collaborators`] are the host-provided chain, transport and wallet plus
//! the clock, randomness and signer, all shared behind `Arc`.

use std::sync::Arc;

use tracing::info;

use apollon_network::{FulfilledRequests, MasternodeSync, MessageDedup, SyncView};
use apollon_payments::MasternodePayments;
use apollon_providers::{
    ChainState, Clock, Ed25519Signer, PeerSet, RandomSource, Services, Signer, SystemClock,
    SystemRandom, Wallet,
};
use apollon_registry::{LocalNode, Registry};
use apollon_messages::WireMessage;
use apollon_types::{ProtocolParams, Timestamp};
use apollon_utils::TrafficStats;
use apollon_verification::PoseVerifier;

use crate::active::ActiveMasternode;
use crate::config::NodeConfig;
use crate::masternode_conf::MasternodeConfig;
use crate::NodeError;

pub struct Collaborators {
    pub chain: Arc<dyn ChainState>,
    pub peers: Arc<dyn PeerSet>,
    /// `None` when the node runs without a wallet.
    pub wallet: Option<Arc<dyn Wallet>>,
    pub signer: Arc<dyn Signer>,
    pub clock: Arc<dyn Clock>,
    pub random: Arc<dyn RandomSource>,
    pub params: ProtocolParams,
}

impl Collaborators {
    /// Host chain, transport and wallet with the system clock, system
    /// randomness and Ed25519 signing.
    pub fn new(
        chain: Arc<dyn ChainState>,
        peers: Arc<dyn PeerSet>,
        wallet: Option<Arc<dyn Wallet>>,
        params: ProtocolParams,
    ) -> Self {
        Self {
            chain,
            peers,
            wallet,
            signer: Arc::new(Ed25519Signer),
            clock: Arc::new(SystemClock),
            random: Arc::new(SystemRandom),
            params,
        }
    }

    pub fn services(&self) -> Services<'_> {
        Services {
            chain: &*self.chain,
            peers: &*self.peers,
            signer: &*self.signer,
            clock: &*self.clock,
            random: &*self.random,
            params: &self.params,
        }
    }

    pub fn wallet(&self) -> Option<&dyn Wallet> {
        self.wallet.as_deref()
    }
}

pub struct MasternodeCore {
    pub registry: Registry,
    pub payments: MasternodePayments,
    pub sync: MasternodeSync,
    pub pose: PoseVerifier,
    pub fulfilled: FulfilledRequests,
    pub dedup: MessageDedup,
    /// Present in masternode mode.
    pub active: Option<ActiveMasternode>,
    pub aliases: MasternodeConfig,
    /// Inbound messages by command.
    pub stats: TrafficStats,
    pub(crate) offline_signing: bool,
    /// Maintenance ticks since start.
    pub(crate) ticks: u64,
}

impl MasternodeCore {
    pub fn new(config: &NodeConfig, now: Timestamp) -> Result<Self, NodeError> {
        let aliases = MasternodeConfig::read(&config.masternode_config_path())?;
        let active = if config.masternode {
            let operator = config.operator_keypair()?.ok_or_else(|| {
                NodeError::Config("masternode mode needs an operator_key".to_string())
            })?;
            Some(ActiveMasternode::new(operator, config.external_addr()?))
        } else {
            None
        };
        info!(
            network = config.network.as_str(),
            masternode = config.masternode,
            aliases = aliases.count(),
            "apollonnode services created"
        );
        let mut core = Self::with_parts(config.params(), active, aliases, now);
        core.offline_signing = config.offline_signing;
        Ok(core)
    }

    pub fn with_parts(
        params: ProtocolParams,
        active: Option<ActiveMasternode>,
        aliases: MasternodeConfig,
        now: Timestamp,
    ) -> Self {
        let mut core = Self {
            registry: Registry::new(),
            payments: MasternodePayments::new(),
            sync: MasternodeSync::new(params.network, now),
            pose: PoseVerifier::new(),
            fulfilled: FulfilledRequests::new(),
            dedup: MessageDedup::default(),
            active,
            aliases,
            stats: TrafficStats::new(&WireMessage::COMMANDS),
            offline_signing: false,
            ticks: 0,
        };
        core.bind_local();
        core
    }

    /// Tell the registry which operational key is ours.
    pub(crate) fn bind_local(&mut self) {
        let local = self.active.as_ref().map(|a| LocalNode {
            operator_key: a.operator_key(),
            outpoint: a.outpoint(),
        });
        self.registry.set_local(local);
    }

    /// Swap in state loaded from the caches.
    pub fn restore(&mut self, registry: Registry, payments: MasternodePayments) {
        self.registry = registry;
        self.payments = payments;
        self.bind_local();
    }

    pub fn is_masternode(&self) -> bool {
        self.active.is_some()
    }

    pub fn sync_view(&self) -> SyncView {
        self.sync.view()
    }
}
