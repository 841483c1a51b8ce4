use std::sync::Arc;

use apollon_crypto::{keypair_from_seed, Ed25519Signer};
use apollon_network::{BlockchainSyncInputs, FulfilledRequests, MasternodeSync, SyncView};
use apollon_nullables::{NullChain, NullClock, NullPeers, NullRandom, NullWallet};
use apollon_providers::{Services, Utxo, Wallet};
use apollon_registry::{create_announcement, new_ping, AnnouncementKeys, Registry};
use apollon_types::constants::SYNC_TICK_SECONDS;
use apollon_types::{
    KeyPair, NetworkId, OutPoint, PayeeScript, PeerId, PeerInfo, ProtocolParams, ServiceAddr,
    Timestamp, TxHash,
};

use crate::core::Collaborators;

pub const NOW: u64 = 1_700_000_000;
pub const TIP: u64 = 300;

pub struct Fixture {
    pub chain: Arc<NullChain>,
    pub peers: Arc<NullPeers>,
    pub clock: Arc<NullClock>,
    pub random: Arc<NullRandom>,
    pub wallet: Arc<NullWallet>,
    pub params: ProtocolParams,
}

impl Fixture {
    pub fn new() -> Self {
        let params = ProtocolParams::for_network(NetworkId::Live);
        Self {
            chain: Arc::new(NullChain::with_height(TIP, NOW - 600)),
            peers: Arc::new(NullPeers::new()),
            clock: Arc::new(NullClock::new(NOW)),
            random: Arc::new(NullRandom::default()),
            wallet: Arc::new(NullWallet::new()),
            params,
        }
    }

    pub fn svc(&self) -> Services<'_> {
        Services {
            chain: &*self.chain,
            peers: &*self.peers,
            signer: &Ed25519Signer,
            clock: &*self.clock,
            random: &*self.random,
            params: &self.params,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            chain: self.chain.clone(),
            peers: self.peers.clone(),
            wallet: Some(self.wallet.clone() as Arc<dyn Wallet>),
            signer: Arc::new(Ed25519Signer),
            clock: self.clock.clone(),
            random: self.random.clone(),
            params: self.params.clone(),
        }
    }

    pub fn addr(&self, n: u8) -> ServiceAddr {
        ServiceAddr::v4(8, 8, n, 1, self.params.network.default_port())
    }

    /// Collateral output `outpoint`, mined at `height`, held by the wallet.
    pub fn fund_wallet(&self, outpoint: OutPoint, seed: [u8; 32], height: u64) {
        let collateral = keypair_from_seed(&seed);
        self.chain.add_utxo(
            outpoint,
            Utxo {
                amount: self.params.collateral,
                height,
                script: PayeeScript::for_key(&collateral.public),
            },
        );
        self.wallet.add_collateral(outpoint, seed);
        self.wallet.set_balance(self.params.collateral);
    }

    /// Enabled masternode number `n`, announced at `announced_at` and pinged now.
    pub fn add_node(&self, registry: &mut Registry, n: u8, announced_at: u64) -> (OutPoint, KeyPair) {
        let outpoint = OutPoint::new(TxHash::new([n; 32]), 0);
        let collateral = keypair_from_seed(&[n; 32]);
        let operator = keypair_from_seed(&[n.wrapping_add(100); 32]);
        self.chain.add_utxo(
            outpoint,
            Utxo {
                amount: self.params.collateral,
                height: 10,
                script: PayeeScript::for_key(&collateral.public),
            },
        );
        let keys = AnnouncementKeys {
            collateral_public: collateral.public,
            collateral_private: &collateral.private,
            operator_public: operator.public,
            operator_private: &operator.private,
        };
        let now = self.svc().now().as_secs();
        self.clock.set(announced_at);
        let mnb = create_announcement(outpoint, self.addr(n), &keys, true, &self.svc()).expect("announce");
        self.clock.set(now);

        let sync = SyncView::all_synced();
        let outcome = registry.check_mnb_and_update_list(None, mnb, &self.svc(), &sync);
        assert!(outcome.verdict.accepted);
        let ping = new_ping(outpoint, &operator.private, &self.svc()).expect("ping");
        assert!(registry.process_ping(&peer(99), ping, &self.svc(), &sync).accepted);
        (outpoint, operator)
    }
}

pub fn peer(id: u64) -> PeerInfo {
    PeerInfo::new(PeerId(id), ServiceAddr::v4(5, 5, 5, id as u8, 8168), 90030)
}

/// A sync that finished every stage with the chain caught up at `NOW`.
pub fn finished_sync(fx: &Fixture) -> MasternodeSync {
    let mut sync = MasternodeSync::new(fx.params.network, Timestamp::new(NOW - SYNC_TICK_SECONDS));
    let peers: Vec<PeerInfo> = (1..=3)
        .map(|n| {
            let mut p = peer(n);
            p.common_height = Some(TIP);
            p.sync_height = Some(TIP);
            p
        })
        .collect();
    let inputs = BlockchainSyncInputs {
        now: Timestamp::new(NOW),
        tip: Some(TIP),
        tip_time: Some(Timestamp::new(NOW - 600)),
        best_header: Some(TIP),
        header_time: None,
        peers: &peers,
    };
    assert!(sync.is_blockchain_synced(&inputs, false));
    let mut fulfilled = FulfilledRequests::new();
    for _ in 0..4 {
        sync.switch_to_next_asset(Timestamp::new(NOW), &[], &mut fulfilled)
            .expect("advance");
    }
    assert!(sync.is_synced());
    sync
}
