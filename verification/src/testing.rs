use apollon_crypto::{keypair_from_seed, Ed25519Signer};
use apollon_network::SyncView;
use apollon_nullables::{NullChain, NullClock, NullPeers, NullRandom};
use apollon_providers::{Services, Utxo};
use apollon_registry::{create_announcement, new_ping, AnnouncementKeys, Registry};
use apollon_types::{
    KeyPair, NetworkId, OutPoint, PayeeScript, PeerId, PeerInfo, ProtocolParams, ServiceAddr,
    TxHash,
};

use crate::pose::LocalMasternode;

pub const NOW: u64 = 1_700_000_000;
pub const TIP: u64 = 300;

pub struct Fixture {
    pub chain: NullChain,
    pub peers: NullPeers,
    pub clock: NullClock,
    pub random: NullRandom,
    pub params: ProtocolParams,
}

pub struct TestNode {
    pub outpoint: OutPoint,
    pub addr: ServiceAddr,
    pub operator: KeyPair,
}

impl TestNode {
    pub fn local(&self) -> LocalMasternode<'_> {
        LocalMasternode {
            outpoint: self.outpoint,
            addr: self.addr,
            operator_private: &self.operator.private,
        }
    }
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            chain: NullChain::with_height(TIP, NOW - 600),
            peers: NullPeers::new(),
            clock: NullClock::new(NOW),
            random: NullRandom::default(),
            params: ProtocolParams::for_network(NetworkId::Live),
        }
    }

    pub fn svc(&self) -> Services<'_> {
        Services {
            chain: &self.chain,
            peers: &self.peers,
            signer: &Ed25519Signer,
            clock: &self.clock,
            random: &self.random,
            params: &self.params,
        }
    }

    pub fn addr(&self, n: u8) -> ServiceAddr {
        ServiceAddr::v4(8, 8, n, 1, self.params.network.default_port())
    }

    /// Enabled masternode number `n` announced at `addr`.
    pub fn add_node(&self, registry: &mut Registry, n: u8, addr: ServiceAddr) -> TestNode {
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
        self.clock.set(NOW - 2000);
        let mnb = create_announcement(outpoint, addr, &keys, true, &self.svc()).expect("announce");
        self.clock.set(NOW);

        let sync = SyncView::all_synced();
        let outcome = registry.check_mnb_and_update_list(None, mnb, &self.svc(), &sync);
        assert!(outcome.verdict.accepted);
        let ping = new_ping(outpoint, &operator.private, &self.svc()).expect("ping");
        assert!(registry.process_ping(&peer(99), ping, &self.svc(), &sync).accepted);
        TestNode {
            outpoint,
            addr,
            operator,
        }
    }
}

pub fn peer(id: u64) -> PeerInfo {
    PeerInfo::new(
        PeerId(id),
        ServiceAddr::v4(5, 5, 5, id as u8, 8168),
        90030,
    )
}
