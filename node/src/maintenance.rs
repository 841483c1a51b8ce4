//! Periodic work: the sync tick, local activation, sweeps, and the
//! per-block hooks.
//!
//! The maintenance task wakes once per `tick_secs`. Each wake-up counts as
//! one tick; the heavier jobs run every N ticks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use apollon_messages::WireMessage;
use apollon_network::{BlockchainSyncInputs, SyncAction, SyncTickInputs};
use apollon_payments::MasternodePayments;
use apollon_providers::Services;
use apollon_types::constants::{PAYMENT_VOTE_AHEAD, SYNC_TICK_SECONDS};
use apollon_types::{PeerId, PeerInfo};
use apollon_verification::check_same_addr;

use crate::config::NodeConfig;
use crate::core::{Collaborators, MasternodeCore};

/// Seconds between two PoSe verification rounds.
pub const VERIFICATION_STEP_SECONDS: u64 = 5 * 60;

/// How often each job runs, in ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaintenanceSchedule {
    pub tick: Duration,
    pub sync_every: u64,
    pub manage_every: u64,
    pub cleanup_every: u64,
    pub verify_every: u64,
}

impl MaintenanceSchedule {
    pub fn from_config(config: &NodeConfig) -> Self {
        let tick_secs = config.tick_secs.max(1);
        let every = |secs: u64| (secs / tick_secs).max(1);
        Self {
            tick: Duration::from_secs(tick_secs),
            sync_every: every(SYNC_TICK_SECONDS),
            manage_every: every(config.manage_state_secs),
            cleanup_every: every(config.cleanup_secs),
            verify_every: every(VERIFICATION_STEP_SECONDS),
        }
    }
}

impl Default for MaintenanceSchedule {
    fn default() -> Self {
        Self::from_config(&NodeConfig::default())
    }
}

impl MasternodeCore {
    /// One maintenance tick.
    pub fn tick(&mut self, schedule: &MaintenanceSchedule, collab: &Collaborators) {
        self.ticks += 1;
        let svc = collab.services();

        if self.ticks % schedule.sync_every == 0 {
            self.sync_tick(&svc);
        }

        if self.ticks % schedule.manage_every == 0 {
            let sync = self.sync.view();
            if let Some(active) = self.active.as_mut() {
                active.manage_state(&mut self.registry, &sync, collab.wallet(), &svc);
            }
        }

        // recovery connections are opened one per tick
        self.registry.process_scheduled_connection(&svc);

        if self.ticks % schedule.cleanup_every == 0 {
            self.cleanup(&svc);
        }

        if self.is_masternode() && self.ticks % schedule.verify_every == 0 {
            self.verification_step(&svc);
        }
    }

    /// Advance the data sync and carry out the requests it asks for.
    pub fn sync_tick(&mut self, svc: &Services<'_>) {
        let peers = svc.peers.connected_peers();
        let best_header = svc.chain.best_header_height();
        let registry_size = self.registry.len();
        let inputs = SyncTickInputs {
            blockchain: BlockchainSyncInputs {
                now: svc.now(),
                tip: svc.chain.current_height(),
                tip_time: svc.chain.tip_time(),
                best_header,
                header_time: best_header.and_then(|h| svc.chain.block_time_at(h)),
                peers: &peers,
            },
            registry_size,
            enough_vote_data: self.payments.is_enough_data(registry_size),
            min_payments_proto: svc.params.min_payments_proto(),
            storage_limit: MasternodePayments::storage_limit(registry_size),
            is_masternode: self.is_masternode(),
            last_list_activity: self.registry.last_list_activity(),
            last_vote_activity: self.payments.last_vote_activity(),
        };
        let actions = self.sync.process_tick(&inputs, &mut self.fulfilled);
        for action in actions {
            self.run_sync_action(action, &peers, svc);
        }
    }

    fn run_sync_action(&mut self, action: SyncAction, peers: &[PeerInfo], svc: &Services<'_>) {
        let info = |id: PeerId| peers.iter().find(|p| p.id == id);
        match action {
            SyncAction::RequestSporks(peer) => svc.peers.send(peer, WireMessage::SporkSyncRequest),
            SyncAction::RequestList(peer) => {
                if let Some(peer) = info(peer) {
                    self.registry.dseg_update(peer, svc);
                }
            }
            SyncAction::RequestPaymentVotes { peer, count } => {
                svc.peers
                    .send(peer, WireMessage::PaymentVoteSyncRequest { count });
            }
            SyncAction::RequestLowData(peer) => {
                if let Some(peer) = info(peer) {
                    self.payments
                        .request_low_data(peer, self.registry.len(), svc);
                }
            }
            SyncAction::Disconnect(peer) => svc.peers.disconnect(peer),
        }
    }

    /// Sweep every service's expired state.
    pub fn cleanup(&mut self, svc: &Services<'_>) {
        let sync = self.sync.view();
        let now = svc.now();
        self.registry.check_and_remove(svc, &sync);
        self.payments
            .check_and_remove(self.registry.len(), svc, &sync);
        self.pose.check_and_remove(svc);
        self.registry.check_and_rebuild_index(now);
        let expired = self.fulfilled.sweep(now);
        debug!(expired, "maintenance sweep done");
    }

    fn verification_step(&mut self, svc: &Services<'_>) {
        let sync = self.sync.view();
        let local = self.active.as_ref().and_then(|a| a.local_masternode());
        match self.pose.do_full_verification_step(
            local.as_ref(),
            &mut self.registry,
            &mut self.fulfilled,
            svc,
            &sync,
        ) {
            Ok(sent) => debug!(sent, "verification step"),
            Err(e) => debug!(reason = %e, "skipping verification step"),
        }
    }

    /// New chain tip. `height` is the height of the accepted block.
    pub fn updated_block_tip(&mut self, height: u64, collab: &Collaborators) {
        let svc = collab.services();
        let peers = svc.peers.connected_peers();
        let best_header = svc.chain.best_header_height();
        let inputs = BlockchainSyncInputs {
            now: svc.now(),
            tip: svc.chain.current_height(),
            tip_time: svc.chain.tip_time(),
            best_header,
            header_time: best_header.and_then(|h| svc.chain.block_time_at(h)),
            peers: &peers,
        };
        self.sync.is_blockchain_synced(&inputs, true);
        let sync = self.sync.view();
        debug!(height, synced = sync.synced, "updated block tip");

        check_same_addr(&mut self.registry, &sync);
        if self.is_masternode() {
            // plain nodes refresh this on demand
            self.refresh_last_paid(&svc);
        }

        if !sync.list_synced {
            return;
        }
        let voter = self.active.as_ref().and_then(|a| a.local_voter());
        if voter.is_none() {
            return;
        }
        let vote_height = height + PAYMENT_VOTE_AHEAD;
        match self
            .payments
            .process_block(vote_height, voter, &self.registry, &svc, &sync)
        {
            Ok(vote) => info!(height = vote_height, payee = %vote.payee, "payment vote sent"),
            Err(e) => debug!(height = vote_height, reason = %e, "no payment vote"),
        }
    }

    /// Rescan recent blocks for the last payment of every node.
    pub fn refresh_last_paid(&mut self, svc: &Services<'_>) {
        let storage_limit = MasternodePayments::storage_limit(self.registry.len());
        let winners_synced = self.sync.is_winners_list_synced();
        self.registry.update_last_paid(
            &self.payments,
            storage_limit,
            self.is_masternode(),
            winners_synced,
            svc,
        );
    }
}

/// Spawn the maintenance loop. It stops when `shutdown_rx` fires.
pub fn spawn_maintenance(
    core: Arc<Mutex<MasternodeCore>>,
    collab: Arc<Collaborators>,
    schedule: MaintenanceSchedule,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(schedule.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("maintenance task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    core.lock().await.tick(&schedule, &collab);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active::ActiveMasternode;
    use crate::masternode_conf::MasternodeConfig;
    use crate::testing::{finished_sync, peer, Fixture, NOW, TIP};
    use apollon_crypto::keypair_from_seed;
    use apollon_network::SyncStage;
    use apollon_types::Timestamp;

    fn core(fx: &Fixture, active: Option<ActiveMasternode>) -> MasternodeCore {
        MasternodeCore::with_parts(fx.params.clone(), active, MasternodeConfig::new(), Timestamp::new(NOW))
    }

    fn connect_peers(fx: &Fixture) {
        for n in 1..=3 {
            let mut p = peer(n);
            p.common_height = Some(TIP);
            p.sync_height = Some(TIP);
            fx.peers.add_peer(p);
        }
        fx.chain.set_best_header(Some(TIP));
    }

    fn run_ticks(core: &mut MasternodeCore, fx: &Fixture, collab: &Collaborators, n: u64) {
        let schedule = MaintenanceSchedule::default();
        for _ in 0..n {
            fx.clock.advance(1);
            core.tick(&schedule, collab);
        }
    }

    #[test]
    fn schedule_follows_config() {
        let config = NodeConfig {
            tick_secs: 2,
            manage_state_secs: 10,
            cleanup_secs: 60,
            ..NodeConfig::default()
        };
        let schedule = MaintenanceSchedule::from_config(&config);
        assert_eq!(schedule.tick, Duration::from_secs(2));
        assert_eq!(schedule.sync_every, 3);
        assert_eq!(schedule.manage_every, 5);
        assert_eq!(schedule.cleanup_every, 30);
        assert_eq!(schedule.verify_every, 150);

        let default = MaintenanceSchedule::default();
        assert_eq!(default.sync_every, SYNC_TICK_SECONDS);
    }

    #[test]
    fn sync_ticks_ask_for_sporks_then_the_list() {
        let fx = Fixture::new();
        let collab = fx.collaborators();
        let mut core = core(&fx, None);
        connect_peers(&fx);

        run_ticks(&mut core, &fx, &collab, SYNC_TICK_SECONDS);
        assert_eq!(core.sync.stage(), SyncStage::Sporks);
        for n in 1..=3 {
            assert!(fx
                .peers
                .sent_to(PeerId(n))
                .contains(&WireMessage::SporkSyncRequest));
        }

        run_ticks(&mut core, &fx, &collab, SYNC_TICK_SECONDS);
        assert_eq!(core.sync.stage(), SyncStage::List);
        assert!(fx
            .peers
            .sent_to(PeerId(1))
            .contains(&WireMessage::GetList(None)));
        assert!(!fx
            .peers
            .sent_to(PeerId(2))
            .contains(&WireMessage::GetList(None)));
    }

    #[test]
    fn cleanup_drops_spent_nodes() {
        let fx = Fixture::new();
        let collab = fx.collaborators();
        let mut core = core(&fx, None);
        let (gone, _) = fx.add_node(&mut core.registry, 1, NOW - 2000);
        let (kept, _) = fx.add_node(&mut core.registry, 2, NOW - 2000);
        core.sync = finished_sync(&fx);

        fx.chain.spend(&gone);
        fx.clock.advance(60);
        core.cleanup(&collab.services());
        assert!(!core.registry.has(&gone));
        assert!(core.registry.has(&kept));
    }

    #[test]
    fn cleanup_waits_for_the_list() {
        let fx = Fixture::new();
        let collab = fx.collaborators();
        let mut core = core(&fx, None);
        let (gone, _) = fx.add_node(&mut core.registry, 1, NOW - 2000);
        fx.chain.spend(&gone);
        fx.clock.advance(60);
        core.cleanup(&collab.services());
        assert!(core.registry.has(&gone));
    }

    #[test]
    fn manage_state_runs_on_schedule() {
        let fx = Fixture::new();
        let collab = fx.collaborators();
        let operator = keypair_from_seed(&[101; 32]);
        let mut core = core(&fx, Some(ActiveMasternode::new(operator, Some(fx.addr(1)))));
        let schedule = MaintenanceSchedule::default();

        for _ in 1..schedule.manage_every {
            core.tick(&schedule, &collab);
        }
        let state = core.active.as_ref().map(|a| a.state().as_str());
        assert_eq!(state, Some("INITIAL"));

        core.tick(&schedule, &collab);
        let state = core.active.as_ref().map(|a| a.state().as_str());
        assert_eq!(state, Some("SYNC_IN_PROCESS"));
    }

    #[test]
    fn started_masternode_votes_on_new_tip() {
        let fx = Fixture::new();
        let collab = fx.collaborators();
        let operator = keypair_from_seed(&[101; 32]);
        let mut core = core(&fx, Some(ActiveMasternode::new(operator, Some(fx.addr(1)))));
        for n in 1..=3 {
            fx.add_node(&mut core.registry, n, NOW - 2000);
        }
        core.sync = finished_sync(&fx);
        fx.peers.set_reachable(fx.addr(1), PeerId(50));

        let schedule = MaintenanceSchedule::default();
        for _ in 0..schedule.manage_every {
            core.tick(&schedule, &collab);
        }
        assert!(core.active.as_ref().is_some_and(|a| a.is_started()));

        core.updated_block_tip(TIP, &collab);
        let votes = fx
            .peers
            .relayed()
            .into_iter()
            .filter(|m| matches!(m, WireMessage::PaymentVote(v) if v.height == TIP + PAYMENT_VOTE_AHEAD))
            .count();
        assert_eq!(votes, 1);
    }

    #[test]
    fn plain_node_never_votes() {
        let fx = Fixture::new();
        let collab = fx.collaborators();
        let mut core = core(&fx, None);
        fx.add_node(&mut core.registry, 1, NOW - 2000);
        core.sync = finished_sync(&fx);

        core.updated_block_tip(TIP, &collab);
        assert!(fx
            .peers
            .relayed()
            .iter()
            .all(|m| !matches!(m, WireMessage::PaymentVote(_))));
    }

    #[tokio::test]
    async fn maintenance_task_stops_on_shutdown() {
        let fx = Fixture::new();
        let core = Arc::new(Mutex::new(core(&fx, None)));
        let collab = Arc::new(fx.collaborators());
        let (tx, rx) = broadcast::channel(1);
        let schedule = MaintenanceSchedule {
            tick: Duration::from_millis(10),
            ..MaintenanceSchedule::default()
        };
        let handle = spawn_maintenance(core.clone(), collab, schedule, rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).expect("send");
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("stopped in time")
            .expect("joined");
        assert!(core.lock().await.ticks > 0);
    }
}
