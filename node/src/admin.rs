//! Operator commands: starting configured aliases and JSON views of the
//! list, the sync, and this node.

use serde::Serialize;
use tracing::{info, warn};

use apollon_messages::WireMessage;
use apollon_payments::{not_qualify_reason, QueueContext};
use apollon_providers::{Services, Wallet};
use apollon_registry::{create_announcement, AnnouncementKeys};

use crate::core::{Collaborators, MasternodeCore};
use crate::masternode_conf::{AliasView, MasternodeEntry};
use crate::NodeError;

/// Outcome of starting one alias.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StartResult {
    pub alias: String,
    pub result: String,
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StartResult {
    fn new(alias: &str, outcome: Result<(), NodeError>) -> Self {
        match outcome {
            Ok(()) => Self {
                alias: alias.to_string(),
                result: "successful".to_string(),
                error_message: None,
            },
            Err(e) => Self {
                alias: alias.to_string(),
                result: "failed".to_string(),
                error_message: Some(e.to_string()),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_message.is_none()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StartSummary {
    pub overall: String,
    pub detail: Vec<StartResult>,
}

impl StartSummary {
    fn new(detail: Vec<StartResult>) -> Self {
        let started = detail.iter().filter(|r| r.is_success()).count();
        let failed = detail.len() - started;
        Self {
            overall: format!(
                "Successfully started {started} apollonnodes, failed to start {failed}, total {}",
                detail.len()
            ),
            detail,
        }
    }
}

/// One registry entry as shown by `list`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasternodeView {
    /// 0 for nodes outside the enabled ranking.
    pub rank: u32,
    pub outpoint: String,
    pub status: String,
    pub protocol: u32,
    pub payee: String,
    pub last_seen: u64,
    pub active_since: i64,
    pub last_paid_time: u64,
    pub last_paid_block: u64,
    pub authority: String,
    pub is_mine: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_qualify_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SyncStatusView {
    #[serde(rename = "AssetID")]
    pub asset_id: i32,
    pub asset_name: String,
    pub asset_start_time: u64,
    pub attempt: u32,
    pub is_blockchain_synced: bool,
    pub is_masternode_list_synced: bool,
    pub is_winners_list_synced: bool,
    pub is_synced: bool,
    pub is_failed: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct LocalStatusView {
    #[serde(rename = "type")]
    pub kind: String,
    pub state: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CountView {
    pub total: usize,
    pub enabled: usize,
    /// Nodes that could win the next block.
    pub qualify: usize,
}

fn unlocked_wallet(collab: &Collaborators) -> Result<&dyn Wallet, NodeError> {
    let wallet = collab
        .wallet()
        .ok_or_else(|| NodeError::Other("wallet is disabled".to_string()))?;
    if wallet.is_locked() {
        return Err(NodeError::WalletLocked);
    }
    Ok(wallet)
}

impl MasternodeCore {
    /// Announce the alias named `alias` from `masternode.conf`.
    pub fn start_alias(&mut self, alias: &str, collab: &Collaborators) -> Result<StartResult, NodeError> {
        let wallet = unlocked_wallet(collab)?;
        let entry = self
            .aliases
            .find_by_alias(alias)
            .cloned()
            .ok_or_else(|| NodeError::UnknownAlias(alias.to_string()))?;
        let outcome = self.announce_entry(&entry, wallet, &collab.services());
        Ok(StartResult::new(alias, outcome))
    }

    /// Announce every configured alias.
    pub fn start_all(&mut self, collab: &Collaborators) -> Result<StartSummary, NodeError> {
        self.start_matching(collab, |_, _| true)
    }

    /// Announce the aliases the registry does not know yet.
    pub fn start_missing(&mut self, collab: &Collaborators) -> Result<StartSummary, NodeError> {
        if !self.sync.is_list_synced() {
            return Err(NodeError::ListNotSynced);
        }
        self.start_matching(collab, |core, entry| {
            entry.outpoint().map_or(true, |op| !core.registry.has(&op))
        })
    }

    fn start_matching(
        &mut self,
        collab: &Collaborators,
        wanted: impl Fn(&Self, &MasternodeEntry) -> bool,
    ) -> Result<StartSummary, NodeError> {
        let wallet = unlocked_wallet(collab)?;
        let svc = collab.services();
        let entries: Vec<MasternodeEntry> = self
            .aliases
            .entries()
            .iter()
            .filter(|e| wanted(self, e))
            .cloned()
            .collect();
        let detail = entries
            .iter()
            .map(|entry| StartResult::new(&entry.alias, self.announce_entry(entry, wallet, &svc)))
            .collect();
        let summary = StartSummary::new(detail);
        info!(summary = %summary.overall, "start aliases");
        Ok(summary)
    }

    fn announce_entry(
        &mut self,
        entry: &MasternodeEntry,
        wallet: &dyn Wallet,
        svc: &Services<'_>,
    ) -> Result<(), NodeError> {
        let outpoint = entry.outpoint()?;
        let addr = entry.service_addr()?;
        let operator = entry.operator_keypair()?;
        let collateral = wallet
            .collateral(Some(outpoint))
            .ok_or_else(|| NodeError::CollateralNotFound(outpoint.to_string()))?;

        let keys = AnnouncementKeys {
            collateral_public: collateral.public,
            collateral_private: &collateral.private,
            operator_public: operator.public,
            operator_private: &operator.private,
        };
        let chain_synced = self.sync.blockchain_synced() || self.offline_signing;
        let mnb = create_announcement(outpoint, addr, &keys, chain_synced, svc).map_err(|e| {
            warn!(alias = %entry.alias, error = %e, "cannot create announcement");
            e
        })?;

        info!(alias = %entry.alias, %outpoint, %addr, "relaying announcement");
        let sync = self.sync.view();
        self.registry.update_list(mnb.clone(), svc, &sync);
        svc.peers.relay(WireMessage::Announce(mnb));
        Ok(())
    }

    /// Every registry entry, best ranked first.
    pub fn list(&mut self, collab: &Collaborators) -> Vec<MasternodeView> {
        let svc = collab.services();
        // plain nodes only refresh payment history when asked
        if !self.is_masternode() {
            self.refresh_last_paid(&svc);
        }

        let sync = self.sync.view();
        self.registry.check_all(&svc, &sync);

        let tip = svc.tip();
        let min_proto = svc.params.min_payments_proto();
        let ranks = self.registry.ranks(tip, min_proto, &svc);
        let ctx = QueueContext {
            now: svc.now(),
            tip,
            count: self.registry.count_nodes(min_proto),
            min_proto,
            filter_recency: true,
        };

        let mut views: Vec<MasternodeView> = self
            .registry
            .iter()
            .map(|node| {
                let rank = ranks
                    .iter()
                    .find(|(_, n)| n.outpoint == node.outpoint)
                    .map_or(0, |(rank, _)| *rank);
                let scheduled = self.payments.is_scheduled(node, tip + 1, tip);
                MasternodeView {
                    rank,
                    outpoint: node.outpoint.to_string(),
                    status: node.state().as_str().to_string(),
                    protocol: node.protocol_version,
                    payee: node.payee().to_string(),
                    last_seen: node.last_seen().as_secs(),
                    active_since: node.last_seen().diff(node.sig_time).max(0),
                    last_paid_time: node.last_paid_time.as_secs(),
                    last_paid_block: node.last_paid_block,
                    authority: node.addr.to_string(),
                    is_mine: self.aliases.is_my_node(&node.outpoint),
                    label: self
                        .aliases
                        .find_by_outpoint(&node.outpoint)
                        .map(|e| e.alias.clone()),
                    not_qualify_reason: not_qualify_reason(node, scheduled, &ctx)
                        .map(|r| r.to_string()),
                }
            })
            .collect();
        views.sort_by(|a, b| {
            (a.rank == 0, a.rank, &a.outpoint).cmp(&(b.rank == 0, b.rank, &b.outpoint))
        });
        views
    }

    pub fn count(&self, collab: &Collaborators) -> CountView {
        let svc = collab.services();
        let min_proto = svc.params.min_payments_proto();
        let (_, qualify) = self
            .payments
            .next_in_queue(&self.registry, svc.tip() + 1, true, &svc);
        CountView {
            total: self.registry.len(),
            enabled: self.registry.count_enabled(min_proto),
            qualify,
        }
    }

    pub fn sync_status(&self) -> SyncStatusView {
        let stage = self.sync.stage();
        SyncStatusView {
            asset_id: stage.asset_id(),
            asset_name: stage.asset_name().to_string(),
            asset_start_time: self.sync.asset_started().as_secs(),
            attempt: self.sync.attempt(),
            is_blockchain_synced: self.sync.blockchain_synced(),
            is_masternode_list_synced: self.sync.is_list_synced(),
            is_winners_list_synced: self.sync.is_winners_list_synced(),
            is_synced: self.sync.is_synced(),
            is_failed: self.sync.is_failed(),
        }
    }

    /// State of local activation. Fails on a plain node.
    pub fn local_status(&self) -> Result<LocalStatusView, NodeError> {
        let active = self.active.as_ref().ok_or(NodeError::NotMasternode)?;
        Ok(LocalStatusView {
            kind: active.kind().as_str().to_string(),
            state: active.state().as_str().to_string(),
            status: active.status(),
            outpoint: active.outpoint().map(|op| op.to_string()),
            service: active.service().map(|addr| addr.to_string()),
        })
    }

    /// Configured aliases; `isMine` when the wallet holds the collateral.
    pub fn list_conf(&self, collab: &Collaborators) -> Vec<AliasView> {
        let wallet = collab.wallet();
        self.aliases.views(|entry| {
            let Some(wallet) = wallet else {
                return false;
            };
            entry
                .outpoint()
                .is_ok_and(|op| wallet.collateral(Some(op)).is_some())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masternode_conf::MasternodeConfig;
    use crate::testing::{finished_sync, Fixture, NOW};
    use apollon_types::{OutPoint, Timestamp, TxHash};

    const COLLATERAL_SEED: [u8; 32] = [40; 32];

    fn aliases(fx: &Fixture) -> (MasternodeConfig, OutPoint) {
        let outpoint = OutPoint::new(TxHash::new([40; 32]), 1);
        let mut config = MasternodeConfig::new();
        config.add(
            "mn1",
            &fx.addr(40).to_string(),
            &hex::encode([140u8; 32]),
            &hex::encode([40u8; 32]),
            "1",
        );
        config.add(
            "broken",
            &fx.addr(41).to_string(),
            &hex::encode([141u8; 32]),
            &hex::encode([41u8; 32]),
            "0",
        );
        (config, outpoint)
    }

    fn core(fx: &Fixture, aliases: MasternodeConfig) -> MasternodeCore {
        let mut core = MasternodeCore::with_parts(fx.params.clone(), None, aliases, Timestamp::new(NOW));
        core.sync = finished_sync(fx);
        core
    }

    fn announcements(fx: &Fixture) -> usize {
        fx.peers
            .relayed()
            .iter()
            .filter(|m| matches!(m, WireMessage::Announce(_)))
            .count()
    }

    #[test]
    fn start_alias_announces_and_registers() {
        let fx = Fixture::new();
        let collab = fx.collaborators();
        let (config, outpoint) = aliases(&fx);
        fx.fund_wallet(outpoint, COLLATERAL_SEED, 10);
        let mut core = core(&fx, config);

        let result = core.start_alias("mn1", &collab).expect("start");
        assert!(result.is_success(), "{result:?}");
        assert_eq!(result.result, "successful");
        assert!(core.registry.has(&outpoint));
        assert_eq!(announcements(&fx), 1);

        let unknown = core.start_alias("nope", &collab).unwrap_err();
        assert_eq!(unknown.to_string(), "Could not find alias in config. Verify with list-conf.");
    }

    #[test]
    fn start_alias_needs_an_unlocked_wallet() {
        let fx = Fixture::new();
        let collab = fx.collaborators();
        let (config, _) = aliases(&fx);
        let mut core = core(&fx, config);
        fx.wallet.set_locked(true);
        assert!(matches!(
            core.start_alias("mn1", &collab),
            Err(NodeError::WalletLocked)
        ));
        assert_eq!(announcements(&fx), 0);
    }

    #[test]
    fn start_all_reports_each_alias() {
        let fx = Fixture::new();
        let collab = fx.collaborators();
        let (config, outpoint) = aliases(&fx);
        fx.fund_wallet(outpoint, COLLATERAL_SEED, 10);
        let mut core = core(&fx, config);

        let summary = core.start_all(&collab).expect("start");
        assert_eq!(
            summary.overall,
            "Successfully started 1 apollonnodes, failed to start 1, total 2"
        );
        let broken = &summary.detail[1];
        assert_eq!(broken.alias, "broken");
        assert_eq!(broken.result, "failed");
        assert!(broken
            .error_message
            .as_deref()
            .is_some_and(|m| m.starts_with("Could not allocate outpoint")));

        let json = serde_json::to_value(&summary).expect("json");
        assert_eq!(json["detail"][0]["result"], "successful");
        assert!(json["detail"][0].get("errorMessage").is_none());
    }

    #[test]
    fn start_missing_skips_known_nodes() {
        let fx = Fixture::new();
        let collab = fx.collaborators();
        let (config, outpoint) = aliases(&fx);
        fx.fund_wallet(outpoint, COLLATERAL_SEED, 10);
        let mut core = core(&fx, config);

        core.start_alias("mn1", &collab).expect("start");
        let summary = core.start_missing(&collab).expect("start");
        assert_eq!(summary.detail.len(), 1);
        assert_eq!(summary.detail[0].alias, "broken");

        core.sync = apollon_network::MasternodeSync::new(fx.params.network, Timestamp::new(NOW));
        assert!(matches!(
            core.start_missing(&collab),
            Err(NodeError::ListNotSynced)
        ));
    }

    #[test]
    fn list_shows_rank_and_ownership() {
        let fx = Fixture::new();
        let collab = fx.collaborators();
        let (config, outpoint) = aliases(&fx);
        fx.fund_wallet(outpoint, COLLATERAL_SEED, 10);
        let mut core = core(&fx, config);
        for n in 1..=3 {
            fx.add_node(&mut core.registry, n, NOW - 2000);
        }
        core.start_alias("mn1", &collab).expect("start");

        let views = core.list(&collab);
        assert_eq!(views.len(), 4);
        let ranked: Vec<u32> = views.iter().map(|v| v.rank).filter(|r| *r > 0).collect();
        assert_eq!(ranked, vec![1, 2, 3]);

        let mine = views
            .iter()
            .find(|v| v.outpoint == outpoint.to_string())
            .expect("own node");
        assert!(mine.is_mine);
        assert_eq!(mine.label.as_deref(), Some("mn1"));
        assert_eq!(mine.status, "PRE_ENABLED");
        assert!(mine.not_qualify_reason.is_some());

        let json = serde_json::to_value(&views).expect("json");
        assert!(json[0].get("lastPaidBlock").is_some());
        assert!(json[0].get("activeSince").is_some());
    }

    #[test]
    fn sync_status_uses_asset_names() {
        let fx = Fixture::new();
        let core = core(&fx, MasternodeConfig::new());
        let status = core.sync_status();
        assert_eq!(status.asset_name, "APOLLONNODE_SYNC_FINISHED");
        assert!(status.is_synced);

        let json = serde_json::to_value(&status).expect("json");
        assert_eq!(json["AssetID"], 999);
        assert_eq!(json["IsMasternodeListSynced"], true);
        assert_eq!(json["IsFailed"], false);
    }

    #[test]
    fn local_status_needs_masternode_mode() {
        let fx = Fixture::new();
        let core = core(&fx, MasternodeConfig::new());
        assert!(matches!(core.local_status(), Err(NodeError::NotMasternode)));
    }

    #[test]
    fn list_conf_marks_wallet_collateral() {
        let fx = Fixture::new();
        let collab = fx.collaborators();
        let (config, outpoint) = aliases(&fx);
        fx.fund_wallet(outpoint, COLLATERAL_SEED, 10);
        let core = core(&fx, config);
        let views = core.list_conf(&collab);
        assert!(views[0].is_mine);
        assert!(!views[1].is_mine);
    }

    #[test]
    fn count_reports_enabled_nodes() {
        let fx = Fixture::new();
        let collab = fx.collaborators();
        let mut core = core(&fx, MasternodeConfig::new());
        for n in 1..=4 {
            fx.add_node(&mut core.registry, n, NOW - 2000);
        }
        let count = core.count(&collab);
        assert_eq!(count.total, 4);
        assert_eq!(count.enabled, 4);
        assert_eq!(count.qualify, 4);
    }
}
