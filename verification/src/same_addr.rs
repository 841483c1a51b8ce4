//! Passive duplicate-address sweep.

use tracing::{debug, info};

use apollon_network::SyncView;
use apollon_registry::{MasternodeIdentity, Registry};
use apollon_types::{MasternodeState, OutPoint};

fn is_live(node: &MasternodeIdentity) -> bool {
    matches!(
        node.state(),
        MasternodeState::Enabled | MasternodeState::PreEnabled
    )
}

/// Nodes that share an address with a PoSe-verified node.
///
/// Only (pre-)enabled nodes are compared. Within each address group every
/// node sorted after a verified one is returned, and so is the node right
/// before the first verified one.
pub fn duplicates_of_verified(nodes: &[MasternodeIdentity]) -> Vec<OutPoint> {
    let mut live: Vec<&MasternodeIdentity> = nodes.iter().filter(|n| is_live(n)).collect();
    live.sort_by(|a, b| a.addr.cmp(&b.addr).then_with(|| a.outpoint.cmp(&b.outpoint)));

    let mut banned = Vec::new();
    let mut prev: Option<&MasternodeIdentity> = None;
    let mut verified: Option<&MasternodeIdentity> = None;
    for node in live {
        match prev {
            Some(p) if p.addr == node.addr => {
                if verified.is_some() {
                    banned.push(node.outpoint);
                } else if node.is_pose_verified() {
                    banned.push(p.outpoint);
                    verified = Some(node);
                }
            }
            _ => verified = node.is_pose_verified().then_some(node),
        }
        prev = Some(node);
    }
    banned
}

/// Raise the PoSe score of every node squatting on a verified node's
/// address. Returns how many were penalized.
pub fn check_same_addr(registry: &mut Registry, sync: &SyncView) -> usize {
    if !sync.synced || registry.is_empty() {
        return 0;
    }
    let banned = duplicates_of_verified(&registry.snapshot());
    for outpoint in &banned {
        registry.increase_pose_score(outpoint);
        info!(%outpoint, "increasing PoSe score of masternode sharing a verified address");
    }
    debug!(penalized = banned.len(), "same address check done");
    banned.len()
}
