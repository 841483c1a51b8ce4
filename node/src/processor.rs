//! Inbound message dispatch.

use tracing::{debug, warn};

use apollon_messages::WireMessage;
use apollon_registry::Verdict;
use apollon_types::PeerInfo;

use crate::core::{Collaborators, MasternodeCore};

impl MasternodeCore {
    /// Handle one message from `peer` and report any penalty to the transport.
    ///
    /// Gossip payloads are deduplicated by content hash first; only accepted
    /// messages stay remembered. Announcements skip that filter: the registry
    /// tracks re-seen announcements itself, and recovery depends on seeing
    /// them again.
    pub fn process_message(
        &mut self,
        peer: &PeerInfo,
        msg: WireMessage,
        collab: &Collaborators,
    ) -> Verdict {
        let svc = collab.services();
        let sync = self.sync.view();
        let command = msg.command();
        self.stats.received(command);

        let hash = match &msg {
            WireMessage::Announce(_) => None,
            other => other.content_hash(),
        };
        if let Some(hash) = &hash {
            if self.dedup.is_duplicate(hash) {
                debug!(peer = %peer.id, command, %hash, "duplicate message");
                self.stats.outcome(command, false, 0);
                return Verdict::reject();
            }
        }

        let verdict = match msg {
            WireMessage::Announce(mnb) => {
                let outcome = self
                    .registry
                    .check_mnb_and_update_list(Some(peer), mnb, &svc, &sync);
                if outcome.own_activated {
                    if let Some(active) = self.active.as_mut() {
                        active.manage_state(&mut self.registry, &sync, collab.wallet(), &svc);
                    }
                }
                outcome.verdict
            }
            WireMessage::Ping(mnp) => self.registry.process_ping(peer, mnp, &svc, &sync),
            WireMessage::GetList(outpoint) => {
                self.registry.handle_get_list(peer, outpoint, &svc, &sync)
            }
            WireMessage::Verify(mnv) => {
                let local = self.active.as_ref().and_then(|a| a.local_masternode());
                self.pose.process_verify(
                    peer,
                    mnv,
                    local.as_ref(),
                    &mut self.registry,
                    &mut self.fulfilled,
                    &svc,
                    &sync,
                )
            }
            WireMessage::PaymentVoteSyncRequest { count } => {
                debug!(peer = %peer.id, count, "payment vote sync request");
                self.payments
                    .handle_sync_request(peer, &mut self.fulfilled, &svc, &sync)
            }
            WireMessage::PaymentVote(vote) => self.payments.process_vote(
                peer,
                vote,
                &mut self.registry,
                self.active.is_some(),
                &svc,
                &sync,
            ),
            WireMessage::PaymentBlockRequest { heights } => {
                let sent = self.payments.handle_block_request(peer, &heights, &svc);
                debug!(peer = %peer.id, requested = heights.len(), sent, "served payment blocks");
                Verdict::accept()
            }
            WireMessage::SporkSyncRequest => {
                // sporks belong to the host node
                debug!(peer = %peer.id, "spork sync request");
                Verdict::accept()
            }
            WireMessage::SyncStatus { item, count } => {
                self.sync.process_sync_status(peer.id, item.asset_id(), count);
                Verdict::accept()
            }
        };

        self.stats.outcome(command, verdict.accepted, verdict.dos);
        if verdict.dos > 0 {
            warn!(peer = %peer.id, command, dos = verdict.dos, "peer misbehaved");
            svc.peers.misbehaving(peer.id, verdict.dos);
        }
        if !verdict.accepted {
            // content hashes leave out signatures, so a rejected copy must
            // not shadow a genuine one
            if let Some(hash) = &hash {
                self.dedup.forget(hash);
            }
        }
        verdict
    }
}
