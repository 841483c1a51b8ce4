//! The apollonnode services wired to their collaborators and a background
//! maintenance task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use apollon_messages::WireMessage;
use apollon_registry::Verdict;
use apollon_types::{PeerInfo, Timestamp};
use apollon_utils::format_duration;

use crate::config::NodeConfig;
use crate::core::{Collaborators, MasternodeCore};
use crate::maintenance::{spawn_maintenance, MaintenanceSchedule};
use crate::persistence::CachePaths;
use crate::shutdown::ShutdownController;
use crate::NodeError;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Misbehaviour score for a payload that does not decode.
const MALFORMED_MESSAGE_SCORE: u32 = 10;

pub struct ApollonNode {
    config: NodeConfig,
    core: Arc<Mutex<MasternodeCore>>,
    collaborators: Arc<Collaborators>,
    caches: CachePaths,
    shutdown: ShutdownController,
    task_handles: Vec<JoinHandle<()>>,
    started_at: Option<Timestamp>,
}

impl ApollonNode {
    pub fn new(config: NodeConfig, collaborators: Collaborators) -> Result<Self, NodeError> {
        if collaborators.params.network != config.network {
            return Err(NodeError::Config(format!(
                "collaborators run on {}, config says {}",
                collaborators.params.network.as_str(),
                config.network.as_str()
            )));
        }
        let core = MasternodeCore::new(&config, collaborators.clock.now())?;
        let caches = CachePaths::new(&config.data_dir);
        Ok(Self {
            config,
            core: Arc::new(Mutex::new(core)),
            collaborators: Arc::new(collaborators),
            caches,
            shutdown: ShutdownController::new(),
            task_handles: Vec::new(),
            started_at: None,
        })
    }

    /// Load the caches and start the maintenance task.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        std::fs::create_dir_all(&self.config.data_dir)?;
        let (registry, payments) = self.caches.load(self.config.network);
        {
            let mut core = self.core.lock().await;
            core.restore(registry, payments);
        }

        let schedule = MaintenanceSchedule::from_config(&self.config);
        let handle = spawn_maintenance(
            self.core.clone(),
            self.collaborators.clone(),
            schedule,
            self.shutdown.subscribe(),
        );
        self.task_handles.push(handle);
        self.started_at = Some(self.collaborators.clock.now());

        info!(
            network = self.config.network.as_str(),
            masternode = self.config.masternode,
            data_dir = %self.config.data_dir.display(),
            "apollonnode services started"
        );
        Ok(())
    }

    /// Stop the background tasks and write the caches.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        if self.shutdown.is_triggered() {
            return Ok(());
        }
        info!("apollonnode services stopping");
        self.shutdown.shutdown();

        let handles: Vec<JoinHandle<()>> = self.task_handles.drain(..).collect();
        let wait_all = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "background task failed");
                }
            }
        };
        let timed_out = tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await.is_err();
        if timed_out {
            warn!(timeout = ?SHUTDOWN_TIMEOUT, "shutdown timeout, some tasks may still be running");
        }

        {
            let core = self.core.lock().await;
            if let Err(e) = self
                .caches
                .save(self.config.network, &core.registry, &core.payments)
            {
                warn!(error = %e, "failed to write masternode caches");
            }
        }

        let uptime = self
            .started_at
            .take()
            .map(|t| self.collaborators.clock.now().as_secs().saturating_sub(t.as_secs()))
            .unwrap_or(0);
        info!(uptime = %format_duration(uptime), "apollonnode services stopped");
        if timed_out {
            return Err(NodeError::ShutdownTimeout);
        }
        Ok(())
    }

    /// Inbound message already decoded by the transport.
    pub async fn handle_message(&self, peer: &PeerInfo, msg: WireMessage) -> Verdict {
        let mut core = self.core.lock().await;
        core.process_message(peer, msg, &self.collaborators)
    }

    /// Inbound raw payload. Undecodable bytes count against the sender.
    pub async fn handle_bytes(&self, peer: &PeerInfo, bytes: &[u8]) -> Verdict {
        match WireMessage::decode(bytes) {
            Ok(msg) => self.handle_message(peer, msg).await,
            Err(e) => {
                debug!(peer = %peer.id, error = %e, "undecodable message");
                self.collaborators
                    .peers
                    .misbehaving(peer.id, MALFORMED_MESSAGE_SCORE);
                Verdict::penalize(MALFORMED_MESSAGE_SCORE)
            }
        }
    }

    /// The host accepted a block at `height`.
    pub async fn updated_block_tip(&self, height: u64) {
        let mut core = self.core.lock().await;
        core.updated_block_tip(height, &self.collaborators);
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn core(&self) -> Arc<Mutex<MasternodeCore>> {
        self.core.clone()
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{peer, Fixture, NOW};
    use apollon_types::NetworkId;

    fn config(dir: &std::path::Path) -> NodeConfig {
        NodeConfig {
            network: NetworkId::Live,
            data_dir: dir.to_path_buf(),
            ..NodeConfig::default()
        }
    }

    #[test]
    fn network_must_match_collaborators() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fx = Fixture::new();
        let config = NodeConfig {
            network: NetworkId::Dev,
            ..config(dir.path())
        };
        assert!(matches!(
            ApollonNode::new(config, fx.collaborators()),
            Err(NodeError::Config(_))
        ));
    }

    #[tokio::test]
    async fn stop_writes_caches_and_start_reads_them() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fx = Fixture::new();

        let mut node = ApollonNode::new(config(dir.path()), fx.collaborators()).expect("node");
        node.start().await.expect("start");
        {
            let core = node.core();
            let mut core = core.lock().await;
            fx.add_node(&mut core.registry, 1, NOW - 2000);
        }
        node.stop().await.expect("stop");
        assert!(dir.path().join("mncache.bin").exists());

        let mut again = ApollonNode::new(config(dir.path()), fx.collaborators()).expect("node");
        again.start().await.expect("start");
        assert_eq!(again.core().lock().await.registry.len(), 1);
        again.stop().await.expect("stop");
        again.stop().await.expect("second stop is a no-op");
    }

    #[tokio::test]
    async fn garbage_bytes_are_penalized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fx = Fixture::new();
        let node = ApollonNode::new(config(dir.path()), fx.collaborators()).expect("node");
        let verdict = node.handle_bytes(&peer(7), &[0xff; 3]).await;
        assert!(!verdict.accepted);
        assert_eq!(fx.peers.penalties(), vec![(peer(7).id, MALFORMED_MESSAGE_SCORE)]);
    }

    #[tokio::test]
    async fn encoded_messages_are_dispatched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fx = Fixture::new();
        let node = ApollonNode::new(config(dir.path()), fx.collaborators()).expect("node");
        let bytes = WireMessage::SporkSyncRequest.encode().expect("encode");
        assert!(node.handle_bytes(&peer(8), &bytes).await.accepted);
        assert!(fx.peers.penalties().is_empty());
    }
}
