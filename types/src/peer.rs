//! Peer handles as seen by the coordination layer.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ServiceAddr;

/// Opaque identifier of a connected peer, assigned by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer={}", self.0)
    }
}

/// Snapshot of a connected peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: ServiceAddr,
    pub protocol_version: u32,
    pub inbound: bool,
    /// Short-lived connection opened only to talk to a masternode.
    pub masternode_connection: bool,
    /// Best height both sides agree on, if the peer reported one.
    pub common_height: Option<u64>,
    /// Best header height the peer announced.
    pub sync_height: Option<u64>,
}

impl PeerInfo {
    pub fn new(id: PeerId, addr: ServiceAddr, protocol_version: u32) -> Self {
        Self {
            id,
            addr,
            protocol_version,
            inbound: false,
            masternode_connection: false,
            common_height: None,
            sync_height: None,
        }
    }
}
