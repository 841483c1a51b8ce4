//! Nullable peers: record messages without sending them.

use apollon_messages::WireMessage;
use apollon_providers::PeerSet;
use apollon_types::{PeerId, PeerInfo, ServiceAddr};
use std::collections::HashMap;
use std::sync::Mutex;

/// A test transport that records traffic instead of sending it.
pub struct NullPeers {
    peers: Mutex<Vec<PeerInfo>>,
    /// Messages "sent" to individual peers.
    sent: Mutex<Vec<(PeerId, WireMessage)>>,
    /// Messages flooded to everyone.
    relayed: Mutex<Vec<WireMessage>>,
    penalties: Mutex<Vec<(PeerId, u32)>>,
    disconnected: Mutex<Vec<PeerId>>,
    /// Addresses that accept a masternode connection, and the id they get.
    reachable: Mutex<HashMap<ServiceAddr, PeerId>>,
    listening: Mutex<bool>,
    external: Mutex<Option<ServiceAddr>>,
}

impl NullPeers {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            relayed: Mutex::new(Vec::new()),
            penalties: Mutex::new(Vec::new()),
            disconnected: Mutex::new(Vec::new()),
            reachable: Mutex::new(HashMap::new()),
            listening: Mutex::new(true),
            external: Mutex::new(None),
        }
    }

    pub fn add_peer(&self, info: PeerInfo) {
        self.peers.lock().unwrap().push(info);
    }

    pub fn remove_peer(&self, id: PeerId) {
        self.peers.lock().unwrap().retain(|p| p.id != id);
    }

    pub fn set_reachable(&self, addr: ServiceAddr, id: PeerId) {
        self.reachable.lock().unwrap().insert(addr, id);
    }

    pub fn set_listening(&self, listening: bool) {
        *self.listening.lock().unwrap() = listening;
    }

    pub fn set_external_address(&self, addr: Option<ServiceAddr>) {
        *self.external.lock().unwrap() = addr;
    }

    /// All messages sent to one peer, in order.
    pub fn sent_to(&self, id: PeerId) -> Vec<WireMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn sent(&self) -> Vec<(PeerId, WireMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn relayed(&self) -> Vec<WireMessage> {
        self.relayed.lock().unwrap().clone()
    }

    pub fn penalties(&self) -> Vec<(PeerId, u32)> {
        self.penalties.lock().unwrap().clone()
    }

    pub fn disconnected(&self) -> Vec<PeerId> {
        self.disconnected.lock().unwrap().clone()
    }

    /// Clear recorded traffic, keeping the peer list.
    pub fn reset(&self) {
        self.sent.lock().unwrap().clear();
        self.relayed.lock().unwrap().clear();
        self.penalties.lock().unwrap().clear();
        self.disconnected.lock().unwrap().clear();
    }
}

impl Default for NullPeers {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerSet for NullPeers {
    fn connected_peers(&self) -> Vec<PeerInfo> {
        self.peers.lock().unwrap().clone()
    }

    fn send(&self, peer: PeerId, message: WireMessage) {
        self.sent.lock().unwrap().push((peer, message));
    }

    fn relay(&self, message: WireMessage) {
        self.relayed.lock().unwrap().push(message);
    }

    fn misbehaving(&self, peer: PeerId, score: u32) {
        self.penalties.lock().unwrap().push((peer, score));
    }

    fn disconnect(&self, peer: PeerId) {
        self.disconnected.lock().unwrap().push(peer);
    }

    fn connect(&self, addr: ServiceAddr) -> Option<PeerId> {
        self.reachable.lock().unwrap().get(&addr).copied()
    }

    fn is_listening(&self) -> bool {
        *self.listening.lock().unwrap()
    }

    fn external_address(&self) -> Option<ServiceAddr> {
        *self.external.lock().unwrap()
    }
}
