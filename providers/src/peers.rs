//! The peer-to-peer transport as seen from this layer.

use apollon_messages::WireMessage;
use apollon_types::{PeerId, PeerInfo, ServiceAddr};

pub trait PeerSet: Send + Sync {
    fn connected_peers(&self) -> Vec<PeerInfo>;

    fn send(&self, peer: PeerId, message: WireMessage);

    /// Flood a message to every connected peer.
    fn relay(&self, message: WireMessage);

    /// Report a suggested misbehaviour penalty. Banning is the transport's call.
    fn misbehaving(&self, peer: PeerId, score: u32);

    fn disconnect(&self, peer: PeerId);

    /// Open a short-lived masternode connection. `None` when unreachable.
    fn connect(&self, addr: ServiceAddr) -> Option<PeerId>;

    /// Whether this node accepts inbound connections.
    fn is_listening(&self) -> bool;

    /// Detected external address of this node, if any.
    fn external_address(&self) -> Option<ServiceAddr>;

    fn is_local(&self, addr: &ServiceAddr) -> bool {
        addr.is_local()
    }

    fn peer(&self, id: PeerId) -> Option<PeerInfo> {
        self.connected_peers().into_iter().find(|p| p.id == id)
    }
}
