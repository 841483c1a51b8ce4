//! Per-peer markers for requests that were already made or served.

use apollon_types::{ServiceAddr, Timestamp};
use apollon_utils::PendingRequestTracker;

/// How long a marker lives unless a shorter TTL is given.
pub const FULFILLED_REQUEST_EXPIRE_SECONDS: u64 = 60 * 60;

#[derive(Default)]
pub struct FulfilledRequests {
    markers: PendingRequestTracker<(ServiceAddr, String)>,
}

impl FulfilledRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, addr: ServiceAddr, request: &str, now: Timestamp) {
        self.add_for(addr, request, FULFILLED_REQUEST_EXPIRE_SECONDS, now);
    }

    pub fn add_for(&mut self, addr: ServiceAddr, request: &str, ttl_secs: u64, now: Timestamp) {
        self.markers
            .register((addr, request.to_string()), (), ttl_secs, now);
    }

    pub fn has(&self, addr: ServiceAddr, request: &str, now: Timestamp) -> bool {
        self.markers.is_pending(&(addr, request.to_string()), now)
    }

    pub fn remove(&mut self, addr: ServiceAddr, request: &str) {
        self.markers.remove(&(addr, request.to_string()));
    }

    pub fn sweep(&mut self, now: Timestamp) -> usize {
        self.markers.sweep(now).len()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_are_per_address_and_request() {
        let mut fulfilled = FulfilledRequests::new();
        let a = ServiceAddr::v4(1, 1, 1, 1, 8168);
        let b = ServiceAddr::v4(2, 2, 2, 2, 8168);
        let now = Timestamp::new(1000);
        fulfilled.add(a, "spork-sync", now);
        assert!(fulfilled.has(a, "spork-sync", now));
        assert!(!fulfilled.has(a, "apollonnode-list-sync", now));
        assert!(!fulfilled.has(b, "spork-sync", now));
        fulfilled.remove(a, "spork-sync");
        assert!(!fulfilled.has(a, "spork-sync", now));
    }

    #[test]
    fn markers_expire() {
        let mut fulfilled = FulfilledRequests::new();
        let a = ServiceAddr::v4(1, 1, 1, 1, 8168);
        fulfilled.add_for(a, "mnv-request", 600, Timestamp::new(0));
        assert!(fulfilled.has(a, "mnv-request", Timestamp::new(599)));
        assert!(!fulfilled.has(a, "mnv-request", Timestamp::new(600)));
        assert_eq!(fulfilled.sweep(Timestamp::new(601)), 1);
        assert!(fulfilled.is_empty());
    }
}
