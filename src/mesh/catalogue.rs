//! The service catalogue of spec §4.6: a concurrent multimap from service
//! name to the peers that host it, backed by `dashmap` for the same
//! reason the ground truth reaches for it on its own read-heavy,
//! concurrently-updated maps.

use dashmap::DashMap;

use crate::mesh::collections::HashSet;
use crate::mesh::trust::PeerName;

/// `service_name -> {peer_name}` (spec §3 "Catalogue entry").
pub struct ServiceCatalogue {
    entries: DashMap<String, HashSet<PeerName>>,
}

impl ServiceCatalogue {
    pub fn new() -> Self {
        ServiceCatalogue { entries: DashMap::new() }
    }

    /// Records that `peer` advertises `service` (spec §4.10 accept/connect
    /// paths, after catalogue exchange).
    pub fn add(&self, service: &str, peer: PeerName) {
        self.entries.entry(service.to_owned()).or_default().insert(peer);
    }

    pub fn contains(&self, service: &str) -> bool {
        self.entries.get(service).map_or(false, |peers| !peers.is_empty())
    }

    /// Returns a snapshot of the peers hosting `service` (spec §4.6:
    /// "`lookup` returns a snapshot").
    pub fn lookup(&self, service: &str) -> Vec<PeerName> {
        self.entries
            .get(service)
            .map(|peers| peers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes every entry that names `peer`, on disconnect (spec §4.10).
    /// Services left with no remaining peer are dropped entirely so
    /// `contains` reflects reality.
    pub fn remove_by_peer(&self, peer: &PeerName) {
        self.entries.retain(|_, peers| {
            peers.remove(peer);
            !peers.is_empty()
        });
    }
}

impl Default for ServiceCatalogue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_lookup_finds_peer() {
        let cat = ServiceCatalogue::new();
        cat.add("Echo", PeerName::from("a"));
        assert!(cat.contains("Echo"));
        assert_eq!(cat.lookup("Echo"), vec![PeerName::from("a")]);
    }

    #[test]
    fn lookup_of_unknown_service_is_empty() {
        let cat = ServiceCatalogue::new();
        assert!(!cat.contains("Nope"));
        assert!(cat.lookup("Nope").is_empty());
    }

    #[test]
    fn remove_by_peer_drops_only_that_peers_entries() {
        let cat = ServiceCatalogue::new();
        cat.add("Echo", PeerName::from("a"));
        cat.add("Echo", PeerName::from("b"));
        cat.add("Stock", PeerName::from("a"));

        cat.remove_by_peer(&PeerName::from("a"));

        assert_eq!(cat.lookup("Echo"), vec![PeerName::from("b")]);
        assert!(!cat.contains("Stock"));
    }
}
