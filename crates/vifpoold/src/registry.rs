//! In-memory bookkeeping for pooled ports.
//!
//! The registry is owned by a single [`VifPool`](crate::VifPool) and guarded
//! by its lock. Nothing here performs I/O, so every method is atomic with
//! respect to the request path and the reclamation loop.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;
use vifpool_common::{PoolKey, PortId, Vif};

/// Counters for pool activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VifPoolStats {
    /// Ports handed out to consumers.
    pub acquired: u64,
    /// Requests that found an empty pool.
    pub not_ready: u64,
    /// Ports created by replenishment.
    pub populated: u64,
    /// Ports cleaned and returned to a pool.
    pub recycled: u64,
    /// Ports destroyed because their pool was full.
    pub deleted: u64,
    /// Clean or teardown attempts that failed.
    pub recycle_failures: u64,
}

#[derive(Debug, Clone)]
struct RecycleEntry {
    key: PoolKey,
    seq: u64,
}

/// Ports per pool key, known ports, and the pending-recycle queue.
///
/// A port id is in at most one of {available pool, recyclable queue}; it is
/// in use when it is in neither but still known. Pool keys are never evicted.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    /// Ready ports per key, most recently returned last.
    available: HashMap<PoolKey, Vec<PortId>>,
    /// Every id currently in some available pool.
    available_ids: HashSet<PortId>,
    /// All known ports: port_id -> Vif.
    existing: HashMap<PortId, Vif>,
    /// Ports waiting for the next sweep: port_id -> key.
    recyclable: HashMap<PortId, RecycleEntry>,
    /// Ports whose deletion has started; they never return to a pool.
    retiring: HashSet<PortId>,
    next_seq: u64,
    /// Last populate attempt per key.
    last_update: HashMap<PoolKey, Instant>,
    stats: VifPoolStats,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ready ports for `key`.
    pub fn available_count(&self, key: &PoolKey) -> usize {
        self.available.get(key).map_or(0, Vec::len)
    }

    /// Ready port ids for `key`, oldest first.
    pub fn available_ports(&self, key: &PoolKey) -> &[PortId] {
        self.available.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Takes the most recently returned port of `key`.
    pub fn pop_available(&mut self, key: &PoolKey) -> Option<PortId> {
        let port_id = self.available.get_mut(key)?.pop()?;
        self.available_ids.remove(&port_id);
        Some(port_id)
    }

    /// Makes a port ready for `key`.
    ///
    /// Returns false if the port is already ready in some pool.
    pub fn push_available(&mut self, key: PoolKey, port_id: PortId) -> bool {
        if !self.available_ids.insert(port_id.clone()) {
            return false;
        }
        self.available.entry(key).or_default().push(port_id);
        true
    }

    /// Returns true if the port is ready in some pool.
    pub fn is_available(&self, port_id: &str) -> bool {
        self.available_ids.contains(port_id)
    }

    /// Queues a port for the next reclamation sweep.
    ///
    /// Returns false, leaving the registry untouched, if the port is ready in
    /// a pool. A port already queued keeps its position and takes the new key.
    pub fn mark_recyclable(&mut self, port_id: PortId, key: PoolKey) -> bool {
        if self.is_available(&port_id) {
            return false;
        }
        match self.recyclable.get_mut(&port_id) {
            Some(entry) => entry.key = key,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.recyclable.insert(port_id, RecycleEntry { key, seq });
            }
        }
        true
    }

    /// Returns true if the port is waiting for reclamation.
    pub fn is_recyclable(&self, port_id: &str) -> bool {
        self.recyclable.contains_key(port_id)
    }

    /// Number of ports waiting for reclamation.
    pub fn recyclable_count(&self) -> usize {
        self.recyclable.len()
    }

    /// Copies the queue in release order.
    pub fn snapshot_recyclable(&self) -> Vec<(PortId, PoolKey)> {
        let mut entries: Vec<_> = self.recyclable.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.seq);
        entries
            .into_iter()
            .map(|(port_id, entry)| (port_id.clone(), entry.key.clone()))
            .collect()
    }

    /// Removes a port from the queue.
    pub fn delete_recyclable_entry(&mut self, port_id: &str) -> Option<PoolKey> {
        self.recyclable.remove(port_id).map(|entry| entry.key)
    }

    /// Records a port, replacing any previous record with the same id.
    pub fn register(&mut self, vif: Vif) {
        self.existing.insert(vif.id.clone(), vif);
    }

    pub fn get(&self, port_id: &str) -> Option<&Vif> {
        self.existing.get(port_id)
    }

    pub fn get_mut(&mut self, port_id: &str) -> Option<&mut Vif> {
        self.existing.get_mut(port_id)
    }

    pub fn contains(&self, port_id: &str) -> bool {
        self.existing.contains_key(port_id)
    }

    /// Forgets a destroyed port.
    pub fn remove_existing(&mut self, port_id: &str) -> Option<Vif> {
        self.retiring.remove(port_id);
        self.existing.remove(port_id)
    }

    /// Commits a port to deletion. Teardown may already have detached it,
    /// so it must not be handed out again.
    pub fn mark_retiring(&mut self, port_id: &str) {
        self.retiring.insert(port_id.to_string());
    }

    pub fn is_retiring(&self, port_id: &str) -> bool {
        self.retiring.contains(port_id)
    }

    /// Number of known ports, in use or not.
    pub fn existing_count(&self) -> usize {
        self.existing.len()
    }

    /// Records a populate attempt for `key` unless one happened within
    /// `window` of `now`.
    ///
    /// Check and record happen in one step, so concurrent triggers for the
    /// same key cannot both pass.
    pub fn try_begin_update(&mut self, key: &PoolKey, now: Instant, window: Duration) -> bool {
        if let Some(last) = self.last_update.get(key) {
            if now.saturating_duration_since(*last) < window {
                return false;
            }
        }
        self.last_update.insert(key.clone(), now);
        true
    }

    pub fn stats(&self) -> &VifPoolStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut VifPoolStats {
        &mut self.stats
    }

    /// Checks the membership invariants.
    ///
    /// Every ready or queued id must be known, no id may be both ready and
    /// queued, no id may be ready in two pools, and no retiring id may be
    /// ready.
    pub fn is_consistent(&self) -> bool {
        let mut seen = HashSet::new();
        for port_id in self.available.values().flatten() {
            if !seen.insert(port_id) || !self.existing.contains_key(port_id) {
                return false;
            }
        }
        seen.len() == self.available_ids.len()
            && self.retiring.iter().all(|port_id| !seen.contains(port_id))
            && self
                .recyclable
                .keys()
                .all(|port_id| !seen.contains(port_id) && self.existing.contains_key(port_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PoolKey {
        PoolKey::new("h1", "p1", ["sgA"])
    }

    fn registry_with(ids: &[&str]) -> PoolRegistry {
        let mut registry = PoolRegistry::new();
        for id in ids {
            registry.register(Vif::new(*id));
            registry.push_available(key(), id.to_string());
        }
        registry
    }

    #[test]
    fn test_pop_is_lifo() {
        let mut registry = registry_with(&["r1", "r2", "r3"]);
        assert_eq!(registry.available_count(&key()), 3);
        assert_eq!(registry.pop_available(&key()).as_deref(), Some("r3"));
        assert_eq!(registry.pop_available(&key()).as_deref(), Some("r2"));
        assert_eq!(registry.available_ports(&key()), &["r1".to_string()]);
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_pop_empty_pool() {
        let mut registry = PoolRegistry::new();
        assert_eq!(registry.pop_available(&key()), None);
        assert_eq!(registry.available_count(&key()), 0);
    }

    #[test]
    fn test_push_rejects_duplicates() {
        let mut registry = registry_with(&["r1"]);
        assert!(!registry.push_available(key(), "r1".to_string()));
        let other = PoolKey::new("h2", "p1", ["sgA"]);
        assert!(!registry.push_available(other.clone(), "r1".to_string()));
        assert_eq!(registry.available_count(&key()), 1);
        assert_eq!(registry.available_count(&other), 0);
    }

    #[test]
    fn test_mark_recyclable_skips_available_ports() {
        let mut registry = registry_with(&["r1", "r2"]);
        assert!(!registry.mark_recyclable("r1".to_string(), key()));
        assert!(!registry.is_recyclable("r1"));

        let port_id = registry.pop_available(&key()).unwrap();
        assert!(registry.mark_recyclable(port_id.clone(), key()));
        assert!(registry.is_recyclable(&port_id));
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_snapshot_keeps_release_order() {
        let mut registry = PoolRegistry::new();
        for id in ["r9", "r1", "r5"] {
            registry.register(Vif::new(id));
            registry.mark_recyclable(id.to_string(), key());
        }
        let other = PoolKey::new("h2", "p1", ["sgA"]);
        registry.mark_recyclable("r1".to_string(), other.clone());

        let snapshot = registry.snapshot_recyclable();
        let ids: Vec<&str> = snapshot.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["r9", "r1", "r5"]);
        assert_eq!(snapshot[1].1, other);

        registry.delete_recyclable_entry("r1");
        assert_eq!(registry.snapshot_recyclable().len(), 2);
        // the copy is unaffected by later mutation
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn test_consistency_detects_unknown_ids() {
        let mut registry = PoolRegistry::new();
        registry.push_available(key(), "ghost".to_string());
        assert!(!registry.is_consistent());

        let mut registry = PoolRegistry::new();
        registry.mark_recyclable("ghost".to_string(), key());
        assert!(!registry.is_consistent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_debounce() {
        let mut registry = PoolRegistry::new();
        let window = Duration::from_secs(20);
        let start = Instant::now();

        assert!(registry.try_begin_update(&key(), start, window));
        assert!(!registry.try_begin_update(&key(), start + Duration::from_secs(19), window));
        assert!(registry.try_begin_update(&key(), start + Duration::from_secs(20), window));

        let other = PoolKey::new("h2", "p1", ["sgA"]);
        assert!(registry.try_begin_update(&other, start, window));
    }

    #[test]
    fn test_retiring_cleared_on_remove() {
        let mut registry = PoolRegistry::new();
        registry.register(Vif::new("r1"));
        registry.mark_recyclable("r1".to_string(), key());
        registry.mark_retiring("r1");
        assert!(registry.is_retiring("r1"));
        assert!(registry.is_consistent());

        registry.delete_recyclable_entry("r1");
        registry.remove_existing("r1");
        assert!(!registry.is_retiring("r1"));
    }

    #[test]
    fn test_consistency_rejects_ready_retiring_port() {
        let mut registry = registry_with(&["r1"]);
        registry.mark_retiring("r1");
        assert!(!registry.is_consistent());
    }
}
