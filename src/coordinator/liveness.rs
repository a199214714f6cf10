//! Liveness tracker
//!
//! The leader keeps an in-memory map from data-node endpoint to the
//! monotonic instant of its last heartbeat. The map is not persisted: it
//! is rebuilt from the UP set of the node registry on promotion and
//! cleared on demotion.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct Liveness {
    inner: Mutex<HashMap<String, Instant>>,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Refresh an existing entry. Returns false for endpoints that were
    /// never added; heartbeats do not create entries, JOIN does.
    pub fn touch(&self, endpoint: &str) -> bool {
        let mut map = self.inner.lock().unwrap();
        match map.get_mut(endpoint) {
            Some(seen) => {
                *seen = Instant::now();
                true
            }
            None => {
                tracing::warn!("Heartbeat from unknown endpoint: {}", endpoint);
                false
            }
        }
    }

    /// Unconditionally create or refresh an entry.
    pub fn add(&self, endpoint: &str) {
        self.inner
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), Instant::now());
    }

    /// Remove and return every endpoint whose last heartbeat is older than
    /// `timeout`. The caller schedules a REMOVE task for each.
    pub fn sweep(&self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut map = self.inner.lock().unwrap();
        let expired: Vec<String> = map
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) > timeout)
            .map(|(ep, _)| ep.clone())
            .collect();
        for ep in &expired {
            map.remove(ep);
        }
        expired
    }

    /// Replace the map wholesale; used on leader promotion with the UP set
    /// from the node registry.
    pub fn restore(&self, endpoints: Vec<String>) {
        let now = Instant::now();
        let mut map = self.inner.lock().unwrap();
        map.clear();
        for ep in endpoints {
            map.insert(ep, now);
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.inner.lock().unwrap().keys().cloned().collect()
    }

    /// Drop all entries; used on leadership loss.
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_requires_add() {
        let liveness = Liveness::new();
        assert!(!liveness.touch("10.0.0.1:5000"));

        liveness.add("10.0.0.1:5000");
        assert!(liveness.touch("10.0.0.1:5000"));
    }

    #[test]
    fn test_sweep_expires_stale_entries() {
        let liveness = Liveness::new();
        liveness.add("10.0.0.1:5000");
        liveness.add("10.0.0.2:5000");

        // Nothing is stale against a generous timeout.
        assert!(liveness.sweep(Duration::from_secs(60)).is_empty());

        // Everything is stale against a zero timeout.
        std::thread::sleep(Duration::from_millis(5));
        let mut expired = liveness.sweep(Duration::ZERO);
        expired.sort();
        assert_eq!(expired, vec!["10.0.0.1:5000", "10.0.0.2:5000"]);
        assert!(liveness.snapshot().is_empty());

        // Swept endpoints are gone; heartbeats no longer refresh them.
        assert!(!liveness.touch("10.0.0.1:5000"));
    }

    #[test]
    fn test_restore_replaces_map() {
        let liveness = Liveness::new();
        liveness.add("10.0.0.9:5000");

        liveness.restore(vec!["10.0.0.1:5000".to_string(), "10.0.0.2:5000".to_string()]);
        let mut snapshot = liveness.snapshot();
        snapshot.sort();
        assert_eq!(snapshot, vec!["10.0.0.1:5000", "10.0.0.2:5000"]);

        liveness.clear();
        assert!(liveness.snapshot().is_empty());
    }
}
