//! Replay filtering.
//!
//! Each time window keeps a bounded set of short digests of admitted
//! `(window_id, nonce)` pairs. Windows live in a small fixed table addressed
//! by `window_id mod windows`; reusing a slot for a different window id
//! drops the old window wholesale. Within a window, capacity overflow evicts
//! the oldest entry via a fixed-size ring.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::transport::{DEFAULT_REPLAY_CAPACITY, DEFAULT_REPLAY_WINDOWS};

/// Per-listener filter refusing any nonce it has already admitted for a
/// still-live window. Share by construction: pass one `Arc<ReplayFilter>`
/// into every session of a listener.
pub struct ReplayFilter {
    windows: Mutex<Vec<ReplayWindow>>,
    capacity: usize,
}

struct ReplayWindow {
    id: i64,
    entries: HashSet<u64>,
    ring: Vec<u64>,
    head: usize,
    count: usize,
}

impl ReplayFilter {
    /// Create a filter with `capacity` nonces per window across `windows`
    /// rotating windows; zero selects the defaults.
    pub fn new(capacity: usize, windows: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_REPLAY_CAPACITY
        } else {
            capacity
        };
        let windows = if windows == 0 {
            DEFAULT_REPLAY_WINDOWS
        } else {
            windows
        };
        let slots = (0..windows)
            .map(|_| ReplayWindow {
                // sentinel below any reachable window id, forcing first-use init
                id: i64::MIN,
                entries: HashSet::new(),
                ring: Vec::new(),
                head: 0,
                count: 0,
            })
            .collect();
        Self {
            windows: Mutex::new(slots),
            capacity,
        }
    }

    /// Record `(window_id, nonce)` and report whether it was already present.
    pub fn check_and_set(&self, window_id: i64, nonce: &[u8]) -> bool {
        let mut windows = self.windows.lock();
        if windows.is_empty() {
            return false;
        }
        let len = windows.len() as i64;
        let idx = (window_id % len).unsigned_abs() as usize;
        let window = &mut windows[idx];

        if window.id != window_id {
            window.id = window_id;
            window.entries = HashSet::with_capacity(self.capacity);
            window.ring = vec![0u64; self.capacity];
            window.head = 0;
            window.count = 0;
        }

        let key = replay_key(window_id, nonce);
        if window.entries.contains(&key) {
            return true;
        }

        if window.count >= self.capacity {
            let evicted = window.ring[window.head];
            window.entries.remove(&evicted);
        } else {
            window.count += 1;
        }
        window.ring[window.head] = key;
        window.head = (window.head + 1) % self.capacity;
        window.entries.insert(key);
        false
    }
}

fn replay_key(window_id: i64, nonce: &[u8]) -> u64 {
    let mut buf = Vec::with_capacity(8 + nonce.len());
    buf.extend_from_slice(&(window_id as u64).to_le_bytes());
    buf.extend_from_slice(nonce);
    let digest = blake3::hash(&buf);
    u64::from_le_bytes(digest.as_bytes()[..8].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_seen_then_replayed() {
        let filter = ReplayFilter::new(16, 4);
        let nonce = [1u8; 12];

        assert!(!filter.check_and_set(100, &nonce));
        assert!(filter.check_and_set(100, &nonce));
        assert!(filter.check_and_set(100, &nonce));
    }

    #[test]
    fn test_same_nonce_different_window() {
        let filter = ReplayFilter::new(16, 4);
        let nonce = [2u8; 12];

        assert!(!filter.check_and_set(100, &nonce));
        assert!(!filter.check_and_set(101, &nonce));
        assert!(filter.check_and_set(101, &nonce));
    }

    #[test]
    fn test_capacity_eviction() {
        let filter = ReplayFilter::new(4, 1);

        for i in 0u8..4 {
            assert!(!filter.check_and_set(7, &[i; 12]));
        }
        // one past capacity evicts the oldest entry
        assert!(!filter.check_and_set(7, &[9u8; 12]));
        assert!(!filter.check_and_set(7, &[0u8; 12]));
        // the rest of the original batch is still remembered
        assert!(filter.check_and_set(7, &[3u8; 12]));
    }

    #[test]
    fn test_slot_repurposing_clears_window() {
        let filter = ReplayFilter::new(16, 4);
        let nonce = [3u8; 12];

        assert!(!filter.check_and_set(100, &nonce));
        // window 104 lands on the same slot (104 % 4 == 100 % 4)
        assert!(!filter.check_and_set(104, &nonce));
        // the old window's memory is gone with the slot
        assert!(!filter.check_and_set(100, &nonce));
    }

    #[test]
    fn test_negative_window_id() {
        let filter = ReplayFilter::new(16, 4);
        let nonce = [4u8; 12];

        assert!(!filter.check_and_set(-3, &nonce));
        assert!(filter.check_and_set(-3, &nonce));
    }

    #[test]
    fn test_zero_config_uses_defaults() {
        let filter = ReplayFilter::new(0, 0);
        assert!(!filter.check_and_set(1, &[0u8; 12]));
        assert!(filter.check_and_set(1, &[0u8; 12]));
    }
}
