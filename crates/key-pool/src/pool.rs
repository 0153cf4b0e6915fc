//! Round-robin key selection with lazy rate-limit skipping
//!
//! The pool owns an ordered list of keys, a cursor pointing at the next slot to
//! offer and the set of slots that hit a rate limit. It is a plain `&mut self`
//! state object: the orchestrator owns one instance and serializes access.

use std::collections::HashSet;

use common::Secret;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::quota::is_rate_limited;

#[derive(Debug)]
struct Entry {
    key: Secret<String>,
    uses: u64,
    failures: u64,
}

/// A key handed out by [`KeyPool::next`], ready for one round of attempts.
#[derive(Debug, Clone)]
pub struct SelectedKey {
    /// Position of the key in insertion order (0-based)
    pub slot: usize,
    pub key: Secret<String>,
}

impl SelectedKey {
    /// Log-safe name for the key ("key-1", "key-2", ...)
    pub fn label(&self) -> String {
        format!("key-{}", self.slot + 1)
    }
}

/// Per-key counters for health output. Not used for selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyStats {
    pub slot: usize,
    /// Masked form of the key, never the full secret
    pub label: String,
    pub uses: u64,
    pub failures: u64,
    pub available: bool,
}

/// Ordered set of API keys with a rotation cursor.
///
/// Invariant: `next_index < entries.len()` whenever the pool is non-empty.
#[derive(Debug, Default)]
pub struct KeyPool {
    entries: Vec<Entry>,
    next_index: usize,
    unavailable: HashSet<usize>,
}

impl KeyPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool pre-filled with `keys` (see [`KeyPool::add`]).
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut pool = Self::new();
        pool.add(keys);
        pool
    }

    /// Replace the pool contents with `keys`.
    ///
    /// Entries are trimmed; blank entries are dropped and duplicates collapse
    /// onto their first occurrence. Cursor, availability and counters reset.
    pub fn add<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        self.entries = keys
            .into_iter()
            .filter_map(|k| {
                let k = k.as_ref().trim();
                (!k.is_empty() && seen.insert(k.to_string())).then(|| Entry {
                    key: Secret::new(k.to_string()),
                    uses: 0,
                    failures: 0,
                })
            })
            .collect();
        self.next_index = 0;
        self.unavailable.clear();
        info!(keys = self.entries.len(), "key pool initialized");
    }

    /// Number of keys in the pool.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of keys currently in rotation.
    pub fn available_count(&self) -> usize {
        self.entries.len() - self.unavailable.len()
    }

    /// Select the next available key round-robin.
    ///
    /// Scans at most one full cycle from the cursor, skipping unavailable
    /// slots; the cursor ends one past the returned slot. When every slot is
    /// unavailable the unavailable set is cleared and slot 0 is returned.
    /// Returns `None` only when the pool is empty.
    pub fn next(&mut self) -> Option<SelectedKey> {
        let n = self.entries.len();
        if n == 0 {
            return None;
        }

        for _ in 0..n {
            let slot = self.next_index;
            self.next_index = (self.next_index + 1) % n;
            if !self.unavailable.contains(&slot) {
                debug!(slot, "key selected");
                return Some(self.selected(slot));
            }
        }

        warn!(keys = n, "all keys rate limited, resetting pool availability");
        metrics::counter!("key_pool_resets_total").increment(1);
        self.unavailable.clear();
        self.next_index = 1 % n;
        Some(self.selected(0))
    }

    /// Record a failed call for `key`.
    ///
    /// Returns whether `error_text` was classified as a rate limit. Only rate
    /// limits take the key out of rotation and count as failures; any other
    /// error leaves the pool untouched.
    pub fn mark_failed(&mut self, key: &str, error_text: &str) -> bool {
        if !is_rate_limited(error_text) {
            return false;
        }
        if let Some(slot) = self.position(key) {
            self.unavailable.insert(slot);
            self.entries[slot].failures += 1;
            metrics::counter!("key_pool_rate_limited_total").increment(1);
            info!(
                slot,
                available = self.available_count(),
                "key rate limited, removed from rotation"
            );
        }
        true
    }

    /// Record a successful call for `key`. Availability is unchanged.
    pub fn mark_success(&mut self, key: &str) {
        if let Some(slot) = self.position(key) {
            self.entries[slot].uses += 1;
        }
    }

    /// Snapshot of per-key counters in insertion order.
    pub fn stats(&self) -> Vec<KeyStats> {
        self.entries
            .iter()
            .enumerate()
            .map(|(slot, e)| KeyStats {
                slot,
                label: e.key.masked(),
                uses: e.uses,
                failures: e.failures,
                available: !self.unavailable.contains(&slot),
            })
            .collect()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key.expose() == key)
    }

    fn selected(&self, slot: usize) -> SelectedKey {
        SelectedKey {
            slot,
            key: self.entries[slot].key.clone(),
        }
    }
}
