// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
//! The ordered primary store: a thread-safe byte-keyed map supporting
//! point, range, and tail queries in unsigned-lexicographic key order.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::sync::RwLock;

use crate::metrics;

type ByteArray = Vec<u8>;

/// An entry returned from [`PrimaryStore::scan`]. `value` is `None` when the
/// scan was requested with `only_keys = true`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanEntry {
    pub key: ByteArray,
    pub value: Option<ByteArray>,
}

/// The ordered K→V mapping backing a region's state machine.
///
/// A single `RwLock<BTreeMap<..>>` guards the whole keyspace. Fine-grained
/// striping would buy throughput, not correctness, so a coarse lock is
/// sufficient here: every mutator below takes the write lock for its entire
/// critical section, which makes `put_if_absent`, `get_and_put`, and `merge`
/// trivially atomic.
pub struct PrimaryStore {
    inner: RwLock<BTreeMap<ByteArray, ByteArray>>,
}

impl Default for PrimaryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PrimaryStore {
    pub fn new() -> Self {
        PrimaryStore {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    /// Returns the value for `key`, or `None` if absent. Never fails on a
    /// missing key.
    pub fn get(&self, key: &[u8]) -> Option<ByteArray> {
        let _timer = metrics::REQUEST_LATENCY
            .with_label_values(&["get"])
            .start_timer();
        metrics::REQUEST_COUNT.with_label_values(&["get"]).inc();
        self.inner.read().unwrap().get(key).cloned()
    }

    /// Returns only the keys from `keys` that are present; absent keys are
    /// omitted, never returned as a null-valued entry.
    pub fn multi_get(&self, keys: &[ByteArray]) -> Vec<(ByteArray, ByteArray)> {
        metrics::REQUEST_COUNT
            .with_label_values(&["multi_get"])
            .inc();
        let guard = self.inner.read().unwrap();
        keys.iter()
            .filter_map(|k| guard.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Stores `value` for `key`, discarding any prior value.
    pub fn put(&self, key: ByteArray, value: ByteArray) {
        metrics::REQUEST_COUNT.with_label_values(&["put"]).inc();
        let mut guard = self.inner.write().unwrap();
        Self::track_put(&mut guard, key, value);
    }

    /// Stores `value` for `key`, returning the prior value if any.
    pub fn get_and_put(&self, key: ByteArray, value: ByteArray) -> Option<ByteArray> {
        metrics::REQUEST_COUNT
            .with_label_values(&["get_and_put"])
            .inc();
        let mut guard = self.inner.write().unwrap();
        let prev = guard.get(&key).cloned();
        Self::track_put(&mut guard, key, value);
        prev
    }

    /// Stores `value` for `key` only if absent. Returns the existing value
    /// if the key was already present; `None` means the store was written.
    pub fn put_if_absent(&self, key: ByteArray, value: ByteArray) -> Option<ByteArray> {
        metrics::REQUEST_COUNT
            .with_label_values(&["put_if_absent"])
            .inc();
        let mut guard = self.inner.write().unwrap();
        if let Some(existing) = guard.get(&key) {
            return Some(existing.clone());
        }
        Self::track_put(&mut guard, key, value);
        None
    }

    /// If `key` is absent, sets it to `value`. If present, appends
    /// `0x2C` (`,`) followed by `value` to the existing bytes. Atomic with
    /// respect to concurrent `merge`/`put_if_absent`/`get_and_put` on the
    /// same key.
    pub fn merge(&self, key: ByteArray, value: &[u8]) {
        metrics::REQUEST_COUNT.with_label_values(&["merge"]).inc();
        let mut guard = self.inner.write().unwrap();
        let new_value = match guard.get(&key) {
            Some(existing) => {
                let mut merged = existing.clone();
                merged.push(b',');
                merged.extend_from_slice(value);
                merged
            }
            None => value.to_vec(),
        };
        Self::track_put(&mut guard, key, new_value);
    }

    /// Removes `key` if present. Succeeds regardless of prior presence.
    pub fn delete(&self, key: &[u8]) {
        metrics::REQUEST_COUNT.with_label_values(&["delete"]).inc();
        let mut guard = self.inner.write().unwrap();
        if let Some(removed) = guard.remove(key) {
            metrics::PRIMARY_STORE_SIZE_BYTES.sub(removed.len() as i64);
            metrics::PRIMARY_STORE_KEYS.dec();
        }
    }

    /// Applies every `(key, value)` pair in `entries` under a single
    /// critical section, in iteration order.
    pub fn put_batch(&self, entries: Vec<(ByteArray, ByteArray)>) {
        metrics::REQUEST_COUNT
            .with_label_values(&["put_batch"])
            .inc();
        let mut guard = self.inner.write().unwrap();
        for (key, value) in entries {
            Self::track_put(&mut guard, key, value);
        }
    }

    /// Returns up to `limit` entries with keys in `[start, end)`, ascending.
    /// `start = None` means "from first"; `end = None` means "to last"
    /// (a tail scan). `limit = 0` means unbounded.
    pub fn scan(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        limit: usize,
        only_keys: bool,
    ) -> Vec<ScanEntry> {
        let _timer = metrics::REQUEST_LATENCY
            .with_label_values(&["scan"])
            .start_timer();
        metrics::REQUEST_COUNT.with_label_values(&["scan"]).inc();

        let limit = if limit == 0 { usize::MAX } else { limit };
        let guard = self.inner.read().unwrap();
        let range = (
            start.map(|s| Included(s.to_vec())).unwrap_or(Unbounded),
            end.map(|e| Excluded(e.to_vec())).unwrap_or(Unbounded),
        );
        guard
            .range(range)
            .take(limit)
            .map(|(k, v)| ScanEntry {
                key: k.clone(),
                value: if only_keys { None } else { Some(v.clone()) },
            })
            .collect()
    }

    /// Removes every entry with a key in `[start, end)`. No effect if the
    /// range is empty. Concurrent scans may observe partial progress, but a
    /// scan that *starts* after this call returns will never see a removed
    /// key.
    pub fn delete_range(&self, start: Option<&[u8]>, end: Option<&[u8]>) {
        metrics::REQUEST_COUNT
            .with_label_values(&["delete_range"])
            .inc();
        let mut guard = self.inner.write().unwrap();
        let range = (
            start.map(|s| Included(s.to_vec())).unwrap_or(Unbounded),
            end.map(|e| Excluded(e.to_vec())).unwrap_or(Unbounded),
        );
        let keys: Vec<ByteArray> = guard.range(range).map(|(k, _)| k.clone()).collect();
        for key in keys {
            if let Some(removed) = guard.remove(&key) {
                metrics::PRIMARY_STORE_SIZE_BYTES.sub(removed.len() as i64);
                metrics::PRIMARY_STORE_KEYS.dec();
            }
        }
    }

    /// The number of keys in `[start, end)`; `end = None` means a tail count
    /// from `start`.
    pub fn approximate_keys_in_range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> usize {
        metrics::REQUEST_COUNT
            .with_label_values(&["approximate_keys_in_range"])
            .inc();
        let guard = self.inner.read().unwrap();
        let range = (
            start.map(|s| Included(s.to_vec())).unwrap_or(Unbounded),
            end.map(|e| Excluded(e.to_vec())).unwrap_or(Unbounded),
        );
        guard.range(range).count()
    }

    /// Returns the `distance`-th key (1-indexed) at or after `start`. If
    /// fewer keys exist, returns the last key in the tail; returns `None`
    /// only if the tail from `start` is empty.
    ///
    /// The returned key is an independent copy. Whether the caller means it
    /// as an inclusive or exclusive bound is left to the caller — the key is
    /// returned as-is, unadjusted.
    pub fn jump_over(&self, start: &[u8], distance: usize) -> Option<ByteArray> {
        metrics::REQUEST_COUNT
            .with_label_values(&["jump_over"])
            .inc();
        let distance = distance.max(1);
        let guard = self.inner.read().unwrap();
        guard
            .range((Included(start.to_vec()), Unbounded))
            .nth(distance - 1)
            .or_else(|| guard.range((Included(start.to_vec()), Unbounded)).last())
            .map(|(k, _)| k.clone())
    }

    /// A restartable, point-in-time copy of the keys currently in the store,
    /// in ascending order. Safe against concurrent mutation: the returned
    /// iterator owns its data and will not observe later writes.
    pub fn local_iterator(&self) -> std::vec::IntoIter<ByteArray> {
        metrics::REQUEST_COUNT
            .with_label_values(&["local_iterator"])
            .inc();
        let guard = self.inner.read().unwrap();
        guard.keys().cloned().collect::<Vec<_>>().into_iter()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn track_put(guard: &mut BTreeMap<ByteArray, ByteArray>, key: ByteArray, value: ByteArray) {
        metrics::PRIMARY_STORE_SIZE_BYTES.add(value.len() as i64);
        match guard.insert(key, value) {
            Some(prev) => metrics::PRIMARY_STORE_SIZE_BYTES.sub(prev.len() as i64),
            None => metrics::PRIMARY_STORE_KEYS.inc(),
        }
    }
}
