// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
//! Fencing-token allocation, keyed by byte-key.
//!
//! Downstream services use a fencing token to reject writes from a stale
//! holder of a distributed lock: every successful new acquisition bumps the
//! token, so an old holder's writes carry a token a newer holder has already
//! superseded.

use dashmap::DashMap;

use crate::metrics;

type ByteArray = Vec<u8>;

#[derive(Default)]
pub struct FencingStore {
    counters: DashMap<ByteArray, i64>,
}

impl FencingStore {
    pub fn new() -> Self {
        FencingStore {
            counters: DashMap::new(),
        }
    }

    /// Atomically increments (or initializes to 1) the fencing counter for
    /// `key` and returns the new value. Strictly monotonic per key.
    pub fn next_fencing_token(&self, key: &[u8]) -> i64 {
        metrics::REQUEST_COUNT
            .with_label_values(&["next_fencing_token"])
            .inc();
        let mut entry = self.counters.entry(key.to_vec()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Seeds `child_key`'s counter from `parent_key`'s current value, so a
    /// region split (or any new region carved from an existing one)
    /// continues the parent's monotonic sequence instead of restarting at
    /// zero. No-op if `parent_key` has no record.
    pub fn init_fencing_token(&self, parent_key: &[u8], child_key: &[u8]) {
        metrics::REQUEST_COUNT
            .with_label_values(&["init_fencing_token"])
            .inc();
        if let Some(parent) = self.counters.get(parent_key) {
            self.counters.insert(child_key.to_vec(), *parent);
        }
    }

    pub(crate) fn current(&self, key: &[u8]) -> i64 {
        self.counters.get(key).map(|v| *v).unwrap_or(0)
    }

    pub(crate) fn snapshot_in(&self, predicate: impl Fn(&[u8]) -> bool) -> Vec<(ByteArray, i64)> {
        self.counters
            .iter()
            .filter(|e| predicate(e.key()))
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    pub(crate) fn merge_from(&self, entries: Vec<(ByteArray, i64)>) {
        for (key, value) in entries {
            self.counters.insert(key, value);
        }
    }
}
