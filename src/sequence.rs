// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
//! Monotonic sequence allocation, keyed by byte-key.

use dashmap::DashMap;

use crate::error::{EngineError, Result};
use crate::metrics;

type ByteArray = Vec<u8>;

/// Allocates monotonically increasing `[start, end)` ranges per key.
#[derive(Default)]
pub struct SequenceStore {
    ends: DashMap<ByteArray, i64>,
}

impl SequenceStore {
    pub fn new() -> Self {
        SequenceStore {
            ends: DashMap::new(),
        }
    }

    /// Allocates `step` more values for `key`, returning the half-open range
    /// `(start, end)` that was allocated. `step == 0` returns the current
    /// end twice without mutating anything. Rejects `step < 0`.
    pub fn get_sequence(&self, key: ByteArray, step: i64) -> Result<(i64, i64)> {
        metrics::REQUEST_COUNT
            .with_label_values(&["get_sequence"])
            .inc();
        if step < 0 {
            return Err(EngineError::InvalidArgument(format!(
                "get_sequence step must be >= 0, got {step}"
            )));
        }
        if step == 0 {
            let current = self.ends.get(&key).map(|v| *v).unwrap_or(0);
            return Ok((current, current));
        }

        let mut entry = self.ends.entry(key).or_insert(0);
        let current = *entry;
        let end = current.saturating_add(step);
        *entry = end;
        Ok((current, end))
    }

    /// Unconditionally removes the sequence record for `key`.
    pub fn reset_sequence(&self, key: &[u8]) {
        metrics::REQUEST_COUNT
            .with_label_values(&["reset_sequence"])
            .inc();
        self.ends.remove(key);
    }

    pub(crate) fn snapshot_in(&self, predicate: impl Fn(&[u8]) -> bool) -> Vec<(ByteArray, i64)> {
        self.ends
            .iter()
            .filter(|e| predicate(e.key()))
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    pub(crate) fn merge_from(&self, entries: Vec<(ByteArray, i64)>) {
        for (key, value) in entries {
            self.ends.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_step() {
        let s = SequenceStore::new();
        assert!(s.get_sequence(b"k".to_vec(), -1).is_err());
    }

    #[test]
    fn zero_step_does_not_advance() {
        let s = SequenceStore::new();
        assert_eq!(s.get_sequence(b"k".to_vec(), 0).unwrap(), (0, 0));
        s.get_sequence(b"k".to_vec(), 5).unwrap();
        assert_eq!(s.get_sequence(b"k".to_vec(), 0).unwrap(), (5, 5));
    }

    #[test]
    fn scenario_s2_sequence_allocation_and_reset() {
        let s = SequenceStore::new();
        assert_eq!(s.get_sequence(b"s".to_vec(), 10).unwrap(), (0, 10));
        assert_eq!(s.get_sequence(b"s".to_vec(), 5).unwrap(), (10, 15));
        s.reset_sequence(b"s");
        assert_eq!(s.get_sequence(b"s".to_vec(), 1).unwrap(), (0, 1));
    }
}
