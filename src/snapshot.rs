// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
//! Region-scoped snapshot save/restore.
//!
//! A snapshot is a directory of named sections: `sequenceDB`,
//! `fencingKeyDB`, `lockerDB`, `segment0..segmentN`, `tailIndex`. The actual
//! byte format of a section is delegated to a [`SnapshotBackend`] — this
//! module only decides what goes in each section and in what order they're
//! written.

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::fencing::FencingStore;
use crate::lock_manager::{LockManager, Owner};
use crate::primary_store::PrimaryStore;
use crate::region::Region;
use crate::sequence::SequenceStore;

/// The single snapshot-engine option: the maximum number of primary-store
/// entries batched into one `segmentN` section.
#[derive(Clone, Copy, Debug)]
pub struct SnapshotConfig {
    pub keys_per_segment: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            keys_per_segment: 1000,
        }
    }
}

/// Opaque sectioned-blob storage backend. The engine only names sections
/// and hands over serializable payloads; how (or where) those bytes land is
/// this trait's business.
pub trait SnapshotBackend: Send + Sync {
    fn write_section<T: Serialize>(&self, dir: &Path, name: &str, payload: &T) -> Result<()>;
    fn read_section<T: DeserializeOwned>(&self, dir: &Path, name: &str) -> Result<T>;
}

/// A filesystem-backed [`SnapshotBackend`]: one JSON-encoded file per
/// section inside the target directory. Provided for testability; this
/// crate does not attempt a durable/crash-safe on-disk format.
#[derive(Default)]
pub struct FsSnapshotBackend;

impl SnapshotBackend for FsSnapshotBackend {
    fn write_section<T: Serialize>(&self, dir: &Path, name: &str, payload: &T) -> Result<()> {
        std::fs::create_dir_all(dir)
            .map_err(|e| EngineError::Internal(format!("create snapshot dir {dir:?}: {e}")))?;
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| EngineError::Internal(format!("encode section {name}: {e}")))?;
        std::fs::write(dir.join(name), bytes)
            .map_err(|e| EngineError::Internal(format!("write section {name}: {e}")))
    }

    fn read_section<T: DeserializeOwned>(&self, dir: &Path, name: &str) -> Result<T> {
        let bytes = std::fs::read(dir.join(name))
            .map_err(|e| EngineError::Internal(format!("read section {name}: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Internal(format!("decode section {name}: {e}")))
    }
}

/// Coordinates a region-scoped save/load across the four stores.
pub struct SnapshotEngine {
    primary: Arc<PrimaryStore>,
    sequence: Arc<SequenceStore>,
    fencing: Arc<FencingStore>,
    locks: Arc<LockManager>,
}

impl SnapshotEngine {
    pub fn new(
        primary: Arc<PrimaryStore>,
        sequence: Arc<SequenceStore>,
        fencing: Arc<FencingStore>,
        locks: Arc<LockManager>,
    ) -> Self {
        SnapshotEngine {
            primary,
            sequence,
            fencing,
            locks,
        }
    }

    /// Writes `sequenceDB`, `fencingKeyDB`, `lockerDB`, the primary store's
    /// region-slice segments, and `tailIndex`, in that order, filtered to
    /// `region`. Not transactional against concurrent writers — callers
    /// must quiesce writes before calling.
    pub fn save<B: SnapshotBackend>(
        &self,
        region: &Region,
        dir: &Path,
        backend: &B,
        config: &SnapshotConfig,
    ) -> Result<()> {
        log::info!("saving snapshot for region {region:?} to {dir:?}");

        let seq_entries = self.sequence.snapshot_in(|k| region.contains(k));
        backend.write_section(dir, "sequenceDB", &seq_entries)?;

        let fencing_entries = self.fencing.snapshot_in(|k| region.contains(k));
        backend.write_section(dir, "fencingKeyDB", &fencing_entries)?;

        let lock_entries = self.locks.snapshot_in(|k| region.contains(k));
        backend.write_section(dir, "lockerDB", &lock_entries)?;
        let (seq_count, fencing_count, lock_count) =
            (seq_entries.len(), fencing_entries.len(), lock_entries.len());

        let start = if region.start.is_empty() {
            None
        } else {
            Some(region.start.as_slice())
        };
        let end = region.end.as_deref();
        let entries: Vec<(Vec<u8>, Vec<u8>)> = self
            .primary
            .scan(start, end, 0, false)
            .into_iter()
            .map(|e| (e.key, e.value.expect("scan with only_keys=false carries a value")))
            .collect();

        let keys_per_segment = config.keys_per_segment.max(1);
        let segments: Vec<&[(Vec<u8>, Vec<u8>)]> = if entries.is_empty() {
            Vec::new()
        } else {
            entries.chunks(keys_per_segment).collect()
        };

        // Segment writes are independent of one another, so they can be
        // parallelized across a worker pool without affecting correctness;
        // scoped threads keep this synchronous from the caller's point of
        // view and never block the primary store against other operations,
        // since the stores are only read here.
        let write_results: std::result::Result<Vec<Result<()>>, _> =
            crossbeam::thread::scope(|scope| {
                let handles: Vec<_> = segments
                    .iter()
                    .enumerate()
                    .map(|(i, segment)| {
                        let name = format!("segment{i}");
                        let segment = segment.to_vec();
                        scope.spawn(move |_| backend.write_section(dir, &name, &segment))
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });
        let write_results = write_results
            .map_err(|_| EngineError::Internal("segment writer thread panicked".to_string()))?;
        for result in write_results {
            result?;
        }

        let tail_index: i64 = segments.len() as i64 - 1;
        backend.write_section(dir, "tailIndex", &tail_index)?;

        log::info!(
            "snapshot saved: {seq_count} sequence, {fencing_count} fencing, {lock_count} lock, {} primary entries across {} segments",
            entries.len(),
            segments.len()
        );
        Ok(())
    }

    /// Reads `sequenceDB`, `fencingKeyDB`, `lockerDB`, and every segment up
    /// to `tailIndex`, merging by insert into the live stores. Does not
    /// clear existing state first; callers that need full replacement must
    /// reset before loading.
    pub fn load<B: SnapshotBackend>(&self, dir: &Path, backend: &B) -> Result<()> {
        log::info!("loading snapshot from {dir:?}");

        let seq_entries: Vec<(Vec<u8>, i64)> = backend.read_section(dir, "sequenceDB")?;
        self.sequence.merge_from(seq_entries);

        let fencing_entries: Vec<(Vec<u8>, i64)> = backend.read_section(dir, "fencingKeyDB")?;
        self.fencing.merge_from(fencing_entries);

        let lock_entries: Vec<(Vec<u8>, Owner)> = backend.read_section(dir, "lockerDB")?;
        self.locks.merge_from(lock_entries);

        let tail_index: i64 = backend.read_section(dir, "tailIndex")?;
        let mut loaded = 0usize;
        let mut i = 0i64;
        while i <= tail_index {
            let name = format!("segment{i}");
            let segment: Vec<(Vec<u8>, Vec<u8>)> = backend.read_section(dir, &name)?;
            if segment.is_empty() {
                log::warn!("snapshot segment {name} in {dir:?} was empty");
            }
            loaded += segment.len();
            self.primary.put_batch(segment);
            i += 1;
        }
        log::info!("snapshot loaded: {loaded} primary entries across {} segments", tail_index + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> SnapshotEngine {
        SnapshotEngine::new(
            Arc::new(PrimaryStore::new()),
            Arc::new(SequenceStore::new()),
            Arc::new(FencingStore::new()),
            Arc::new(LockManager::new(Arc::new(FencingStore::new()))),
        )
    }

    #[test]
    fn scenario_s6_region_partitioned_round_trip() {
        let source = engine();
        for i in 0..2500u32 {
            let key = format!("k{:04}", i).into_bytes();
            source.primary.put(key, b"v".to_vec());
        }

        let region = Region::new(b"k0500".to_vec(), Some(b"k2000".to_vec()));
        let config = SnapshotConfig { keys_per_segment: 1000 };
        let backend = FsSnapshotBackend;
        let dir = tempfile::tempdir().unwrap();

        source.save(&region, dir.path(), &backend, &config).unwrap();

        let tail_index: i64 = backend.read_section(dir.path(), "tailIndex").unwrap();
        assert_eq!(tail_index, 1);

        let target = engine();
        target.load(dir.path(), &backend).unwrap();

        let keys: Vec<_> = target
            .primary
            .scan(None, None, 0, true)
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys.len(), 1500);
        assert_eq!(keys[0], b"k0500".to_vec());
        assert_eq!(keys[keys.len() - 1], b"k1999".to_vec());
    }

    #[test]
    fn empty_region_saves_tail_index_of_minus_one() {
        let source = engine();
        let region = Region::new(b"nope".to_vec(), Some(b"zzzz".to_vec()));
        let backend = FsSnapshotBackend;
        let dir = tempfile::tempdir().unwrap();
        source
            .save(&region, dir.path(), &backend, &SnapshotConfig::default())
            .unwrap();
        let tail_index: i64 = backend.read_section(dir.path(), "tailIndex").unwrap();
        assert_eq!(tail_index, -1);
    }

    #[test]
    fn auxiliary_stores_round_trip_filtered_by_region() {
        let source = engine();
        source.sequence.get_sequence(b"in-region".to_vec(), 5).unwrap();
        source.sequence.get_sequence(b"zzz-out".to_vec(), 5).unwrap();
        source.fencing.next_fencing_token(b"in-region");
        source.fencing.next_fencing_token(b"zzz-out");

        let region = Region::new(Vec::new(), Some(b"m".to_vec()));
        let backend = FsSnapshotBackend;
        let dir = tempfile::tempdir().unwrap();
        source
            .save(&region, dir.path(), &backend, &SnapshotConfig::default())
            .unwrap();

        let target = engine();
        target.load(dir.path(), &backend).unwrap();
        assert_eq!(target.sequence.get_sequence(b"in-region".to_vec(), 0).unwrap(), (5, 5));
        assert_eq!(target.fencing.current(b"in-region"), 1);
        assert_eq!(target.fencing.current(b"zzz-out"), 0);
    }
}
