// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Benjamin Chess
//! The request surface: one [`Engine`] composing all four stores plus the
//! snapshot engine, and a completion-sink dispatch wrapper around them.
//!
//! Direct methods on [`Engine`] return a plain value (or [`crate::error::Result`]);
//! use these when driving the engine synchronously from a single caller.
//! The `dispatch_*` methods wrap the same operations behind a completion-sink
//! contract: exactly one of `set_success`/`set_failure` is
//! invoked, panics are caught and logged rather than unwinding into the
//! caller, and failures are reported as a short canonical string. Reach for
//! `dispatch_*` when batching apply operations off a replicated log, where
//! the caller wants a uniform callback rather than matching on `Result`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::fencing::FencingStore;
use crate::lock_manager::{Acquirer, LockManager, Owner};
use crate::primary_store::{PrimaryStore, ScanEntry};
use crate::region::Region;
use crate::sequence::SequenceStore;
use crate::snapshot::{SnapshotBackend, SnapshotConfig, SnapshotEngine};

/// A two-terminal completion sink. Exactly one of `set_success`/`set_failure`
/// must be called; `Engine::dispatch_*` upholds this, callers of the direct
/// API are free to ignore sinks entirely.
pub trait Completion<T>: Send {
    fn set_success(self: Box<Self>, value: T);
    fn set_failure(self: Box<Self>, reason: String);
}

/// A [`Completion`] built from two closures, for callers who don't want to
/// define a named type per call site.
pub struct ClosureCompletion<S, F> {
    on_success: Option<S>,
    on_failure: Option<F>,
}

impl<T, S, F> ClosureCompletion<S, F>
where
    S: FnOnce(T) + Send,
    F: FnOnce(String) + Send,
{
    pub fn new(on_success: S, on_failure: F) -> Self {
        ClosureCompletion {
            on_success: Some(on_success),
            on_failure: Some(on_failure),
        }
    }
}

impl<T, S, F> Completion<T> for ClosureCompletion<S, F>
where
    S: FnOnce(T) + Send,
    F: FnOnce(String) + Send,
{
    fn set_success(mut self: Box<Self>, value: T) {
        (self.on_success.take().expect("completion used twice"))(value);
    }

    fn set_failure(mut self: Box<Self>, reason: String) {
        (self.on_failure.take().expect("completion used twice"))(reason);
    }
}

/// Composes the primary store, sequence/fencing allocators, lock manager,
/// and snapshot engine into one handle. Owns no I/O of its own beyond what
/// the snapshot engine performs.
pub struct Engine {
    pub primary: Arc<PrimaryStore>,
    pub sequence: Arc<SequenceStore>,
    pub fencing: Arc<FencingStore>,
    pub locks: Arc<LockManager>,
    pub snapshots: Arc<SnapshotEngine>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        let primary = Arc::new(PrimaryStore::new());
        let sequence = Arc::new(SequenceStore::new());
        let fencing = Arc::new(FencingStore::new());
        let locks = Arc::new(LockManager::new(fencing.clone()));
        let snapshots = Arc::new(SnapshotEngine::new(
            primary.clone(),
            sequence.clone(),
            fencing.clone(),
            locks.clone(),
        ));
        Engine {
            primary,
            sequence,
            fencing,
            locks,
            snapshots,
        }
    }

    // --- primary store -----------------------------------------------

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.primary.get(key)
    }

    pub fn multi_get(&self, keys: &[Vec<u8>]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.primary.multi_get(keys)
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.primary.put(key, value)
    }

    pub fn get_and_put(&self, key: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        self.primary.get_and_put(key, value)
    }

    pub fn put_if_absent(&self, key: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        self.primary.put_if_absent(key, value)
    }

    pub fn merge(&self, key: Vec<u8>, value: &[u8]) {
        self.primary.merge(key, value)
    }

    pub fn delete(&self, key: &[u8]) {
        self.primary.delete(key)
    }

    pub fn put_batch(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) {
        self.primary.put_batch(entries)
    }

    pub fn scan(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        limit: usize,
        only_keys: bool,
    ) -> Vec<ScanEntry> {
        self.primary.scan(start, end, limit, only_keys)
    }

    pub fn delete_range(&self, start: Option<&[u8]>, end: Option<&[u8]>) {
        self.primary.delete_range(start, end)
    }

    pub fn approximate_keys_in_range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> usize {
        self.primary.approximate_keys_in_range(start, end)
    }

    pub fn jump_over(&self, start: &[u8], distance: usize) -> Option<Vec<u8>> {
        self.primary.jump_over(start, distance)
    }

    /// A restartable, point-in-time iterator over the primary store's keys.
    /// Not exposed through `dispatch_*`: the completion-sink contract
    /// resolves to a single value, not a stream, so callers that want this
    /// under the apply loop's uniform callback should drain it themselves
    /// (e.g. via `dispatch_scan`) rather than through a sink.
    pub fn local_iterator(&self) -> std::vec::IntoIter<Vec<u8>> {
        self.primary.local_iterator()
    }

    // --- sequence / fencing --------------------------------------------

    pub fn get_sequence(&self, key: Vec<u8>, step: i64) -> Result<(i64, i64)> {
        self.sequence.get_sequence(key, step)
    }

    pub fn reset_sequence(&self, key: &[u8]) {
        self.sequence.reset_sequence(key)
    }

    pub fn next_fencing_token(&self, key: &[u8]) -> i64 {
        self.fencing.next_fencing_token(key)
    }

    pub fn init_fencing_token(&self, parent_key: &[u8], child_key: &[u8]) {
        self.fencing.init_fencing_token(parent_key, child_key)
    }

    // --- locks -----------------------------------------------------------

    pub fn try_lock(
        &self,
        key: Vec<u8>,
        fencing_key: &[u8],
        keep_lease: bool,
        acquirer: Acquirer,
    ) -> Owner {
        self.locks.try_lock(key, fencing_key, keep_lease, acquirer)
    }

    pub fn release_lock(&self, key: &[u8], acquirer: Acquirer) -> Owner {
        self.locks.release_lock(key, acquirer)
    }

    // --- snapshots ---------------------------------------------------

    pub fn save_snapshot<B: SnapshotBackend>(
        &self,
        region: &Region,
        dir: &Path,
        backend: &B,
        config: &SnapshotConfig,
    ) -> Result<()> {
        self.snapshots.save(region, dir, backend, config)
    }

    pub fn load_snapshot<B: SnapshotBackend>(&self, dir: &Path, backend: &B) -> Result<()> {
        self.snapshots.load(dir, backend)
    }

    // --- completion-sink dispatch --------------------------------------

    /// `get` via the completion-sink contract.
    pub fn dispatch_get(&self, key: Vec<u8>, completion: Box<dyn Completion<Option<Vec<u8>>>>) {
        run("GET", completion, || Ok(self.primary.get(&key)));
    }

    /// `scan` via the completion-sink contract.
    pub fn dispatch_scan(
        &self,
        start: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
        limit: usize,
        only_keys: bool,
        completion: Box<dyn Completion<Vec<ScanEntry>>>,
    ) {
        run("SCAN", completion, || {
            Ok(self
                .primary
                .scan(start.as_deref(), end.as_deref(), limit, only_keys))
        });
    }

    /// `put` via the completion-sink contract.
    pub fn dispatch_put(&self, key: Vec<u8>, value: Vec<u8>, completion: Box<dyn Completion<()>>) {
        run("PUT", completion, || {
            self.primary.put(key, value);
            Ok(())
        });
    }

    /// `getSequence` via the completion-sink contract.
    pub fn dispatch_get_sequence(
        &self,
        key: Vec<u8>,
        step: i64,
        completion: Box<dyn Completion<(i64, i64)>>,
    ) {
        run("GET_SEQUENCE", completion, || self.sequence.get_sequence(key, step));
    }

    /// `tryLock` via the completion-sink contract. A losing `tryLock` still
    /// reaches `set_success` with `Owner.success == false` — lock conflict is
    /// a business outcome, never a failure terminal.
    pub fn dispatch_try_lock(
        &self,
        key: Vec<u8>,
        fencing_key: Vec<u8>,
        keep_lease: bool,
        acquirer: Acquirer,
        completion: Box<dyn Completion<Owner>>,
    ) {
        run("TRY_LOCK", completion, || {
            Ok(self.locks.try_lock(key, &fencing_key, keep_lease, acquirer))
        });
    }

    /// `releaseLock` via the completion-sink contract.
    pub fn dispatch_release_lock(
        &self,
        key: Vec<u8>,
        acquirer: Acquirer,
        completion: Box<dyn Completion<Owner>>,
    ) {
        run("RELEASE_LOCK", completion, || {
            Ok(self.locks.release_lock(&key, acquirer))
        });
    }

    /// Snapshot save via the completion-sink contract.
    pub fn dispatch_save_snapshot<B: SnapshotBackend + 'static>(
        &self,
        region: Region,
        dir: std::path::PathBuf,
        backend: Arc<B>,
        config: SnapshotConfig,
        completion: Box<dyn Completion<()>>,
    ) {
        run("SNAPSHOT_SAVE", completion, || {
            self.snapshots.save(&region, &dir, backend.as_ref(), &config)
        });
    }

    /// Snapshot load via the completion-sink contract.
    pub fn dispatch_load_snapshot<B: SnapshotBackend + 'static>(
        &self,
        dir: std::path::PathBuf,
        backend: Arc<B>,
        completion: Box<dyn Completion<()>>,
    ) {
        run("SNAPSHOT_LOAD", completion, || {
            self.snapshots.load(&dir, backend.as_ref())
        });
    }

    /// `multiGet` via the completion-sink contract.
    pub fn dispatch_multi_get(
        &self,
        keys: Vec<Vec<u8>>,
        completion: Box<dyn Completion<Vec<(Vec<u8>, Vec<u8>)>>>,
    ) {
        run("MULTI_GET", completion, || Ok(self.primary.multi_get(&keys)));
    }

    /// `getAndPut` via the completion-sink contract.
    pub fn dispatch_get_and_put(
        &self,
        key: Vec<u8>,
        value: Vec<u8>,
        completion: Box<dyn Completion<Option<Vec<u8>>>>,
    ) {
        run("GET_AND_PUT", completion, || Ok(self.primary.get_and_put(key, value)));
    }

    /// `putIfAbsent` via the completion-sink contract.
    pub fn dispatch_put_if_absent(
        &self,
        key: Vec<u8>,
        value: Vec<u8>,
        completion: Box<dyn Completion<Option<Vec<u8>>>>,
    ) {
        run("PUT_IF_ABSENT", completion, || Ok(self.primary.put_if_absent(key, value)));
    }

    /// `merge` via the completion-sink contract.
    pub fn dispatch_merge(&self, key: Vec<u8>, value: Vec<u8>, completion: Box<dyn Completion<()>>) {
        run("MERGE", completion, || {
            self.primary.merge(key, &value);
            Ok(())
        });
    }

    /// `delete` via the completion-sink contract.
    pub fn dispatch_delete(&self, key: Vec<u8>, completion: Box<dyn Completion<()>>) {
        run("DELETE", completion, || {
            self.primary.delete(&key);
            Ok(())
        });
    }

    /// `putBatch` via the completion-sink contract.
    pub fn dispatch_put_batch(
        &self,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        completion: Box<dyn Completion<()>>,
    ) {
        run("PUT_BATCH", completion, || {
            self.primary.put_batch(entries);
            Ok(())
        });
    }

    /// `deleteRange` via the completion-sink contract.
    pub fn dispatch_delete_range(
        &self,
        start: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
        completion: Box<dyn Completion<()>>,
    ) {
        run("DELETE_RANGE", completion, || {
            self.primary.delete_range(start.as_deref(), end.as_deref());
            Ok(())
        });
    }

    /// `approximateKeysInRange` via the completion-sink contract.
    pub fn dispatch_approximate_keys_in_range(
        &self,
        start: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
        completion: Box<dyn Completion<usize>>,
    ) {
        run("APPROXIMATE_KEYS_IN_RANGE", completion, || {
            Ok(self
                .primary
                .approximate_keys_in_range(start.as_deref(), end.as_deref()))
        });
    }

    /// `jumpOver` via the completion-sink contract.
    pub fn dispatch_jump_over(
        &self,
        start: Vec<u8>,
        distance: usize,
        completion: Box<dyn Completion<Option<Vec<u8>>>>,
    ) {
        run("JUMP_OVER", completion, || Ok(self.primary.jump_over(&start, distance)));
    }

    /// `resetSequence` via the completion-sink contract.
    pub fn dispatch_reset_sequence(&self, key: Vec<u8>, completion: Box<dyn Completion<()>>) {
        run("RESET_SEQUENCE", completion, || {
            self.sequence.reset_sequence(&key);
            Ok(())
        });
    }

    /// `nextFencingToken` via the completion-sink contract.
    pub fn dispatch_next_fencing_token(&self, key: Vec<u8>, completion: Box<dyn Completion<i64>>) {
        run("NEXT_FENCING_TOKEN", completion, || {
            Ok(self.fencing.next_fencing_token(&key))
        });
    }

    /// `initFencingToken` via the completion-sink contract.
    pub fn dispatch_init_fencing_token(
        &self,
        parent_key: Vec<u8>,
        child_key: Vec<u8>,
        completion: Box<dyn Completion<()>>,
    ) {
        run("INIT_FENCING_TOKEN", completion, || {
            self.fencing.init_fencing_token(&parent_key, &child_key);
            Ok(())
        });
    }
}

/// Opens a timing context (left to each store's own metrics), runs `f`,
/// catches both a returned error and an unexpected panic, and resolves
/// `completion` with exactly one terminal.
fn run<T>(op_name: &'static str, completion: Box<dyn Completion<T>>, f: impl FnOnce() -> Result<T>) {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => completion.set_success(value),
        Ok(Err(e)) => {
            log::error!("{op_name} failed: {e}");
            completion.set_failure(format!("Fail to [{op_name}]"));
        }
        Err(_) => {
            log::error!("{op_name} panicked");
            completion.set_failure(format!("Fail to [{op_name}]"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn acquirer(id: &[u8], lease: i64, now: i64) -> Acquirer {
        Acquirer {
            id: id.to_vec(),
            lease_millis: lease,
            now_millis: now,
            context: Vec::new(),
        }
    }

    struct Recorder<T> {
        success: Arc<Mutex<Option<T>>>,
        failure: Arc<Mutex<Option<String>>>,
    }

    impl<T: Send + 'static> Recorder<T> {
        fn new() -> (Box<dyn Completion<T>>, Arc<Mutex<Option<T>>>, Arc<Mutex<Option<String>>>) {
            let success = Arc::new(Mutex::new(None));
            let failure = Arc::new(Mutex::new(None));
            let sink = ClosureCompletion::new(
                {
                    let success = success.clone();
                    move |v: T| *success.lock().unwrap() = Some(v)
                },
                {
                    let failure = failure.clone();
                    move |r: String| *failure.lock().unwrap() = Some(r)
                },
            );
            (Box::new(sink), success, failure)
        }
    }

    #[test]
    fn dispatch_get_reports_success() {
        let engine = Engine::new();
        engine.put(b"k".to_vec(), b"v".to_vec());
        let (sink, success, failure) = Recorder::<Option<Vec<u8>>>::new();
        engine.dispatch_get(b"k".to_vec(), sink);
        assert_eq!(*success.lock().unwrap(), Some(Some(b"v".to_vec())));
        assert!(failure.lock().unwrap().is_none());
    }

    #[test]
    fn dispatch_get_sequence_reports_failure_on_invalid_argument() {
        let engine = Engine::new();
        let (sink, success, failure) = Recorder::<(i64, i64)>::new();
        engine.dispatch_get_sequence(b"s".to_vec(), -1, sink);
        assert!(success.lock().unwrap().is_none());
        assert_eq!(failure.lock().unwrap().as_deref(), Some("Fail to [GET_SEQUENCE]"));
    }

    #[test]
    fn dispatch_try_lock_conflict_is_a_success_with_success_false() {
        let engine = Engine::new();
        engine.try_lock(b"L".to_vec(), b"F", false, acquirer(b"A", 1000, 0));
        let (sink, success, failure) = Recorder::<Owner>::new();
        engine.dispatch_try_lock(
            b"L".to_vec(),
            b"F".to_vec(),
            false,
            acquirer(b"B", 1000, 100),
            sink,
        );
        let owner = success.lock().unwrap().clone().expect("lock conflict is a success");
        assert!(!owner.success);
        assert!(failure.lock().unwrap().is_none());
    }

    #[test]
    fn dispatch_merge_and_delete_round_trip() {
        let engine = Engine::new();
        let (sink, success, failure) = Recorder::<()>::new();
        engine.dispatch_merge(b"m".to_vec(), b"x".to_vec(), sink);
        assert!(success.lock().unwrap().is_some());
        assert!(failure.lock().unwrap().is_none());
        engine.merge(b"m".to_vec(), b"y");
        assert_eq!(engine.get(b"m"), Some(b"x,y".to_vec()));

        let (sink, success, failure) = Recorder::<()>::new();
        engine.dispatch_delete(b"m".to_vec(), sink);
        assert!(success.lock().unwrap().is_some());
        assert!(failure.lock().unwrap().is_none());
        assert_eq!(engine.get(b"m"), None);
    }

    #[test]
    fn dispatch_put_if_absent_reports_winner() {
        let engine = Engine::new();
        let (sink, success, _failure) = Recorder::<Option<Vec<u8>>>::new();
        engine.dispatch_put_if_absent(b"k".to_vec(), b"v1".to_vec(), sink);
        assert_eq!(*success.lock().unwrap(), Some(None));

        let (sink, success, _failure) = Recorder::<Option<Vec<u8>>>::new();
        engine.dispatch_put_if_absent(b"k".to_vec(), b"v2".to_vec(), sink);
        assert_eq!(*success.lock().unwrap(), Some(Some(b"v1".to_vec())));
    }

    #[test]
    fn engine_composes_stores_end_to_end() {
        let engine = Engine::new();
        engine.put(b"a".to_vec(), b"1".to_vec());
        engine.put(b"b".to_vec(), b"2".to_vec());
        let scanned = engine.scan(None, None, 0, false);
        assert_eq!(scanned.len(), 2);

        let (start, end) = engine.get_sequence(b"s".to_vec(), 3).unwrap();
        assert_eq!((start, end), (0, 3));

        let owner = engine.try_lock(b"L".to_vec(), b"F", false, acquirer(b"A", 1000, 0));
        assert!(owner.success);
        assert_eq!(owner.fencing_token, 1);
    }
}
