use region_kv_engine::lock_manager::Acquirer;
use region_kv_engine::region::Region;
use region_kv_engine::snapshot::{FsSnapshotBackend, SnapshotConfig};
use region_kv_engine::Engine;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn acquirer(id: &[u8], lease: i64, now: i64) -> Acquirer {
    Acquirer {
        id: id.to_vec(),
        lease_millis: lease,
        now_millis: now,
        context: Vec::new(),
    }
}

#[test]
fn engine_composes_store_sequence_and_locks() {
    init();
    let engine = Engine::new();

    engine.put(b"a".to_vec(), b"1".to_vec());
    engine.put(b"b".to_vec(), b"2".to_vec());
    engine.put(b"c".to_vec(), b"3".to_vec());

    let first_two = engine.scan(None, None, 2, false);
    assert_eq!(first_two.len(), 2, "unexpected scan result: {:?}", first_two);
    assert_eq!(first_two[0].key, b"a".to_vec());
    assert_eq!(first_two[1].key, b"b".to_vec());

    assert_eq!(engine.get_sequence(b"s".to_vec(), 10).unwrap(), (0, 10));
    assert_eq!(engine.get_sequence(b"s".to_vec(), 5).unwrap(), (10, 15));
    engine.reset_sequence(b"s");
    assert_eq!(engine.get_sequence(b"s".to_vec(), 1).unwrap(), (0, 1));

    let owner = engine.try_lock(b"L".to_vec(), b"F", false, acquirer(b"A", 1000, 1000));
    assert!(owner.success, "first acquisition should succeed");
    assert_eq!(owner.fencing_token, 1);

    let conflict = engine.try_lock(b"L".to_vec(), b"F", false, acquirer(b"B", 1000, 1500));
    assert!(!conflict.success, "lock should still be held by A");
    assert_eq!(conflict.remaining_millis, 500);
}

#[test]
fn snapshot_round_trip_carries_a_region_slice_into_a_fresh_engine() {
    init();
    let source = Engine::new();
    for i in 0..2500u32 {
        let key = format!("k{i:04}").into_bytes();
        source.put(key, b"v".to_vec());
    }
    source.get_sequence(b"k0700".to_vec(), 3).unwrap();
    source.try_lock(b"k0900".to_vec(), b"k0900".to_vec().as_slice(), false, acquirer(b"A", 1000, 0));

    let region = Region::new(b"k0500".to_vec(), Some(b"k2000".to_vec()));
    let backend = FsSnapshotBackend;
    let config = SnapshotConfig { keys_per_segment: 1000 };
    let dir = tempfile::tempdir().unwrap();

    source
        .save_snapshot(&region, dir.path(), &backend, &config)
        .unwrap();

    let target = Engine::new();
    target.load_snapshot(dir.path(), &backend).unwrap();

    let keys: Vec<_> = target
        .scan(None, None, 0, true)
        .into_iter()
        .map(|e| e.key)
        .collect();
    assert_eq!(keys.len(), 1500, "only the region slice should load");
    assert_eq!(keys[0], b"k0500".to_vec());
    assert_eq!(keys[keys.len() - 1], b"k1999".to_vec());

    assert_eq!(target.get_sequence(b"k0700".to_vec(), 0).unwrap(), (3, 3));
    let still_locked = target.try_lock(b"k0900".to_vec(), b"k0900".to_vec().as_slice(), true, acquirer(b"A", 1000, 100));
    assert!(still_locked.success, "lock state in-region should have round-tripped");
}

#[test]
fn reentrant_lock_then_full_release_removes_the_record() {
    init();
    let engine = Engine::new();
    let a1 = engine.try_lock(b"L".to_vec(), b"F", false, acquirer(b"A", 1000, 0));
    assert_eq!(a1.acquires, 1);
    let a2 = engine.try_lock(b"L".to_vec(), b"F", false, acquirer(b"A", 1000, 100));
    assert_eq!(a2.acquires, 2);

    let r1 = engine.release_lock(b"L", acquirer(b"A", 0, 0));
    assert_eq!(r1.acquires, 1);
    let r2 = engine.release_lock(b"L", acquirer(b"A", 0, 0));
    assert_eq!(r2.acquires, 0);

    // Lock is gone now, so a fresh acquirer succeeds immediately.
    let b = engine.try_lock(b"L".to_vec(), b"F", false, acquirer(b"B", 1000, 200));
    assert!(b.success);
    assert_eq!(b.fencing_token, 2);
}
