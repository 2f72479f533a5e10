use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use crate::blob::Blob;
use crate::crypto::chunk_id::ChunkId;
use crate::crypto::object_id::ObjectId;
use crate::prune::{compute_keep_set, Pruner};
use crate::snapshot::manager::SnapshotManager;
use crate::snapshot::{Snapshot, SNAPSHOT_VERSION};
use crate::storage::{Backend, ObjectHandle};
use crate::testutil::{test_config, test_crypto, MemoryBackend};

const SCOPE: &str = "abba0004";

fn tok(year: i32, month: u32, day: u32, hour: u32) -> u64 {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .unwrap()
        .timestamp_millis() as u64
}

// Wednesday, 2026-01-21. "This week" is Mon Jan 19 - Sun Jan 25,
// "last week" is Mon Jan 12 - Sun Jan 18.
fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 21, 12, 0, 0).unwrap()
}

#[test]
fn retention_example_five_snapshots_one_deletion() {
    // Three this-week snapshots on distinct days, two last week: retention
    // keeps the three plus the newest last-week one; exactly one deletion.
    let tokens = vec![
        tok(2026, 1, 21, 9),
        tok(2026, 1, 20, 9),
        tok(2026, 1, 19, 9),
        tok(2026, 1, 15, 9),
        tok(2026, 1, 13, 9),
    ];
    let keep = compute_keep_set(&tokens, now());
    assert_eq!(keep.len(), 4);
    assert!(!keep.contains(&tok(2026, 1, 13, 9)), "older last-week snapshot goes");
    for token in &tokens[..4] {
        assert!(keep.contains(token));
    }
}

#[test]
fn fewer_than_three_snapshots_keeps_all() {
    // Ancient snapshots, in no retained week: still kept, there are only two.
    let tokens = vec![tok(2020, 6, 1, 0), tok(2019, 6, 1, 0)];
    let keep = compute_keep_set(&tokens, now());
    assert_eq!(keep.len(), 2);
}

#[test]
fn same_day_keeps_only_the_newest() {
    let tokens = vec![
        tok(2026, 1, 21, 16), // newest of its day
        tok(2026, 1, 21, 10),
        tok(2026, 1, 20, 9),
        tok(2026, 1, 19, 9),
        tok(2026, 1, 10, 9), // two weeks back, no bucket keeps it
    ];
    let keep = compute_keep_set(&tokens, now());
    assert!(keep.contains(&tok(2026, 1, 21, 16)));
    assert!(!keep.contains(&tok(2026, 1, 21, 10)), "day bucket tie-break");
    assert!(keep.contains(&tok(2026, 1, 20, 9)));
    assert!(keep.contains(&tok(2026, 1, 19, 9)));
    assert!(!keep.contains(&tok(2026, 1, 10, 9)));
    assert_eq!(keep.len(), 3);
}

#[test]
fn previous_week_survivor_outlives_daily_window() {
    // Four recent distinct days crowd out the older snapshot from the daily
    // rule, but the previous-week rule still keeps it.
    let tokens = vec![
        tok(2026, 1, 22, 9),
        tok(2026, 1, 21, 9),
        tok(2026, 1, 20, 9),
        tok(2026, 1, 16, 9), // last week
    ];
    let keep = compute_keep_set(&tokens, now());
    assert!(keep.contains(&tok(2026, 1, 16, 9)));
    assert_eq!(keep.len(), 4);
}

// ---------------------------------------------------------------------------
// Full prune pass with garbage collection
// ---------------------------------------------------------------------------

fn chunk(n: u8) -> ChunkId {
    ChunkId([n; 32])
}

/// Store a dummy blob object on the backend and return its record.
fn put_blob(backend: &dyn Backend, n: u8, size: usize) -> Blob {
    let data = vec![n; size];
    let id = ObjectId::compute(&data);
    let handle = ObjectHandle::blob(SCOPE, id);
    backend.put(&handle.storage_key(), &data).unwrap();
    Blob {
        id,
        length: size as u32,
        uncompressed_length: size as u32,
    }
}

fn snapshot_with(token: u64, blobs: Vec<(ChunkId, Blob)>) -> Snapshot {
    Snapshot {
        version: SNAPSHOT_VERSION,
        token,
        device_name: String::new(),
        user_name: String::new(),
        device_id: String::new(),
        os_version: 0,
        os_build_id: String::new(),
        is_device_transfer: false,
        apps: BTreeMap::new(),
        icon_chunk_ids: Vec::new(),
        blobs: blobs.into_iter().collect(),
    }
}

fn manager(backend: Arc<dyn Backend>, cache_dir: &Path) -> SnapshotManager {
    SnapshotManager::new(backend, test_crypto(), SCOPE, &test_config(cache_dir)).unwrap()
}

#[test]
fn prune_deletes_snapshots_and_unreferenced_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryBackend::new());
    let backend: Arc<dyn Backend> = memory.clone();
    let mut mgr = manager(backend.clone(), dir.path());

    let shared = put_blob(backend.as_ref(), 0xEE, 600);
    let kept_only = put_blob(backend.as_ref(), 0x01, 500);
    let doomed_only = put_blob(backend.as_ref(), 0x02, 400);

    // Kept by retention: within the three most recent days.
    mgr.save_snapshot(&snapshot_with(
        tok(2026, 1, 21, 9),
        vec![(chunk(1), kept_only), (chunk(2), shared)],
    ))
    .unwrap();
    mgr.save_snapshot(&snapshot_with(
        tok(2026, 1, 20, 9),
        vec![(chunk(2), shared)],
    ))
    .unwrap();
    mgr.save_snapshot(&snapshot_with(tok(2026, 1, 19, 9), vec![]))
        .unwrap();
    // Deleted by retention: second snapshot of an already-kept day.
    mgr.save_snapshot(&snapshot_with(
        tok(2026, 1, 21, 7),
        vec![(chunk(3), doomed_only), (chunk(2), shared)],
    ))
    .unwrap();

    let pruner = Pruner::new(backend.clone(), SCOPE);
    let stats = pruner.prune(&mut mgr, now()).unwrap();

    assert_eq!(stats.snapshots_kept, 3);
    assert_eq!(stats.snapshots_deleted, 1);
    assert_eq!(stats.corrupt_deleted, 0);
    assert_eq!(stats.blobs_deleted, 1);

    // Every surviving blob is referenced by a kept snapshot.
    assert!(memory
        .get(&ObjectHandle::blob(SCOPE, kept_only.id).storage_key())
        .unwrap()
        .is_some());
    assert!(memory
        .get(&ObjectHandle::blob(SCOPE, shared.id).storage_key())
        .unwrap()
        .is_some());
    assert!(memory
        .get(&ObjectHandle::blob(SCOPE, doomed_only.id).storage_key())
        .unwrap()
        .is_none());
    assert_eq!(memory.object_count(&format!("{SCOPE}/snapshots/")), 3);
}

#[test]
fn prune_deletes_corrupt_snapshots_eagerly() {
    let dir = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryBackend::new());
    let backend: Arc<dyn Backend> = memory.clone();
    let mut mgr = manager(backend.clone(), dir.path());

    mgr.save_snapshot(&snapshot_with(tok(2026, 1, 21, 9), vec![]))
        .unwrap();
    mgr.save_snapshot(&snapshot_with(tok(2026, 1, 20, 9), vec![]))
        .unwrap();

    // A snapshot-shaped object that will not decrypt.
    let garbage = b"ciphertext of some other repository".to_vec();
    let bogus = ObjectHandle::snapshot(SCOPE, ObjectId::compute(&garbage));
    memory.put(&bogus.storage_key(), &garbage).unwrap();

    let pruner = Pruner::new(backend, SCOPE);
    let stats = pruner.prune(&mut mgr, now()).unwrap();

    assert_eq!(stats.corrupt_deleted, 1);
    assert_eq!(stats.snapshots_kept, 2);
    assert_eq!(stats.snapshots_deleted, 0);
    assert!(memory.get(&bogus.storage_key()).unwrap().is_none());
}
