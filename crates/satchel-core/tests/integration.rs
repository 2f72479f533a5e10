//! End-to-end lifecycle over a real filesystem backend: several backup runs,
//! deduplication between them, restore, and a prune pass with garbage
//! collection.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use satchel_core::config::{ChunkerConfig, CompressionConfig, RetryConfig, SatchelConfig};
use satchel_core::crypto::aes_gcm::Aes256GcmEngine;
use satchel_core::crypto::key::MasterKey;
use satchel_core::crypto::CryptoEngine;
use satchel_core::manager::{AppInfo, BackupManager, DeviceInfo};
use satchel_core::snapshot::BackupType;
use satchel_core::storage::local_backend::LocalBackend;
use satchel_core::storage::{Backend, ObjectHandle, ObjectKind};

const SCOPE: &str = "0a1b2c3d";

fn small_config(cache_dir: &Path) -> SatchelConfig {
    SatchelConfig {
        chunker: ChunkerConfig {
            min_size: 256,
            avg_size: 1024,
            max_size: 4096,
            normalization: 1,
        },
        compression: CompressionConfig {
            algorithm: "zstd".into(),
            zstd_level: 3,
        },
        retry: RetryConfig {
            max_attempts: 3,
            delay_ms: 0,
        },
        cache_dir: Some(cache_dir.to_path_buf()),
    }
}

fn device() -> DeviceInfo {
    DeviceInfo {
        device_name: "Integration Device".into(),
        user_name: "itest".into(),
        device_id: "11223344".into(),
        os_version: 35,
        os_build_id: "ITEST.250101.001".into(),
        is_device_transfer: false,
    }
}

fn app_info(display_name: &str) -> AppInfo {
    AppInfo {
        time: 1_700_000_000_000,
        backup_type: BackupType::Full,
        display_name: display_name.into(),
        is_system: false,
        is_launchable_system: false,
    }
}

/// Deterministic bytes with enough entropy for content-defined boundaries.
fn sample_data(len: usize, seed: u8) -> Vec<u8> {
    let mut state = (seed as u32).wrapping_mul(2654435761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            (state >> 24) as u8
        })
        .collect()
}

fn run_backup(mgr: &mut BackupManager, payloads: &[(&str, Vec<u8>)]) -> satchel_core::snapshot::Snapshot {
    mgr.start_run().unwrap();
    for (name, data) in payloads {
        mgr.backup_app(name, app_info(name), &mut Cursor::new(data.clone()))
            .unwrap();
    }
    let (snapshot, _handle) = mgr.finish_run().unwrap();
    snapshot
}

#[test]
fn backup_restore_prune_lifecycle() {
    let repo_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();

    let backend: Arc<dyn Backend> = Arc::new(LocalBackend::new(repo_dir.path()).unwrap());
    let crypto: Arc<dyn CryptoEngine> =
        Arc::new(Aes256GcmEngine::new(&MasterKey::from_bytes([0x5C; 32])));
    let mut mgr = BackupManager::new(
        backend.clone(),
        crypto,
        SCOPE,
        device(),
        &small_config(cache_dir.path()),
    )
    .unwrap();

    let stable = sample_data(48_000, 1);
    let churn_v1 = sample_data(32_000, 2);
    let churn_v2 = sample_data(32_000, 3);
    let churn_v3 = sample_data(32_000, 4);

    // Three runs on the same day; the stable app never changes.
    let snap1 = run_backup(
        &mut mgr,
        &[("org.example.stable", stable.clone()), ("org.example.churn", churn_v1)],
    );
    let snap2 = run_backup(
        &mut mgr,
        &[("org.example.stable", stable.clone()), ("org.example.churn", churn_v2)],
    );
    let snap3 = run_backup(
        &mut mgr,
        &[("org.example.stable", stable.clone()), ("org.example.churn", churn_v3.clone())],
    );
    assert!(snap1.token < snap2.token && snap2.token < snap3.token);

    // Dedup across runs: the stable app's chunks are shared, so the blob
    // count grows by far less than a full re-upload per run.
    assert_eq!(
        snap1.apps["org.example.stable"].chunk_ids,
        snap3.apps["org.example.stable"].chunk_ids
    );
    let blobs_on_backend = backend
        .list(&ObjectHandle::list_prefix(SCOPE, ObjectKind::Blob))
        .unwrap()
        .len();
    let union: std::collections::HashSet<_> = snap1
        .referenced_blob_ids()
        .chain(snap2.referenced_blob_ids())
        .chain(snap3.referenced_blob_ids())
        .collect();
    assert_eq!(blobs_on_backend, union.len());

    // All three snapshots are listed.
    let loaded = mgr.load_snapshots().unwrap();
    assert_eq!(loaded.len(), 3);

    // Restore from the newest snapshot.
    let mut restored = Vec::new();
    mgr.restore_app(&snap3, "org.example.churn", &mut restored)
        .unwrap();
    assert_eq!(restored, churn_v3);

    // Prune: three same-day snapshots collapse to the newest one, and blobs
    // referenced only by the deleted snapshots are collected.
    let stats = mgr.prune(Utc::now()).unwrap();
    assert_eq!(stats.snapshots_kept, 1);
    assert_eq!(stats.snapshots_deleted, 2);
    assert!(stats.blobs_deleted > 0);

    let remaining_snapshots = backend
        .list(&ObjectHandle::list_prefix(SCOPE, ObjectKind::Snapshot))
        .unwrap();
    assert_eq!(remaining_snapshots.len(), 1);

    // Every remaining blob is referenced by the kept snapshot, and the kept
    // snapshot remains fully restorable.
    let remaining_blobs = backend
        .list(&ObjectHandle::list_prefix(SCOPE, ObjectKind::Blob))
        .unwrap();
    let kept_ids: std::collections::HashSet<_> = snap3.referenced_blob_ids().collect();
    assert_eq!(remaining_blobs.len(), kept_ids.len());
    for info in &remaining_blobs {
        let handle = ObjectHandle::parse_key(&info.key).unwrap();
        assert!(kept_ids.contains(&handle.id));
    }

    let mut restored_after_prune = Vec::new();
    mgr.restore_app(&snap3, "org.example.stable", &mut restored_after_prune)
        .unwrap();
    assert_eq!(restored_after_prune, stable);
}

#[test]
fn fresh_manager_deduplicates_against_existing_repository() {
    let repo_dir = tempfile::tempdir().unwrap();
    let cache_a = tempfile::tempdir().unwrap();
    let cache_b = tempfile::tempdir().unwrap();

    let backend: Arc<dyn Backend> = Arc::new(LocalBackend::new(repo_dir.path()).unwrap());
    let key = MasterKey::from_bytes([0x5C; 32]);
    let data = sample_data(40_000, 9);

    let mut first = BackupManager::new(
        backend.clone(),
        Arc::new(Aes256GcmEngine::new(&key)),
        SCOPE,
        device(),
        &small_config(cache_a.path()),
    )
    .unwrap();
    let snap1 = run_backup(&mut first, &[("org.example.app", data.clone())]);
    let blobs_after_first = backend
        .list(&ObjectHandle::list_prefix(SCOPE, ObjectKind::Blob))
        .unwrap()
        .len();

    // A different machine (separate local caches) backing up the same bytes:
    // everything dedups via the prior snapshot's blob table.
    let mut second = BackupManager::new(
        backend.clone(),
        Arc::new(Aes256GcmEngine::new(&key)),
        SCOPE,
        device(),
        &small_config(cache_b.path()),
    )
    .unwrap();
    let snap2 = run_backup(&mut second, &[("org.example.app", data)]);

    let blobs_after_second = backend
        .list(&ObjectHandle::list_prefix(SCOPE, ObjectKind::Blob))
        .unwrap()
        .len();
    assert_eq!(blobs_after_first, blobs_after_second);
    assert_eq!(snap1.blobs, snap2.blobs);
}
