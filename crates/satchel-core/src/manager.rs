use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::blob::cache::{backend_blob_sizes, BlobCache};
use crate::blob::{Blob, BlobCreator};
use crate::config::SatchelConfig;
use crate::crypto::chunk_id::ChunkId;
use crate::crypto::CryptoEngine;
use crate::error::{Result, SatchelError};
use crate::loader::Loader;
use crate::prune::{PruneStats, Pruner};
use crate::receiver::BackupReceiver;
use crate::snapshot::manager::SnapshotManager;
use crate::snapshot::{Apk, App, BackupType, Snapshot, Split, SNAPSHOT_VERSION};
use crate::storage::{Backend, ObjectHandle, ObjectKind};

/// Identity of the device this repository scope belongs to, recorded in
/// every snapshot.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub device_name: String,
    pub user_name: String,
    pub device_id: String,
    pub os_version: u32,
    pub os_build_id: String,
    pub is_device_transfer: bool,
}

/// Metadata for one app's data stream.
#[derive(Debug, Clone)]
pub struct AppInfo {
    pub time: u64,
    pub backup_type: BackupType,
    pub display_name: String,
    pub is_system: bool,
    pub is_launchable_system: bool,
}

/// Metadata for one app's installer package.
#[derive(Debug, Clone)]
pub struct ApkInfo {
    pub version_code: Option<u64>,
    pub installer: String,
    pub signatures: Vec<Vec<u8>>,
}

#[derive(Default)]
struct RunState {
    apps: BTreeMap<String, App>,
    icon_chunk_ids: Vec<ChunkId>,
    blobs: BTreeMap<ChunkId, Blob>,
}

/// Owner token for the icon stream's receiver session.
const ICONS_OWNER: &str = "@icons";

/// Orchestrates backup runs against one repository scope.
///
/// Owns all run-scoped mutable state (the dedup cache, the receiver, the
/// snapshot manager) as explicit fields — no process-wide singletons — and
/// is driven by a single thread of control: one active backup or prune run
/// at a time. That single-writer rule is a hard precondition of the engine,
/// documented rather than enforced with locks.
///
/// A run: [`start_run`](Self::start_run), then one ingestion call per
/// logical unit (apps, APKs, icons), then [`finish_run`](Self::finish_run).
/// A failed run preserves every uploaded blob and the persisted dedup cache,
/// so the next attempt reuses that work; no partial snapshot is ever written.
pub struct BackupManager {
    backend: Arc<dyn Backend>,
    scope: String,
    device: DeviceInfo,
    cache: BlobCache,
    receiver: BackupReceiver,
    snapshots: SnapshotManager,
    pruner: Pruner,
    loader: Loader,
    run: Option<RunState>,
}

impl BackupManager {
    pub fn new(
        backend: Arc<dyn Backend>,
        crypto: Arc<dyn CryptoEngine>,
        scope: &str,
        device: DeviceInfo,
        config: &SatchelConfig,
    ) -> Result<Self> {
        let creator = BlobCreator::new(
            Arc::clone(&backend),
            Arc::clone(&crypto),
            scope,
            config,
        )?;
        let receiver = BackupReceiver::new(creator, &config.chunker);
        let snapshots = SnapshotManager::new(
            Arc::clone(&backend),
            Arc::clone(&crypto),
            scope,
            config,
        )?;
        let cache = BlobCache::new(scope, config.cache_dir.as_deref());
        let pruner = Pruner::new(Arc::clone(&backend), scope);
        let loader = Loader::new(Arc::clone(&backend), Arc::clone(&crypto));

        Ok(Self {
            backend,
            scope: scope.to_string(),
            device,
            cache,
            receiver,
            snapshots,
            pruner,
            loader,
            run: None,
        })
    }

    /// Begin a backup run: read the backend blob listing and all prior
    /// snapshots, and populate the dedup cache from them.
    pub fn start_run(&mut self) -> Result<()> {
        let blob_prefix = ObjectHandle::list_prefix(&self.scope, ObjectKind::Blob);
        let on_backend = backend_blob_sizes(&self.backend.list(&blob_prefix)?);

        let handles = self.snapshots.list_handles()?;
        let prior = self.snapshots.on_snapshots_loaded(&handles);

        self.cache.populate(&on_backend, &prior);
        self.run = Some(RunState::default());

        info!(
            scope = %self.scope,
            known_blobs = on_backend.len(),
            prior_snapshots = prior.len(),
            cached_chunks = self.cache.len(),
            "backup run started"
        );
        Ok(())
    }

    /// Ingest one app's data stream. The app name doubles as the receiver's
    /// ownership token for this unit.
    pub fn backup_app(&mut self, name: &str, info: AppInfo, stream: &mut dyn Read) -> Result<()> {
        self.ensure_run()?;
        let data = self
            .receiver
            .read_from_stream(name, stream, &mut self.cache)?;

        let run = self.active_run()?;
        run.blobs.extend(data.blobs);
        run.apps.insert(
            name.to_string(),
            App {
                time: info.time,
                backup_type: info.backup_type,
                display_name: info.display_name,
                is_system: info.is_system,
                is_launchable_system: info.is_launchable_system,
                chunk_ids: data.chunk_ids,
                apk: None,
            },
        );
        Ok(())
    }

    /// Ingest an app's installer package, one stream per split. Must follow
    /// the app's [`backup_app`](Self::backup_app) call in the same run.
    pub fn backup_apk(
        &mut self,
        app_name: &str,
        info: ApkInfo,
        splits: Vec<(String, &mut dyn Read)>,
    ) -> Result<()> {
        self.ensure_run()?;
        let mut stored_splits = Vec::with_capacity(splits.len());
        for (split_name, stream) in splits {
            let owner = format!("{app_name}/{split_name}");
            let data = self
                .receiver
                .read_from_stream(&owner, stream, &mut self.cache)?;
            let run = self.active_run()?;
            run.blobs.extend(data.blobs);
            stored_splits.push(Split {
                name: split_name,
                chunk_ids: data.chunk_ids,
            });
        }

        let run = self.active_run()?;
        let app = run.apps.get_mut(app_name).ok_or_else(|| {
            SatchelError::Other(format!(
                "cannot attach APK: app '{app_name}' has not been backed up in this run"
            ))
        })?;
        app.apk = Some(Apk {
            version_code: info.version_code,
            installer: info.installer,
            signatures: info.signatures,
            splits: stored_splits,
        });
        Ok(())
    }

    /// Ingest the icon archive stream for this run.
    pub fn backup_icons(&mut self, stream: &mut dyn Read) -> Result<()> {
        self.ensure_run()?;
        let data = self
            .receiver
            .read_from_stream(ICONS_OWNER, stream, &mut self.cache)?;
        let run = self.active_run()?;
        run.blobs.extend(data.blobs);
        run.icon_chunk_ids = data.chunk_ids;
        Ok(())
    }

    /// Assemble the snapshot for this run and save it durably (retried with
    /// backoff inside the snapshot manager), then clear the persisted dedup
    /// cache — its mappings are now captured by the snapshot.
    ///
    /// The snapshot is written exactly once, after full assembly; an aborted
    /// run never leaves a partial snapshot on the backend.
    pub fn finish_run(&mut self) -> Result<(Snapshot, ObjectHandle)> {
        let run = self
            .run
            .take()
            .ok_or_else(|| SatchelError::Other("no active backup run".into()))?;

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            token: self.next_token(),
            device_name: self.device.device_name.clone(),
            user_name: self.device.user_name.clone(),
            device_id: self.device.device_id.clone(),
            os_version: self.device.os_version,
            os_build_id: self.device.os_build_id.clone(),
            is_device_transfer: self.device.is_device_transfer,
            apps: run.apps,
            icon_chunk_ids: run.icon_chunk_ids,
            blobs: run.blobs,
        };

        let handle = self.snapshots.save_snapshot(&snapshot)?;
        self.cache.clear_persistent();
        self.cache.clear();

        info!(
            token = snapshot.token,
            apps = snapshot.apps.len(),
            blobs = snapshot.blobs.len(),
            "backup run finished"
        );
        Ok((snapshot, handle))
    }

    /// Run the retention policy and garbage-collect unreferenced blobs.
    /// Runs as its own pass, never concurrently with a backup run.
    pub fn prune(&mut self, now: DateTime<Utc>) -> Result<PruneStats> {
        self.pruner.prune(&mut self.snapshots, now)
    }

    /// Load all snapshots currently on the backend, skipping corrupt ones.
    pub fn load_snapshots(&mut self) -> Result<Vec<Snapshot>> {
        let handles = self.snapshots.list_handles()?;
        Ok(self.snapshots.on_snapshots_loaded(&handles))
    }

    /// Reassemble one app's data stream from a snapshot.
    pub fn restore_app(
        &self,
        snapshot: &Snapshot,
        name: &str,
        out: &mut dyn Write,
    ) -> Result<u64> {
        let app = snapshot
            .apps
            .get(name)
            .ok_or_else(|| SatchelError::Other(format!("app '{name}' not in snapshot")))?;
        self.restore_chunks(snapshot, &app.chunk_ids, out)
    }

    /// Reassemble one APK split's byte stream from a snapshot.
    pub fn restore_split(
        &self,
        snapshot: &Snapshot,
        app_name: &str,
        split_name: &str,
        out: &mut dyn Write,
    ) -> Result<u64> {
        let apk = snapshot
            .apps
            .get(app_name)
            .and_then(|app| app.apk.as_ref())
            .ok_or_else(|| SatchelError::Other(format!("app '{app_name}' has no APK")))?;
        let split = apk
            .splits
            .iter()
            .find(|split| split.name == split_name)
            .ok_or_else(|| {
                SatchelError::Other(format!("APK split '{split_name}' not in snapshot"))
            })?;
        self.restore_chunks(snapshot, &split.chunk_ids, out)
    }

    /// Reassemble the icon archive from a snapshot.
    pub fn restore_icons(&self, snapshot: &Snapshot, out: &mut dyn Write) -> Result<u64> {
        self.restore_chunks(snapshot, &snapshot.icon_chunk_ids, out)
    }

    pub fn snapshot_manager(&self) -> &SnapshotManager {
        &self.snapshots
    }

    /// Chunk order defines reassembly order; every chunk must be present in
    /// the snapshot's consolidated blob table.
    fn restore_chunks(
        &self,
        snapshot: &Snapshot,
        chunk_ids: &[ChunkId],
        out: &mut dyn Write,
    ) -> Result<u64> {
        let mut written = 0u64;
        for chunk_id in chunk_ids {
            let blob = snapshot.blobs.get(chunk_id).ok_or_else(|| {
                SatchelError::InvalidFormat(format!(
                    "chunk {chunk_id} missing from snapshot blob table"
                ))
            })?;
            let plaintext = self.loader.load_bytes(&blob.handle(&self.scope))?;
            out.write_all(&plaintext)?;
            written += plaintext.len() as u64;
        }
        Ok(written)
    }

    fn ensure_run(&self) -> Result<()> {
        if self.run.is_none() {
            return Err(SatchelError::Other("no active backup run".into()));
        }
        Ok(())
    }

    fn active_run(&mut self) -> Result<&mut RunState> {
        self.run
            .as_mut()
            .ok_or_else(|| SatchelError::Other("no active backup run".into()))
    }

    /// Snapshot tokens are creation timestamps (ms) and must stay unique and
    /// ordered; bump past the newest known token on clock skew.
    fn next_token(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        match self.snapshots.latest() {
            Some(latest) if latest.token >= now => latest.token + 1,
            _ => now,
        }
    }
}
