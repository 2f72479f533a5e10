use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::compress::{compress, Compression};
use crate::config::{RetryConfig, SatchelConfig};
use crate::crypto::object_id::ObjectId;
use crate::crypto::CryptoEngine;
use crate::error::Result;
use crate::loader::Loader;
use crate::repo::format::seal;
use crate::snapshot::Snapshot;
use crate::storage::{Backend, ObjectHandle, ObjectKind};

/// Persists, retrieves and enumerates snapshot records.
///
/// Tracks the most recently observed snapshot by token. `latest` is owned by
/// the run's single thread of control; concurrent mutation is excluded by
/// design.
pub struct SnapshotManager {
    backend: Arc<dyn Backend>,
    crypto: Arc<dyn CryptoEngine>,
    scope: String,
    compression: Compression,
    zstd_level: i32,
    retry: RetryConfig,
    loader: Loader,
    latest: Option<Snapshot>,
}

impl SnapshotManager {
    pub fn new(
        backend: Arc<dyn Backend>,
        crypto: Arc<dyn CryptoEngine>,
        scope: &str,
        config: &SatchelConfig,
    ) -> Result<Self> {
        let loader = Loader::with_local_cache(
            Arc::clone(&backend),
            Arc::clone(&crypto),
            scope,
            config.cache_dir.as_deref(),
        );
        Ok(Self {
            backend,
            crypto,
            scope: scope.to_string(),
            compression: Compression::from_config(&config.compression)?,
            zstd_level: config.compression.zstd_level,
            retry: config.retry.clone(),
            loader,
            latest: None,
        })
    }

    /// The snapshot with the greatest token seen by this manager, if any.
    pub fn latest(&self) -> Option<&Snapshot> {
        self.latest.as_ref()
    }

    /// List every snapshot handle currently on the backend.
    pub fn list_handles(&self) -> Result<Vec<ObjectHandle>> {
        let prefix = ObjectHandle::list_prefix(&self.scope, ObjectKind::Snapshot);
        let handles = self
            .backend
            .list(&prefix)?
            .into_iter()
            .filter_map(|info| ObjectHandle::parse_key(&info.key))
            .filter(|handle| handle.kind == ObjectKind::Snapshot)
            .collect();
        Ok(handles)
    }

    /// Load each handle, skipping (and logging) any snapshot that fails to
    /// decrypt or parse — one corrupt snapshot must not prevent the rest
    /// from loading. Resets `latest` first so switching to empty storage
    /// does not retain a stale value.
    pub fn on_snapshots_loaded(&mut self, handles: &[ObjectHandle]) -> Vec<Snapshot> {
        self.latest = None;
        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            match self.load_snapshot(handle) {
                Ok(snapshot) => {
                    self.track_latest(&snapshot);
                    snapshots.push(snapshot);
                }
                Err(e) => {
                    warn!(snapshot = %handle.id, "skipping unreadable snapshot: {e}");
                }
            }
        }
        snapshots
    }

    /// Compress, encrypt (unpadded), content-address and upload a snapshot.
    ///
    /// This is the single write whose loss cannot be recovered by re-running
    /// ingestion — every blob is already durable, only the record tying them
    /// together is at stake — so it is retried a bounded number of times
    /// with linearly increasing backoff. On success the ciphertext is
    /// mirrored into the local cache best-effort.
    pub fn save_snapshot(&mut self, snapshot: &Snapshot) -> Result<ObjectHandle> {
        let plaintext = rmp_serde::to_vec(snapshot)?;
        let compressed = compress(self.compression, self.zstd_level, &plaintext)?;
        let sealed = seal(ObjectKind::Snapshot, &compressed, self.crypto.as_ref())?;

        let id = ObjectId::compute(&sealed);
        let handle = ObjectHandle::snapshot(&self.scope, id);
        let key = handle.storage_key();

        let mut last_err = None;
        let max_attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay_ms * (attempt - 1) as u64;
                std::thread::sleep(Duration::from_millis(delay));
            }
            match self.backend.put(&key, &sealed) {
                Ok(()) => {
                    info!(snapshot = %id, token = snapshot.token, "saved snapshot");
                    self.loader.cache_raw(&handle, &sealed);
                    self.track_latest(snapshot);
                    return Ok(handle);
                }
                Err(e) => {
                    warn!(
                        snapshot = %id,
                        attempt,
                        max_attempts,
                        "snapshot save failed: {e}"
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("at least one save attempt"))
    }

    /// Load one snapshot, preferring the verified local cache file and
    /// falling back to the backend (refreshing the cache) on any failure.
    pub fn load_snapshot(&self, handle: &ObjectHandle) -> Result<Snapshot> {
        let plaintext = self.loader.load_bytes_cached(handle)?;
        Ok(rmp_serde::from_slice(&plaintext)?)
    }

    /// Delete a snapshot from the backend and from the local cache.
    pub fn remove_snapshot(&mut self, handle: &ObjectHandle) -> Result<()> {
        self.backend.delete(&handle.storage_key())?;
        self.loader.remove_cached(handle);
        debug!(snapshot = %handle.id, "removed snapshot");
        Ok(())
    }

    /// Parse every locally cached snapshot file. Used for offline listing;
    /// never touches the backend. Unparseable cache files are skipped.
    pub fn load_cached_snapshots(&self) -> Vec<Snapshot> {
        self.loader
            .cached_handles(&self.scope, ObjectKind::Snapshot)
            .into_iter()
            .filter_map(|handle| {
                let plaintext = self.loader.load_cached_bytes(&handle)?;
                match rmp_serde::from_slice(&plaintext) {
                    Ok(snapshot) => Some(snapshot),
                    Err(e) => {
                        warn!(snapshot = %handle.id, "skipping unparseable cached snapshot: {e}");
                        None
                    }
                }
            })
            .collect()
    }

    fn track_latest(&mut self, snapshot: &Snapshot) {
        let newer = self
            .latest
            .as_ref()
            .map_or(true, |latest| snapshot.token > latest.token);
        if newer {
            self.latest = Some(snapshot.clone());
        }
    }
}
