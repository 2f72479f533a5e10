use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::blob::Blob;
use crate::crypto::chunk_id::ChunkId;
use crate::crypto::object_id::ObjectId;
use crate::platform::cache_base_dir;
use crate::snapshot::Snapshot;
use crate::storage::{FileInfo, ObjectHandle, ObjectKind};

/// Size of one persisted entry:
/// 32-byte chunk hash + 32-byte blob id + u32 LE stored size + u32 LE
/// uncompressed size.
const ENTRY_SIZE: usize = 72;

/// Local persisted-cache file name under the scope's cache directory.
const CACHE_FILE_NAME: &str = "dedup_cache";

/// Build the `blob id -> size` map from a backend blob listing.
/// Keys that do not parse as blob handles are foreign files and skipped.
pub fn backend_blob_sizes(infos: &[FileInfo]) -> HashMap<ObjectId, u64> {
    infos
        .iter()
        .filter_map(|info| {
            let handle = ObjectHandle::parse_key(&info.key)?;
            (handle.kind == ObjectKind::Blob).then_some((handle.id, info.size))
        })
        .collect()
}

/// The dedup index: chunk hash to already-stored blob.
///
/// The in-memory map is rebuilt by [`populate`](Self::populate) at the start
/// of every run from evidence (the local persisted file and prior snapshots),
/// validated against the backend listing — evidence whose blob is missing
/// from the backend or has a mismatching size is never trusted.
///
/// The persisted file is append-only: every newly created blob is recorded
/// as soon as it is durably stored, so an interrupted run does not re-upload.
/// The file is an optimization only and safe to delete at any time.
///
/// Owned by a single run's thread of control; concurrent mutation is
/// excluded by design, not by locking.
pub struct BlobCache {
    entries: HashMap<ChunkId, Blob>,
    cache_file: Option<PathBuf>,
}

impl BlobCache {
    pub fn new(scope: &str, cache_dir: Option<&Path>) -> Self {
        let cache_file = cache_base_dir(scope, cache_dir).map(|d| d.join(CACHE_FILE_NAME));
        Self {
            entries: HashMap::new(),
            cache_file,
        }
    }

    /// Rebuild the in-memory map for a new run.
    ///
    /// Candidates are taken first from the local persisted file, then from
    /// every prior snapshot's blob table. A candidate survives only if its
    /// blob id appears in `on_backend` with an exactly matching size. When
    /// two candidates claim the same chunk hash with different blob ids, the
    /// first wins and the conflict is logged — tolerated, not fatal.
    pub fn populate(&mut self, on_backend: &HashMap<ObjectId, u64>, prior: &[Snapshot]) {
        self.entries.clear();

        let persisted = self.load_persisted();
        let persisted_count = persisted.len();
        for (chunk_id, blob) in persisted {
            self.admit(chunk_id, blob, on_backend, "local cache");
        }

        for snapshot in prior {
            for (chunk_id, blob) in &snapshot.blobs {
                self.admit(*chunk_id, *blob, on_backend, "snapshot");
            }
        }

        debug!(
            entries = self.entries.len(),
            persisted = persisted_count,
            snapshots = prior.len(),
            "populated blob cache"
        );
    }

    fn admit(
        &mut self,
        chunk_id: ChunkId,
        blob: Blob,
        on_backend: &HashMap<ObjectId, u64>,
        source: &str,
    ) {
        match on_backend.get(&blob.id) {
            Some(&size) if size == blob.length as u64 => {}
            Some(&size) => {
                debug!(
                    chunk = %chunk_id,
                    blob = %blob.id,
                    recorded = blob.length,
                    on_backend = size,
                    source,
                    "blob size mismatch, dropping cache entry"
                );
                return;
            }
            None => {
                debug!(chunk = %chunk_id, blob = %blob.id, source, "blob missing from backend, dropping cache entry");
                return;
            }
        }

        if let Some(existing) = self.entries.get(&chunk_id) {
            if existing.id != blob.id {
                warn!(
                    chunk = %chunk_id,
                    kept = %existing.id,
                    dropped = %blob.id,
                    source,
                    "two blobs claim the same chunk hash, keeping the first"
                );
            }
            return;
        }
        self.entries.insert(chunk_id, blob);
    }

    /// Look up a validated blob for a chunk hash.
    pub fn get(&self, chunk_id: &ChunkId) -> Option<&Blob> {
        self.entries.get(chunk_id)
    }

    /// Record a freshly uploaded blob: update the map and append to the
    /// persisted file. The append is best-effort; a failure costs a future
    /// re-upload at worst and is only logged.
    pub fn register_new(&mut self, chunk_id: ChunkId, blob: Blob) {
        if let Err(e) = self.append_persisted(&chunk_id, &blob) {
            warn!(chunk = %chunk_id, "failed to append to persisted dedup cache: {e}");
        }
        self.entries.insert(chunk_id, blob);
    }

    /// Drop the in-memory map. The persisted file is untouched.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Delete the persisted file. Called only after a run's mappings are
    /// durably captured in a saved snapshot.
    pub fn clear_persistent(&mut self) {
        let Some(path) = &self.cache_file else {
            return;
        };
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "cleared persisted dedup cache"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove persisted dedup cache: {e}"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read all entries from the persisted file. Unreadable or truncated
    /// content is never fatal: the cache is evidence, re-validated against
    /// the backend on every populate.
    fn load_persisted(&self) -> Vec<(ChunkId, Blob)> {
        let Some(path) = &self.cache_file else {
            return Vec::new();
        };
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("failed to read persisted dedup cache: {e}");
                return Vec::new();
            }
        };

        if data.len() % ENTRY_SIZE != 0 {
            warn!(
                bytes = data.len(),
                "persisted dedup cache has a truncated tail, ignoring it"
            );
        }

        data.chunks_exact(ENTRY_SIZE)
            .map(|entry| {
                let mut chunk_hash = [0u8; 32];
                chunk_hash.copy_from_slice(&entry[..32]);
                let mut blob_id = [0u8; 32];
                blob_id.copy_from_slice(&entry[32..64]);
                let length = u32::from_le_bytes(entry[64..68].try_into().unwrap());
                let uncompressed_length = u32::from_le_bytes(entry[68..72].try_into().unwrap());
                (
                    ChunkId(chunk_hash),
                    Blob {
                        id: ObjectId(blob_id),
                        length,
                        uncompressed_length,
                    },
                )
            })
            .collect()
    }

    fn append_persisted(&self, chunk_id: &ChunkId, blob: &Blob) -> std::io::Result<()> {
        let Some(path) = &self.cache_file else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut entry = [0u8; ENTRY_SIZE];
        entry[..32].copy_from_slice(&chunk_id.0);
        entry[32..64].copy_from_slice(&blob.id.0);
        entry[64..68].copy_from_slice(&blob.length.to_le_bytes());
        entry[68..72].copy_from_slice(&blob.uncompressed_length.to_le_bytes());

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&entry)
    }
}
