use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::compress::decompress;
use crate::crypto::object_id::ObjectId;
use crate::crypto::CryptoEngine;
use crate::error::{Result, SatchelError};
use crate::platform::cache_base_dir;
use crate::repo::format::open;
use crate::storage::{Backend, ObjectHandle, ObjectKind};

/// Downloads, hash-verifies, decrypts, de-pads and decompresses stored
/// objects (blobs and snapshots).
///
/// A hash mismatch against the handle's content address is a fatal integrity
/// failure: the object is corrupt or foreign, and the error is never retried
/// here. With a local cache configured, verified ciphertext is mirrored to
/// disk best-effort for faster re-reads; cache writes that fail are logged
/// and never propagated.
pub struct Loader {
    backend: Arc<dyn Backend>,
    crypto: Arc<dyn CryptoEngine>,
    cache_root: Option<PathBuf>,
}

impl Loader {
    /// A loader without a local ciphertext cache.
    pub fn new(backend: Arc<dyn Backend>, crypto: Arc<dyn CryptoEngine>) -> Self {
        Self {
            backend,
            crypto,
            cache_root: None,
        }
    }

    /// A loader that mirrors verified ciphertext into the scope's local
    /// cache directory.
    pub fn with_local_cache(
        backend: Arc<dyn Backend>,
        crypto: Arc<dyn CryptoEngine>,
        scope: &str,
        cache_dir: Option<&std::path::Path>,
    ) -> Self {
        Self {
            backend,
            crypto,
            cache_root: cache_base_dir(scope, cache_dir),
        }
    }

    /// Load and decode an object, returning a readable stream over its
    /// plaintext.
    pub fn load(&self, handle: &ObjectHandle) -> Result<Cursor<Vec<u8>>> {
        Ok(Cursor::new(self.load_bytes(handle)?))
    }

    /// Load and decode an object from the backend, mirroring the verified
    /// ciphertext into the local cache when one is configured.
    pub fn load_bytes(&self, handle: &ObjectHandle) -> Result<Vec<u8>> {
        let raw = self.fetch_raw(handle)?;
        let plaintext = self.decode(handle, &raw)?;
        self.write_cache(handle, &raw);
        Ok(plaintext)
    }

    /// Load an object preferring the local cache file, verified against the
    /// handle. On any cache failure the backend is used and the cache
    /// refreshed.
    pub fn load_bytes_cached(&self, handle: &ObjectHandle) -> Result<Vec<u8>> {
        if let Some(path) = self.cache_path(handle) {
            if let Ok(raw) = std::fs::read(&path) {
                match self.decode(handle, &raw) {
                    Ok(plaintext) => {
                        debug!(object = %handle.id, "loaded object from local cache");
                        return Ok(plaintext);
                    }
                    Err(e) => {
                        warn!(object = %handle.id, "local cache invalid ({e}), falling back to backend");
                    }
                }
            }
        }
        self.load_bytes(handle)
    }

    /// Decode an object strictly from its local cache file, without touching
    /// the backend. `None` when the file is absent or fails verification.
    pub fn load_cached_bytes(&self, handle: &ObjectHandle) -> Option<Vec<u8>> {
        let path = self.cache_path(handle)?;
        let raw = std::fs::read(&path).ok()?;
        self.decode(handle, &raw).ok()
    }

    /// Remove an object's local cache file, if present. Best-effort.
    pub fn remove_cached(&self, handle: &ObjectHandle) {
        if let Some(path) = self.cache_path(handle) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(object = %handle.id, "failed to remove cached object: {e}"),
            }
        }
    }

    /// Handles of every locally cached object of the given kind, derived
    /// from the cache file names. Files that do not name a valid content
    /// hash are ignored.
    pub fn cached_handles(&self, scope: &str, kind: ObjectKind) -> Vec<ObjectHandle> {
        let Some(root) = &self.cache_root else {
            return Vec::new();
        };
        let dir = root.join(kind_dir(kind));
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        entries
            .filter_map(|entry| {
                let name = entry.ok()?.file_name();
                let id = ObjectId::from_hex(name.to_str()?)?;
                Some(ObjectHandle {
                    scope: scope.to_string(),
                    kind,
                    id,
                })
            })
            .collect()
    }

    fn fetch_raw(&self, handle: &ObjectHandle) -> Result<Vec<u8>> {
        self.backend
            .get(&handle.storage_key())?
            .ok_or_else(|| SatchelError::ObjectNotFound(handle.storage_key()))
    }

    /// Verify the content address, open the envelope, decompress.
    fn decode(&self, handle: &ObjectHandle, raw: &[u8]) -> Result<Vec<u8>> {
        let actual = ObjectId::compute(raw);
        if actual != handle.id {
            return Err(SatchelError::HashMismatch {
                expected: handle.id.to_hex(),
                actual: actual.to_hex(),
            });
        }
        let compressed = open(raw, handle.kind, self.crypto.as_ref())?;
        decompress(&compressed)
    }

    fn cache_path(&self, handle: &ObjectHandle) -> Option<PathBuf> {
        self.cache_root
            .as_ref()
            .map(|root| root.join(kind_dir(handle.kind)).join(handle.id.to_hex()))
    }

    /// Mirror raw object bytes into the local cache. Best-effort; failures
    /// are logged, never propagated.
    pub(crate) fn cache_raw(&self, handle: &ObjectHandle, raw: &[u8]) {
        self.write_cache(handle, raw);
    }

    fn write_cache(&self, handle: &ObjectHandle, raw: &[u8]) {
        let Some(path) = self.cache_path(handle) else {
            return;
        };
        if let Err(e) = atomic_write(&path, raw) {
            warn!(object = %handle.id, "failed to write local object cache: {e}");
        }
    }
}

fn kind_dir(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Blob => "blobs",
        ObjectKind::Snapshot => "snapshots",
    }
}

fn atomic_write(path: &std::path::Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("cache path has no parent"))?;
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
