pub mod local_backend;

use crate::crypto::object_id::ObjectId;
use crate::error::Result;

/// The kinds of objects a repository stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectKind {
    Blob = 0,
    Snapshot = 1,
}

impl ObjectKind {
    /// Directory segment under the scope for this kind.
    fn dir(self) -> &'static str {
        match self {
            ObjectKind::Blob => "blobs",
            ObjectKind::Snapshot => "snapshots",
        }
    }
}

/// Addresses one object on the backend: a per-identity top-level scope, the
/// object kind, and the content hash of the stored bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    pub scope: String,
    pub kind: ObjectKind,
    pub id: ObjectId,
}

impl ObjectHandle {
    pub fn blob(scope: &str, id: ObjectId) -> Self {
        Self {
            scope: scope.to_string(),
            kind: ObjectKind::Blob,
            id,
        }
    }

    pub fn snapshot(scope: &str, id: ObjectId) -> Self {
        Self {
            scope: scope.to_string(),
            kind: ObjectKind::Snapshot,
            id,
        }
    }

    /// The `/`-separated storage key: `<scope>/<kind>/<hex-hash>`.
    pub fn storage_key(&self) -> String {
        format!("{}/{}/{}", self.scope, self.kind.dir(), self.id.to_hex())
    }

    /// Listing prefix for all objects of `kind` under `scope`.
    pub fn list_prefix(scope: &str, kind: ObjectKind) -> String {
        format!("{}/{}/", scope, kind.dir())
    }

    /// Parse a storage key back into a handle. Returns `None` for keys that
    /// do not follow the `<scope>/<kind>/<hex>` layout (foreign files on the
    /// backend are ignored, not errors).
    pub fn parse_key(key: &str) -> Option<Self> {
        let mut parts = key.rsplitn(3, '/');
        let hex = parts.next()?;
        let dir = parts.next()?;
        let scope = parts.next()?;
        let kind = match dir {
            "blobs" => ObjectKind::Blob,
            "snapshots" => ObjectKind::Snapshot,
            _ => return None,
        };
        let id = ObjectId::from_hex(hex)?;
        Some(Self {
            scope: scope.to_string(),
            kind,
            id,
        })
    }
}

/// One backend object as reported by [`Backend::list`].
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub key: String,
    pub size: u64,
}

/// Storage transport for repository objects.
///
/// This is the engine's only interface to the outside world: a flat
/// key/value store with listing. Implementations may be slow (network,
/// removable media); the engine treats every call as a blocking point and
/// performs no internal fan-out.
pub trait Backend: Send + Sync {
    /// Fetch a full object. `Ok(None)` when the key does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Durably store an object. Overwrites are allowed; content addressing
    /// makes them idempotent.
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Remove an object. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Enumerate all objects under a `/`-separated key prefix, with sizes.
    fn list(&self, prefix: &str) -> Result<Vec<FileInfo>>;

    /// Move every object from one top-level scope to another (device
    /// identity change). Not used by the engine itself.
    fn rename_scope(&self, old_scope: &str, new_scope: &str) -> Result<()>;
}
