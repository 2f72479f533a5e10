pub mod manager;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::blob::Blob;
use crate::crypto::chunk_id::ChunkId;
use crate::crypto::object_id::ObjectId;

/// Schema version written into new snapshots.
pub const SNAPSHOT_VERSION: u32 = 2;

/// An immutable record of one backup run: per-app metadata plus the
/// consolidated chunk-to-blob table needed to reassemble every stream.
/// Identified on the backend by the hash of its encrypted bytes; the `token`
/// (creation time in milliseconds) orders snapshots and doubles as a unique
/// id within a scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub token: u64,
    pub device_name: String,
    pub user_name: String,
    pub device_id: String,
    pub os_version: u32,
    pub os_build_id: String,
    pub is_device_transfer: bool,
    pub apps: BTreeMap<String, App>,
    #[serde(default)]
    pub icon_chunk_ids: Vec<ChunkId>,
    pub blobs: BTreeMap<ChunkId, Blob>,
}

impl Snapshot {
    /// All blob ids referenced by this snapshot's table.
    pub fn referenced_blob_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.blobs.values().map(|blob| blob.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupType {
    Kv,
    Full,
}

/// One named object within a snapshot. `chunk_ids` ordering defines the
/// byte-stream reassembly order and must round-trip exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub time: u64,
    pub backup_type: BackupType,
    pub display_name: String,
    pub is_system: bool,
    pub is_launchable_system: bool,
    pub chunk_ids: Vec<ChunkId>,
    #[serde(default)]
    pub apk: Option<Apk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Apk {
    /// Explicitly optional: an absent version code is distinguishable from
    /// version zero.
    #[serde(default)]
    pub version_code: Option<u64>,
    pub installer: String,
    pub signatures: Vec<Vec<u8>>,
    pub splits: Vec<Split>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Split {
    pub name: String,
    pub chunk_ids: Vec<ChunkId>,
}
