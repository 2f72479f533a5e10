pub mod cache;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::chunker::Chunk;
use crate::compress::{compress, Compression};
use crate::config::SatchelConfig;
use crate::crypto::object_id::ObjectId;
use crate::crypto::CryptoEngine;
use crate::error::Result;
use crate::repo::format::seal;
use crate::storage::{Backend, ObjectHandle, ObjectKind};

/// The persisted record for one stored chunk: the content address of the
/// encrypted bytes, the stored size, and the original plaintext size.
/// Immutable once written; deleted only by the pruner when unreferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub id: ObjectId,
    pub length: u32,
    pub uncompressed_length: u32,
}

impl Blob {
    pub fn handle(&self, scope: &str) -> ObjectHandle {
        ObjectHandle::blob(scope, self.id)
    }
}

/// Compresses, pads, encrypts, content-addresses and uploads one chunk.
///
/// Reusable across any number of calls. Plaintext scratch (the compressed
/// payload and the padded AEAD input) lives in [`Zeroizing`] buffers, so it
/// is wiped on every exit path, success or failure.
pub struct BlobCreator {
    backend: Arc<dyn Backend>,
    crypto: Arc<dyn CryptoEngine>,
    scope: String,
    compression: Compression,
    zstd_level: i32,
}

impl BlobCreator {
    pub fn new(
        backend: Arc<dyn Backend>,
        crypto: Arc<dyn CryptoEngine>,
        scope: &str,
        config: &SatchelConfig,
    ) -> Result<Self> {
        Ok(Self {
            backend,
            crypto,
            scope: scope.to_string(),
            compression: Compression::from_config(&config.compression)?,
            zstd_level: config.compression.zstd_level,
        })
    }

    /// Store one chunk as a blob and return its record.
    ///
    /// The storage key is the SHA-256 of the complete sealed byte sequence,
    /// so re-uploading identical ciphertext is idempotent. A backend failure
    /// aborts the enclosing ingestion call; it is not retried here.
    pub fn create_blob(&mut self, chunk: &Chunk) -> Result<Blob> {
        let compressed = Zeroizing::new(compress(self.compression, self.zstd_level, &chunk.data)?);
        let sealed = seal(ObjectKind::Blob, &compressed, self.crypto.as_ref())?;

        let id = ObjectId::compute(&sealed);
        let handle = ObjectHandle::blob(&self.scope, id);
        self.backend.put(&handle.storage_key(), &sealed)?;

        Ok(Blob {
            id,
            length: sealed.len() as u32,
            uncompressed_length: chunk.length,
        })
    }
}
