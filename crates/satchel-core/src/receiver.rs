use std::collections::HashMap;
use std::io::Read;

use crate::blob::cache::BlobCache;
use crate::blob::{Blob, BlobCreator};
use crate::chunker::{Chunk, Chunker};
use crate::config::ChunkerConfig;
use crate::crypto::chunk_id::ChunkId;
use crate::error::Result;

/// Read granularity for [`BackupReceiver::read_from_stream`].
const STREAM_BUF_SIZE: usize = 64 * 1024;

/// Result of one ingestion session: the ordered chunk list for the stream
/// and the blob record for every chunk in it, hits and new uploads alike.
#[derive(Debug, Default)]
pub struct BackupData {
    pub chunk_ids: Vec<ChunkId>,
    pub blobs: HashMap<ChunkId, Blob>,
}

/// Ingestion front door for one logical object at a time.
///
/// The first call after construction or [`finalize`](Self::finalize) binds
/// the caller-supplied owner token; every later call in the sequence must
/// present the same token. A mismatch is a programming-contract violation
/// (two logical objects interleaving on one receiver) and panics — it is
/// deliberately not an I/O error.
///
/// One instance is reused across objects within a run; the chunker and
/// compression buffers are mutable and reused to bound memory, which is why
/// ingestion is serialized through a single receiver.
pub struct BackupReceiver {
    chunker: Chunker,
    creator: BlobCreator,
    owner: Option<String>,
    chunk_ids: Vec<ChunkId>,
    blobs: HashMap<ChunkId, Blob>,
}

impl BackupReceiver {
    pub fn new(creator: BlobCreator, chunker_config: &ChunkerConfig) -> Self {
        Self {
            chunker: Chunker::new(chunker_config),
            creator,
            owner: None,
            chunk_ids: Vec::new(),
            blobs: HashMap::new(),
        }
    }

    /// Feed bytes into the current session. Every chunk the chunker emits is
    /// resolved through the cache: a hit reuses the existing blob, a miss
    /// uploads a new one and registers it.
    pub fn add_bytes(&mut self, owner: &str, data: &[u8], cache: &mut BlobCache) -> Result<()> {
        self.assert_owner(owner);
        let Self {
            chunker,
            creator,
            chunk_ids,
            blobs,
            ..
        } = self;
        chunker.push(data, &mut |chunk| {
            process_chunk(chunk, cache, creator, chunk_ids, blobs)
        })
    }

    /// Read a stream to completion and finalize. Finalization runs even when
    /// the read fails part-way, so the receiver is always reset afterwards;
    /// the read error wins over the finalize result.
    pub fn read_from_stream(
        &mut self,
        owner: &str,
        reader: &mut dyn Read,
        cache: &mut BlobCache,
    ) -> Result<BackupData> {
        self.assert_owner(owner);
        let mut buf = [0u8; STREAM_BUF_SIZE];
        let read_result: Result<()> = loop {
            match reader.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    if let Err(e) = self.add_bytes(owner, &buf[..n], cache) {
                        break Err(e);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e.into()),
            }
        };

        let finalized = self.finalize(owner, cache);
        match read_result {
            Ok(()) => finalized,
            Err(e) => Err(e),
        }
    }

    /// Flush the trailing partial chunk, return the session's accumulated
    /// data, and reset the receiver for the next owner. Internal state is
    /// cleared before any blob-creation error propagates, so the instance
    /// stays reusable.
    pub fn finalize(&mut self, owner: &str, cache: &mut BlobCache) -> Result<BackupData> {
        self.assert_owner(owner);
        let result = {
            let Self {
                chunker,
                creator,
                chunk_ids,
                blobs,
                ..
            } = self;
            chunker.finalize(&mut |chunk| {
                process_chunk(chunk, cache, creator, chunk_ids, blobs)
            })
        };

        let data = BackupData {
            chunk_ids: std::mem::take(&mut self.chunk_ids),
            blobs: std::mem::take(&mut self.blobs),
        };
        self.owner = None;
        self.chunker.reset();

        result.map(|()| data)
    }

    fn assert_owner(&mut self, owner: &str) {
        match &self.owner {
            None => self.owner = Some(owner.to_string()),
            Some(bound) => {
                if bound != owner {
                    panic!("backup receiver is owned by '{bound}' but was called by '{owner}'");
                }
            }
        }
    }
}

fn process_chunk(
    chunk: Chunk,
    cache: &mut BlobCache,
    creator: &mut BlobCreator,
    chunk_ids: &mut Vec<ChunkId>,
    blobs: &mut HashMap<ChunkId, Blob>,
) -> Result<()> {
    chunk_ids.push(chunk.id);
    if blobs.contains_key(&chunk.id) {
        // Repeated within this session; already resolved.
        return Ok(());
    }
    if let Some(blob) = cache.get(&chunk.id) {
        blobs.insert(chunk.id, *blob);
        return Ok(());
    }
    let blob = creator.create_blob(&chunk)?;
    cache.register_new(chunk.id, blob);
    blobs.insert(chunk.id, blob);
    Ok(())
}
