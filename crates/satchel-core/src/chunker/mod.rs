use fastcdc::v2020::{FastCDC, Normalization};
use tracing::warn;

use crate::config::ChunkerConfig;
use crate::crypto::chunk_id::ChunkId;
use crate::error::Result;

/// A content-defined slice of a byte stream. Transient: produced by the
/// [`Chunker`], consumed immediately by the backup receiver, never persisted.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: ChunkId,
    pub data: Vec<u8>,
    pub length: u32,
}

impl Chunk {
    fn new(data: Vec<u8>) -> Self {
        let id = ChunkId::compute(&data);
        let length = data.len() as u32;
        Self { id, data, length }
    }
}

/// Incremental content-defined chunker.
///
/// Boundaries come from the FastCDC gear-table rolling hash, parameterized
/// by `min_size`/`avg_size`/`max_size` and a normalization level that
/// tightens the size distribution. Chunk identity (SHA-256 of the plaintext)
/// is independent of the boundary hash.
///
/// Feed bytes with [`push`](Self::push) in arbitrary increments; complete
/// chunks are emitted as soon as their boundary is fully determined. Call
/// [`finalize`](Self::finalize) at stream end to flush the trailing,
/// possibly undersized, chunk. The same input bytes with the same parameters
/// always produce the same `(id, length)` sequence, regardless of how the
/// input was sliced across `push` calls.
pub struct Chunker {
    config: ChunkerConfig,
    buf: Vec<u8>,
}

impl Chunker {
    pub fn new(config: &ChunkerConfig) -> Self {
        if config.normalization > 3 {
            warn!(
                normalization = config.normalization,
                "unknown normalization level, using 1"
            );
        }
        Self {
            config: config.clone(),
            buf: Vec::new(),
        }
    }

    /// Append bytes and emit every chunk whose boundary is already fixed.
    ///
    /// A boundary decision only depends on the bytes from the current chunk
    /// start up to `max_size`, so any cut found while at least `max_size`
    /// bytes are buffered is final.
    pub fn push(&mut self, data: &[u8], emit: &mut dyn FnMut(Chunk) -> Result<()>) -> Result<()> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= self.config.max_size as usize {
            let cut = self.first_cut();
            self.emit_prefix(cut, emit)?;
        }
        Ok(())
    }

    /// Flush all remaining buffered bytes as final chunks. The last chunk may
    /// be smaller than `min_size`. An empty stream emits nothing.
    pub fn finalize(&mut self, emit: &mut dyn FnMut(Chunk) -> Result<()>) -> Result<()> {
        while !self.buf.is_empty() {
            let cut = self.first_cut();
            self.emit_prefix(cut, emit)?;
        }
        Ok(())
    }

    /// Drop all buffered state so the instance can chunk a new stream.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.buf.shrink_to_fit();
    }

    fn level(&self) -> Normalization {
        match self.config.normalization {
            0 => Normalization::Level0,
            2 => Normalization::Level2,
            3 => Normalization::Level3,
            _ => Normalization::Level1,
        }
    }

    /// Length of the first chunk the gear hash cuts from the buffer.
    fn first_cut(&self) -> usize {
        FastCDC::with_level(
            &self.buf,
            self.config.min_size,
            self.config.avg_size,
            self.config.max_size,
            self.level(),
        )
        .next()
        .map(|chunk| chunk.length)
        .unwrap_or(self.buf.len())
    }

    fn emit_prefix(
        &mut self,
        cut: usize,
        emit: &mut dyn FnMut(Chunk) -> Result<()>,
    ) -> Result<()> {
        let data: Vec<u8> = self.buf.drain(..cut).collect();
        emit(Chunk::new(data))
    }
}
