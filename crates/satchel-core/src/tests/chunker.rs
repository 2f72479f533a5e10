use crate::chunker::{Chunk, Chunker};
use crate::config::ChunkerConfig;
use crate::crypto::chunk_id::ChunkId;
use crate::error::Result;
use crate::testutil::patterned_data;

fn test_config() -> ChunkerConfig {
    ChunkerConfig {
        min_size: 256,
        avg_size: 1024,
        max_size: 4096,
        normalization: 1,
    }
}

/// Chunk `data` feeding the chunker `step` bytes at a time.
fn chunk_with_step(data: &[u8], step: usize, config: &ChunkerConfig) -> Vec<(ChunkId, u32)> {
    let mut chunker = Chunker::new(config);
    let mut out: Vec<(ChunkId, u32)> = Vec::new();
    let mut collect = |chunk: Chunk| -> Result<()> {
        out.push((chunk.id, chunk.length));
        Ok(())
    };
    for piece in data.chunks(step.max(1)) {
        chunker.push(piece, &mut collect).unwrap();
    }
    chunker.finalize(&mut collect).unwrap();
    out
}

#[test]
fn chunks_cover_entire_input() {
    let data = patterned_data(50_000, 7);
    let config = test_config();

    let mut chunker = Chunker::new(&config);
    let mut reassembled = Vec::new();
    let mut collect = |chunk: Chunk| -> Result<()> {
        assert_eq!(chunk.length as usize, chunk.data.len());
        reassembled.extend_from_slice(&chunk.data);
        Ok(())
    };
    chunker.push(&data, &mut collect).unwrap();
    chunker.finalize(&mut collect).unwrap();

    assert_eq!(reassembled, data, "chunks must cover the input exactly");
}

#[test]
fn deterministic_across_push_granularity() {
    let data = patterned_data(100_000, 42);
    let config = test_config();

    let whole = chunk_with_step(&data, data.len(), &config);
    for step in [1usize, 7, 100, 1024, 5000] {
        let pieced = chunk_with_step(&data, step, &config);
        assert_eq!(
            pieced, whole,
            "chunk sequence changed when pushing {step} bytes at a time"
        );
    }
}

#[test]
fn deterministic_across_runs() {
    let data = patterned_data(64_000, 99);
    let config = test_config();
    assert_eq!(
        chunk_with_step(&data, 4096, &config),
        chunk_with_step(&data, 4096, &config)
    );
}

#[test]
fn respects_max_size() {
    let data = patterned_data(80_000, 3);
    let config = test_config();
    for (_, length) in chunk_with_step(&data, 8192, &config) {
        assert!(
            length <= config.max_size,
            "chunk size {length} exceeds max_size {}",
            config.max_size
        );
    }
}

#[test]
fn only_trailing_chunk_may_be_undersized() {
    let data = patterned_data(33_333, 13);
    let config = test_config();
    let chunks = chunk_with_step(&data, 4096, &config);
    assert!(chunks.len() > 1);

    let total: u64 = chunks.iter().map(|(_, len)| *len as u64).sum();
    assert_eq!(total as usize, data.len());
    for (_, length) in &chunks[..chunks.len() - 1] {
        assert!(
            *length >= config.min_size,
            "non-final chunk of {length} bytes is below min_size"
        );
    }
}

#[test]
fn empty_stream_emits_no_chunks() {
    let config = test_config();
    let chunks = chunk_with_step(&[], 1, &config);
    assert!(chunks.is_empty());
}

#[test]
fn chunk_ids_are_content_hashes() {
    let data = patterned_data(20_000, 5);
    let config = test_config();

    let mut chunker = Chunker::new(&config);
    let mut ok = true;
    let mut check = |chunk: Chunk| -> Result<()> {
        ok &= chunk.id == ChunkId::compute(&chunk.data);
        Ok(())
    };
    chunker.push(&data, &mut check).unwrap();
    chunker.finalize(&mut check).unwrap();
    assert!(ok, "every chunk id must be the SHA-256 of its plaintext");
}

#[test]
fn reset_allows_reuse_for_new_stream() {
    let config = test_config();
    let data = patterned_data(30_000, 11);

    let fresh = chunk_with_step(&data, data.len(), &config);

    let mut chunker = Chunker::new(&config);
    let mut sink = |_: Chunk| -> Result<()> { Ok(()) };
    chunker.push(&patterned_data(500, 1), &mut sink).unwrap();
    chunker.reset();

    let mut reused: Vec<(ChunkId, u32)> = Vec::new();
    let mut collect = |chunk: Chunk| -> Result<()> {
        reused.push((chunk.id, chunk.length));
        Ok(())
    };
    chunker.push(&data, &mut collect).unwrap();
    chunker.finalize(&mut collect).unwrap();

    assert_eq!(reused, fresh, "reset must clear all chunker state");
}
