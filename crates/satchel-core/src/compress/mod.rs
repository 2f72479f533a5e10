use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::config::CompressionConfig;
use crate::error::{Result, SatchelError};

const TAG_NONE: u8 = 0x00;
const TAG_LZ4: u8 = 0x01;
const TAG_ZSTD: u8 = 0x02;

/// Maximum decompressed output size (32 MiB = 4x max chunk size).
/// Prevents decompression bombs from consuming unbounded memory.
const MAX_DECOMPRESS_SIZE: u64 = 32 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Compression {
    None,
    Lz4,
    #[default]
    Zstd,
}

impl Compression {
    /// Parse from config, e.g. `algorithm: "zstd"`.
    pub fn from_config(config: &CompressionConfig) -> Result<Self> {
        match config.algorithm.as_str() {
            "none" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            "zstd" => Ok(Compression::Zstd),
            other => Err(SatchelError::Config(format!(
                "unknown compression algorithm: {other}"
            ))),
        }
    }
}

/// Compress data and prepend a 1-byte tag identifying the codec.
pub fn compress(compression: Compression, zstd_level: i32, data: &[u8]) -> Result<Vec<u8>> {
    match compression {
        Compression::None => {
            let mut out = Vec::with_capacity(1 + data.len());
            out.push(TAG_NONE);
            out.extend_from_slice(data);
            Ok(out)
        }
        Compression::Lz4 => {
            let compressed = lz4_flex::compress_prepend_size(data);
            let mut out = Vec::with_capacity(1 + compressed.len());
            out.push(TAG_LZ4);
            out.extend_from_slice(&compressed);
            Ok(out)
        }
        Compression::Zstd => {
            use std::cell::RefCell;
            thread_local! {
                static ZSTD_CX: RefCell<Option<(i32, zstd::bulk::Compressor<'static>)>> =
                    const { RefCell::new(None) };
            }

            ZSTD_CX.with(|cell| {
                let mut slot = cell.borrow_mut();

                // Lazily init or reinit if the compression level changed.
                if !matches!(slot.as_ref(), Some((l, _)) if *l == zstd_level) {
                    let cx = zstd::bulk::Compressor::new(zstd_level)
                        .map_err(|e| SatchelError::Other(format!("zstd init: {e}")))?;
                    *slot = Some((zstd_level, cx));
                }
                let (_, cx) = slot.as_mut().unwrap();

                let compressed = cx
                    .compress(data)
                    .map_err(|e| SatchelError::Other(format!("zstd compress: {e}")))?;
                let mut out = Vec::with_capacity(1 + compressed.len());
                out.push(TAG_ZSTD);
                out.extend_from_slice(&compressed);
                Ok(out)
            })
        }
    }
}

/// Decompress data by reading the 1-byte tag prefix and dispatching.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(SatchelError::Decompression("empty data".into()));
    }
    let tag = data[0];
    let payload = &data[1..];
    match tag {
        TAG_NONE => Ok(payload.to_vec()),
        TAG_LZ4 => {
            if payload.len() < 4 {
                return Err(SatchelError::Decompression("lz4: payload too short".into()));
            }
            let uncompressed_size = u32::from_le_bytes(payload[..4].try_into().unwrap()) as u64;
            if uncompressed_size > MAX_DECOMPRESS_SIZE {
                return Err(SatchelError::Decompression(format!(
                    "lz4: decompressed size ({uncompressed_size}) exceeds limit of {MAX_DECOMPRESS_SIZE} bytes"
                )));
            }
            lz4_flex::decompress_size_prepended(payload)
                .map_err(|e| SatchelError::Decompression(format!("lz4: {e}")))
        }
        TAG_ZSTD => {
            let mut decoder = zstd::stream::Decoder::new(std::io::Cursor::new(payload))
                .map_err(|e| SatchelError::Decompression(format!("zstd init: {e}")))?;
            let mut output = Vec::new();
            decoder
                .by_ref()
                .take(MAX_DECOMPRESS_SIZE + 1)
                .read_to_end(&mut output)
                .map_err(|e| SatchelError::Decompression(format!("zstd: {e}")))?;
            if output.len() as u64 > MAX_DECOMPRESS_SIZE {
                return Err(SatchelError::Decompression(format!(
                    "zstd: decompressed size exceeds limit of {MAX_DECOMPRESS_SIZE} bytes"
                )));
            }
            Ok(output)
        }
        _ => Err(SatchelError::UnknownCompressionTag(tag)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_codecs() {
        let payloads: &[&[u8]] = &[b"", b"short", b"a longer payload that should compress fine"];
        for codec in [Compression::None, Compression::Lz4, Compression::Zstd] {
            for payload in payloads {
                let encoded = compress(codec, 3, payload).unwrap();
                assert_eq!(decompress(&encoded).unwrap(), *payload);
            }
        }
    }

    #[test]
    fn decompress_rejects_lz4_bomb() {
        // Huge size prefix (1 GiB) with tiny compressed data.
        let mut data = vec![TAG_LZ4];
        data.extend_from_slice(&(1u32 << 30).to_le_bytes());
        data.extend_from_slice(&[0u8; 10]);
        assert!(decompress(&data).is_err());
    }

    #[test]
    fn decompress_rejects_short_lz4_payload() {
        assert!(decompress(&[TAG_LZ4, 0x00, 0x00]).is_err());
    }

    #[test]
    fn decompress_rejects_unknown_tag() {
        assert!(matches!(
            decompress(&[0x7F, 1, 2, 3]),
            Err(SatchelError::UnknownCompressionTag(0x7F))
        ));
    }

    #[test]
    fn from_config_rejects_unknown_algorithm() {
        let config = CompressionConfig {
            algorithm: "brotli".into(),
            zstd_level: 3,
        };
        assert!(Compression::from_config(&config).is_err());
    }
}
