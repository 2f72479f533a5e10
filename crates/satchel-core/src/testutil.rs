use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::config::{ChunkerConfig, CompressionConfig, RetryConfig, SatchelConfig};
use crate::crypto::aes_gcm::Aes256GcmEngine;
use crate::crypto::key::MasterKey;
use crate::crypto::CryptoEngine;
use crate::error::Result;
use crate::manager::DeviceInfo;
use crate::storage::{Backend, FileInfo};

/// In-memory storage backend for testing. Thread-safe via Mutex.
pub struct MemoryBackend {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }

    /// Overwrite an object's bytes directly, bypassing the engine. Used to
    /// simulate on-backend corruption.
    pub fn corrupt(&self, key: &str, data: Vec<u8>) {
        self.data.lock().unwrap().insert(key.to_string(), data);
    }

    pub fn object_count(&self, prefix: &str) -> usize {
        self.data
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .count()
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self.data.lock().unwrap();
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut map = self.data.lock().unwrap();
        map.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.data.lock().unwrap();
        map.remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<FileInfo>> {
        let map = self.data.lock().unwrap();
        let infos = map
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| FileInfo {
                key: k.clone(),
                size: v.len() as u64,
            })
            .collect();
        Ok(infos)
    }

    fn rename_scope(&self, old_scope: &str, new_scope: &str) -> Result<()> {
        let mut map = self.data.lock().unwrap();
        let old_prefix = format!("{old_scope}/");
        let moved: Vec<(String, Vec<u8>)> = map
            .iter()
            .filter(|(k, _)| k.starts_with(&old_prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in moved {
            map.remove(&key);
            let new_key = format!("{new_scope}/{}", &key[old_prefix.len()..]);
            map.insert(new_key, value);
        }
        Ok(())
    }
}

/// Shared handle to inspect which keys were written via `put()`.
#[derive(Clone)]
pub struct PutLog(Arc<Mutex<Vec<String>>>);

impl PutLog {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    /// Return all keys that were written via `put()` since the last `clear()`.
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    fn record(&self, key: &str) {
        self.0.lock().unwrap().push(key.to_string());
    }
}

/// Storage wrapper that records which keys were passed to `put()`.
/// Delegates all operations to an inner `MemoryBackend`.
pub struct RecordingBackend {
    inner: MemoryBackend,
    log: PutLog,
}

impl RecordingBackend {
    pub fn new() -> (Self, PutLog) {
        let log = PutLog::new();
        (
            Self {
                inner: MemoryBackend::new(),
                log: log.clone(),
            },
            log,
        )
    }
}

impl Backend for RecordingBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.log.record(key);
        self.inner.put(key, data)
    }
    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }
    fn list(&self, prefix: &str) -> Result<Vec<FileInfo>> {
        self.inner.list(prefix)
    }
    fn rename_scope(&self, old_scope: &str, new_scope: &str) -> Result<()> {
        self.inner.rename_scope(old_scope, new_scope)
    }
}

/// Fixed-key AEAD engine for deterministic tests.
pub fn test_crypto() -> Arc<dyn CryptoEngine> {
    Arc::new(Aes256GcmEngine::new(&MasterKey::from_bytes([0xAA; 32])))
}

/// Small chunk sizes so modest payloads produce several chunks; zero retry
/// delay so failure tests run instantly.
pub fn test_config(cache_dir: &Path) -> SatchelConfig {
    SatchelConfig {
        chunker: ChunkerConfig {
            min_size: 256,
            avg_size: 1024,
            max_size: 4096,
            normalization: 1,
        },
        compression: CompressionConfig {
            algorithm: "lz4".into(),
            zstd_level: 3,
        },
        retry: RetryConfig {
            max_attempts: 3,
            delay_ms: 0,
        },
        cache_dir: Some(cache_dir.to_path_buf()),
    }
}

pub fn test_device() -> DeviceInfo {
    DeviceInfo {
        device_name: "Test Device".into(),
        user_name: "tester".into(),
        device_id: "0000aaaa".into(),
        os_version: 35,
        os_build_id: "TEST.250101.001".into(),
        is_device_transfer: false,
    }
}

/// Deterministic pseudo-random bytes; high-entropy so the chunker finds
/// natural boundaries.
pub fn patterned_data(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}
