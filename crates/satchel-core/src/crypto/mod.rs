pub mod aes_gcm;
pub mod chunk_id;
pub mod key;
pub mod object_id;

use crate::error::Result;

/// Trait for encrypting and decrypting repository objects.
pub trait CryptoEngine: Send + Sync {
    /// Encrypt plaintext. Returns `[12-byte nonce][ciphertext + 16-byte tag]`.
    /// `aad` is authenticated but not encrypted (the object envelope binds
    /// the format version and object kind through it).
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt data produced by `encrypt`.
    /// `aad` must match what was passed during encryption.
    fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>>;
}
