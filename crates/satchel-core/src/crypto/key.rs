use zeroize::{Zeroize, ZeroizeOnDrop};

/// The repository master key material. Zeroed from memory on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    encryption_key: [u8; 32],
}

impl MasterKey {
    pub fn from_bytes(encryption_key: [u8; 32]) -> Self {
        Self { encryption_key }
    }

    /// Generate a fresh random key from the OS RNG.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut encryption_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut encryption_key);
        Self { encryption_key }
    }

    pub(crate) fn encryption_key(&self) -> &[u8; 32] {
        &self.encryption_key
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("MasterKey").finish_non_exhaustive()
    }
}
