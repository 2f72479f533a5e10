use thiserror::Error;

pub type Result<T> = std::result::Result<T, SatchelError>;

#[derive(Debug, Error)]
pub enum SatchelError {
    #[error("object not found on backend: '{0}'")]
    ObjectNotFound(String),

    #[error("content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("unsupported object format version: {0}")]
    UnsupportedVersion(u8),

    #[error("decryption failed: wrong key or corrupted data")]
    DecryptionFailed,

    #[error("invalid object format: {0}")]
    InvalidFormat(String),

    #[error("unknown compression tag: {0}")]
    UnknownCompressionTag(u8),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl SatchelError {
    /// Whether this error means the object itself is bad (corrupt, foreign,
    /// or from an unsupported format) rather than the attempt to reach it.
    ///
    /// Integrity failures are never retried: a corrupt immutable object will
    /// not self-heal. Everything else is treated as potentially transient.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            SatchelError::HashMismatch { .. }
                | SatchelError::UnsupportedVersion(_)
                | SatchelError::DecryptionFailed
                | SatchelError::InvalidFormat(_)
                | SatchelError::UnknownCompressionTag(_)
                | SatchelError::Decompression(_)
                | SatchelError::Deserialization(_)
        )
    }
}
