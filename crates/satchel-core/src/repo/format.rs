use rand::RngCore;
use zeroize::Zeroizing;

use crate::crypto::CryptoEngine;
use crate::error::{Result, SatchelError};
use crate::padding::pad_to;
use crate::storage::ObjectKind;

/// Current on-disk object format version.
pub const FORMAT_VERSION: u8 = 2;

/// Versions at or below this predate authenticated encryption and are
/// rejected as insecure, never parsed.
const LEGACY_MAX_VERSION: u8 = 1;

/// Domain-separation marker bound into the AEAD associated data.
const OBJECT_AAD_PREFIX: &[u8] = b"satchel:object\0";

/// Associated data for one object: domain prefix + format version + kind tag.
/// Binding both means a ciphertext cannot be replayed as another version or
/// another object kind.
fn object_aad(version: u8, kind: ObjectKind) -> Vec<u8> {
    let mut aad = Vec::with_capacity(OBJECT_AAD_PREFIX.len() + 2);
    aad.extend_from_slice(OBJECT_AAD_PREFIX);
    aad.push(version);
    aad.push(kind as u8);
    aad
}

/// Seal a compressed payload into a stored object:
/// `[version byte][AEAD([u32 BE payload len][payload][random padding])]`.
///
/// Blobs are padded with random bytes up to the Padmé boundary of the payload
/// length, hiding the exact compressed size. Snapshots are stored unpadded
/// (their size leakage is accepted as low-value) but carry the same length
/// prefix so one `open` path serves both kinds.
pub fn seal(kind: ObjectKind, payload: &[u8], crypto: &dyn CryptoEngine) -> Result<Vec<u8>> {
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| SatchelError::InvalidFormat("payload exceeds u32 length".into()))?;

    let padded_len = match kind {
        ObjectKind::Blob => pad_to(payload_len) as usize,
        ObjectKind::Snapshot => payload.len(),
    };

    let mut plaintext = Zeroizing::new(Vec::with_capacity(4 + padded_len));
    plaintext.extend_from_slice(&payload_len.to_be_bytes());
    plaintext.extend_from_slice(payload);

    let fill = padded_len - payload.len();
    if fill > 0 {
        // Random fill, never zeros: zero padding would hand a future
        // decryption oracle a distinguishable plaintext tail.
        let start = plaintext.len();
        plaintext.resize(start + fill, 0);
        rand::thread_rng().fill_bytes(&mut plaintext[start..]);
    }

    let encrypted = crypto.encrypt(&plaintext, &object_aad(FORMAT_VERSION, kind))?;

    let mut out = Vec::with_capacity(1 + encrypted.len());
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&encrypted);
    Ok(out)
}

/// Open a stored object sealed by [`seal`], returning the compressed payload
/// with the padding envelope stripped.
///
/// Rejects legacy (`<= 1`) and future-unknown (`> FORMAT_VERSION`) versions
/// before touching the ciphertext.
pub fn open(data: &[u8], kind: ObjectKind, crypto: &dyn CryptoEngine) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(SatchelError::InvalidFormat("empty object".into()));
    }
    let version = data[0];
    if version <= LEGACY_MAX_VERSION || version > FORMAT_VERSION {
        return Err(SatchelError::UnsupportedVersion(version));
    }

    let plaintext = crypto.decrypt(&data[1..], &object_aad(version, kind))?;
    if plaintext.len() < 4 {
        return Err(SatchelError::InvalidFormat(
            "object plaintext shorter than length prefix".into(),
        ));
    }
    let payload_len = u32::from_be_bytes(plaintext[..4].try_into().unwrap()) as usize;
    if payload_len > plaintext.len() - 4 {
        return Err(SatchelError::InvalidFormat(format!(
            "object length prefix {} exceeds plaintext size {}",
            payload_len,
            plaintext.len() - 4
        )));
    }
    Ok(plaintext[4..4 + payload_len].to_vec())
}
