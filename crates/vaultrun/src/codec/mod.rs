//! At-rest encryption for dataset files
//!
//! Datasets are sealed with AES-256-GCM using the owner's key material: the
//! 16-byte salt acts as the IV and the 32-byte secure token as the key. The
//! on-disk layout is the 16-byte authentication tag followed by the
//! ciphertext.

use std::fmt;
use std::path::{Path, PathBuf};

use aes_gcm::aead::consts::U16;
use aes_gcm::aes::Aes256;
use aes_gcm::{AeadInPlace, AesGcm, KeyInit, Nonce, Tag};
use thiserror::Error;
use tracing::{debug, instrument};

pub use crate::codec::working_copy::WorkingCopy;
use crate::types::RunId;

mod working_copy;

/// Length of the IV taken from the owner's salt
pub const IV_LEN: usize = 16;
/// Length of the key taken from the owner's secure token
pub const KEY_LEN: usize = 32;
/// Length of the authentication tag stored in front of the ciphertext
pub const TAG_LEN: usize = 16;

type DatasetCipher = AesGcm<Aes256, U16>;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("encrypted blob is {len} bytes, shorter than the {TAG_LEN}-byte tag")]
    Truncated { len: usize },

    #[error("authentication tag did not verify")]
    AuthenticationFailed,

    #[error("encryption failed")]
    Encrypt,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CodecError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        CodecError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A dataset owner's IV and symmetric key
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    iv: [u8; IV_LEN],
    key: [u8; KEY_LEN],
}

impl KeyMaterial {
    pub fn new(iv: [u8; IV_LEN], key: [u8; KEY_LEN]) -> Self {
        Self { iv, key }
    }

    /// Parse the hex-encoded salt and secure token stored for a user
    pub fn from_hex(salt: &str, secure_token: &str) -> Result<Self, CodecError> {
        let iv = decode_fixed::<IV_LEN>("salt", salt)?;
        let key = decode_fixed::<KEY_LEN>("secure token", secure_token)?;
        Ok(Self { iv, key })
    }

    /// Fresh random material for a new user
    pub fn generate() -> Self {
        Self {
            iv: rand::random(),
            key: rand::random(),
        }
    }

    /// Hex-encoded (salt, secure token) pair
    pub fn to_hex(&self) -> (String, String) {
        (hex::encode(self.iv), hex::encode(self.key))
    }

    fn cipher(&self) -> Result<DatasetCipher, CodecError> {
        DatasetCipher::new_from_slice(&self.key)
            .map_err(|e| CodecError::InvalidKeyMaterial(e.to_string()))
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("iv", &"<redacted>")
            .field("key", &"<redacted>")
            .finish()
    }
}

fn decode_fixed<const N: usize>(field: &str, value: &str) -> Result<[u8; N], CodecError> {
    let bytes = hex::decode(value.trim())
        .map_err(|e| CodecError::InvalidKeyMaterial(format!("{field} is not hex: {e}")))?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| {
        CodecError::InvalidKeyMaterial(format!(
            "{field} must be {N} bytes, got {}",
            bytes.len()
        ))
    })
}

/// Encrypt bytes, returning `tag || ciphertext`
pub fn encrypt(plaintext: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, CodecError> {
    let cipher = key.cipher()?;
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(&key.iv), b"", &mut buffer)
        .map_err(|_| CodecError::Encrypt)?;

    let mut blob = Vec::with_capacity(TAG_LEN + buffer.len());
    blob.extend_from_slice(&tag);
    blob.extend_from_slice(&buffer);
    Ok(blob)
}

/// Verify and decrypt a `tag || ciphertext` blob
pub fn decrypt(blob: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, CodecError> {
    if blob.len() < TAG_LEN {
        return Err(CodecError::Truncated { len: blob.len() });
    }
    let (tag, ciphertext) = blob.split_at(TAG_LEN);

    let cipher = key.cipher()?;
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(&key.iv),
            b"",
            &mut buffer,
            Tag::from_slice(tag),
        )
        .map_err(|_| CodecError::AuthenticationFailed)?;
    Ok(buffer)
}

/// Encrypt a plaintext file into a ciphertext file. Both paths may be the same.
#[instrument(skip(key))]
pub async fn encrypt_file(
    plain_path: &Path,
    cipher_path: &Path,
    key: &KeyMaterial,
) -> Result<(), CodecError> {
    let plaintext = tokio::fs::read(plain_path)
        .await
        .map_err(|e| CodecError::io(plain_path, e))?;
    let blob = encrypt(&plaintext, key)?;
    tokio::fs::write(cipher_path, &blob)
        .await
        .map_err(|e| CodecError::io(cipher_path, e))?;
    debug!(len = plaintext.len(), "encrypted dataset file");
    Ok(())
}

/// Decrypt a ciphertext file into a plaintext file
#[instrument(skip(key))]
pub async fn decrypt_file(
    cipher_path: &Path,
    plain_path: &Path,
    key: &KeyMaterial,
) -> Result<(), CodecError> {
    let plaintext = read_and_decrypt(cipher_path, key).await?;
    tokio::fs::write(plain_path, &plaintext)
        .await
        .map_err(|e| CodecError::io(plain_path, e))?;
    debug!(len = plaintext.len(), "decrypted dataset file");
    Ok(())
}

/// Decrypt a dataset into a working copy private to one run.
///
/// The copy is named after the ciphertext file, the run id, and a random
/// suffix, so concurrent runs against the same dataset never share a file.
#[instrument(skip(key))]
pub async fn decrypt_to_working_copy(
    cipher_path: &Path,
    work_dir: &Path,
    run_id: RunId,
    key: &KeyMaterial,
) -> Result<WorkingCopy, CodecError> {
    let plaintext = read_and_decrypt(cipher_path, key).await?;

    let stem = cipher_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string());
    let path = work_dir.join(format!("{stem}.{run_id}.{}.dec", uuid::Uuid::new_v4().simple()));

    WorkingCopy::create(path, &plaintext).await
}

async fn read_and_decrypt(cipher_path: &Path, key: &KeyMaterial) -> Result<Vec<u8>, CodecError> {
    let blob = tokio::fs::read(cipher_path)
        .await
        .map_err(|e| CodecError::io(cipher_path, e))?;
    decrypt(&blob, key)
}
