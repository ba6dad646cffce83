//! Cipher trait for swappable authenticated encryption backends.

use crate::error::VaultError;

/// Authenticated encryption with associated data (AEAD).
///
/// Each implementation has a unique version tag which [`SealingKey`] writes as
/// the first byte of every blob, so a future cipher can be introduced without
/// a flag day for existing stores.
///
/// [`SealingKey`]: crate::SealingKey
pub trait Cipher: Send + Sync {
    /// Unique identifier for this cipher.
    fn version_tag(&self) -> u8;

    /// Encrypt `plaintext` with `key`, binding it to `aad`.
    ///
    /// The output layout is cipher-specific but must be accepted by
    /// [`decrypt`](Self::decrypt).
    fn encrypt(&self, key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, VaultError>;

    /// Decrypt a blob previously produced by [`encrypt`](Self::encrypt).
    fn decrypt(&self, key: &[u8; 32], ciphertext: &[u8], aad: &[u8])
    -> Result<Vec<u8>, VaultError>;
}
