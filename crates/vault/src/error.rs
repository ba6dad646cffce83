//! Vault error types.

/// Errors produced while deriving keys or sealing and opening blobs.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The passphrase does not match the one the data was sealed with.
    #[error("incorrect encryption key")]
    BadCredential,

    /// Encryption or decryption failed (tampered data, wrong key).
    #[error("cipher error: {0}")]
    CipherError(String),

    /// The blob was written by a cipher this build does not know.
    #[error("unsupported cipher version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// Base64 decoding failed.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}
