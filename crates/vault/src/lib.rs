//! At-rest encryption for push channel stores.
//!
//! A passphrase is stretched into a 256-bit key with Argon2id and records are
//! sealed with XChaCha20-Poly1305. Every sealed blob starts with the cipher's
//! version tag so stores written today stay readable after a cipher change.

pub mod error;
pub mod kdf;
pub mod sealed;
pub mod traits;
pub mod xchacha20;

pub use {
    error::VaultError,
    kdf::KdfParams,
    sealed::SealingKey,
    traits::Cipher,
    xchacha20::XChaCha20Poly1305Cipher,
};
