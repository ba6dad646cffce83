//! Argon2id key derivation for passphrase → store key.

use {
    argon2::Argon2,
    base64::{Engine, engine::general_purpose::STANDARD},
    rand::{TryRngCore, rngs::OsRng},
    zeroize::Zeroizing,
};

use crate::error::VaultError;

/// Length of the random salt generated for a new store.
pub const SALT_LEN: usize = 16;

/// Argon2id cost parameters, persisted next to the salt so a store can be
/// reopened after the defaults change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub m_cost: u32,
    /// Number of iterations.
    pub t_cost: u32,
    /// Degree of parallelism.
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 65536, // 64 MiB
            t_cost: 3,
            p_cost: 1,
        }
    }
}

/// Derive a 256-bit key from a passphrase and salt using Argon2id.
pub fn derive_key(
    passphrase: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, VaultError> {
    let argon2_params = argon2::Params::new(params.m_cost, params.t_cost, params.p_cost, Some(32))
        .map_err(|e| VaultError::CipherError(format!("invalid KDF params: {e}")))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2_params,
    );

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase, salt, output.as_mut())
        .map_err(|e| VaultError::CipherError(format!("KDF failed: {e}")))?;

    Ok(output)
}

/// Generate a random salt, base64 encoded for storage.
pub fn generate_salt() -> Result<String, VaultError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|e| VaultError::CipherError(format!("salt generation failed: {e}")))?;
    Ok(STANDARD.encode(salt))
}

/// Decode a salt produced by [`generate_salt`].
pub fn decode_salt(b64: &str) -> Result<Vec<u8>, VaultError> {
    STANDARD.decode(b64).map_err(VaultError::Base64)
}
