//! Passphrase-derived sealing key for record payloads.

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    zeroize::Zeroizing,
};

use crate::{
    error::VaultError,
    kdf::{self, KdfParams},
    traits::Cipher,
    xchacha20::XChaCha20Poly1305Cipher,
};

/// Plaintext of the canary sealed when a store is first encrypted.
const KEY_CHECK_PLAINTEXT: &[u8] = b"courier-key-check-v1";
const KEY_CHECK_AAD: &str = "key-check";

/// A derived store key together with the cipher it seals with.
///
/// Blobs are base64 strings of `[version tag][cipher output]`. The key bytes
/// are zeroized on drop and never printed by `Debug`.
pub struct SealingKey<C: Cipher = XChaCha20Poly1305Cipher> {
    cipher: C,
    key: Zeroizing<[u8; 32]>,
}

impl SealingKey<XChaCha20Poly1305Cipher> {
    /// Derive a key from `passphrase` with the default cipher.
    pub fn derive(passphrase: &str, salt: &[u8], params: &KdfParams) -> Result<Self, VaultError> {
        Self::derive_with_cipher(XChaCha20Poly1305Cipher, passphrase, salt, params)
    }
}

impl<C: Cipher> SealingKey<C> {
    pub fn derive_with_cipher(
        cipher: C,
        passphrase: &str,
        salt: &[u8],
        params: &KdfParams,
    ) -> Result<Self, VaultError> {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            m_cost = params.m_cost,
            t_cost = params.t_cost,
            p_cost = params.p_cost,
            "deriving store key"
        );
        let key = kdf::derive_key(passphrase.as_bytes(), salt, params)?;
        Ok(Self { cipher, key })
    }

    /// Encrypt `plaintext` bound to `aad` and return a versioned base64 blob.
    pub fn seal(&self, plaintext: &[u8], aad: &str) -> Result<String, VaultError> {
        let encrypted = self.cipher.encrypt(&self.key, plaintext, aad.as_bytes())?;

        let mut blob = Vec::with_capacity(1 + encrypted.len());
        blob.push(self.cipher.version_tag());
        blob.extend_from_slice(&encrypted);
        Ok(STANDARD.encode(blob))
    }

    /// Decrypt a blob produced by [`seal`](Self::seal) with the same `aad`.
    pub fn open(&self, blob: &str, aad: &str) -> Result<Vec<u8>, VaultError> {
        let raw = STANDARD.decode(blob)?;
        let Some((&version, body)) = raw.split_first() else {
            return Err(VaultError::CipherError("empty blob".to_string()));
        };
        if version != self.cipher.version_tag() {
            return Err(VaultError::UnsupportedVersion(version));
        }
        self.cipher.decrypt(&self.key, body, aad.as_bytes())
    }

    /// Seal the canary used to recognise this key on a later open.
    pub fn key_check(&self) -> Result<String, VaultError> {
        self.seal(KEY_CHECK_PLAINTEXT, KEY_CHECK_AAD)
    }

    /// Confirm that `check` was produced by [`key_check`](Self::key_check)
    /// under the same passphrase and salt.
    pub fn verify_key_check(&self, check: &str) -> Result<(), VaultError> {
        match self.open(check, KEY_CHECK_AAD) {
            Ok(plain) if plain == KEY_CHECK_PLAINTEXT => Ok(()),
            Ok(_) | Err(VaultError::CipherError(_)) => Err(VaultError::BadCredential),
            Err(e) => Err(e),
        }
    }
}

impl<C: Cipher> std::fmt::Debug for SealingKey<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealingKey")
            .field("version_tag", &self.cipher.version_tag())
            .field("key", &"[REDACTED]")
            .finish()
    }
}
