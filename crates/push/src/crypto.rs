//! Per-channel key generation.

use {
    p256::{
        SecretKey,
        elliptic_curve::{
            rand_core::{OsRng, RngCore},
            sec1::ToEncodedPoint,
        },
    },
    zeroize::Zeroizing,
};

use crate::{
    Error, Result,
    types::{AUTH_SECRET_LEN, ChannelKeys, KeyPair, PRIVATE_KEY_LEN},
};

/// Source of channel key material.
pub trait CryptoProvider: Send + Sync {
    /// Generate a fresh auth secret and P-256 key pair.
    ///
    /// Must fail rather than return weak material.
    fn generate_channel_keys(&self) -> Result<ChannelKeys>;
}

/// Scalars drawn from the OS RNG are out of range with negligible
/// probability; retry a few times before giving up.
const MAX_SCALAR_ATTEMPTS: usize = 8;

/// Default provider backed by the `p256` crate and the OS CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct P256Provider;

impl CryptoProvider for P256Provider {
    fn generate_channel_keys(&self) -> Result<ChannelKeys> {
        let mut auth_secret = vec![0u8; AUTH_SECRET_LEN];
        OsRng
            .try_fill_bytes(&mut auth_secret)
            .map_err(|e| Error::crypto(format!("random source unavailable: {e}")))?;

        let secret = random_secret_key()?;
        let public = secret.public_key().to_encoded_point(false);
        let key_pair = KeyPair::new(secret.to_bytes().to_vec(), public.as_bytes().to_vec())?;

        Ok(ChannelKeys {
            auth_secret,
            key_pair,
        })
    }
}

fn random_secret_key() -> Result<SecretKey> {
    let mut scalar = Zeroizing::new([0u8; PRIVATE_KEY_LEN]);
    for _ in 0..MAX_SCALAR_ATTEMPTS {
        OsRng
            .try_fill_bytes(&mut *scalar)
            .map_err(|e| Error::crypto(format!("random source unavailable: {e}")))?;
        if let Ok(key) = SecretKey::from_slice(&*scalar) {
            return Ok(key);
        }
    }
    Err(Error::crypto("could not draw a valid P-256 scalar"))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::ErrorKind, p256::PublicKey};

    #[test]
    fn generates_well_formed_keys() {
        let keys = P256Provider.generate_channel_keys().unwrap();
        assert_eq!(keys.auth_secret.len(), AUTH_SECRET_LEN);
        assert_eq!(keys.key_pair.private_key().len(), PRIVATE_KEY_LEN);

        let public = PublicKey::from_sec1_bytes(keys.key_pair.public_key()).unwrap();
        let secret = SecretKey::from_slice(keys.key_pair.private_key()).unwrap();
        assert_eq!(secret.public_key(), public);
    }

    #[test]
    fn every_call_draws_fresh_material() {
        let a = P256Provider.generate_channel_keys().unwrap();
        let b = P256Provider.generate_channel_keys().unwrap();
        assert_ne!(a.auth_secret, b.auth_secret);
        assert_ne!(a.key_pair, b.key_pair);
    }

    struct Broken;

    impl CryptoProvider for Broken {
        fn generate_channel_keys(&self) -> Result<ChannelKeys> {
            Err(Error::crypto("no entropy"))
        }
    }

    #[test]
    fn provider_failures_are_crypto_errors() {
        let provider: &dyn CryptoProvider = &Broken;
        assert_eq!(
            provider.generate_channel_keys().unwrap_err().kind(),
            ErrorKind::OpenSslError
        );
    }
}
