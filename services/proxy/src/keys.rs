//! The proxy's RSA identity for the login key exchange.

use rsa::pkcs8::{spki, EncodePublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use thiserror::Error;

/// Modulus size clients expect.
pub const KEY_BITS: usize = 1024;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to generate RSA key: {0}")]
    Generate(#[source] rsa::Error),

    #[error("failed to encode public key: {0}")]
    Encode(#[source] spki::Error),
}

/// RSA keypair plus the DER-encoded public key sent to clients.
///
/// Generated once at startup and shared read-only by every session.
pub struct ServerKey {
    private: RsaPrivateKey,
    public_der: Vec<u8>,
}

impl ServerKey {
    pub fn generate() -> Result<Self, KeyError> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, KEY_BITS).map_err(KeyError::Generate)?;
        Self::from_private(private)
    }

    pub fn from_private(private: RsaPrivateKey) -> Result<Self, KeyError> {
        let public_der = RsaPublicKey::from(&private)
            .to_public_key_der()
            .map_err(KeyError::Encode)?
            .into_vec();
        Ok(Self {
            private,
            public_der,
        })
    }

    /// X.509 SubjectPublicKeyInfo DER of the public key.
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_der
    }

    /// PKCS#1 v1.5 decryption.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, rsa::Error> {
        self.private.decrypt(Pkcs1v15Encrypt, ciphertext)
    }
}

impl std::fmt::Debug for ServerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerKey")
            .field("bits", &KEY_BITS)
            .finish_non_exhaustive()
    }
}

/// Compare verify tokens without short-circuiting on the first differing
/// byte. Length mismatch is a mismatch.
pub fn verify_token_matches(expected: &[u8], actual: &[u8]) -> bool {
    if expected.len() != actual.len() {
        return false;
    }
    expected
        .iter()
        .zip(actual)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
