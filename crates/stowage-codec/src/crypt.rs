//! AES-256-GCM encryption with a password-derived key.
//!
//! Layout of an encoded payload: `salt (16) | nonce (12) | ciphertext+tag`.
//! The key is HKDF-SHA256 of the password, salted per payload.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

use crate::{CodecError, CodecResult, Transform};

/// Environment variable consulted by [`AesGcmTransform::from_env`].
pub const PASSWORD_ENV: &str = "STOWAGE_ENCODER_PASSWORD";

const NAME: &str = "aes-256-gcm";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_INFO: &[u8] = b"stowage aes-256-gcm content key";

/// Encrypts on encode, authenticates and decrypts on decode.
#[derive(Clone)]
pub struct AesGcmTransform {
    password: Vec<u8>,
}

impl std::fmt::Debug for AesGcmTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmTransform").finish_non_exhaustive()
    }
}

impl AesGcmTransform {
    /// Use an explicit password.
    pub fn new(password: impl AsRef<[u8]>) -> Self {
        Self {
            password: password.as_ref().to_vec(),
        }
    }

    /// Read the password from `STOWAGE_ENCODER_PASSWORD`, empty when unset.
    pub fn from_env() -> Self {
        Self::new(std::env::var(PASSWORD_ENV).unwrap_or_default())
    }

    fn cipher(&self, salt: &[u8]) -> CodecResult<Aes256Gcm> {
        let hk = Hkdf::<Sha256>::new(Some(salt), &self.password);
        let mut key = [0u8; 32];
        hk.expand(KEY_INFO, &mut key)
            .map_err(|_| CodecError::Encrypt(NAME))?;
        Aes256Gcm::new_from_slice(&key).map_err(|_| CodecError::Encrypt(NAME))
    }
}

impl Transform for AesGcmTransform {
    fn name(&self) -> &'static str {
        NAME
    }

    fn encode(&self, data: &[u8]) -> CodecResult<Vec<u8>> {
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher(&salt)?
            .encrypt(Nonce::from_slice(&nonce), data)
            .map_err(|_| CodecError::Encrypt(NAME))?;

        let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> CodecResult<Vec<u8>> {
        if data.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
            return Err(CodecError::Truncated {
                transform: NAME,
                len: data.len(),
            });
        }
        let (salt, rest) = data.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        self.cipher(salt)?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CodecError::Decrypt(NAME))
    }
}
