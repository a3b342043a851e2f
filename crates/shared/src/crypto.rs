//! Secret Codec: authenticated encryption of secrets at rest.
//!
//! Secrets are sealed with AES-256-GCM under a key derived from the configured
//! master key with Argon2id. The stored form is a self-contained, versioned
//! envelope so decryption needs nothing but the codec itself.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use thiserror::Error;

/// Envelope layout version written as the first byte.
pub const ENVELOPE_VERSION: u8 = 1;

/// AES-GCM nonce length (96 bits).
pub const IV_LEN: usize = 12;

/// AES-GCM authentication tag length (128 bits).
pub const TAG_LEN: usize = 16;

/// Fixed KDF salt. The master key is the entropy source.
const KDF_SALT: &[u8] = b"ehs-integrations-secret-codec";

const KDF_MEMORY_KIB: u32 = 19456;
const KDF_ITERATIONS: u32 = 2;
const KEY_LEN: usize = 32;

/// Errors raised by the Secret Codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Master encryption key is empty")]
    EmptyMasterKey,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed")]
    Encryption,

    #[error("Malformed ciphertext envelope: {0}")]
    MalformedEnvelope(&'static str),

    #[error("Decryption failed: authentication tag did not verify")]
    Decryption,

    #[error("Decrypted secret is not valid UTF-8")]
    InvalidUtf8,
}

/// Sealed secret: IV, authentication tag and ciphertext in fixed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub iv: [u8; IV_LEN],
    pub tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Binary layout: `version (1) | iv (12) | tag (16) | ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + IV_LEN + TAG_LEN + self.ciphertext.len());
        out.push(ENVELOPE_VERSION);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let (version, rest) = bytes
            .split_first()
            .ok_or(CodecError::MalformedEnvelope("empty envelope"))?;
        if *version != ENVELOPE_VERSION {
            return Err(CodecError::MalformedEnvelope("unsupported envelope version"));
        }
        if rest.len() < IV_LEN + TAG_LEN {
            return Err(CodecError::MalformedEnvelope("envelope too short"));
        }

        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&rest[..IV_LEN]);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&rest[IV_LEN..IV_LEN + TAG_LEN]);

        Ok(Self {
            iv,
            tag,
            ciphertext: rest[IV_LEN + TAG_LEN..].to_vec(),
        })
    }

    /// Text form stored in the database (standard base64).
    pub fn encode(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    pub fn decode(blob: &str) -> Result<Self, CodecError> {
        let bytes = BASE64
            .decode(blob.trim())
            .map_err(|_| CodecError::MalformedEnvelope("invalid base64"))?;
        Self::from_bytes(&bytes)
    }
}

/// Symmetric codec for secrets at rest.
#[derive(Clone)]
pub struct SecretCodec {
    cipher: Aes256Gcm,
}

impl SecretCodec {
    /// Builds a codec from raw key material.
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// Derives the cipher key from the configured master key with Argon2id.
    pub fn from_master_key(master_key: &str) -> Result<Self, CodecError> {
        if master_key.is_empty() {
            return Err(CodecError::EmptyMasterKey);
        }

        let params = Params::new(KDF_MEMORY_KIB, KDF_ITERATIONS, 1, Some(KEY_LEN))
            .map_err(|e| CodecError::KeyDerivation(e.to_string()))?;
        let kdf = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; KEY_LEN];
        kdf.hash_password_into(master_key.as_bytes(), KDF_SALT, &mut key)
            .map_err(|e| CodecError::KeyDerivation(e.to_string()))?;

        Ok(Self::new(key))
    }

    /// Encrypts `plaintext` into an encoded envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CodecError> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        // aes-gcm appends the tag to the ciphertext
        let mut sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| CodecError::Encryption)?;
        if sealed.len() < TAG_LEN {
            return Err(CodecError::Encryption);
        }
        let tag_start = sealed.len() - TAG_LEN;
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&sealed[tag_start..]);
        sealed.truncate(tag_start);

        Ok(Envelope {
            iv,
            tag,
            ciphertext: sealed,
        }
        .encode())
    }

    /// Decrypts an encoded envelope. Fails if the tag does not verify.
    pub fn decrypt(&self, blob: &str) -> Result<String, CodecError> {
        let envelope = Envelope::decode(blob)?;

        let mut sealed = envelope.ciphertext;
        sealed.extend_from_slice(&envelope.tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&envelope.iv), sealed.as_ref())
            .map_err(|_| CodecError::Decryption)?;

        String::from_utf8(plaintext).map_err(|_| CodecError::InvalidUtf8)
    }
}

impl fmt::Debug for SecretCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCodec").finish_non_exhaustive()
    }
}
