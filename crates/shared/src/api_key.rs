//! API key and webhook secret generation.
//!
//! Keys look like `ehs_<43 base64url chars>` and carry 256 bits of entropy.
//! The first 8 characters after the `ehs_` marker form the lookup prefix.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};

use crate::hashing::{HashError, SecretHasher};

/// Marker prepended to every API key.
pub const API_KEY_MARKER: &str = "ehs_";

/// Marker prepended to every webhook signing secret.
pub const WEBHOOK_SECRET_MARKER: &str = "whsec_";

/// Number of key body characters kept in the prefix.
pub const PREFIX_BODY_LEN: usize = 8;

const KEY_BYTES: usize = 32;

/// Freshly issued API key. `key` must be shown once and then dropped.
#[derive(Debug, Clone)]
pub struct GeneratedApiKey {
    pub key: String,
    pub prefix: String,
    pub hash: String,
}

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Generates a key, its lookup prefix and its Argon2id hash.
pub fn generate_api_key(hasher: &SecretHasher) -> Result<GeneratedApiKey, HashError> {
    let key = format!("{}{}", API_KEY_MARKER, random_token(KEY_BYTES));
    let prefix = key[..API_KEY_MARKER.len() + PREFIX_BODY_LEN].to_string();
    let hash = hasher.hash(&key)?;
    Ok(GeneratedApiKey { key, prefix, hash })
}

/// Extracts the lookup prefix, or `None` if the key is not shaped like one of ours.
pub fn extract_key_prefix(key: &str) -> Option<&str> {
    let body = key.strip_prefix(API_KEY_MARKER)?;
    if body.len() < PREFIX_BODY_LEN || !body.is_char_boundary(PREFIX_BODY_LEN) {
        return None;
    }
    Some(&key[..API_KEY_MARKER.len() + PREFIX_BODY_LEN])
}

/// Verifies a raw key against its stored hash. Malformed hashes never verify.
pub fn verify_api_key(hasher: &SecretHasher, key: &str, hash: &str) -> bool {
    hasher.verify(key, hash).unwrap_or(false)
}

/// Generates a webhook signing secret.
pub fn generate_webhook_secret() -> String {
    format!("{}{}", WEBHOOK_SECRET_MARKER, random_token(KEY_BYTES))
}
