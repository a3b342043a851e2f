//! Slow one-way hashing of API keys with Argon2id.
//!
//! Hashes are stored as PHC strings, which carry their own parameters, so
//! verification works regardless of the cost settings used at hashing time.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use thiserror::Error;

/// Error type for hashing operations.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("Invalid hash parameters: {0}")]
    InvalidParams(String),

    #[error("Failed to hash secret: {0}")]
    Hash(String),

    #[error("Failed to verify secret: {0}")]
    Verify(String),

    #[error("Invalid hash format")]
    InvalidHashFormat,
}

/// Argon2id cost settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl Default for HashCost {
    /// OWASP recommendation: 19 MiB, 2 iterations, 1 lane.
    fn default() -> Self {
        Self {
            memory_kib: 19456,
            iterations: 2,
        }
    }
}

/// Hashes and verifies secrets with a fixed cost.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretHasher {
    cost: HashCost,
}

impl SecretHasher {
    pub fn new(cost: HashCost) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> HashCost {
        self.cost
    }

    fn argon2(&self) -> Result<Argon2<'static>, HashError> {
        let params = Params::new(self.cost.memory_kib, self.cost.iterations, 1, Some(32))
            .map_err(|e| HashError::InvalidParams(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Returns a PHC-formatted Argon2id hash of `secret`.
    pub fn hash(&self, secret: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()?
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| HashError::Hash(e.to_string()))
    }

    /// Verifies `secret` against a stored PHC hash in constant time.
    pub fn verify(&self, secret: &str, hash: &str) -> Result<bool, HashError> {
        let parsed = PasswordHash::new(hash).map_err(|_| HashError::InvalidHashFormat)?;

        // Parameters come from the PHC string
        match Argon2::default().verify_password(secret.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(HashError::Verify(e.to_string())),
        }
    }
}
