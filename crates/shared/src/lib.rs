//! Shared utilities for the EHS integration service.
//!
//! This crate provides functionality used across all other crates:
//! - Secret Codec (AES-256-GCM envelopes for secrets at rest)
//! - HMAC-SHA256 webhook signing
//! - API key and webhook secret generation
//! - Argon2id hashing
//! - Pagination and validation helpers

pub mod api_key;
pub mod crypto;
pub mod hashing;
pub mod pagination;
pub mod signing;
pub mod validation;
