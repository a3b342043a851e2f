//! HMAC-SHA256 signing of outbound webhook payloads.
//!
//! The MAC covers `"{timestamp}.{payload}"` so a captured signature cannot be
//! replayed with a different timestamp.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn signature_mac(payload: &[u8], secret: &str, timestamp: i64) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

/// Computes the hex-encoded signature of `payload`.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    hex::encode(signature_mac(payload, secret, timestamp).finalize().into_bytes())
}

/// Recomputes the signature and compares it in constant time.
pub fn verify_signature(payload: &[u8], secret: &str, timestamp: i64, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    signature_mac(payload, secret, timestamp)
        .verify_slice(&expected)
        .is_ok()
}
