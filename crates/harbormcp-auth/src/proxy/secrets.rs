//! Client id/secret generation, hashing, and constant-time verification.

use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// SHA-256 of `input`, hex encoded.
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    to_hex(&digest)
}

/// Generate a local client id: `proxy_` + 32 hex chars (16 random bytes).
pub fn generate_client_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("proxy_{}", to_hex(&bytes))
}

/// Generate a client secret: 64 hex chars (32 random bytes).
pub fn generate_client_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    to_hex(&bytes)
}

/// Generate an opaque random identifier (session/event scale, 16 bytes).
pub fn generate_opaque_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    to_hex(&bytes)
}

/// Hash a client secret for storage.
pub fn hash_client_secret(secret: &str) -> String {
    sha256_hex(secret)
}

/// Verify a presented secret against a stored hash in constant time.
pub fn verify_client_secret(secret: &str, stored_hash: &str) -> bool {
    let candidate = sha256_hex(secret);
    if candidate.len() != stored_hash.len() {
        return false;
    }
    candidate.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}
