//! PKCE verification (RFC 7636).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Verify a `code_verifier` against a recorded challenge.
///
/// For `S256` the check is `base64url(sha256(verifier)) == challenge`; for
/// `plain` a direct comparison. Both comparisons are constant-time. Unknown
/// methods never verify.
pub fn verify_challenge(challenge: &str, method: &str, verifier: &str) -> bool {
    match method {
        "S256" => {
            let digest = Sha256::digest(verifier.as_bytes());
            let computed = URL_SAFE_NO_PAD.encode(digest);
            constant_time_eq(&computed, challenge)
        }
        "plain" => constant_time_eq(verifier, challenge),
        _ => false,
    }
}

/// Compute the `S256` challenge for a verifier (client-side helper and
/// test fixture).
pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
