//! HMAC authentication tag used to validate a derived bootstrap key.
//!
//! `auth_tag == HMAC(K, node_uuid)` is the sole proof that a candidate
//! `K = U xor V` is the real key rather than a decoy pairing.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{CryptoError, CryptoResult};

type HmacSha256 = Hmac<Sha256>;

/// Compute `HMAC(key, message)` with SHA-256, returning the raw tag bytes.
pub fn hmac_tag(key: &[u8], message: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| CryptoError::RsaOperation(e.to_string()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time comparison of a candidate key's HMAC tag against an
/// expected tag, used by the key-share collector on every derivation
/// attempt. Never short-circuits on the first differing byte.
pub fn verify_hmac_tag(key: &[u8], message: &[u8], expected_tag: &[u8]) -> bool {
    match hmac_tag(key, message) {
        Ok(actual) => constant_time_eq(&actual, expected_tag),
        Err(_) => false,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_verifies_against_itself() {
        let key = b"bootstrap-key-material-32-bytes";
        let msg = b"11111111-2222-3333-4444-555555555555";
        let tag = hmac_tag(key, msg).unwrap();
        assert!(verify_hmac_tag(key, msg, &tag));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let msg = b"some-node-uuid";
        let tag = hmac_tag(b"correct-key-bytes-000000000000", msg).unwrap();
        assert!(!verify_hmac_tag(b"wrong-key-bytes-0000000000000", msg, &tag));
    }

    #[test]
    fn tampered_tag_fails_verification() {
        let key = b"bootstrap-key-material-32-bytes";
        let msg = b"node-uuid";
        let mut tag = hmac_tag(key, msg).unwrap();
        tag[0] ^= 0xFF;
        assert!(!verify_hmac_tag(key, msg, &tag));
    }
}
