//! Bitwise XOR of equal-length key shares.

use crate::error::{CryptoError, CryptoResult};

/// Compute `u XOR v`. Both slices must have equal length; this is the only
/// validity requirement the multi-party key derivation imposes on a
/// candidate pairing.
pub fn xor_shares(u: &[u8], v: &[u8]) -> CryptoResult<Vec<u8>> {
    if u.len() != v.len() {
        return Err(CryptoError::LengthMismatch {
            a: u.len(),
            b: v.len(),
        });
    }
    Ok(u.iter().zip(v.iter()).map(|(a, b)| a ^ b).collect())
}
