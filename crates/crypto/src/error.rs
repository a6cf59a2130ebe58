//! Error type for the node's cryptographic primitives.

use thiserror::Error;

/// Errors surfaced by RSA identity, HMAC, XOR, and payload-AEAD operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// RSA keypair generation failed.
    #[error("RSA key generation failed: {0}")]
    KeyGeneration(String),

    /// A key was not well-formed PEM/PKCS#1 text.
    #[error("malformed RSA key: {0}")]
    MalformedKey(String),

    /// RSA encryption or decryption failed (wrong key, corrupt ciphertext).
    #[error("RSA operation failed: {0}")]
    RsaOperation(String),

    /// Two byte strings that were required to be the same length were not.
    #[error("length mismatch: {a} vs {b}")]
    LengthMismatch {
        /// Length of the first operand.
        a: usize,
        /// Length of the second operand.
        b: usize,
    },

    /// AEAD encryption or decryption failed (wrong key, truncated ciphertext, tag mismatch).
    #[error("payload cipher operation failed")]
    CipherFailure,
}

/// Convenience alias for crypto-crate results.
pub type CryptoResult<T> = Result<T, CryptoError>;
