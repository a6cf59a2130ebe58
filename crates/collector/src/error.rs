//! Error type for the key-share collector.

use thiserror::Error;

/// Errors raised by the key-share collector. Note that "no pair matched
/// yet" is deliberately *not* an error — see [`crate::CollectOutcome`].
#[derive(Debug, Error)]
pub enum CollectorError {
    /// A cryptographic operation (XOR, HMAC) failed unexpectedly.
    #[error("cryptographic operation failed: {0}")]
    Crypto(#[from] keylime_crypto::CryptoError),
}

/// Convenience alias for collector-crate results.
pub type CollectorResult<T> = Result<T, CollectorError>;
