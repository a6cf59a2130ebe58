//! Error type for the PCR/quote codec, quote producer, and quote verifier.

use thiserror::Error;

/// Errors raised while encoding, producing, or verifying TPM quotes.
#[derive(Debug, Error)]
pub enum TpmError {
    /// A quote blob's tag byte was neither `'d'` nor `'r'`, or the body
    /// failed to base64/zlib-decode.
    #[error("malformed quote: {0}")]
    MalformedQuote(String),

    /// The external TPM tool failed or could not be invoked.
    #[error("TPM operation failed: {0}")]
    TpmFailure(String),

    /// The native verifier's signature check did not report success.
    #[error("quote signature verification failed")]
    SignatureFailure,

    /// PCR 16 (the data-bind PCR) did not match `expected_bind_pcr(data)`.
    #[error("PCR 16 data-bind mismatch")]
    BindMismatch,

    /// PCR 10's quoted value did not match the IMA aggregate.
    #[error("IMA measurement mismatch")]
    ImaMismatch,

    /// A whitelisted PCR's quoted digest was absent or didn't match policy.
    #[error("PCR policy mismatch at index {index}")]
    PolicyMismatch {
        /// The PCR index that failed or was missing from the quote.
        index: u32,
    },

    /// A policy named a reserved index (10 or 16) as value-whitelisted.
    #[error("policy must not whitelist reserved PCR {index}")]
    ReservedPcrInPolicy {
        /// The offending reserved index.
        index: u32,
    },

    /// A policy named a PCR index outside the valid 0..24 range.
    #[error("PCR index {index} is out of range (must be 0..24)")]
    PcrIndexOutOfRange {
        /// The out-of-range index.
        index: u32,
    },
}

/// Convenience alias for TPM-crate results.
pub type TpmResult<T> = Result<T, TpmError>;
