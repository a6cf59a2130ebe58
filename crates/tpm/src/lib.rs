//! PCR/quote codec, quote producer, and quote verifier for the node's
//! attestation core.
//!
//! The verifier (C3) lives in the same crate as the producer (C2) because
//! verifier peers reuse it, even though the node itself only exercises it in
//! tests.

#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod policy;
pub mod producer;
pub mod transport;
pub mod verify;

pub use codec::{check_mask, decode_quote, encode_quote, expected_bind_pcr, IMA_PCR, TPM_DATA_PCR};
pub use error::{TpmError, TpmResult};
pub use policy::{Policy, PolicyValue};
pub use producer::QuoteProducer;
pub use transport::{DeepQuoteArgs, ProcessTpmTransport, QuoteArgs, StubTpmTransport, TpmTransport};
pub use verify::{
    check_deep_quote, check_pcrs, check_quote, ImaPolicy, NativeQuoteVerifier,
    ProcessNativeVerifier, StubImaPolicy, StubNativeVerifier,
};
