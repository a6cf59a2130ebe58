//! Error type for the attestation HTTP surface and lifecycle orchestrator.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the HTTP handlers and the startup sequence.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Input failed validation (missing/non-alphanumeric nonce, empty body, ...).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No bootstrap key has been derived yet.
    #[error("key not yet available")]
    KeyNotAvailable,

    /// Quote production failed.
    #[error(transparent)]
    Tpm(#[from] keylime_tpm::TpmError),

    /// A cryptographic operation (RSA decrypt, AEAD) failed.
    #[error(transparent)]
    Crypto(#[from] keylime_crypto::CryptoError),

    /// The key-share collector reported an internal error.
    #[error(transparent)]
    Collector(#[from] keylime_collector::CollectorError),

    /// Secure mount is missing where it was required to be present.
    #[error("secure mount not present")]
    SecureMountMissing,

    /// Registration with the Registrar failed; fatal at startup.
    #[error("registrar registration failed: {0}")]
    RegistrationFailure(String),

    /// TPM initialisation failed; fatal at startup.
    #[error("TPM initialisation failed: {0}")]
    TpmInitFailure(String),

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = match &self {
            AgentError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AgentError::KeyNotAvailable => StatusCode::BAD_REQUEST,
            AgentError::Tpm(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AgentError::Crypto(_) => StatusCode::BAD_REQUEST,
            AgentError::Collector(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AgentError::SecureMountMissing => StatusCode::INTERNAL_SERVER_ERROR,
            AgentError::RegistrationFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AgentError::TpmInitFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AgentError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "code": status.as_u16(),
            "status": self.to_string(),
            "results": {},
        }));
        (status, body).into_response()
    }
}

/// Convenience alias for agent-binary results.
pub type AgentResult<T> = Result<T, AgentError>;
