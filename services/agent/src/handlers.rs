//! Attestation HTTP surface (C5): one handler per endpoint, all sharing
//! [`AppState`] through the axum `State` extractor.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use keylime_crypto::hmac_tag;
use keylime_tpm::{check_mask, TpmError, TpmResult};

use crate::error::{AgentError, AgentResult};
use crate::payload::run_post_derive_pipeline;
use crate::state::AppState;

/// Run a TPM-mutex-holding closure on the blocking thread pool so the
/// `Command`-shelling transport doesn't stall the async runtime while the
/// quote mutex is held.
async fn run_blocking_tpm<F>(f: F) -> AgentResult<String>
where
    F: FnOnce() -> TpmResult<String> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AgentError::Tpm(TpmError::TpmFailure(e.to_string())))?
        .map_err(AgentError::from)
}

fn envelope(results: Value) -> Response {
    Json(json!({
        "code": 200,
        "status": "Success",
        "results": results,
    }))
    .into_response()
}

fn require_alphanumeric(name: &str, value: &str) -> AgentResult<()> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AgentError::BadRequest(format!(
            "{name} must be a non-empty alphanumeric string"
        )));
    }
    Ok(())
}

/// `partial` query-key semantics, preserved exactly for wire compatibility:
/// absent -> include pubkey; present with no value, or `"1"` -> omit;
/// any other value (including `"0"`) -> include.
fn omit_pubkey(partial: &Option<String>) -> bool {
    matches!(partial.as_deref(), Some("") | Some("1"))
}

fn maybe_ima_measurement_list(state: &AppState, mask: &Option<String>) -> Option<String> {
    if !check_mask(mask.as_deref(), keylime_tpm::IMA_PCR) {
        return None;
    }
    let path = std::path::Path::new(&state.settings.work_dir).join("ima_measurement_list");
    std::fs::read_to_string(path).ok()
}

/// `GET /keys/pubkey`
pub async fn get_pubkey(State(state): State<Arc<AppState>>) -> AgentResult<Response> {
    let pubkey = state.identity.public_key_pem()?;
    Ok(envelope(json!({ "pubkey": pubkey })))
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    challenge: Option<String>,
}

/// `GET /keys/verify?challenge=<alnum>`
pub async fn get_verify(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> AgentResult<Response> {
    let challenge = query
        .challenge
        .ok_or_else(|| AgentError::BadRequest("challenge is required".to_string()))?;
    require_alphanumeric("challenge", &challenge)?;

    let k = state.collector.k().ok_or(AgentError::KeyNotAvailable)?;
    let tag = hmac_tag(&k, challenge.as_bytes())?;
    Ok(envelope(json!({ "hmac": hex::encode(tag) })))
}

#[derive(Debug, Deserialize)]
pub struct IdentityQuoteQuery {
    nonce: Option<String>,
    mask: Option<String>,
    partial: Option<String>,
}

/// `GET /quotes/identity?nonce=<alnum>[&mask=<alnum>][&partial=0|1]` — always
/// a shallow quote, regardless of vTPM status.
pub async fn get_identity_quote(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IdentityQuoteQuery>,
) -> AgentResult<Response> {
    let nonce = query
        .nonce
        .ok_or_else(|| AgentError::BadRequest("nonce is required".to_string()))?;
    require_alphanumeric("nonce", &nonce)?;
    if let Some(mask) = &query.mask {
        require_alphanumeric("mask", mask)?;
    }

    let mask = query.mask.clone();
    let quote = {
        let state = Arc::clone(&state);
        let nonce = nonce.clone();
        run_blocking_tpm(move || state.producer.make_shallow(&nonce, None, mask.as_deref())).await?
    };

    let mut results = json!({ "quote": quote });
    if !omit_pubkey(&query.partial) {
        results["pubkey"] = json!(state.identity.public_key_pem()?);
    }
    if let Some(list) = maybe_ima_measurement_list(&state, &query.mask) {
        results["ima_measurement_list"] = json!(list);
    }
    Ok(envelope(results))
}

#[derive(Debug, Deserialize)]
pub struct IntegrityQuoteQuery {
    nonce: Option<String>,
    mask: Option<String>,
    vmask: Option<String>,
    partial: Option<String>,
}

/// `GET /quotes/integrity?nonce=<alnum>[&mask=<alnum>][&vmask=<alnum>][&partial=0|1]`
/// — shallow over a physical TPM, deep over a vTPM. The IMA-relevant mask is
/// `mask` in the shallow case, `vmask` in the deep case.
pub async fn get_integrity_quote(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IntegrityQuoteQuery>,
) -> AgentResult<Response> {
    let nonce = query
        .nonce
        .ok_or_else(|| AgentError::BadRequest("nonce is required".to_string()))?;
    require_alphanumeric("nonce", &nonce)?;
    if let Some(mask) = &query.mask {
        require_alphanumeric("mask", mask)?;
    }
    if let Some(vmask) = &query.vmask {
        require_alphanumeric("vmask", vmask)?;
    }

    let has_vtpm = state.producer.has_vtpm();
    let mask = query.mask.clone();
    let vmask = query.vmask.clone();
    let nonce_for_tpm = nonce.clone();
    let state_for_tpm = Arc::clone(&state);
    let quote = run_blocking_tpm(move || {
        if has_vtpm {
            state_for_tpm.producer.make_deep(
                &nonce_for_tpm,
                None,
                vmask.as_deref(),
                mask.as_deref(),
            )
        } else {
            state_for_tpm
                .producer
                .make_shallow(&nonce_for_tpm, None, mask.as_deref())
        }
    })
    .await?;
    let ima_mask = if has_vtpm {
        query.vmask.clone()
    } else {
        query.mask.clone()
    };

    let mut results = json!({ "quote": quote });
    if !omit_pubkey(&query.partial) {
        results["pubkey"] = json!(state.identity.public_key_pem()?);
    }
    if let Some(list) = maybe_ima_measurement_list(&state, &ima_mask) {
        results["ima_measurement_list"] = json!(list);
    }
    Ok(envelope(results))
}

#[derive(Debug, Deserialize)]
pub struct UkeyRequest {
    encrypted_key: String,
    auth_tag: String,
    payload: Option<String>,
}

/// `POST /keys/ukey` `{encrypted_key, auth_tag, payload?}`
pub async fn post_ukey(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UkeyRequest>,
) -> AgentResult<Response> {
    let encrypted_key = BASE64
        .decode(&req.encrypted_key)
        .map_err(|e| AgentError::BadRequest(format!("encrypted_key is not base64: {e}")))?;
    let u = state.identity.decrypt(&encrypted_key)?;
    let auth_tag = BASE64
        .decode(&req.auth_tag)
        .map_err(|e| AgentError::BadRequest(format!("auth_tag is not base64: {e}")))?;
    let payload = req
        .payload
        .map(|p| BASE64.decode(p))
        .transpose()
        .map_err(|e| AgentError::BadRequest(format!("payload is not base64: {e}")))?;

    let just_derived = !state.collector.has_derived_key();
    let outcome = state.collector.submit_u(u, auth_tag, payload)?;

    if just_derived && outcome == keylime_collector::CollectOutcome::Derived {
        spawn_post_derive_pipeline(Arc::clone(&state));
    }

    Ok(envelope(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct VkeyRequest {
    encrypted_key: String,
}

/// `POST /keys/vkey` `{encrypted_key}`
pub async fn post_vkey(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VkeyRequest>,
) -> AgentResult<Response> {
    let encrypted_key = BASE64
        .decode(&req.encrypted_key)
        .map_err(|e| AgentError::BadRequest(format!("encrypted_key is not base64: {e}")))?;
    let v = state.identity.decrypt(&encrypted_key)?;

    let just_derived = !state.collector.has_derived_key();
    let outcome = state.collector.submit_v(v)?;

    if just_derived && outcome == keylime_collector::CollectOutcome::Derived {
        spawn_post_derive_pipeline(Arc::clone(&state));
    }

    Ok(envelope(json!({})))
}

/// Fire-and-forget the post-derive pipeline (secure-dir writes, NVRAM, payload
/// decrypt/land/measure/launch) so the submitting party's 200 isn't gated on
/// it — the key has already been derived by the time this runs, and none of
/// this work can change that outcome or be reported back to this request.
fn spawn_post_derive_pipeline(state: Arc<AppState>) {
    tokio::spawn(async move {
        match run_post_derive_pipeline(&state).await {
            Ok(outcome) => debug!(?outcome, "post-derive pipeline finished"),
            Err(e) => error!(error = %e, "post-derive pipeline failed"),
        }
    });
}

/// Fallback for any path not explicitly routed.
pub async fn unknown_path() -> Response {
    AgentError::BadRequest("unknown path".to_string()).into_response()
}
