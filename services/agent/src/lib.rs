//! Library surface of the node agent binary, split out so integration tests
//! can build the router without going through `main`.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod payload;
pub mod registrar;
pub mod revocation;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use state::AppState;

/// Build the axum router for the attestation HTTP surface, wired to `state`.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/keys/pubkey", get(handlers::get_pubkey))
        .route("/keys/verify", get(handlers::get_verify))
        .route("/quotes/identity", get(handlers::get_identity_quote))
        .route("/quotes/integrity", get(handlers::get_integrity_quote))
        .route("/keys/ukey", post(handlers::post_ukey))
        .route("/keys/vkey", post(handlers::post_vkey))
        .fallback(handlers::unknown_path)
        .with_state(state)
}
