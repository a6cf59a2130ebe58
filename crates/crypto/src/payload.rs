//! Payload confidentiality: the derived bootstrap key K seals/unseals the
//! workload payload the Tenant ships alongside its U submission.
//!
//! The original protocol is silent on which symmetric cipher protects the
//! payload. This rewrite keys a ChaCha20-Poly1305 AEAD from K (via a BLAKE3
//! derivation to a fixed 32-byte key) instead of inventing an unauthenticated
//! cipher — see the grounding ledger for the rationale.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};

const NONCE_LEN: usize = 12;

fn derive_cipher(k: &[u8]) -> ChaCha20Poly1305 {
    let key_bytes = blake3::derive_key("keylime-node payload-cipher key v1", k);
    ChaCha20Poly1305::new((&key_bytes).into())
}

/// Seal `plaintext` under K. Output is `nonce || ciphertext_with_tag`.
pub fn encrypt_payload(k: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = derive_cipher(k);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::CipherFailure)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Unseal a blob produced by [`encrypt_payload`] under the same K.
pub fn decrypt_payload(k: &[u8], sealed: &[u8]) -> CryptoResult<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(CryptoError::CipherFailure);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = derive_cipher(k);
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::CipherFailure)
}
