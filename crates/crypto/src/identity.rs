//! Node RSA identity: keypair generation, PEM export, and encrypt/decrypt.
//!
//! The private key never leaves process memory except as sealed persistence
//! (writing the PEM text to the secure directory is the caller's job, not
//! this module's).

use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

use crate::error::{CryptoError, CryptoResult};

const RSA_KEY_BITS: usize = 2048;

/// A node's RSA identity keypair.
pub struct NodeIdentity {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl NodeIdentity {
    /// Generate a fresh RSA-2048 keypair.
    pub fn generate() -> CryptoResult<Self> {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Load an identity from a PKCS#1 PEM-encoded private key, as persisted
    /// under the secure directory by a previous run.
    pub fn from_pkcs1_pem(pem: &str) -> CryptoResult<Self> {
        let private_key = RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Export the private key as PKCS#1 PEM text, for sealed on-disk persistence.
    pub fn private_key_pem(&self) -> CryptoResult<String> {
        self.private_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map(|z| z.to_string())
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))
    }

    /// Export the public key as a self-contained PEM-like text blob
    /// (`rsapublickey_exportable`), suitable for shipping to callers over
    /// the attestation HTTP surface.
    pub fn public_key_pem(&self) -> CryptoResult<String> {
        self.public_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))
    }

    /// Decrypt a ciphertext produced by a caller encrypting against our
    /// public key (PKCS#1 v1.5 padding, matching the registrar/tenant side).
    pub fn decrypt(&self, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.private_key
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|e| CryptoError::RsaOperation(e.to_string()))
    }

    /// Encrypt `plaintext` against an arbitrary public key PEM — used in
    /// tests to build fixtures, and by tooling that talks to this node.
    pub fn encrypt_with_public_pem(public_pem: &str, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let public_key = RsaPublicKey::from_pkcs1_pem(public_pem)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        let mut rng = OsRng;
        public_key
            .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext)
            .map_err(|e| CryptoError::RsaOperation(e.to_string()))
    }
}
