//! Shared application state handed to every HTTP handler.

use std::path::PathBuf;
use std::sync::Arc;

use keylime_collector::KeyShareCollector;
use keylime_core::Settings;
use keylime_crypto::identity::NodeIdentity;
use keylime_tpm::QuoteProducer;

use crate::collaborators::{NvramStore, SecureMount};

/// Everything a handler needs: configuration, the node's identity, the TPM
/// quote producer, the key-share collector, and the collaborator traits for
/// NVRAM persistence and the secure mount.
pub struct AppState {
    /// Immutable, process-wide configuration.
    pub settings: Settings,
    /// This node's RSA identity (public key is served over HTTP).
    pub identity: NodeIdentity,
    /// Quote producer, serialising all TPM access.
    pub producer: QuoteProducer,
    /// Bootstrap-key collector (C4).
    pub collector: Arc<KeyShareCollector>,
    /// NVRAM collaborator, for warm-restart U persistence.
    pub nvram: Box<dyn NvramStore>,
    /// Secure-mount collaborator.
    pub secure_mount: Box<dyn SecureMount>,
    /// This node's UUID, fixed for the process lifetime.
    pub node_uuid: String,
}

impl AppState {
    /// Absolute path of the file the derived K is written to under the
    /// secure directory.
    pub fn enc_keyname_path(&self) -> PathBuf {
        self.secure_mount.path().join(&self.settings.enc_keyname)
    }

    /// Absolute path of the plaintext/extracted payload destination under
    /// the secure directory.
    pub fn dec_payload_path(&self) -> PathBuf {
        self.secure_mount.path().join(&self.settings.dec_payload_file)
    }

    /// Absolute path of the stale encrypted-payload cache under the scratch
    /// work directory.
    pub fn encrypted_payload_path(&self) -> PathBuf {
        PathBuf::from(&self.settings.work_dir).join("encrypted_payload")
    }
}
