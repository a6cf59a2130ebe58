//! Typed configuration record for the node agent.
//!
//! Replaces "read an option by name at point of use" with one immutable
//! [`Settings`] value, materialised once at startup and handed down to every
//! component that needs it.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::CoreResult;

/// How the node derives its UUID on first boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "value")]
pub enum NodeUuidMode {
    /// Use a literal, operator-supplied UUID string.
    Literal(String),
    /// Derive from the endorsement key via a one-way hash.
    HashEk,
    /// Read from the OpenStack metadata service.
    Openstack,
    /// Generate a fresh v4 UUID.
    Generate,
}

impl Default for NodeUuidMode {
    fn default() -> Self {
        NodeUuidMode::Generate
    }
}

/// The complete set of options that affect the attestation/key-release core.
///
/// Every field here corresponds to a recognised option in the original
/// configuration file; nothing downstream reads environment or config values
/// directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// TCP port the attestation HTTP surface listens on.
    pub cloudnode_port: u16,
    /// Registrar host to register with during lifecycle startup.
    pub registrar_ip: String,
    /// Registrar port.
    pub registrar_port: u16,
    /// Filename (under the secure directory) of the node's RSA private key.
    pub rsa_keyname: String,
    /// Filename (under the secure directory) the derived K is written to.
    pub enc_keyname: String,
    /// Filename the decrypted payload is written to when it is not a zip.
    pub dec_payload_file: String,
    /// Whether a zip-shaped payload should be extracted to `unzipped/`.
    pub extract_payload_zip: bool,
    /// Name of a post-extract script to launch; empty disables launch.
    pub payload_script: String,
    /// PCR index to extend with the payload measurement; effective iff 0<pcr<24.
    pub measure_payload_pcr: u32,
    /// How to derive this node's UUID on first boot.
    pub node_uuid: NodeUuidMode,
    /// TPM owner password, required for deep-quote operations.
    pub tpm_ownerpassword: String,
    /// Whether to run the revocation listener thread.
    pub listen_notifications: bool,
    /// Path to the revocation-certificate used to verify notification signatures.
    pub revocation_cert: String,
    /// Names of revocation actions to invoke (resolved through the action registry).
    pub revocation_actions: Vec<String>,
    /// Absolute path of the secure (tmpfs-backed) directory.
    pub secure_dir: String,
    /// Absolute path of the scratch work directory (holds `encrypted_payload`).
    pub work_dir: String,
    /// Use the in-process TPM/verifier stubs instead of shelling out.
    pub stub_tpm: bool,
    /// Emit JSON-formatted logs instead of human-readable text.
    pub json_logs: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cloudnode_port: 9002,
            registrar_ip: "127.0.0.1".to_string(),
            registrar_port: 8890,
            rsa_keyname: "tpmdata.yml".to_string(),
            enc_keyname: "derived_tci_key".to_string(),
            dec_payload_file: "decrypted_payload".to_string(),
            extract_payload_zip: true,
            payload_script: String::new(),
            measure_payload_pcr: 0,
            node_uuid: NodeUuidMode::default(),
            tpm_ownerpassword: String::new(),
            listen_notifications: false,
            revocation_cert: String::new(),
            revocation_actions: Vec::new(),
            secure_dir: "/var/lib/keylime-node/secure".to_string(),
            work_dir: "/var/lib/keylime-node/work".to_string(),
            stub_tpm: false,
            json_logs: false,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, falling back to defaults for any
    /// field the file omits (serde's `#[serde(default)]` on the struct).
    pub fn from_file<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load from an optional path, falling back to built-in defaults if the
    /// path is absent or missing on disk.
    pub fn load_with_defaults<P: AsRef<Path>>(path: Option<P>) -> Self {
        match path {
            Some(p) if p.as_ref().exists() => Self::from_file(p).unwrap_or_default(),
            _ => Self::default(),
        }
    }

    /// `true` if `measure_payload_pcr` names a usable, non-reserved PCR.
    pub fn measures_payload(&self) -> bool {
        self.measure_payload_pcr > 0 && self.measure_payload_pcr < 24
    }

    /// `true` if a post-extract launch script is configured.
    ///
    /// The original source compared `initscript is not ""` (an identity
    /// check, not an equality check) — read as "is a script name configured
    /// at all", which is what this checks.
    pub fn should_launch_payload_script(&self) -> bool {
        !self.payload_script.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_self_consistent() {
        let s = Settings::default();
        assert!(!s.measures_payload());
        assert!(!s.should_launch_payload_script());
    }

    #[test]
    fn measures_payload_respects_reserved_range() {
        let mut s = Settings::default();
        s.measure_payload_pcr = 16;
        assert!(s.measures_payload());
        s.measure_payload_pcr = 24;
        assert!(!s.measures_payload());
        s.measure_payload_pcr = 0;
        assert!(!s.measures_payload());
    }

    #[test]
    fn load_with_defaults_falls_back_when_path_missing() {
        let settings = Settings::load_with_defaults(Some("/nonexistent/path/settings.toml"));
        assert_eq!(settings.cloudnode_port, 9002);
    }

    #[test]
    fn parses_toml_overrides() {
        let toml_src = r#"
            cloudnode_port = 9999
            payload_script = "launch.sh"

            [node_uuid]
            mode = "generate"
        "#;
        let settings: Settings = toml::from_str(toml_src).unwrap();
        assert_eq!(settings.cloudnode_port, 9999);
        assert!(settings.should_launch_payload_script());
    }
}
