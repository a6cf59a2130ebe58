//! Startup orchestration (C6): bring up the secure mount, load or generate
//! the node's RSA identity, initialise the TPM transport, derive the node
//! UUID, register with the Registrar, seed any warm-restart state, and hand
//! back an [`AppState`] ready to be served.

use std::sync::Arc;

use sha1::{Digest, Sha1};
use tracing::{info, warn};
use uuid::Uuid;

use keylime_collector::KeyShareCollector;
use keylime_core::config::NodeUuidMode;
use keylime_core::Settings;
use keylime_crypto::identity::NodeIdentity;
use keylime_tpm::{ProcessTpmTransport, QuoteProducer, StubTpmTransport, TpmTransport};

use crate::collaborators::{FileNvramStore, NvramStore, PlainDirSecureMount, SecureMount};
use crate::error::{AgentError, AgentResult};
use crate::registrar::{HttpRegistrarClient, RegistrarClient, RegistrationRequest};

/// Build the application state, running every startup step described for
/// the lifecycle orchestrator. Registrar failures are fatal; a missing
/// warm-restart NVRAM value is not.
pub async fn bootstrap(settings: Settings) -> AgentResult<Arc<crate::state::AppState>> {
    let secure_mount: Box<dyn SecureMount> = Box::new(PlainDirSecureMount::new(&settings.secure_dir));
    secure_mount.ensure_mounted()?;

    let identity = load_or_generate_identity(&settings, secure_mount.as_ref())?;

    let transport: Box<dyn TpmTransport> = if settings.stub_tpm {
        info!("STUB_TPM enabled: using in-process canned TPM transport");
        Box::new(StubTpmTransport::new())
    } else {
        Box::new(ProcessTpmTransport::new())
    };
    let producer = QuoteProducer::new(transport, "aik-handle");

    let node_uuid = resolve_node_uuid(&settings, &identity)?;

    let nvram: Box<dyn NvramStore> =
        Box::new(FileNvramStore::new(std::path::Path::new(&settings.work_dir).join("nvram_u")));

    let collector = Arc::new(KeyShareCollector::new(node_uuid.clone()));
    if let Some(seeded_u) = nvram.read_u().unwrap_or(None) {
        info!("warm restart: seeding collector with NVRAM-persisted U");
        collector.seed_u(seeded_u);
    }

    register_with_registrar(&settings, &node_uuid, &identity, &producer).await?;

    Ok(Arc::new(crate::state::AppState {
        settings,
        identity,
        producer,
        collector,
        nvram,
        secure_mount,
        node_uuid,
    }))
}

fn load_or_generate_identity(
    settings: &Settings,
    secure_mount: &dyn SecureMount,
) -> AgentResult<NodeIdentity> {
    let key_path = secure_mount.path().join(&settings.rsa_keyname);
    match std::fs::read_to_string(&key_path) {
        Ok(pem) => {
            info!(path = %key_path.display(), "loaded existing RSA identity");
            Ok(NodeIdentity::from_pkcs1_pem(&pem)?)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("no existing RSA identity found, generating a fresh one");
            let identity = NodeIdentity::generate()?;
            std::fs::write(&key_path, identity.private_key_pem()?)?;
            Ok(identity)
        }
        Err(e) => Err(AgentError::Io(e)),
    }
}

fn resolve_node_uuid(settings: &Settings, identity: &NodeIdentity) -> AgentResult<String> {
    let uuid = match &settings.node_uuid {
        NodeUuidMode::Literal(value) => value.clone(),
        NodeUuidMode::Generate => Uuid::new_v4().to_string(),
        NodeUuidMode::HashEk => {
            let pubkey = identity.public_key_pem()?;
            let digest = Sha1::digest(pubkey.as_bytes());
            Uuid::new_v5(&Uuid::NAMESPACE_OID, digest.as_slice()).to_string()
        }
        NodeUuidMode::Openstack => {
            warn!("openstack node_uuid mode requested but no metadata service is reachable from this context; falling back to a generated UUID");
            Uuid::new_v4().to_string()
        }
    };
    Ok(uuid)
}

async fn register_with_registrar(
    settings: &Settings,
    node_uuid: &str,
    identity: &NodeIdentity,
    producer: &QuoteProducer,
) -> AgentResult<()> {
    if settings.stub_tpm {
        return Ok(());
    }

    let client = HttpRegistrarClient::new(&settings.registrar_ip, settings.registrar_port);
    let ek = String::new();
    let aik = String::new();
    let request = RegistrationRequest {
        node_uuid: node_uuid.to_string(),
        pubkey: identity.public_key_pem()?,
        ek: ek.clone(),
        ekcert: "virtual".to_string(),
        aik: aik.clone(),
    };
    let response = client.register(&request).await?;

    if producer.has_vtpm() {
        let nonce = hex::encode(Sha1::digest(response.blob.as_bytes()));
        let bind_data = format!("{node_uuid}{aik}{ek}");
        let deep_quote = producer
            .make_deep(&nonce, Some(bind_data.as_bytes()), None, None)
            .map_err(|e| AgentError::TpmInitFailure(e.to_string()))?;
        client.activate_virtual(node_uuid, &deep_quote).await?;
    } else {
        client.activate(node_uuid).await?;
    }
    info!(node_uuid, "registered with the Registrar");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_node_uuid_honours_literal_mode() {
        let mut settings = Settings::default();
        settings.node_uuid = NodeUuidMode::Literal("11111111-1111-1111-1111-111111111111".to_string());
        let identity = NodeIdentity::generate().unwrap();
        let uuid = resolve_node_uuid(&settings, &identity).unwrap();
        assert_eq!(uuid, "11111111-1111-1111-1111-111111111111");
    }

    #[test]
    fn resolve_node_uuid_hash_ek_is_deterministic_for_same_key() {
        let mut settings = Settings::default();
        settings.node_uuid = NodeUuidMode::HashEk;
        let identity = NodeIdentity::generate().unwrap();
        let a = resolve_node_uuid(&settings, &identity).unwrap();
        let b = resolve_node_uuid(&settings, &identity).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn load_or_generate_identity_persists_a_fresh_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.secure_dir = dir.path().to_string_lossy().to_string();
        let mount = PlainDirSecureMount::new(&settings.secure_dir);
        mount.ensure_mounted().unwrap();

        let first = load_or_generate_identity(&settings, &mount).unwrap();
        let second = load_or_generate_identity(&settings, &mount).unwrap();
        assert_eq!(
            first.public_key_pem().unwrap(),
            second.public_key_pem().unwrap()
        );
    }
}
