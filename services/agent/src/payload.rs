//! Post-derive pipeline: once K is available, seal it to disk, persist the
//! winning U to NVRAM, and decrypt/extract/measure the workload payload.
//!
//! The HTTP 200 for the derivation-triggering POST is sent before any of
//! this runs — the caller spawns this pipeline fire-and-forget once K is
//! derived, since none of this work can change that outcome or be reported
//! back on the request that triggered it. The PCR measurement step within it
//! additionally hands off to the blocking thread pool since it holds the
//! same TPM transport mutex a quote request would.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};
use tracing::{info, warn};

use keylime_crypto::payload::decrypt_payload;
use keylime_tpm::TpmError;

use crate::error::{AgentError, AgentResult};
use crate::state::AppState;

/// Outcome of the post-derive pipeline. A discarded stale payload is a
/// normal outcome, not an error — K-derivation failures are the only thing
/// this pipeline treats as fatal to the handler's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostDeriveOutcome {
    /// Nothing arrived with this request and nothing was staged on disk.
    NoPayload,
    /// A stale on-disk ciphertext didn't decrypt under this K and was discarded.
    StalePayloadDiscarded,
    /// A payload (fresh or recovered) was decrypted, landed, and (if configured) measured.
    PayloadLanded,
}

/// Run the full post-derive sequence: secure-mount check, seal K to disk,
/// persist the winning U to NVRAM, decrypt and land the payload (falling
/// back to a stale on-disk ciphertext if this submission carried none),
/// measure it into the configured PCR, and fire the launch script.
pub async fn run_post_derive_pipeline(state: &Arc<AppState>) -> AgentResult<PostDeriveOutcome> {
    if !state.secure_mount.is_present() {
        return Err(AgentError::SecureMountMissing);
    }

    let k = state.collector.k().ok_or(AgentError::KeyNotAvailable)?;

    std::fs::write(state.enc_keyname_path(), BASE64.encode(&k))?;
    info!(path = %state.enc_keyname_path().display(), "sealed derived key to secure directory");

    if let Some(final_u) = state.collector.final_u() {
        if let Err(e) = state.nvram.write_u(&final_u) {
            warn!(error = %e, "failed to persist final U to NVRAM");
        }
    }

    let fresh_payload = state.collector.take_payload();
    let is_stale = fresh_payload.is_none();
    let sealed_payload = match fresh_payload {
        Some(p) => Some(p),
        None => read_stale_encrypted_payload(state),
    };

    let Some(sealed_payload) = sealed_payload else {
        return Ok(PostDeriveOutcome::NoPayload);
    };

    let plaintext = match decrypt_payload(&k, &sealed_payload) {
        Ok(plaintext) => plaintext,
        Err(e) if is_stale => {
            warn!(error = %e, "stale encrypted payload did not decrypt under the derived key, discarding");
            return Ok(PostDeriveOutcome::StalePayloadDiscarded);
        }
        Err(e) => return Err(e.into()),
    };
    land_payload(state, &plaintext)?;

    if state.settings.measures_payload() {
        measure_payload(state, &k, &plaintext).await?;
    }

    if state.settings.should_launch_payload_script() {
        launch_payload_script(state);
    }

    Ok(PostDeriveOutcome::PayloadLanded)
}

fn read_stale_encrypted_payload(state: &AppState) -> Option<Vec<u8>> {
    let path = state.encrypted_payload_path();
    match std::fs::read(&path) {
        Ok(bytes) => {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(error = %e, path = %path.display(), "failed to remove stale encrypted payload");
            }
            Some(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to read stale encrypted payload");
            None
        }
    }
}

fn land_payload(state: &AppState, plaintext: &[u8]) -> AgentResult<()> {
    if state.settings.extract_payload_zip && looks_like_zip(plaintext) {
        extract_zip_payload(state, plaintext)
    } else {
        Ok(std::fs::write(state.dec_payload_path(), plaintext)?)
    }
}

fn looks_like_zip(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && &bytes[0..2] == b"PK"
}

fn extract_zip_payload(state: &AppState, plaintext: &[u8]) -> AgentResult<()> {
    let dest = state.secure_mount.path().join("unzipped");
    std::fs::create_dir_all(&dest)?;

    let cursor = std::io::Cursor::new(plaintext);
    let mut archive =
        zip::ZipArchive::new(cursor).map_err(|e| AgentError::BadRequest(e.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| AgentError::BadRequest(e.to_string()))?;
        let Some(entry_path) = entry.enclosed_name() else {
            continue;
        };
        let out_path = dest.join(entry_path);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out_file = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out_file)?;
    }
    Ok(())
}

/// Extends the configured PCR with `SHA1(K || plaintext)`, off the async
/// runtime's worker threads since this holds the same TPM transport mutex
/// a quote request would.
async fn measure_payload(state: &Arc<AppState>, k: &[u8], plaintext: &[u8]) -> AgentResult<()> {
    let mut hasher = Sha1::new();
    hasher.update(k);
    hasher.update(plaintext);
    let digest = hex::encode(hasher.finalize());
    let pcr = state.settings.measure_payload_pcr;
    let state = Arc::clone(state);

    tokio::task::spawn_blocking(move || state.producer.measure(pcr, &digest))
        .await
        .map_err(|e| AgentError::Tpm(TpmError::TpmFailure(e.to_string())))??;
    Ok(())
}

fn launch_payload_script(state: &AppState) {
    let script_path = state.dec_payload_path().parent().map(|p| p.to_path_buf());
    let script_name = state.settings.payload_script.clone();
    let node_uuid = state.node_uuid.clone();

    tokio::spawn(async move {
        let Some(dir) = script_path else { return };
        let result = tokio::process::Command::new(dir.join(&script_name))
            .env("NODE_UUID", &node_uuid)
            .current_dir(&dir)
            .spawn();
        match result {
            Ok(mut child) => {
                if let Err(e) = child.wait().await {
                    warn!(error = %e, script = %script_name, "payload script exited with an error");
                }
            }
            Err(e) => {
                warn!(error = %e, script = %script_name, "failed to launch payload script");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use keylime_collector::KeyShareCollector;
    use keylime_core::Settings;
    use keylime_crypto::hmac_tag;
    use keylime_crypto::identity::NodeIdentity;
    use keylime_crypto::payload::encrypt_payload;
    use keylime_crypto::xor::xor_shares;
    use keylime_tpm::{QuoteProducer, StubTpmTransport};

    use crate::collaborators::{InMemoryNvramStore, PlainDirSecureMount, SecureMount};

    const NODE_UUID: &str = "11111111-1111-1111-1111-111111111111";

    fn derived_state(work_dir: &std::path::Path) -> (Arc<AppState>, Vec<u8>) {
        let secure_mount = PlainDirSecureMount::new(work_dir.join("secure"));
        secure_mount.ensure_mounted().unwrap();

        let settings = Settings {
            work_dir: work_dir.to_string_lossy().to_string(),
            secure_dir: work_dir.join("secure").to_string_lossy().to_string(),
            stub_tpm: true,
            ..Settings::default()
        };

        let collector = Arc::new(KeyShareCollector::new(NODE_UUID));
        let u = b"genuine-u-share-16b".to_vec();
        let v = b"genuine-v-share-16b".to_vec();
        let k = xor_shares(&u, &v).unwrap();
        let auth_tag = hmac_tag(&k, NODE_UUID.as_bytes()).unwrap();
        collector.submit_u(u, auth_tag, None).unwrap();
        assert!(collector.submit_v(v).unwrap() == keylime_collector::CollectOutcome::Derived);

        let state = Arc::new(AppState {
            settings,
            identity: NodeIdentity::generate().unwrap(),
            producer: QuoteProducer::new(Box::new(StubTpmTransport::new()), "aik-handle"),
            collector,
            nvram: Box::new(InMemoryNvramStore::default()),
            secure_mount: Box::new(secure_mount),
            node_uuid: NODE_UUID.to_string(),
        });
        (state, k)
    }

    #[tokio::test]
    async fn no_payload_anywhere_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _k) = derived_state(dir.path());

        let outcome = run_post_derive_pipeline(&state).await.unwrap();
        assert_eq!(outcome, PostDeriveOutcome::NoPayload);
    }

    #[tokio::test]
    async fn fresh_payload_is_decrypted_and_landed() {
        let dir = tempfile::tempdir().unwrap();
        let (state, k) = derived_state(dir.path());
        let sealed = encrypt_payload(&k, b"hello from the verifier").unwrap();
        state.collector.submit_u(vec![], vec![], Some(sealed)).unwrap();

        let outcome = run_post_derive_pipeline(&state).await.unwrap();
        assert_eq!(outcome, PostDeriveOutcome::PayloadLanded);
        assert_eq!(
            std::fs::read(state.dec_payload_path()).unwrap(),
            b"hello from the verifier"
        );
    }

    #[tokio::test]
    async fn stale_payload_that_fails_to_decrypt_is_discarded_not_errored() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _k) = derived_state(dir.path());
        std::fs::create_dir_all(state.encrypted_payload_path().parent().unwrap()).unwrap();
        std::fs::write(state.encrypted_payload_path(), b"not a valid sealed payload").unwrap();

        let outcome = run_post_derive_pipeline(&state).await.unwrap();
        assert_eq!(outcome, PostDeriveOutcome::StalePayloadDiscarded);
        assert!(!state.encrypted_payload_path().exists());
    }

    #[tokio::test]
    async fn stale_payload_that_decrypts_is_landed() {
        let dir = tempfile::tempdir().unwrap();
        let (state, k) = derived_state(dir.path());
        let sealed = encrypt_payload(&k, b"stale but valid").unwrap();
        std::fs::create_dir_all(state.encrypted_payload_path().parent().unwrap()).unwrap();
        std::fs::write(state.encrypted_payload_path(), sealed).unwrap();

        let outcome = run_post_derive_pipeline(&state).await.unwrap();
        assert_eq!(outcome, PostDeriveOutcome::PayloadLanded);
        assert_eq!(
            std::fs::read(state.dec_payload_path()).unwrap(),
            b"stale but valid"
        );
    }

    #[test]
    fn looks_like_zip_checks_the_pk_magic() {
        assert!(looks_like_zip(b"PK\x03\x04rest"));
        assert!(!looks_like_zip(b"not a zip"));
        assert!(!looks_like_zip(b"PK"));
    }
}
