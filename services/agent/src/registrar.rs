//! Registrar client: registers this node's identity and TPM endorsement
//! credentials, and exchanges the encrypted AIK-activation blob.
//!
//! The registrar's own protocol (its HTTP shape, its storage) is out of
//! scope; this module is the narrow contract the lifecycle orchestrator
//! needs to proceed.

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, AgentResult};

/// What the node presents to the Registrar to register itself.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationRequest {
    /// Node UUID.
    pub node_uuid: String,
    /// Exported RSA public key (`rsapublickey_exportable`).
    pub pubkey: String,
    /// TPM endorsement key blob.
    pub ek: String,
    /// EK certificate, or the literal string `"virtual"` for nested vTPMs.
    pub ekcert: String,
    /// AIK public blob.
    pub aik: String,
}

/// What the Registrar returns: an encrypted blob the node must activate
/// with the TPM to recover the ephemeral activation key.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationResponse {
    /// Opaque, TPM-encrypted activation blob.
    pub blob: String,
}

/// The Registrar collaborator contract.
#[async_trait::async_trait]
pub trait RegistrarClient: Send + Sync {
    /// Register this node, returning the activation blob.
    async fn register(&self, req: &RegistrationRequest) -> AgentResult<RegistrationResponse>;

    /// Confirm successful activation (recovery of the ephemeral key),
    /// completing the registrar-side handshake.
    async fn activate(&self, node_uuid: &str) -> AgentResult<()>;

    /// Confirm activation for a vTPM-nested node by presenting a deep quote
    /// instead of the plain ephemeral key, completing the registrar-side
    /// handshake for virtual nodes.
    async fn activate_virtual(&self, node_uuid: &str, deep_quote: &str) -> AgentResult<()>;
}

/// Talks to a real Registrar over HTTP.
pub struct HttpRegistrarClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRegistrarClient {
    /// Point at `registrar_ip:registrar_port`.
    pub fn new(registrar_ip: &str, registrar_port: u16) -> Self {
        Self {
            base_url: format!("http://{registrar_ip}:{registrar_port}"),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl RegistrarClient for HttpRegistrarClient {
    async fn register(&self, req: &RegistrationRequest) -> AgentResult<RegistrationResponse> {
        let url = format!("{}/v2/agents/{}", self.base_url, req.node_uuid);
        let response = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| AgentError::RegistrationFailure(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AgentError::RegistrationFailure(format!(
                "registrar returned {}",
                response.status()
            )));
        }

        response
            .json::<RegistrationResponse>()
            .await
            .map_err(|e| AgentError::RegistrationFailure(e.to_string()))
    }

    async fn activate(&self, node_uuid: &str) -> AgentResult<()> {
        let url = format!("{}/v2/agents/{}/activate", self.base_url, node_uuid);
        let response = self
            .client
            .put(&url)
            .send()
            .await
            .map_err(|e| AgentError::RegistrationFailure(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AgentError::RegistrationFailure(format!(
                "activation rejected with {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn activate_virtual(&self, node_uuid: &str, deep_quote: &str) -> AgentResult<()> {
        let url = format!("{}/v2/agents/{}/vactivate", self.base_url, node_uuid);
        let response = self
            .client
            .put(&url)
            .json(&serde_json::json!({ "deepquote": deep_quote }))
            .send()
            .await
            .map_err(|e| AgentError::RegistrationFailure(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AgentError::RegistrationFailure(format!(
                "virtual activation rejected with {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Canned Registrar for tests and STUB_TPM development mode.
pub struct StubRegistrarClient;

#[async_trait::async_trait]
impl RegistrarClient for StubRegistrarClient {
    async fn register(&self, _req: &RegistrationRequest) -> AgentResult<RegistrationResponse> {
        Ok(RegistrationResponse {
            blob: "stub-activation-blob".to_string(),
        })
    }

    async fn activate(&self, _node_uuid: &str) -> AgentResult<()> {
        Ok(())
    }

    async fn activate_virtual(&self, _node_uuid: &str, _deep_quote: &str) -> AgentResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_registrar_round_trips() {
        let registrar = StubRegistrarClient;
        let req = RegistrationRequest {
            node_uuid: "11111111-1111-1111-1111-111111111111".to_string(),
            pubkey: "pubkey".to_string(),
            ek: "ek".to_string(),
            ekcert: "virtual".to_string(),
            aik: "aik".to_string(),
        };
        let resp = registrar.register(&req).await.unwrap();
        assert_eq!(resp.blob, "stub-activation-blob");
        registrar.activate(&req.node_uuid).await.unwrap();
    }

    #[tokio::test]
    async fn stub_registrar_accepts_virtual_activation() {
        let registrar = StubRegistrarClient;
        registrar
            .activate_virtual("11111111-1111-1111-1111-111111111111", "deep-quote-blob")
            .await
            .unwrap();
    }
}
