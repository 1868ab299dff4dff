//! `Orchestrator` over the Docker Engine swarm API.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use fleet_core::config::DockerConfig;
use fleet_core::{
    Orchestrator, OrchestratorError, OrchestratorResult, RegistryCredentials, ServiceId,
    ServiceSpec, SpecVersion, Task, TaskFilter, UsageSample, VersionedSpec,
};

use crate::transport::{EngineClient, EngineResponse, Endpoint, TransportError, encode_query};
use crate::wire;

/// Header carrying registry credentials so nodes can pull private images.
const REGISTRY_AUTH: &str = "X-Registry-Auth";

pub struct DockerOrchestrator {
    client: EngineClient,
    registry_auth: Option<String>,
}

impl DockerOrchestrator {
    pub fn new(client: EngineClient) -> Self {
        Self {
            client,
            registry_auth: None,
        }
    }

    /// Engine client and registry credentials from the `[docker]` section.
    pub fn from_config(config: &DockerConfig) -> Result<Self, TransportError> {
        let client = EngineClient::new(Endpoint::parse(&config.host)?, &config.api_version);
        Ok(Self::new(client).with_credentials(&config.credentials()))
    }

    pub fn with_credentials(mut self, credentials: &RegistryCredentials) -> Self {
        self.registry_auth = registry_auth(credentials);
        self
    }

    pub fn client(&self) -> &EngineClient {
        &self.client
    }

    fn auth_headers(&self) -> Vec<(&'static str, String)> {
        self.registry_auth
            .iter()
            .map(|auth| (REGISTRY_AUTH, auth.clone()))
            .collect()
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, String)],
        body: Option<Vec<u8>>,
        subject: &str,
    ) -> OrchestratorResult<EngineResponse> {
        let response = self
            .client
            .send(method, &self.client.path(path), headers, body)
            .await
            .map_err(|e| OrchestratorError::Unavailable(e.to_string()))?;
        if response.status.is_success() {
            Ok(response)
        } else {
            Err(error_for(response.status, &response.body, subject))
        }
    }

    async fn inspect_raw(&self, id: &str) -> OrchestratorResult<wire::Service> {
        let response = self
            .call(Method::GET, &format!("/services/{id}"), &[], None, id)
            .await?;
        decode(&response.body)
    }
}

#[async_trait]
impl Orchestrator for DockerOrchestrator {
    async fn inspect_service(&self, id: &str) -> OrchestratorResult<VersionedSpec> {
        Ok(self.inspect_raw(id).await?.to_versioned())
    }

    async fn update_service(
        &self,
        id: &str,
        version: SpecVersion,
        spec: &ServiceSpec,
    ) -> OrchestratorResult<Vec<String>> {
        // Re-read so fields the domain spec does not model survive the write.
        let current = self.inspect_raw(id).await?;
        let body = serde_json::to_vec(&current.spec.overlay(spec))
            .map_err(|e| OrchestratorError::Decode(e.to_string()))?;

        let path = format!("/services/{id}/update?version={}", version.0);
        let response = self
            .call(Method::POST, &path, &self.auth_headers(), Some(body), id)
            .await
            .map_err(|e| match e {
                OrchestratorError::Api { message, .. } if message.contains("out of sequence") => {
                    OrchestratorError::VersionConflict {
                        service: id.to_string(),
                        version,
                    }
                }
                other => other,
            })?;

        let updated: wire::ServiceUpdated = decode(&response.body)?;
        let warnings = updated.warnings.unwrap_or_default();
        debug!(service = %id, %version, warnings = warnings.len(), "service updated");
        Ok(warnings)
    }

    async fn create_service(&self, spec: &ServiceSpec) -> OrchestratorResult<ServiceId> {
        let body = serde_json::to_vec(&wire::Spec::from_spec(spec))
            .map_err(|e| OrchestratorError::Decode(e.to_string()))?;
        let response = self
            .call(
                Method::POST,
                "/services/create",
                &self.auth_headers(),
                Some(body),
                &spec.name,
            )
            .await?;

        let created: wire::ServiceCreated = decode(&response.body)?;
        if let Some(warning) = created.warning.filter(|w| !w.is_empty()) {
            warn!(service = %spec.name, %warning, "engine warning on create");
        }
        Ok(created.id)
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> OrchestratorResult<Vec<Task>> {
        let path = match &filter.service {
            Some(service) => {
                let filters = serde_json::json!({ "service": [service] }).to_string();
                format!("/tasks?filters={}", encode_query(&filters))
            }
            None => "/tasks".to_string(),
        };
        let subject = filter.service.as_deref().unwrap_or("tasks");
        let response = self.call(Method::GET, &path, &[], None, subject).await?;
        let tasks: Vec<wire::WireTask> = decode(&response.body)?;
        Ok(tasks.iter().map(wire::WireTask::to_task).collect())
    }

    async fn container_stats(&self, container_id: &str) -> OrchestratorResult<UsageSample> {
        let path = format!("/containers/{container_id}/stats?stream=false");
        let response = self
            .call(Method::GET, &path, &[], None, container_id)
            .await?;
        let stats: wire::Stats = decode(&response.body)?;
        Ok(stats.to_sample())
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> OrchestratorResult<T> {
    serde_json::from_slice(body).map_err(|e| OrchestratorError::Decode(e.to_string()))
}

/// Map a non-2xx engine response onto the error taxonomy.
pub(crate) fn error_for(status: StatusCode, body: &[u8], subject: &str) -> OrchestratorError {
    let message = serde_json::from_slice::<wire::ErrorMessage>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());

    match status {
        StatusCode::NOT_FOUND => OrchestratorError::NotFound(subject.to_string()),
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
            OrchestratorError::Unavailable(message)
        }
        status => OrchestratorError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

/// Base64url JSON credentials for `X-Registry-Auth`. None without a username.
pub fn registry_auth(credentials: &RegistryCredentials) -> Option<String> {
    if credentials.username.is_empty() {
        return None;
    }
    let json = serde_json::json!({
        "username": credentials.username,
        "password": credentials.password,
        "serveraddress": credentials.server,
    });
    Some(URL_SAFE.encode(json.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_header_round_trips_credentials() {
        let credentials = RegistryCredentials {
            server: "registry.local".into(),
            username: "ci".into(),
            password: "s3cr3t?>".into(),
        };
        let header = registry_auth(&credentials).unwrap();
        let decoded: serde_json::Value =
            serde_json::from_slice(&URL_SAFE.decode(header).unwrap()).unwrap();
        assert_eq!(decoded["username"], "ci");
        assert_eq!(decoded["password"], "s3cr3t?>");
        assert_eq!(decoded["serveraddress"], "registry.local");

        assert!(registry_auth(&RegistryCredentials::default()).is_none());
    }

    #[test]
    fn error_mapping() {
        let body = br#"{"message":"service web not found"}"#;
        assert_eq!(
            error_for(StatusCode::NOT_FOUND, body, "web"),
            OrchestratorError::NotFound("web".into())
        );
        assert!(error_for(StatusCode::SERVICE_UNAVAILABLE, b"", "web").is_transient());

        let err = error_for(
            StatusCode::INTERNAL_SERVER_ERROR,
            br#"{"message":"rpc error: code = Unknown desc = update out of sequence"}"#,
            "web",
        );
        assert!(matches!(err, OrchestratorError::Api { status: 500, ref message } if message.contains("out of sequence")));

        let err = error_for(StatusCode::CONFLICT, b"name conflicts", "web");
        assert_eq!(
            err,
            OrchestratorError::Api {
                status: 409,
                message: "name conflicts".into()
            }
        );
    }
}
