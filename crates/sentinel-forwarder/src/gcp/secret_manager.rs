// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::auth::TokenSource;
use super::{authorize, resource_path, send_json};
use crate::errors::{ForwarderError, GcpApiError};
use crate::secrets::SecretStore;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error};

pub const SECRET_MANAGER_BASE_URL: &str = "https://secretmanager.googleapis.com";

#[derive(Deserialize)]
struct AccessSecretVersionResponse {
    payload: SecretPayload,
}

#[derive(Deserialize)]
struct SecretPayload {
    data: String,
}

/// Reads the latest version of a secret from Secret Manager.
#[derive(Clone)]
pub struct SecretManagerStore {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    token_source: Option<Arc<dyn TokenSource>>,
}

impl SecretManagerStore {
    pub fn new(
        client: reqwest::Client,
        project_id: impl Into<String>,
        token_source: Option<Arc<dyn TokenSource>>,
    ) -> Self {
        Self {
            client,
            base_url: SECRET_MANAGER_BASE_URL.to_string(),
            project_id: project_id.into(),
            token_source,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// `name` may be a bare secret id or a full `projects/.../versions/...` path.
    fn version_path(&self, name: &str) -> String {
        let path = resource_path(&self.project_id, "secrets", name);
        if path.contains("/versions/") {
            path
        } else {
            format!("{path}/versions/latest")
        }
    }

    async fn access(&self, name: &str) -> Result<String, GcpApiError> {
        let url = format!("{}/v1/{}:access", self.base_url, self.version_path(name));
        let request = authorize(self.client.get(url), self.token_source.as_ref()).await?;
        let response: AccessSecretVersionResponse = send_json(request).await?;
        let bytes = STANDARD
            .decode(response.payload.data.as_bytes())
            .map_err(|e| GcpApiError::Malformed(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| GcpApiError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl SecretStore for SecretManagerStore {
    async fn get(&self, name: &str) -> Result<String, ForwarderError> {
        debug!("SECRETS | Retrieving secret value for {name}");
        self.access(name).await.map_err(|e| {
            error!("SECRETS | Unable to retrieve secret {name}: {e}");
            ForwarderError::SecretUnavailable(name.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcp::auth::StaticTokenSource;
    use mockito::Server;

    fn store(server: &Server) -> SecretManagerStore {
        SecretManagerStore::new(
            reqwest::Client::new(),
            "proj",
            Some(Arc::new(StaticTokenSource("token".to_string()))),
        )
        .with_base_url(&server.url())
    }

    #[tokio::test]
    async fn test_get_latest_version() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock(
                "GET",
                "/v1/projects/proj/secrets/law-workspace-id/versions/latest:access",
            )
            .match_header("authorization", "Bearer token")
            .with_status(200)
            .with_body(
                r#"{"name":"projects/1/secrets/law-workspace-id/versions/3","payload":{"data":"V1NJRA=="}}"#,
            )
            .create_async()
            .await;

        assert_eq!(
            store(&server).get("law-workspace-id").await.unwrap(),
            "WSID"
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_pinned_version_path() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/projects/other/secrets/key/versions/2:access")
            .with_status(200)
            .with_body(r#"{"payload":{"data":"a2V5"}}"#)
            .create_async()
            .await;

        assert_eq!(
            store(&server)
                .get("projects/other/secrets/key/versions/2")
                .await
                .unwrap(),
            "key"
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_secret_is_unavailable() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock(
                "GET",
                "/v1/projects/proj/secrets/nope/versions/latest:access",
            )
            .with_status(404)
            .with_body(r#"{"error":{"code":404}}"#)
            .create_async()
            .await;

        assert!(matches!(
            store(&server).get("nope").await,
            Err(ForwarderError::SecretUnavailable(name)) if name == "nope"
        ));
    }
}
