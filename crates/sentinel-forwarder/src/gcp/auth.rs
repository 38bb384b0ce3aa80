// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::{ForwarderError, GcpApiError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Supplies OAuth2 bearer tokens for Google APIs.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, ForwarderError>;
}

/// A fixed token, e.g. from `gcloud auth print-access-token`.
#[derive(Debug, Clone)]
pub struct StaticTokenSource(pub String);

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<String, ForwarderError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Default service account token from the instance metadata server, cached
/// until shortly before it expires.
#[derive(Debug)]
pub struct MetadataTokenSource {
    client: reqwest::Client,
    url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl MetadataTokenSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_url(client, METADATA_TOKEN_URL)
    }

    pub fn with_url(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<TokenResponse, GcpApiError> {
        let request = self
            .client
            .get(&self.url)
            .header("Metadata-Flavor", "Google");
        super::send_json(request).await
    }
}

#[async_trait]
impl TokenSource for MetadataTokenSource {
    async fn token(&self) -> Result<String, ForwarderError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .fetch()
            .await
            .map_err(|e| ForwarderError::Auth(e.to_string()))?;
        debug!(
            "AUTH | Fetched access token valid for {}s",
            response.expires_in
        );
        let lifetime = Duration::from_secs(response.expires_in);
        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        });
        Ok(response.access_token)
    }
}
