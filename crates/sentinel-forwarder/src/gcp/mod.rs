// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Minimal REST clients for the Google Cloud services the forwarder talks to.

pub mod auth;
pub mod pubsub;
pub mod secret_manager;

use crate::errors::GcpApiError;
use auth::TokenSource;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Resource path under `projects/{project_id}/{collection}/`, unless `name`
/// is already a full path.
pub(crate) fn resource_path(project_id: &str, collection: &str, name: &str) -> String {
    if name.starts_with("projects/") {
        name.to_string()
    } else {
        format!("projects/{project_id}/{collection}/{name}")
    }
}

pub(crate) async fn authorize(
    request: RequestBuilder,
    token_source: Option<&Arc<dyn TokenSource>>,
) -> Result<RequestBuilder, GcpApiError> {
    match token_source {
        Some(source) => {
            let token = source
                .token()
                .await
                .map_err(|e| GcpApiError::Auth(e.to_string()))?;
            Ok(request.bearer_auth(token))
        }
        None => Ok(request),
    }
}

pub(crate) async fn send_json<R: DeserializeOwned>(
    request: RequestBuilder,
) -> Result<R, GcpApiError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GcpApiError::Status { status, body });
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| GcpApiError::Malformed(e.to_string()))
}
