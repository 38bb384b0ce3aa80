// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ForwarderError;
use crate::signer::{rfc1123_date, SignedRequest, SinkCredential};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use reqwest::StatusCode;
use std::time::Instant;
use tracing::{debug, error, warn};

pub const SINK_RESOURCE: &str = "/api/logs";
pub const SINK_API_VERSION: &str = "2016-04-01";
pub const SINK_CONTENT_TYPE: &str = "application/json";
const SINK_METHOD: &str = "POST";

/// Result of one POST to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 2xx
    Success,
    /// 4xx. The sink rejected the event; retrying will not help.
    ClientError(StatusCode),
    /// 5xx, connection failure, timeout or any other transport fault.
    TransientError(String),
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Success)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchOutcome::TransientError(_))
    }

    pub fn from_status(status: StatusCode) -> Self {
        if status.is_success() {
            DispatchOutcome::Success
        } else if status.is_client_error() {
            DispatchOutcome::ClientError(status)
        } else {
            DispatchOutcome::TransientError(format!("sink responded with {status}"))
        }
    }
}

/// Destination for serialized log events.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn send(&self, body: Vec<u8>) -> DispatchOutcome;
}

/// Data Collector endpoint for a workspace.
pub fn sink_url(workspace_id: &str) -> String {
    format!(
        "https://{workspace_id}.ods.opinsights.azure.com{SINK_RESOURCE}?api-version={SINK_API_VERSION}"
    )
}

/// Posts signed events to a Log Analytics workspace.
#[derive(Debug, Clone)]
pub struct SinkDispatcher {
    client: reqwest::Client,
    credential: SinkCredential,
    table_name: String,
    url: String,
}

impl SinkDispatcher {
    /// Fails when the shared key is not valid base64, so a bad key surfaces
    /// once per invocation rather than once per message.
    pub fn new(
        client: reqwest::Client,
        credential: SinkCredential,
        table_name: impl Into<String>,
    ) -> Result<Self, ForwarderError> {
        let url = sink_url(&credential.workspace_id);
        Self::with_url(client, credential, table_name, url)
    }

    /// Same as [`SinkDispatcher::new`] but posting to `base_url` + `/api/logs`.
    pub fn with_base_url(
        client: reqwest::Client,
        credential: SinkCredential,
        table_name: impl Into<String>,
        base_url: &str,
    ) -> Result<Self, ForwarderError> {
        let url = format!(
            "{}{SINK_RESOURCE}?api-version={SINK_API_VERSION}",
            base_url.trim_end_matches('/')
        );
        Self::with_url(client, credential, table_name, url)
    }

    fn with_url(
        client: reqwest::Client,
        credential: SinkCredential,
        table_name: impl Into<String>,
        url: String,
    ) -> Result<Self, ForwarderError> {
        STANDARD
            .decode(credential.shared_key.as_bytes())
            .map_err(|e| ForwarderError::Signing(e.into()))?;
        Ok(Self {
            client,
            credential,
            table_name: table_name.into(),
            url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn sign(&self, content_length: usize) -> Result<SignedRequest, ForwarderError> {
        let date = rfc1123_date(Utc::now());
        Ok(SignedRequest::new(
            &self.credential,
            SINK_METHOD,
            content_length,
            SINK_CONTENT_TYPE,
            &date,
            SINK_RESOURCE,
        )?)
    }
}

#[async_trait]
impl LogSink for SinkDispatcher {
    async fn send(&self, body: Vec<u8>) -> DispatchOutcome {
        let signed = match self.sign(body.len()) {
            Ok(signed) => signed,
            Err(e) => {
                error!("SINK | Unable to sign request: {e}");
                return DispatchOutcome::TransientError(e.to_string());
            }
        };

        let time = Instant::now();
        let response = self
            .client
            .post(&self.url)
            .header("content-type", SINK_CONTENT_TYPE)
            .header("Authorization", &signed.authorization)
            .header("Log-Type", &self.table_name)
            .header("x-ms-date", &signed.date)
            .body(body)
            .send()
            .await;
        let elapsed = time.elapsed();

        match response {
            Ok(resp) => {
                let status = resp.status();
                let outcome = DispatchOutcome::from_status(status);
                match &outcome {
                    DispatchOutcome::Success => {
                        debug!(
                            "SINK | Delivered event in {} ms with status {status}",
                            elapsed.as_millis()
                        );
                    }
                    DispatchOutcome::ClientError(_) => {
                        let text = resp.text().await.unwrap_or_default();
                        error!("SINK | Event rejected with status {status}, dropping: {text}");
                    }
                    DispatchOutcome::TransientError(_) => {
                        let text = resp.text().await.unwrap_or_default();
                        warn!("SINK | Sink unavailable with status {status}: {text}");
                    }
                }
                outcome
            }
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("timeout after {} ms", elapsed.as_millis())
                } else if e.is_connect() {
                    format!("connection error: {e}")
                } else {
                    format!("request error: {e}")
                };
                warn!("SINK | Failed to post event: {reason}");
                DispatchOutcome::TransientError(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_utils::build_client;
    use mockito::{Matcher, Server};
    use std::time::Duration;

    fn credential() -> SinkCredential {
        SinkCredential::new("WSID", STANDARD.encode("secretkey"))
    }

    fn dispatcher(base_url: &str) -> SinkDispatcher {
        let client = build_client(None, Duration::from_secs(2)).unwrap();
        SinkDispatcher::with_base_url(client, credential(), "GCPLogs", base_url).unwrap()
    }

    #[test]
    fn test_sink_url() {
        assert_eq!(
            sink_url("WSID"),
            "https://WSID.ods.opinsights.azure.com/api/logs?api-version=2016-04-01"
        );
    }

    #[test]
    fn test_outcome_from_status() {
        assert_eq!(
            DispatchOutcome::from_status(StatusCode::OK),
            DispatchOutcome::Success
        );
        assert_eq!(
            DispatchOutcome::from_status(StatusCode::FORBIDDEN),
            DispatchOutcome::ClientError(StatusCode::FORBIDDEN)
        );
        let bad_gateway = DispatchOutcome::from_status(StatusCode::BAD_GATEWAY);
        assert!(bad_gateway.is_retryable());
        let bad_request = DispatchOutcome::from_status(StatusCode::BAD_REQUEST);
        assert!(!bad_request.is_retryable());
    }

    #[test]
    fn test_invalid_key_rejected_at_construction() {
        let client = build_client(None, Duration::from_secs(1)).unwrap();
        let result = SinkDispatcher::new(client, SinkCredential::new("WSID", "%%%"), "GCPLogs");
        assert!(matches!(result, Err(ForwarderError::Signing(_))));
    }

    #[tokio::test]
    async fn test_send_success_with_signed_headers() {
        let mut server = Server::new_async().await;
        let body = br#"{"time":1,"event":{}}"#.to_vec();
        let authorization = Matcher::Regex(r"^SharedKey WSID:[A-Za-z0-9+/=]{44}$".into());
        let date = Matcher::Regex(r"^\w{3}, \d{2} \w{3} \d{4} \d{2}:\d{2}:\d{2} GMT$".into());
        let mock = server
            .mock("POST", "/api/logs")
            .match_query(Matcher::UrlEncoded(
                "api-version".into(),
                "2016-04-01".into(),
            ))
            .match_header("content-type", "application/json")
            .match_header("Log-Type", "GCPLogs")
            .match_header("Authorization", authorization)
            .match_header("x-ms-date", date)
            .match_body(Matcher::Exact(String::from_utf8(body.clone()).unwrap()))
            .with_status(200)
            .create_async()
            .await;

        let outcome = dispatcher(&server.url()).send(body).await;
        assert_eq!(outcome, DispatchOutcome::Success);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_client_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/logs")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"Error":"InvalidAuthorization"}"#)
            .create_async()
            .await;

        let outcome = dispatcher(&server.url()).send(b"{}".to_vec()).await;
        let forbidden = DispatchOutcome::ClientError(StatusCode::FORBIDDEN);
        assert_eq!(outcome, forbidden);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_server_error_is_transient() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/logs")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let outcome = dispatcher(&server.url()).send(b"{}".to_vec()).await;
        assert!(outcome.is_retryable());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_connection_failure_is_transient() {
        // nothing listens on port 9 locally
        let outcome = dispatcher("http://127.0.0.1:9").send(b"{}".to_vec()).await;
        assert!(outcome.is_retryable());
    }
}
