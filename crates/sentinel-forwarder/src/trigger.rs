// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP entry points for Pub/Sub push deliveries.
//!
//! A 2xx response acknowledges the pushed message. Per-message failures are
//! handled inside the pipeline and still answer 2xx; only malformed requests
//! and fatal invocation errors answer otherwise.

use crate::errors::ForwarderError;
use crate::forwarder::Forwarder;
use crate::http_utils::{log_and_create_http_response, verify_request_content_length, HttpResponse};
use crate::ingest::IngestOutcome;
use crate::message::{AckToken, PushEnvelope, QueueMessage};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::{body::Body, http, Method, Request, StatusCode};
use std::sync::Arc;
use tracing::info;

pub const INGEST_PATH: &str = "/";
pub const RETRY_PATH: &str = "/retry";
/// Pub/Sub caps a message at 10MB; the push envelope adds base64 overhead.
pub const MAX_PUSH_CONTENT_LENGTH: usize = 14 * 1024 * 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub async fn handle_request<B>(
    forwarder: Arc<Forwarder>,
    req: Request<B>,
) -> http::Result<HttpResponse>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    match (req.method(), req.uri().path()) {
        (&Method::POST, INGEST_PATH) => handle_push(&forwarder, req).await,
        // The pushed trigger message is only a wake-up signal.
        (&Method::POST, RETRY_PATH) => handle_retry(&forwarder).await,
        (method, path) => log_and_create_http_response(
            &format!("No route for {method} {path}"),
            StatusCode::NOT_FOUND,
        ),
    }
}

async fn read_envelope<B>(req: Request<B>) -> Result<PushEnvelope, http::Result<HttpResponse>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    if let Some(response) = verify_request_content_length(
        req.headers(),
        MAX_PUSH_CONTENT_LENGTH,
        "Error processing push",
    ) {
        return Err(response);
    }
    // Chunked bodies carry no Content-Length, so the cap is enforced while reading.
    let body = match Limited::new(req.into_body(), MAX_PUSH_CONTENT_LENGTH)
        .collect()
        .await
    {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            return Err(log_and_create_http_response(
                "Error processing push: Payload too large",
                StatusCode::PAYLOAD_TOO_LARGE,
            ))
        }
        Err(e) => {
            return Err(log_and_create_http_response(
                &format!("Error reading push body: {e}"),
                StatusCode::BAD_REQUEST,
            ))
        }
    };
    serde_json::from_slice(&body).map_err(|e| {
        log_and_create_http_response(
            &format!("Error decoding push envelope: {e}"),
            StatusCode::BAD_REQUEST,
        )
    })
}

fn fatal_response(e: &ForwarderError) -> http::Result<HttpResponse> {
    log_and_create_http_response(
        &format!("Invocation failed: {e}"),
        StatusCode::INTERNAL_SERVER_ERROR,
    )
}

async fn handle_push<B>(forwarder: &Forwarder, req: Request<B>) -> http::Result<HttpResponse>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let envelope = match read_envelope(req).await {
        Ok(envelope) => envelope,
        Err(response) => return response,
    };
    let token = AckToken::new(envelope.message.message_id.clone().unwrap_or_default());
    let message: QueueMessage = match envelope.message.into_queue_message(token) {
        Ok(message) => message,
        Err(e) => {
            return log_and_create_http_response(
                &format!("Error decoding message data: {e}"),
                StatusCode::BAD_REQUEST,
            )
        }
    };

    match forwarder.ingest(&message, &envelope.subscription).await {
        Ok(outcome) => {
            let delivered = u8::from(outcome == IngestOutcome::Delivered);
            info!("INGEST | in:1 success:{delivered}");
            log_and_create_http_response(&format!("{outcome:?}"), StatusCode::OK)
        }
        Err(e) => fatal_response(&e),
    }
}

async fn handle_retry(forwarder: &Forwarder) -> http::Result<HttpResponse> {
    match forwarder.drain_retry_queue().await {
        Ok(report) => log_and_create_http_response(
            &format!(
                "Drained {} of {} messages",
                report.acknowledged, report.pulled
            ),
            StatusCode::OK,
        ),
        Err(e) => fatal_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForwarderConfig;
    use crate::queue::Publisher;
    use crate::secrets::StaticSecretStore;
    use async_trait::async_trait;
    use http_body_util::Full;
    use hyper::header;
    use std::collections::HashMap;

    struct NullPublisher;

    #[async_trait]
    impl Publisher for NullPublisher {
        async fn publish(
            &self,
            _topic: &str,
            _payload: Vec<u8>,
            _attributes: HashMap<String, String>,
        ) -> Result<(), ForwarderError> {
            Ok(())
        }
    }

    fn forwarder(config: ForwarderConfig) -> Arc<Forwarder> {
        let secrets = StaticSecretStore::new([("id", "WSID"), ("key", "c2VjcmV0a2V5")]);
        Arc::new(Forwarder::new(
            Arc::new(config),
            reqwest::Client::new(),
            Arc::new(secrets),
            Arc::new(NullPublisher),
            None,
        ))
    }

    fn request(method: Method, path: &str, body: &'static str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_LENGTH, body.len().to_string())
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let response = handle_request(
            forwarder(ForwarderConfig::default()),
            request(Method::GET, "/healthz", ""),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_bad_request() {
        let response = handle_request(
            forwarder(ForwarderConfig::default()),
            request(Method::POST, INGEST_PATH, "not json"),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_content_length_is_rejected() {
        let req = Request::builder()
            .method(Method::POST)
            .uri(INGEST_PATH)
            .body(Full::new(Bytes::from_static(b"{}")))
            .unwrap();
        let response = handle_request(forwarder(ForwarderConfig::default()), req)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::LENGTH_REQUIRED);
    }

    #[tokio::test]
    async fn test_oversized_chunked_push_is_rejected() {
        let body = vec![b' '; MAX_PUSH_CONTENT_LENGTH + 1];
        let req = Request::builder()
            .method(Method::POST)
            .uri(INGEST_PATH)
            .header(header::TRANSFER_ENCODING, "chunked")
            .body(Full::new(Bytes::from(body)))
            .unwrap();
        let response = handle_request(forwarder(ForwarderConfig::default()), req)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_invalid_base64_data_is_bad_request() {
        let response = handle_request(
            forwarder(ForwarderConfig::default()),
            request(
                Method::POST,
                INGEST_PATH,
                r#"{"message":{"data":"%%%"},"subscription":"projects/p/subscriptions/s"}"#,
            ),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_retry_topic_fails_invocation() {
        let config = ForwarderConfig {
            workspace_id_secret: "id".to_string(),
            workspace_key_secret: "key".to_string(),
            ..ForwarderConfig::default()
        };
        let response = handle_request(
            forwarder(config),
            request(
                Method::POST,
                INGEST_PATH,
                r#"{"message":{"data":"e30="},"subscription":"projects/p/subscriptions/s"}"#,
            ),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_retry_without_subscription_fails_invocation() {
        let response = handle_request(
            forwarder(ForwarderConfig::default()),
            request(Method::POST, RETRY_PATH, "{}"),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
