// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types shared by the forwarding pipeline.

use reqwest::StatusCode;

/// Failure to turn a queue message into a sink-ready event. Malformed input
/// never heals on its own, so these are dropped rather than requeued.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message payload is not valid UTF-8")]
    NotUtf8,

    #[error("no \"timestamp\" field found in message")]
    MissingTimestamp,

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("message payload is not a JSON document: {0}")]
    InvalidPayload(String),
}

/// Failure to compute the SharedKey authorization header.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("workspace key is not valid base64: {0}")]
    InvalidKey(#[from] base64::DecodeError),

    #[error("unable to initialise HMAC with workspace key")]
    InvalidKeyLength,
}

/// Errors surfaced by the forwarder outside of per-message dispatch.
#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unable to decode message: {0}")]
    Decode(#[from] DecodeError),

    #[error("Secret '{0}' is unavailable")]
    SecretUnavailable(String),

    #[error("Unable to sign request: {0}")]
    Signing(#[from] SignError),

    #[error("Unable to obtain access token: {0}")]
    Auth(String),

    #[error("Queue operation failed: {0}")]
    Queue(String),

    #[error("Publishing to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// Errors returned by GCP REST calls, before they are mapped to a
/// [`ForwarderError`] by the calling client.
#[derive(Debug, thiserror::Error)]
pub enum GcpApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no access token: {0}")]
    Auth(String),
}
