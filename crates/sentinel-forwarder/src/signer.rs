// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! SharedKey request signing for the Log Analytics Data Collector API.
//!
//! The string to sign is
//!
//! ```text
//! {method}\n{content_length}\n{content_type}\nx-ms-date:{date}\n{resource}
//! ```
//!
//! HMAC-SHA256'd with the base64-decoded workspace key. The header value is
//! `SharedKey {workspace_id}:{base64(digest)}`.

use crate::errors::SignError;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

pub const RFC1123_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Workspace id and base64 shared key. Only lives for one invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct SinkCredential {
    pub workspace_id: String,
    pub shared_key: String,
}

impl SinkCredential {
    pub fn new(workspace_id: impl Into<String>, shared_key: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            shared_key: shared_key.into(),
        }
    }
}

impl fmt::Debug for SinkCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkCredential")
            .field("workspace_id", &self.workspace_id)
            .field("shared_key", &"<redacted>")
            .finish()
    }
}

/// Formats `time` the way the `x-ms-date` header expects.
pub fn rfc1123_date(time: DateTime<Utc>) -> String {
    time.format(RFC1123_FORMAT).to_string()
}

/// Everything that goes into one signature, plus the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub method: String,
    pub content_length: usize,
    pub content_type: String,
    pub date: String,
    pub resource: String,
    pub authorization: String,
}

impl SignedRequest {
    pub fn new(
        credential: &SinkCredential,
        method: &str,
        content_length: usize,
        content_type: &str,
        date: &str,
        resource: &str,
    ) -> Result<Self, SignError> {
        let authorization = build_signature(
            credential,
            date,
            content_length,
            method,
            content_type,
            resource,
        )?;
        Ok(Self {
            method: method.to_string(),
            content_length,
            content_type: content_type.to_string(),
            date: date.to_string(),
            resource: resource.to_string(),
            authorization,
        })
    }
}

/// Returns the `Authorization` header value for one request.
pub fn build_signature(
    credential: &SinkCredential,
    date: &str,
    content_length: usize,
    method: &str,
    content_type: &str,
    resource: &str,
) -> Result<String, SignError> {
    let string_to_hash =
        format!("{method}\n{content_length}\n{content_type}\nx-ms-date:{date}\n{resource}");
    let decoded_key = STANDARD.decode(credential.shared_key.trim())?;
    let mut mac =
        HmacSha256::new_from_slice(&decoded_key).map_err(|_| SignError::InvalidKeyLength)?;
    mac.update(string_to_hash.as_bytes());
    let encoded_hash = STANDARD.encode(mac.finalize().into_bytes());
    Ok(format!(
        "SharedKey {}:{}",
        credential.workspace_id, encoded_hash
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    const DATE: &str = "Mon, 01 Jan 2024 00:00:00 GMT";

    fn credential() -> SinkCredential {
        SinkCredential::new("WSID", STANDARD.encode("secretkey"))
    }

    #[test]
    fn test_pinned_signature() {
        let signature = build_signature(
            &credential(),
            DATE,
            42,
            "POST",
            "application/json",
            "/api/logs",
        )
        .expect("signing should succeed");
        assert_eq!(
            signature,
            "SharedKey WSID:Rf+jcIF+PZNyxn7wlET5ZP0PZ8e/4q+FurInLfbeGbE="
        );
    }

    #[test]
    fn test_signed_request_carries_inputs() {
        let request = SignedRequest::new(
            &credential(),
            "POST",
            42,
            "application/json",
            DATE,
            "/api/logs",
        )
        .expect("signing should succeed");
        assert_eq!(request.content_length, 42);
        assert_eq!(request.date, DATE);
        assert!(request.authorization.starts_with("SharedKey WSID:"));
    }

    #[test]
    fn test_each_input_changes_signature() {
        let cred = credential();
        let base = build_signature(&cred, DATE, 42, "POST", "application/json", "/api/logs")
            .expect("signing should succeed");

        let variants = [
            build_signature(
                &cred,
                "Tue, 02 Jan 2024 00:00:00 GMT",
                42,
                "POST",
                "application/json",
                "/api/logs",
            ),
            build_signature(&cred, DATE, 43, "POST", "application/json", "/api/logs"),
            build_signature(&cred, DATE, 42, "PUT", "application/json", "/api/logs"),
            build_signature(&cred, DATE, 42, "POST", "text/plain", "/api/logs"),
            build_signature(&cred, DATE, 42, "POST", "application/json", "/api/other"),
            build_signature(
                &SinkCredential::new("WSID", STANDARD.encode("otherkey")),
                DATE,
                42,
                "POST",
                "application/json",
                "/api/logs",
            ),
        ];
        for variant in variants {
            assert_ne!(variant.expect("signing should succeed"), base);
        }
    }

    #[test]
    fn test_invalid_key_is_rejected() {
        let cred = SinkCredential::new("WSID", "not base64!!");
        let result = build_signature(&cred, DATE, 1, "POST", "application/json", "/api/logs");
        assert!(matches!(result, Err(SignError::InvalidKey(_))));
    }

    #[test]
    fn test_rfc1123_date() {
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(rfc1123_date(time), DATE);
    }

    #[test]
    fn test_debug_redacts_key() {
        let debug = format!("{:?}", credential());
        assert!(debug.contains("WSID"));
        assert!(!debug.contains(&STANDARD.encode("secretkey")));
    }

    proptest! {
        #[test]
        fn signature_is_deterministic(len in 0usize..100_000, resource in "/[a-z]{1,12}") {
            let cred = credential();
            let first = build_signature(&cred, DATE, len, "POST", "application/json", &resource);
            let second = build_signature(&cred, DATE, len, "POST", "application/json", &resource);
            prop_assert_eq!(first.unwrap(), second.unwrap());
        }
    }
}
