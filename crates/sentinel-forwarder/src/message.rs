// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Attribute set by the requeuer; its presence marks an already-normalized event.
pub const ORIGIN_ATTRIBUTE: &str = "origin";
pub const SOURCE_ATTRIBUTE: &str = "source";

/// Queue-assigned, single-use acknowledgment token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckToken(String);

impl AckToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AckToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub data: Vec<u8>,
    pub ack_token: AckToken,
    pub attributes: HashMap<String, String>,
    pub message_id: Option<String>,
}

impl QueueMessage {
    pub fn new(data: impl Into<Vec<u8>>, ack_token: AckToken) -> Self {
        Self {
            data: data.into(),
            ack_token,
            attributes: HashMap::new(),
            message_id: None,
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// True when the payload was republished by the failure requeuer and is
    /// already a serialized log event.
    pub fn is_requeued_event(&self) -> bool {
        self.attributes.contains_key(ORIGIN_ATTRIBUTE)
    }
}

/// `PubsubMessage` as it appears on the REST and push wires.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    /// Base64 payload
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<String>,
}

impl PubsubMessage {
    pub fn encode(payload: &[u8], attributes: HashMap<String, String>) -> Self {
        Self {
            data: STANDARD.encode(payload),
            attributes,
            message_id: None,
            publish_time: None,
        }
    }

    pub fn decode_data(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.data.as_bytes())
    }

    pub fn into_queue_message(
        self,
        ack_token: AckToken,
    ) -> Result<QueueMessage, base64::DecodeError> {
        Ok(QueueMessage {
            data: self.decode_data()?,
            ack_token,
            attributes: self.attributes,
            message_id: self.message_id,
        })
    }
}

/// Body of a Pub/Sub push delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    pub message: PubsubMessage,
    #[serde(default)]
    pub subscription: String,
}
