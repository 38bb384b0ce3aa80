// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::dispatcher::{DispatchOutcome, LogSink};
use crate::errors::DecodeError;
use crate::message::QueueMessage;
use crate::normalizer::EventNormalizer;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error};

/// What happened to a single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Delivered,
    /// Malformed input; dropped and never retried.
    Undecodable(DecodeError),
    Dispatched(DispatchOutcome),
}

impl ProcessOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, ProcessOutcome::Delivered)
    }
}

/// Normalize, sign and dispatch for one message.
pub struct MessageProcessor {
    normalizer: EventNormalizer,
    source: String,
    sink: Arc<dyn LogSink>,
}

impl MessageProcessor {
    pub fn new(
        normalizer: EventNormalizer,
        source: impl Into<String>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            normalizer,
            source: source.into(),
            sink,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Request body for `message`. Events republished by the requeuer are
    /// already normalized and go out unchanged.
    pub fn prepare(&self, message: &QueueMessage) -> Result<Vec<u8>, DecodeError> {
        if message.is_requeued_event() {
            return Ok(message.data.clone());
        }
        let event = self
            .normalizer
            .normalize(&message.data, &self.source, Utc::now())?;
        event
            .to_body()
            .map_err(|e| DecodeError::InvalidPayload(e.to_string()))
    }

    pub async fn deliver(&self, body: Vec<u8>) -> DispatchOutcome {
        self.sink.send(body).await
    }

    pub async fn process(&self, message: &QueueMessage) -> ProcessOutcome {
        let body = match self.prepare(message) {
            Ok(body) => body,
            Err(e) => {
                error!(
                    "Dropping message {}: {e}",
                    message.message_id.as_deref().unwrap_or("<unknown>")
                );
                return ProcessOutcome::Undecodable(e);
            }
        };
        match self.deliver(body).await {
            DispatchOutcome::Success => ProcessOutcome::Delivered,
            outcome => {
                debug!(
                    "Message {} not delivered: {outcome:?}",
                    message.message_id.as_deref().unwrap_or("<unknown>")
                );
                ProcessOutcome::Dispatched(outcome)
            }
        }
    }
}
