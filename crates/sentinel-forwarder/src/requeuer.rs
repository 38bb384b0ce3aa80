// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::message::{ORIGIN_ATTRIBUTE, SOURCE_ATTRIBUTE};
use crate::queue::Publisher;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Value of the `source` attribute on requeued events.
pub const REQUEUE_SOURCE_LABEL: &str = "gcplogIngestionPubSubFunction";

/// Hands events the sink could not take right now to the retry topic.
#[derive(Clone)]
pub struct FailureRequeuer {
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl FailureRequeuer {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publishes `event` unchanged. A publish failure is logged and the event
    /// is dropped. Returns whether the event was accepted.
    pub async fn requeue(&self, event: Vec<u8>, origin: &str) -> bool {
        let attributes = HashMap::from([
            (ORIGIN_ATTRIBUTE.to_string(), origin.to_string()),
            (SOURCE_ATTRIBUTE.to_string(), REQUEUE_SOURCE_LABEL.to_string()),
        ]);
        let size = event.len();
        match self.publisher.publish(&self.topic, event, attributes).await {
            Ok(()) => {
                debug!("REQUEUE | Published {size} byte event to {}", self.topic);
                true
            }
            Err(e) => {
                error!("REQUEUE | Dropping event from {origin}: {e}");
                false
            }
        }
    }
}
