// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::dispatcher::DispatchOutcome;
use crate::message::QueueMessage;
use crate::processor::MessageProcessor;
use crate::requeuer::FailureRequeuer;
use tracing::{debug, error, warn};

/// Fate of one pushed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Delivered,
    /// Undecodable or rejected by the sink; not retried.
    Dropped,
    /// Sink unavailable; handed to the retry topic.
    Requeued,
    /// Sink unavailable and the retry topic refused the event.
    Lost,
}

/// Event-triggered path: one message, one dispatch, requeue on transient
/// failure.
pub struct IngestHandler {
    processor: MessageProcessor,
    requeuer: FailureRequeuer,
}

impl IngestHandler {
    pub fn new(processor: MessageProcessor, requeuer: FailureRequeuer) -> Self {
        Self {
            processor,
            requeuer,
        }
    }

    pub async fn handle(&self, message: &QueueMessage) -> IngestOutcome {
        let body = match self.processor.prepare(message) {
            Ok(body) => body,
            Err(e) => {
                error!("INGEST | Dropping undecodable message: {e}");
                return IngestOutcome::Dropped;
            }
        };

        match self.processor.deliver(body.clone()).await {
            DispatchOutcome::Success => {
                debug!("INGEST | Event delivered");
                IngestOutcome::Delivered
            }
            DispatchOutcome::ClientError(status) => {
                error!("INGEST | Sink rejected event with {status}, dropping");
                IngestOutcome::Dropped
            }
            DispatchOutcome::TransientError(reason) => {
                warn!(
                    "INGEST | Sink unavailable ({reason}), requeueing to {}",
                    self.requeuer.topic()
                );
                if self.requeuer.requeue(body, self.processor.source()).await {
                    IngestOutcome::Requeued
                } else {
                    IngestOutcome::Lost
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexingMode;
    use crate::dispatcher::LogSink;
    use crate::errors::ForwarderError;
    use crate::message::AckToken;
    use crate::normalizer::EventNormalizer;
    use crate::queue::Publisher;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    struct FixedSink(DispatchOutcome);

    #[async_trait]
    impl LogSink for FixedSink {
        async fn send(&self, _body: Vec<u8>) -> DispatchOutcome {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct MemoryPublisher {
        fail: bool,
        published: Mutex<Vec<(Vec<u8>, HashMap<String, String>)>>,
    }

    #[async_trait]
    impl Publisher for MemoryPublisher {
        async fn publish(
            &self,
            topic: &str,
            payload: Vec<u8>,
            attributes: HashMap<String, String>,
        ) -> Result<(), ForwarderError> {
            if self.fail {
                return Err(ForwarderError::Publish {
                    topic: topic.to_string(),
                    reason: "down".to_string(),
                });
            }
            self.published.lock().unwrap().push((payload, attributes));
            Ok(())
        }
    }

    fn handler(outcome: DispatchOutcome, publisher: Arc<MemoryPublisher>) -> IngestHandler {
        let processor = MessageProcessor::new(
            EventNormalizer::new("h", "st", IndexingMode::Off, false),
            "projects/p/subscriptions/logs",
            Arc::new(FixedSink(outcome)),
        );
        IngestHandler::new(processor, FailureRequeuer::new(publisher, "retry"))
    }

    fn entry() -> QueueMessage {
        QueueMessage::new(
            br#"{"timestamp":"2024-01-01T00:00:00Z","textPayload":"x"}"#.to_vec(),
            AckToken::new("push"),
        )
    }

    #[tokio::test]
    async fn test_delivered() {
        let publisher = Arc::new(MemoryPublisher::default());
        let ingest = handler(DispatchOutcome::Success, publisher.clone());
        let outcome = ingest.handle(&entry()).await;
        assert_eq!(outcome, IngestOutcome::Delivered);
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_client_error_is_dropped_not_requeued() {
        let publisher = Arc::new(MemoryPublisher::default());
        let rejected = DispatchOutcome::ClientError(StatusCode::BAD_REQUEST);
        let ingest = handler(rejected, publisher.clone());
        let outcome = ingest.handle(&entry()).await;
        assert_eq!(outcome, IngestOutcome::Dropped);
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_error_requeues_normalized_event() {
        let publisher = Arc::new(MemoryPublisher::default());
        let unavailable = DispatchOutcome::TransientError("503".to_string());
        let ingest = handler(unavailable, publisher.clone());
        let outcome = ingest.handle(&entry()).await;
        assert_eq!(outcome, IngestOutcome::Requeued);

        let published = publisher.published.lock().unwrap();
        let (payload, attributes) = &published[0];
        let payload = String::from_utf8_lossy(payload);
        assert!(payload.starts_with(r#"{"time":1704067200,"#));
        assert_eq!(attributes["origin"], "projects/p/subscriptions/logs");
    }

    #[tokio::test]
    async fn test_requeue_failure_is_lost() {
        let publisher = Arc::new(MemoryPublisher {
            fail: true,
            ..Default::default()
        });
        let unavailable = DispatchOutcome::TransientError("timeout".to_string());
        let outcome = handler(unavailable, publisher).handle(&entry()).await;
        assert_eq!(outcome, IngestOutcome::Lost);
    }

    #[tokio::test]
    async fn test_undecodable_is_dropped_not_requeued() {
        let publisher = Arc::new(MemoryPublisher::default());
        let message = QueueMessage::new(b"{}".to_vec(), AckToken::new("push"));
        let unavailable = DispatchOutcome::TransientError("503".to_string());
        let ingest = handler(unavailable, publisher.clone());
        let outcome = ingest.handle(&message).await;
        assert_eq!(outcome, IngestOutcome::Dropped);
        assert!(publisher.published.lock().unwrap().is_empty());
    }
}
