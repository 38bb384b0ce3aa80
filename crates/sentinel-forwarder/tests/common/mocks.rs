// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory stand-ins for Pub/Sub

use async_trait::async_trait;
use sentinel_forwarder::{
    errors::ForwarderError,
    message::{AckToken, QueueMessage},
    queue::{Publisher, QueueConsumer},
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Subscription backlog. Pulled messages stay out of the backlog until the
/// invocation ends, like an ack deadline longer than the test.
#[derive(Default)]
pub struct MemoryQueue {
    pending: Mutex<VecDeque<QueueMessage>>,
    acked: Mutex<Vec<AckToken>>,
}

#[allow(dead_code)]
impl MemoryQueue {
    pub fn with_messages(messages: impl IntoIterator<Item = QueueMessage>) -> Self {
        Self {
            pending: Mutex::new(messages.into_iter().collect()),
            acked: Mutex::default(),
        }
    }

    pub fn acked(&self) -> Vec<AckToken> {
        self.acked.lock().unwrap().clone()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[async_trait]
impl QueueConsumer for MemoryQueue {
    async fn pull(&self, max_messages: usize) -> Result<Vec<QueueMessage>, ForwarderError> {
        let mut pending = self.pending.lock().unwrap();
        let n = max_messages.min(pending.len());
        Ok(pending.drain(..n).collect())
    }

    async fn acknowledge(&self, tokens: &[AckToken]) -> Result<(), ForwarderError> {
        self.acked.lock().unwrap().extend_from_slice(tokens);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub attributes: HashMap<String, String>,
}

/// Records every publish.
#[derive(Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<Published>>,
}

#[allow(dead_code)]
impl MemoryPublisher {
    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.topic == topic)
            .collect()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> Result<(), ForwarderError> {
        self.published.lock().unwrap().push(Published {
            topic: topic.to_string(),
            payload,
            attributes,
        });
        Ok(())
    }
}
