// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Seams to the message queue. The GCP implementations live in [`crate::gcp`].

use crate::errors::ForwarderError;
use crate::message::{AckToken, QueueMessage};
use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Synchronously pulls at most `max_messages` messages.
    async fn pull(&self, max_messages: usize) -> Result<Vec<QueueMessage>, ForwarderError>;

    async fn acknowledge(&self, tokens: &[AckToken]) -> Result<(), ForwarderError>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> Result<(), ForwarderError>;
}
