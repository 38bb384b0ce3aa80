// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pub/Sub over its REST API: synchronous pull, acknowledge and publish.

use super::auth::TokenSource;
use super::{authorize, resource_path, send_json};
use crate::errors::{ForwarderError, GcpApiError};
use crate::message::{AckToken, PubsubMessage, QueueMessage};
use crate::queue::{Publisher, QueueConsumer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

pub const PUBSUB_BASE_URL: &str = "https://pubsub.googleapis.com";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: PubsubMessage,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: Vec<&'a str>,
}

#[derive(Serialize)]
struct PublishRequest {
    messages: Vec<PubsubMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Deserialize)]
struct Empty {}

#[derive(Clone)]
pub struct PubSubClient {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    subscription: Option<String>,
    token_source: Option<Arc<dyn TokenSource>>,
}

impl PubSubClient {
    pub fn new(
        client: reqwest::Client,
        project_id: impl Into<String>,
        token_source: Option<Arc<dyn TokenSource>>,
    ) -> Self {
        Self {
            client,
            base_url: PUBSUB_BASE_URL.to_string(),
            project_id: project_id.into(),
            subscription: None,
            token_source,
        }
    }

    /// Targets an emulator or a regional endpoint instead of the global one.
    /// Accepts `host:port` (as in `PUBSUB_EMULATOR_HOST`) or a full URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        self.base_url = if base_url.starts_with("http://") || base_url.starts_with("https://") {
            base_url.to_string()
        } else {
            format!("http://{base_url}")
        };
        self
    }

    /// Subscription consumed by [`QueueConsumer::pull`].
    #[must_use]
    pub fn with_subscription(mut self, subscription: impl Into<String>) -> Self {
        self.subscription = Some(subscription.into());
        self
    }

    fn subscription_path(&self) -> Result<String, ForwarderError> {
        let subscription = self
            .subscription
            .as_deref()
            .ok_or_else(|| ForwarderError::Config("SUBSCRIPTION is not set".into()))?;
        Ok(resource_path(
            &self.project_id,
            "subscriptions",
            subscription,
        ))
    }

    async fn post<T: Serialize + ?Sized, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, GcpApiError> {
        let url = format!("{}/v1/{path}", self.base_url);
        let request = self.client.post(url).json(body);
        let request = authorize(request, self.token_source.as_ref()).await?;
        send_json(request).await
    }
}

#[async_trait]
impl QueueConsumer for PubSubClient {
    async fn pull(&self, max_messages: usize) -> Result<Vec<QueueMessage>, ForwarderError> {
        let subscription = self.subscription_path()?;
        let response: PullResponse = self
            .post(
                &format!("{subscription}:pull"),
                &PullRequest { max_messages },
            )
            .await
            .map_err(|e| {
                ForwarderError::Queue(format!("pull from {subscription}: {e}"))
            })?;

        let mut messages = Vec::with_capacity(response.received_messages.len());
        for received in response.received_messages {
            let id = received.message.message_id.clone().unwrap_or_default();
            match received
                .message
                .into_queue_message(AckToken::new(received.ack_id))
            {
                Ok(message) => messages.push(message),
                Err(e) => error!("PUBSUB | Skipping message {id} with undecodable data: {e}"),
            }
        }
        debug!(
            "PUBSUB | Pulled {} messages from {subscription}",
            messages.len()
        );
        Ok(messages)
    }

    async fn acknowledge(&self, tokens: &[AckToken]) -> Result<(), ForwarderError> {
        if tokens.is_empty() {
            return Ok(());
        }
        let subscription = self.subscription_path()?;
        let request = AcknowledgeRequest {
            ack_ids: tokens.iter().map(AckToken::as_str).collect(),
        };
        let _: Empty = self
            .post(&format!("{subscription}:acknowledge"), &request)
            .await
            .map_err(|e| {
                ForwarderError::Queue(format!("acknowledge on {subscription}: {e}"))
            })?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for PubSubClient {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> Result<(), ForwarderError> {
        let topic_path = resource_path(&self.project_id, "topics", topic);
        let request = PublishRequest {
            messages: vec![PubsubMessage::encode(&payload, attributes)],
        };
        let response: PublishResponse = self
            .post(&format!("{topic_path}:publish"), &request)
            .await
            .map_err(|e| ForwarderError::Publish {
                topic: topic_path.clone(),
                reason: e.to_string(),
            })?;
        debug!(
            "PUBSUB | Published message {:?} to {topic_path}",
            response.message_ids
        );
        Ok(())
    }
}
