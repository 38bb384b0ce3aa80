// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires configuration and long-lived clients into per-invocation pipelines.
//!
//! Clients are built once per process; credentials are resolved once per
//! invocation and dropped with it.

use crate::config::{ForwarderConfig, SecretBackend};
use crate::credentials::resolve_credential;
use crate::dispatcher::{LogSink, SinkDispatcher};
use crate::errors::ForwarderError;
use crate::gcp::auth::{MetadataTokenSource, TokenSource};
use crate::gcp::pubsub::PubSubClient;
use crate::gcp::secret_manager::SecretManagerStore;
use crate::http_utils::build_client;
use crate::ingest::{IngestHandler, IngestOutcome};
use crate::message::QueueMessage;
use crate::normalizer::EventNormalizer;
use crate::processor::MessageProcessor;
use crate::queue::{Publisher, QueueConsumer};
use crate::requeuer::FailureRequeuer;
use crate::retry::{Continuation, RetryController, RetryReport};
use crate::secrets::{EnvSecretStore, SecretStore};
use crate::worker_pool::WorkerPool;
use std::sync::Arc;
use tracing::debug;

pub struct Forwarder {
    config: Arc<ForwarderConfig>,
    http_client: reqwest::Client,
    secrets: Arc<dyn SecretStore>,
    publisher: Arc<dyn Publisher>,
    consumer: Option<Arc<dyn QueueConsumer>>,
    sink_base_url: Option<String>,
}

impl Forwarder {
    pub fn new(
        config: Arc<ForwarderConfig>,
        http_client: reqwest::Client,
        secrets: Arc<dyn SecretStore>,
        publisher: Arc<dyn Publisher>,
        consumer: Option<Arc<dyn QueueConsumer>>,
    ) -> Self {
        Self {
            config,
            http_client,
            secrets,
            publisher,
            consumer,
            sink_base_url: None,
        }
    }

    /// Builds the GCP-backed forwarder described by `config`.
    pub fn from_config(config: ForwarderConfig) -> Result<Self, ForwarderError> {
        let project_id = config.project_id()?.to_string();
        let http_client = build_client(config.https_proxy.as_deref(), config.sink_timeout)
            .map_err(|e| {
                ForwarderError::Config(format!("unable to build HTTP client: {e}"))
            })?;

        let token_source: Arc<dyn TokenSource> =
            Arc::new(MetadataTokenSource::new(http_client.clone()));

        let mut pubsub = match config.pubsub_emulator_host.as_deref() {
            Some(host) => {
                debug!("Using Pub/Sub emulator at {host}");
                PubSubClient::new(http_client.clone(), project_id.as_str(), None)
                    .with_base_url(host)
            }
            None => PubSubClient::new(
                http_client.clone(),
                project_id.as_str(),
                Some(Arc::clone(&token_source)),
            ),
        };
        if let Some(subscription) = config.subscription.as_deref() {
            pubsub = pubsub.with_subscription(subscription);
        }
        let pubsub = Arc::new(pubsub);

        let secrets: Arc<dyn SecretStore> = match config.secret_backend {
            SecretBackend::Env => Arc::new(EnvSecretStore),
            SecretBackend::SecretManager => Arc::new(SecretManagerStore::new(
                http_client.clone(),
                project_id.as_str(),
                Some(token_source),
            )),
        };

        let consumer: Option<Arc<dyn QueueConsumer>> = config
            .subscription
            .is_some()
            .then(|| Arc::clone(&pubsub) as Arc<dyn QueueConsumer>);

        Ok(Self::new(
            Arc::new(config),
            http_client,
            secrets,
            pubsub,
            consumer,
        ))
    }

    /// Posts to `base_url` instead of the workspace's public endpoint.
    #[must_use]
    pub fn with_sink_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.sink_base_url = Some(base_url.into());
        self
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    fn normalizer(&self) -> EventNormalizer {
        EventNormalizer::new(
            self.config.host.as_str(),
            self.config.source_type.as_str(),
            self.config.indexing.clone(),
            self.config.compatible,
        )
    }

    async fn sink(&self) -> Result<Arc<dyn LogSink>, ForwarderError> {
        let credential = resolve_credential(
            self.secrets.as_ref(),
            &self.config.workspace_id_secret,
            &self.config.workspace_key_secret,
        )
        .await?;
        let dispatcher = match self.sink_base_url.as_deref() {
            Some(base_url) => SinkDispatcher::with_base_url(
                self.http_client.clone(),
                credential,
                self.config.table_name.as_str(),
                base_url,
            )?,
            None => SinkDispatcher::new(
                self.http_client.clone(),
                credential,
                self.config.table_name.as_str(),
            )?,
        };
        Ok(Arc::new(dispatcher))
    }

    /// Primary path for one pushed message. Errors are the fatal ones
    /// (configuration, secrets); per-message failures are in the outcome.
    pub async fn ingest(
        &self,
        message: &QueueMessage,
        resource: &str,
    ) -> Result<IngestOutcome, ForwarderError> {
        let requeuer = FailureRequeuer::new(
            Arc::clone(&self.publisher),
            self.config.retry_topic()?,
        );
        let processor = MessageProcessor::new(
            self.normalizer(),
            self.config.source_for(resource),
            self.sink().await?,
        );
        let handler = IngestHandler::new(processor, requeuer);
        Ok(handler.handle(message).await)
    }

    /// Retry path: drain the retry subscription for one invocation.
    pub async fn drain_retry_queue(&self) -> Result<RetryReport, ForwarderError> {
        let consumer = self
            .consumer
            .clone()
            .ok_or_else(|| ForwarderError::Config("SUBSCRIPTION is not set".into()))?;
        let continuation = Continuation::new(
            Arc::clone(&self.publisher),
            self.config.retry_trigger_topic()?,
        );
        let processor = MessageProcessor::new(
            self.normalizer(),
            self.config.source_for(self.config.subscription()?),
            self.sink().await?,
        );
        let controller = RetryController::new(
            consumer,
            WorkerPool::new(Arc::new(processor), self.config.max_workers),
            continuation,
            self.config.batch_size,
            self.config.invocation_budget,
        );
        Ok(controller.run().await)
    }
}
