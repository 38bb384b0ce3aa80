// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Drains the retry subscription within one invocation's time budget.
//!
//! ```text
//!   PULLING ──(batch)──> DISPATCHING ──> ACKNOWLEDGING ──┐
//!      ^                                                 │
//!      └─────────────────────────────────────────────────┘
//!      │ empty batch / pull error / deadline
//!      v
//!    STOP
//! ```
//!
//! The first acknowledged batch publishes one continuation message, which
//! triggers a fresh invocation with its own budget. Later batches in the same
//! invocation never publish another one.

use crate::ack::AckBatch;
use crate::errors::ForwarderError;
use crate::message::QueueMessage;
use crate::queue::{Publisher, QueueConsumer};
use crate::worker_pool::WorkerPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

pub const SELF_SPAWN_PAYLOAD: &[u8] = b"SelfSpawn";

/// Per-invocation state. Never persisted.
#[derive(Debug)]
pub struct RetrySession {
    started: Instant,
    deadline: Instant,
    spawned: bool,
}

impl RetrySession {
    pub fn new(budget: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + budget,
            spawned: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn spawned(&self) -> bool {
        self.spawned
    }

    /// Flips the one-shot guard. Returns true only the first time.
    pub fn claim_spawn(&mut self) -> bool {
        !std::mem::replace(&mut self.spawned, true)
    }
}

/// Schedules the successor invocation by publishing to the trigger topic.
#[derive(Clone)]
pub struct Continuation {
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl Continuation {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    pub async fn schedule(&self) -> Result<(), ForwarderError> {
        info!("RETRY | Spawning another handler via {}", self.topic);
        self.publisher
            .publish(&self.topic, SELF_SPAWN_PAYLOAD.to_vec(), HashMap::new())
            .await
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetryReport {
    pub batches: usize,
    pub pulled: usize,
    pub acknowledged: usize,
    pub spawned: bool,
}

enum RetryState {
    Pulling,
    Dispatching(Vec<QueueMessage>),
    Acknowledging { pulled: usize, acks: AckBatch },
    Stop,
}

pub struct RetryController {
    consumer: Arc<dyn QueueConsumer>,
    pool: WorkerPool,
    continuation: Continuation,
    batch_size: usize,
    budget: Duration,
}

impl RetryController {
    pub fn new(
        consumer: Arc<dyn QueueConsumer>,
        pool: WorkerPool,
        continuation: Continuation,
        batch_size: usize,
        budget: Duration,
    ) -> Self {
        Self {
            consumer,
            pool,
            continuation,
            batch_size,
            budget,
        }
    }

    /// Runs one invocation until the queue is drained or the budget is spent.
    pub async fn run(&self) -> RetryReport {
        let mut session = RetrySession::new(self.budget);
        let mut report = RetryReport::default();
        let mut state = RetryState::Pulling;

        loop {
            state = match state {
                RetryState::Pulling => self.pull(&session).await,
                RetryState::Dispatching(messages) => {
                    report.batches += 1;
                    report.pulled += messages.len();
                    let pulled = messages.len();
                    let acks = self.pool.run(messages).await;
                    RetryState::Acknowledging { pulled, acks }
                }
                RetryState::Acknowledging { pulled, acks } => {
                    let acknowledged = self.acknowledge(acks).await;
                    info!("RETRY | in:{pulled} success:{acknowledged}");
                    report.acknowledged += acknowledged;

                    // Progress that lands after the deadline does not earn a
                    // continuation.
                    if acknowledged > 0 && !session.is_expired() && session.claim_spawn() {
                        match self.continuation.schedule().await {
                            Ok(()) => report.spawned = true,
                            Err(e) => error!("RETRY | Failed to spawn continuation: {e}"),
                        }
                    }
                    RetryState::Pulling
                }
                RetryState::Stop => break,
            };
        }

        info!(
            "RETRY | Finished after {} ms: {} batches, {} pulled, {} acknowledged, spawned: {}",
            session.elapsed().as_millis(),
            report.batches,
            report.pulled,
            report.acknowledged,
            report.spawned
        );
        report
    }

    async fn pull(&self, session: &RetrySession) -> RetryState {
        if session.is_expired() {
            debug!("RETRY | Time budget of {:?} spent, stopping", self.budget);
            return RetryState::Stop;
        }
        match self.consumer.pull(self.batch_size).await {
            Ok(messages) if messages.is_empty() => {
                debug!("RETRY | Subscription drained");
                RetryState::Stop
            }
            Ok(messages) => RetryState::Dispatching(messages),
            Err(e) => {
                error!("RETRY | Pull failed, stopping: {e}");
                RetryState::Stop
            }
        }
    }

    async fn acknowledge(&self, acks: AckBatch) -> usize {
        let tokens = acks.into_tokens();
        if tokens.is_empty() {
            return 0;
        }
        match self.consumer.acknowledge(&tokens).await {
            Ok(()) => tokens.len(),
            Err(e) => {
                error!(
                    "RETRY | Failed to acknowledge {} messages, they will be redelivered: {e}",
                    tokens.len()
                );
                0
            }
        }
    }
}
