// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded fan-out of a pulled batch.
//!
//! ```text
//!   batch ──> [ FIFO work queue ] ──> worker 1..N ──> sink
//!                                          │
//!                                          v
//!                                      AckBatch (successes only)
//! ```
//!
//! `run` returns only after every queued message has been handled, so the
//! caller never acknowledges a partially processed batch.

use crate::ack::AckBatch;
use crate::message::QueueMessage;
use crate::processor::{MessageProcessor, ProcessOutcome};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error};

type WorkItem = (QueueMessage, Arc<AckBatch>);
type WorkQueue = Arc<Mutex<mpsc::Receiver<WorkItem>>>;

/// Number of workers used for a batch of `batch_size` messages.
pub fn worker_count(max_workers: usize, batch_size: usize) -> usize {
    max_workers.min(batch_size)
}

#[derive(Clone)]
pub struct WorkerPool {
    processor: Arc<MessageProcessor>,
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(processor: Arc<MessageProcessor>, max_workers: usize) -> Self {
        Self {
            processor,
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Processes `messages` and returns the tokens of those delivered.
    pub async fn run(&self, messages: Vec<QueueMessage>) -> AckBatch {
        let workers = worker_count(self.max_workers, messages.len());
        if workers == 0 {
            return AckBatch::new();
        }

        let acks = Arc::new(AckBatch::new());
        let (tx, rx) = mpsc::channel::<WorkItem>(messages.len());
        for message in messages {
            // capacity equals the batch size, so this never waits
            if tx.send((message, Arc::clone(&acks))).await.is_err() {
                error!("WORKERS | Work queue closed before the batch was loaded");
                break;
            }
        }
        drop(tx);

        let queue: WorkQueue = Arc::new(Mutex::new(rx));
        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            let queue = Arc::clone(&queue);
            let processor = Arc::clone(&self.processor);
            set.spawn(async move { work(worker_id, queue, processor).await });
        }
        debug!("WORKERS | Started {workers} workers");

        while let Some(result) = set.join_next().await {
            if let Err(e) = result {
                error!("WORKERS | Worker task failed: {e}");
            }
        }

        Arc::try_unwrap(acks).unwrap_or_else(|shared| shared.take())
    }
}

async fn work(worker_id: usize, queue: WorkQueue, processor: Arc<MessageProcessor>) {
    let mut handled = 0usize;
    loop {
        let next = queue.lock().await.recv().await;
        let Some((message, acks)) = next else {
            break;
        };
        handled += 1;
        if let ProcessOutcome::Delivered = processor.process(&message).await {
            if !acks.record(message.ack_token.clone()) {
                error!(
                    "WORKERS | Ack token {} recorded twice, ignoring",
                    message.ack_token
                );
            }
        }
    }
    debug!("WORKERS | Worker {worker_id} handled {handled} messages");
}
