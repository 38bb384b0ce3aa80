// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Forwards GCP Pub/Sub log messages to an Azure Log Analytics workspace.
//!
//! Two paths share one pipeline: the event-triggered path handles a single
//! pushed message and requeues it on transient sink failure, while the retry
//! path drains the retry subscription within a bounded invocation budget.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod ack;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod errors;
pub mod forwarder;
pub mod gcp;
pub mod http_utils;
pub mod ingest;
pub mod message;
pub mod normalizer;
pub mod processor;
pub mod queue;
pub mod requeuer;
pub mod retry;
pub mod secrets;
pub mod signer;
pub mod trigger;
pub mod worker_pool;
