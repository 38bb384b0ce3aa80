// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ForwarderError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::env;

/// Source of named secrets such as the workspace id and key.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Returns the secret's value, or `SecretUnavailable` when it cannot be read.
    async fn get(&self, name: &str) -> Result<String, ForwarderError>;
}

/// Reads each secret from the environment variable of the same name.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get(&self, name: &str) -> Result<String, ForwarderError> {
        env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ForwarderError::SecretUnavailable(name.to_string()))
    }
}

/// Fixed set of secrets, for wiring tests and local runs.
#[derive(Debug, Default, Clone)]
pub struct StaticSecretStore {
    secrets: HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn new<K, V>(secrets: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            secrets: secrets
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get(&self, name: &str) -> Result<String, ForwarderError> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| ForwarderError::SecretUnavailable(name.to_string()))
    }
}
