// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ForwarderError;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "GCPFunction";
pub const DEFAULT_SOURCE_TYPE: &str = "google:gcp:pubsub:message";
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_WORKERS: usize = 10;
pub const DEFAULT_INVOCATION_BUDGET_SECS: u64 = 220;
/// Subtracted from `TIMEOUT` so the loop stops before the platform kills us.
pub const TIMEOUT_MARGIN_SECS: u64 = 20;
pub const DEFAULT_SINK_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PORT: u16 = 8080;

/// How the `index` field of an outgoing event is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IndexingMode {
    #[default]
    Off,
    /// Every event goes to the named index.
    Literal(String),
    /// Index is looked up by the log name embedded in the entry's `logName`.
    /// Log names without an override are sent without an index.
    LogName { overrides: HashMap<String, String> },
}

impl IndexingMode {
    /// Parses the `INDEX` setting. `overrides` is only consulted for `LOGNAME`.
    pub fn parse(
        value: Option<&str>,
        overrides: impl FnOnce() -> HashMap<String, String>,
    ) -> Self {
        match value.map(str::trim) {
            None | Some("") => IndexingMode::Off,
            Some(v) if v.eq_ignore_ascii_case("false") => IndexingMode::Off,
            Some("LOGNAME") => IndexingMode::LogName {
                overrides: overrides(),
            },
            Some(v) => IndexingMode::Literal(v.to_string()),
        }
    }
}

/// Where workspace credentials are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecretBackend {
    #[default]
    SecretManager,
    /// Secret names are environment variable names.
    Env,
}

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub project_id: Option<String>,
    pub host: String,
    pub source_type: String,
    /// Overrides the invocation's resource name as the event `source`.
    pub source_name: Option<String>,
    pub indexing: IndexingMode,
    pub compatible: bool,
    /// Name of the secret holding the workspace id.
    pub workspace_id_secret: String,
    /// Name of the secret holding the base64 shared key.
    pub workspace_key_secret: String,
    pub table_name: String,
    pub retry_topic: Option<String>,
    pub subscription: Option<String>,
    pub retry_trigger_topic: Option<String>,
    pub batch_size: usize,
    pub max_workers: usize,
    /// Wall-clock budget of one retry invocation
    pub invocation_budget: Duration,
    pub sink_timeout: Duration,
    pub secret_backend: SecretBackend,
    pub log_level: String,
    pub port: u16,
    pub https_proxy: Option<String>,
    pub pubsub_emulator_host: Option<String>,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            host: DEFAULT_HOST.to_string(),
            source_type: DEFAULT_SOURCE_TYPE.to_string(),
            source_name: None,
            indexing: IndexingMode::Off,
            compatible: true,
            workspace_id_secret: String::new(),
            workspace_key_secret: String::new(),
            table_name: String::new(),
            retry_topic: None,
            subscription: None,
            retry_trigger_topic: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            invocation_budget: Duration::from_secs(DEFAULT_INVOCATION_BUDGET_SECS),
            sink_timeout: Duration::from_secs(DEFAULT_SINK_TIMEOUT_SECS),
            secret_backend: SecretBackend::SecretManager,
            log_level: "info".to_string(),
            port: DEFAULT_PORT,
            https_proxy: None,
            pubsub_emulator_host: None,
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Settings only some paths need are checked where they are used.
fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ForwarderError> {
    value
        .as_deref()
        .ok_or_else(|| ForwarderError::Config(format!("{name} is not set")))
}

impl ForwarderConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ForwarderError> {
        let indexing = IndexingMode::parse(non_empty_var("INDEX").as_deref(), || {
            env::vars().collect()
        });

        // Wrapping stays on only for an explicit TRUE once the variable is set.
        let compatible = non_empty_var("COMPATIBLE")
            .map(|val| val.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(true);

        let invocation_budget = env::var("TIMEOUT")
            .ok()
            .and_then(|t| t.trim().parse::<u64>().ok())
            .map(|t| t.saturating_sub(TIMEOUT_MARGIN_SECS))
            .unwrap_or(DEFAULT_INVOCATION_BUDGET_SECS);

        let secret_backend = match non_empty_var("SECRET_BACKEND") {
            Some(v) if v.eq_ignore_ascii_case("env") => SecretBackend::Env,
            Some(v) if v.eq_ignore_ascii_case("secretmanager") => SecretBackend::SecretManager,
            Some(v) => {
                return Err(ForwarderError::Config(format!(
                    "Unknown SECRET_BACKEND '{v}'. Must be one of: secretmanager, env"
                )))
            }
            None => SecretBackend::SecretManager,
        };

        let config = Self {
            project_id: non_empty_var("PROJECTID"),
            host: non_empty_var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            source_type: non_empty_var("SOURCE_TYPE")
                .unwrap_or_else(|| DEFAULT_SOURCE_TYPE.to_string()),
            source_name: non_empty_var("SOURCE_NAME"),
            indexing,
            compatible,
            workspace_id_secret: non_empty_var("WORKSPACE_ID").unwrap_or_default(),
            workspace_key_secret: non_empty_var("WORKSPACE_KEY").unwrap_or_default(),
            table_name: non_empty_var("LAW_TABLE_NAME")
                .or_else(|| non_empty_var("TABLE_NAME"))
                .unwrap_or_default(),
            retry_topic: non_empty_var("RETRY_TOPIC"),
            subscription: non_empty_var("SUBSCRIPTION"),
            retry_trigger_topic: non_empty_var("RETRY_TRIGGER_TOPIC"),
            batch_size: env::var("BATCH")
                .ok()
                .and_then(|b| b.trim().parse::<usize>().ok())
                .unwrap_or(DEFAULT_BATCH_SIZE),
            max_workers: env::var("MAX_WORKERS")
                .ok()
                .and_then(|w| w.trim().parse::<usize>().ok())
                .unwrap_or(DEFAULT_MAX_WORKERS),
            invocation_budget: Duration::from_secs(invocation_budget),
            sink_timeout: Duration::from_secs(
                env::var("SINK_TIMEOUT")
                    .ok()
                    .and_then(|t| t.trim().parse::<u64>().ok())
                    .unwrap_or(DEFAULT_SINK_TIMEOUT_SECS),
            ),
            secret_backend,
            log_level: env::var("LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or_else(|_| "info".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|port| port.parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT),
            https_proxy: non_empty_var("HTTPS_PROXY"),
            pubsub_emulator_host: non_empty_var("PUBSUB_EMULATOR_HOST"),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate settings every path needs.
    pub fn validate(&self) -> Result<(), ForwarderError> {
        if self.workspace_id_secret.is_empty() {
            return Err(ForwarderError::Config(
                "WORKSPACE_ID is not set".to_string(),
            ));
        }
        if self.workspace_key_secret.is_empty() {
            return Err(ForwarderError::Config(
                "WORKSPACE_KEY is not set".to_string(),
            ));
        }
        if self.table_name.is_empty() {
            return Err(ForwarderError::Config(
                "LAW_TABLE_NAME is not set".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ForwarderError::Config(
                "BATCH must be greater than 0".to_string(),
            ));
        }
        if self.max_workers == 0 {
            return Err(ForwarderError::Config(
                "MAX_WORKERS must be greater than 0".to_string(),
            ));
        }
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ForwarderError::Config(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }
        Ok(())
    }

    pub fn project_id(&self) -> Result<&str, ForwarderError> {
        required(&self.project_id, "PROJECTID")
    }

    pub fn retry_topic(&self) -> Result<&str, ForwarderError> {
        required(&self.retry_topic, "RETRY_TOPIC")
    }

    pub fn subscription(&self) -> Result<&str, ForwarderError> {
        required(&self.subscription, "SUBSCRIPTION")
    }

    pub fn retry_trigger_topic(&self) -> Result<&str, ForwarderError> {
        required(&self.retry_trigger_topic, "RETRY_TRIGGER_TOPIC")
    }

    /// Event `source`: `SOURCE_NAME` when set, otherwise the invoking resource.
    pub fn source_for<'a>(&'a self, resource: &'a str) -> &'a str {
        self.source_name.as_deref().unwrap_or(resource)
    }
}
