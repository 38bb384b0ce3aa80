// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns a raw Cloud Logging entry delivered through Pub/Sub into the event
//! shape the Log Analytics table expects.
//!
//! The payload is never re-serialized: it is embedded as a [`RawValue`] so the
//! bytes that reach the sink are exactly the bytes that were published, minus
//! any leading or trailing whitespace around the JSON document.

use crate::config::IndexingMode;
use crate::errors::DecodeError;
use chrono::{DateTime, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::value::RawValue;

const LOG_NAME_FIELD: &str = "\"logName\":\"";
const ENCODED_SEPARATOR: &str = "%2F";
const LOGS_SEGMENT: &str = "/logs/";

lazy_static! {
    #[allow(clippy::expect_used)]
    static ref TIMESTAMP_REGEX: Regex = Regex::new(
        r#""timestamp":\s*"((\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2})(?:\.(\d*))?Z)""#
    )
    .expect("failed creating regex");
}

/// A normalized, sink-ready log record.
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// Epoch seconds as a JSON number literal, fractional digits kept verbatim.
    time: Box<RawValue>,
    host: String,
    source: String,
    sourcetype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<String>,
    event: Box<RawValue>,
}

impl LogEvent {
    pub fn time(&self) -> &str {
        self.time.get()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn sourcetype(&self) -> &str {
        &self.sourcetype
    }

    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    /// The embedded event JSON, as it will appear on the wire.
    pub fn event(&self) -> &str {
        self.event.get()
    }

    pub fn to_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[derive(Serialize)]
struct CompatibleEnvelope<'a> {
    publish_time: &'a RawValue,
    data: &'a RawValue,
    attributes: CompatibleAttributes<'a>,
}

#[derive(Serialize)]
struct CompatibleAttributes<'a> {
    #[serde(rename = "logging.googleapis.com/timestamp")]
    timestamp: &'a str,
}

/// Timestamp found in an entry: the literal text and its epoch rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryTimestamp {
    pub literal: String,
    pub epoch: String,
}

#[derive(Debug, Clone)]
pub struct EventNormalizer {
    pub host: String,
    pub sourcetype: String,
    pub indexing: IndexingMode,
    pub compatible: bool,
}

impl EventNormalizer {
    pub fn new(
        host: impl Into<String>,
        sourcetype: impl Into<String>,
        indexing: IndexingMode,
        compatible: bool,
    ) -> Self {
        Self {
            host: host.into(),
            sourcetype: sourcetype.into(),
            indexing,
            compatible,
        }
    }

    /// Builds the event for `payload`. `publish_time` only feeds the
    /// compatible-mode wrapper.
    ///
    /// Whitespace surrounding the payload (a trailing newline, say) is not
    /// carried into `event`/`data`; everything between is kept byte for byte.
    pub fn normalize(
        &self,
        payload: &[u8],
        source: &str,
        publish_time: DateTime<Utc>,
    ) -> Result<LogEvent, DecodeError> {
        let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
        let timestamp = extract_timestamp(text)?;
        let index = self.resolve_index(text);

        let data = RawValue::from_string(text.to_string())
            .map_err(|e| DecodeError::InvalidPayload(e.to_string()))?;

        let event = if self.compatible {
            let publish_time = RawValue::from_string(format!(
                "{}.{:03}",
                publish_time.timestamp(),
                publish_time.timestamp_subsec_millis()
            ))
            .map_err(|e| DecodeError::InvalidPayload(e.to_string()))?;
            let envelope = CompatibleEnvelope {
                publish_time: &publish_time,
                data: &data,
                attributes: CompatibleAttributes {
                    timestamp: &timestamp.literal,
                },
            };
            serde_json::value::to_raw_value(&envelope)
                .map_err(|e| DecodeError::InvalidPayload(e.to_string()))?
        } else {
            data
        };

        let time = RawValue::from_string(timestamp.epoch.clone())
            .map_err(|_| DecodeError::InvalidTimestamp(timestamp.literal.clone()))?;

        Ok(LogEvent {
            time,
            host: self.host.clone(),
            source: source.to_string(),
            sourcetype: self.sourcetype.clone(),
            index,
            event,
        })
    }

    fn resolve_index(&self, text: &str) -> Option<String> {
        match &self.indexing {
            IndexingMode::Off => None,
            IndexingMode::Literal(index) => Some(index.clone()),
            IndexingMode::LogName { overrides } => {
                let log_name = extract_log_name(text)?;
                overrides.get(log_name).cloned()
            }
        }
    }
}

/// Finds the entry's `"timestamp"` and converts it to epoch seconds without
/// passing through a float.
pub fn extract_timestamp(text: &str) -> Result<EntryTimestamp, DecodeError> {
    let captures = TIMESTAMP_REGEX
        .captures(text)
        .ok_or(DecodeError::MissingTimestamp)?;
    let literal = captures
        .get(1)
        .map(|m| m.as_str().to_string())
        .ok_or(DecodeError::MissingTimestamp)?;
    let whole = captures
        .get(2)
        .map(|m| m.as_str())
        .ok_or(DecodeError::MissingTimestamp)?;

    let seconds = NaiveDateTime::parse_from_str(whole, "%Y-%m-%dT%H:%M:%S")
        .map_err(|_| DecodeError::InvalidTimestamp(literal.clone()))?
        .and_utc()
        .timestamp();

    let epoch = match captures.get(3).map(|m| m.as_str()) {
        Some(fraction) if !fraction.is_empty() => format!("{seconds}.{fraction}"),
        _ => seconds.to_string(),
    };
    Ok(EntryTimestamp { literal, epoch })
}

/// Log name from the entry's `logName`: the part after an encoded `%2F`
/// separator (`projects/p/logs/cloudaudit.googleapis.com%2Factivity`), or
/// after `/logs/` for plain names.
pub fn extract_log_name(text: &str) -> Option<&str> {
    let start = text.find(LOG_NAME_FIELD)? + LOG_NAME_FIELD.len();
    let value = &text[start..];
    let value = &value[..value.find('"')?];

    if let Some(pos) = value.find(ENCODED_SEPARATOR) {
        return Some(&value[pos + ENCODED_SEPARATOR.len()..]);
    }
    value
        .find(LOGS_SEGMENT)
        .map(|pos| &value[pos + LOGS_SEGMENT.len()..])
}
