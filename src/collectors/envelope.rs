//! Response envelopes of the log-query API
//!
//! The same API family answers with a bare array, `{"result": [...]}` or
//! `{"data": [...]}`, and reports failures as `{"error": ...}`. The shapes are
//! tried in that order.

use crate::error::FetchError;
use crate::events::{LogEntry, RawLogRecord, Service, Timestamp};
use log::debug;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum LogEnvelope {
    Bare(Vec<Value>),
    Result { result: Vec<Value> },
    Data { data: Vec<Value> },
    Failed { error: Value },
}

impl LogEnvelope {
    /// Parse a response body into an envelope
    pub fn parse(body: &str) -> Result<Self, FetchError> {
        serde_json::from_str(body).map_err(|_| {
            let preview: String = body.chars().take(120).collect();
            FetchError::Envelope(preview)
        })
    }

    /// Unwrap the rows, turning an error envelope into [`FetchError::Api`]
    pub fn into_rows(self) -> Result<Vec<Value>, FetchError> {
        match self {
            LogEnvelope::Bare(rows)
            | LogEnvelope::Result { result: rows }
            | LogEnvelope::Data { data: rows } => Ok(rows),
            LogEnvelope::Failed { error } => Err(FetchError::Api(match error {
                Value::String(message) => message,
                Value::Object(ref map) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
                other => other.to_string(),
            })),
        }
    }
}

/// Parse a response body into log entries for one service
///
/// Rows that do not match the record shape are skipped; they never fail the
/// whole fetch.
pub fn parse_log_entries(
    service: Service,
    body: &str,
    fallback_time: Timestamp,
) -> Result<Vec<LogEntry>, FetchError> {
    let rows = LogEnvelope::parse(body)?.into_rows()?;
    let mut entries = Vec::with_capacity(rows.len());

    for row in rows {
        match serde_json::from_value::<RawLogRecord>(row) {
            Ok(record) => entries.push(LogEntry::from_record(service, record, fallback_time)),
            Err(e) => debug!("Skipping malformed {} log row: {}", service, e),
        }
    }

    Ok(entries)
}
