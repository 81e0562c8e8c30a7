//! Core log types for the error aggregator
//!
//! This module defines the services whose logs are audited, the raw record shape
//! returned by the log-query API, and the [`LogEntry`] the rest of the pipeline
//! works with.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// A managed service whose logs are checked on every run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    /// API gateway (PostgREST, storage and function traffic)
    Api,
    /// Edge function invocations
    EdgeFunctions,
    /// Authentication service
    Auth,
    /// Postgres database
    Database,
}

impl Service {
    /// Every service, in the default check order
    pub const ALL: [Service; 4] = [
        Service::Api,
        Service::EdgeFunctions,
        Service::Auth,
        Service::Database,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Api => "api",
            Service::EdgeFunctions => "edge_functions",
            Service::Auth => "auth",
            Service::Database => "database",
        }
    }

    /// Log query for this service.
    ///
    /// Each query flattens the nested metadata arrays so that method, path and
    /// status arrive as top-level columns. Fields that a service does not have
    /// are simply absent from its rows.
    pub fn log_query(&self) -> &'static str {
        match self {
            Service::Api => {
                "select timestamp, event_message, request.method, request.path, \
                 response.status_code \
                 from edge_logs \
                 cross join unnest(metadata) as m \
                 cross join unnest(m.request) as request \
                 cross join unnest(m.response) as response \
                 order by timestamp desc limit 1000"
            }
            Service::EdgeFunctions => {
                "select timestamp, event_message, request.method, request.url, \
                 response.status_code as response_status_code \
                 from function_edge_logs \
                 cross join unnest(metadata) as m \
                 cross join unnest(m.request) as request \
                 cross join unnest(m.response) as response \
                 order by timestamp desc limit 1000"
            }
            Service::Auth => {
                "select timestamp, event_message, metadata.path, metadata.method, \
                 metadata.status as status_code \
                 from auth_logs \
                 cross join unnest(metadata) as metadata \
                 order by timestamp desc limit 1000"
            }
            Service::Database => {
                "select timestamp, event_message, parsed.error_severity \
                 from postgres_logs \
                 cross join unnest(metadata) as m \
                 cross join unnest(m.parsed) as parsed \
                 order by timestamp desc limit 1000"
            }
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "api" | "edge_logs" | "gateway" => Ok(Service::Api),
            "edge_functions" | "functions" | "function_edge_logs" => Ok(Service::EdgeFunctions),
            "auth" | "auth_logs" => Ok(Service::Auth),
            "database" | "postgres" | "postgres_logs" => Ok(Service::Database),
            other => Err(format!("unknown service '{}'", other)),
        }
    }
}

/// One observed event from a service, as consumed by the classifier
///
/// The three status fields are kept apart so that classification can apply a
/// fixed precedence between them.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Service the entry was fetched from
    pub service: Service,
    /// When the event happened
    pub timestamp: Timestamp,
    /// Explicit request path, if the service reports one
    pub path: Option<String>,
    /// Full request URL, if the service reports one
    pub url: Option<String>,
    /// HTTP method
    pub method: Option<String>,
    /// Top-level `status_code` column
    pub status_code: Option<u16>,
    /// `metadata.response[0].status_code`
    pub nested_status_code: Option<u16>,
    /// `response_status_code` column (edge functions)
    pub response_status_code: Option<u16>,
    /// Free-text message
    pub message: String,
    /// Structured severity (database only)
    pub error_severity: Option<String>,
}

impl LogEntry {
    /// Build an entry with only a service, timestamp and message set
    pub fn new(service: Service, timestamp: Timestamp, message: impl Into<String>) -> Self {
        Self {
            service,
            timestamp,
            path: None,
            url: None,
            method: None,
            status_code: None,
            nested_status_code: None,
            response_status_code: None,
            message: message.into(),
            error_severity: None,
        }
    }

    /// Convert a raw API record into an entry
    ///
    /// `fallback_time` is used when the record carries no parseable timestamp.
    pub fn from_record(service: Service, record: RawLogRecord, fallback_time: Timestamp) -> Self {
        let metadata = record.metadata.as_ref().and_then(OneOrMany::first);
        let request = metadata
            .and_then(|m| m.request.as_ref())
            .and_then(OneOrMany::first);
        let response = metadata
            .and_then(|m| m.response.as_ref())
            .and_then(OneOrMany::first);
        let parsed = metadata
            .and_then(|m| m.parsed.as_ref())
            .and_then(OneOrMany::first);

        let timestamp = record
            .timestamp
            .as_ref()
            .and_then(RawTimestamp::to_utc)
            .unwrap_or(fallback_time);

        Self {
            service,
            timestamp,
            path: record
                .path
                .or_else(|| request.and_then(|r| r.path.clone())),
            url: record.url.or_else(|| request.and_then(|r| r.url.clone())),
            method: record
                .method
                .or_else(|| request.and_then(|r| r.method.clone())),
            status_code: record.status_code.as_ref().and_then(RawStatus::to_u16),
            nested_status_code: response
                .and_then(|r| r.status_code.as_ref())
                .and_then(RawStatus::to_u16),
            response_status_code: record
                .response_status_code
                .as_ref()
                .and_then(RawStatus::to_u16),
            message: record
                .event_message
                .or(record.message)
                .unwrap_or_default(),
            error_severity: record
                .error_severity
                .or_else(|| parsed.and_then(|p| p.error_severity.clone())),
        }
    }
}

/// One row returned by the log-query API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLogRecord {
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
    #[serde(default)]
    pub event_message: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub status_code: Option<RawStatus>,
    #[serde(default)]
    pub response_status_code: Option<RawStatus>,
    #[serde(default)]
    pub error_severity: Option<String>,
    #[serde(default)]
    pub metadata: Option<OneOrMany<RecordMetadata>>,
}

/// Nested metadata attached to a raw record
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordMetadata {
    #[serde(default)]
    pub request: Option<OneOrMany<RequestMetadata>>,
    #[serde(default)]
    pub response: Option<OneOrMany<ResponseMetadata>>,
    #[serde(default)]
    pub parsed: Option<OneOrMany<ParsedMetadata>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestMetadata {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default)]
    pub status_code: Option<RawStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParsedMetadata {
    #[serde(default)]
    pub error_severity: Option<String>,
}

/// A field the log API returns either as a single object or as an array of them
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    /// The single value, or the first element of the array
    pub fn first(&self) -> Option<&T> {
        match self {
            OneOrMany::Many(items) => items.first(),
            OneOrMany::One(item) => Some(item),
        }
    }
}

/// Status code as returned by the API: a number or a numeric string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawStatus {
    Number(u64),
    Text(String),
}

impl RawStatus {
    pub fn to_u16(&self) -> Option<u16> {
        match self {
            RawStatus::Number(n) => u16::try_from(*n).ok(),
            RawStatus::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Timestamp as returned by the API: epoch number or a date string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Number(i64),
    Text(String),
}

impl RawTimestamp {
    /// Convert to UTC.
    ///
    /// Epoch numbers are interpreted by magnitude: microseconds (the log API's
    /// native unit), milliseconds, or seconds.
    pub fn to_utc(&self) -> Option<Timestamp> {
        match self {
            RawTimestamp::Number(n) => epoch_to_utc(*n),
            RawTimestamp::Text(s) => {
                let s = s.trim();
                if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                    return Some(dt.with_timezone(&Utc));
                }
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                    return Some(Utc.from_utc_datetime(&naive));
                }
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                    return Some(Utc.from_utc_datetime(&naive));
                }
                s.parse::<i64>().ok().and_then(epoch_to_utc)
            }
        }
    }
}

fn epoch_to_utc(value: i64) -> Option<Timestamp> {
    let magnitude = value.unsigned_abs();
    if magnitude >= 100_000_000_000_000 {
        DateTime::from_timestamp_micros(value)
    } else if magnitude >= 100_000_000_000 {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn record(json: &str) -> RawLogRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_service_round_trip_names() {
        for service in Service::ALL {
            assert_eq!(service.as_str().parse::<Service>().unwrap(), service);
        }
        assert_eq!("postgres".parse::<Service>().unwrap(), Service::Database);
        assert_eq!("Functions".parse::<Service>().unwrap(), Service::EdgeFunctions);
        assert!("storage".parse::<Service>().is_err());
    }

    #[test]
    fn test_service_serialization() {
        assert_eq!(
            serde_json::to_string(&Service::EdgeFunctions).unwrap(),
            "\"edge_functions\""
        );
    }

    #[test]
    fn test_flat_record_conversion() {
        let raw = record(
            r#"{"timestamp": 1714000000000000, "event_message": "POST | 500 | /rest/v1/orders",
                "method": "POST", "path": "/rest/v1/orders", "status_code": 500}"#,
        );
        let entry = LogEntry::from_record(Service::Api, raw, Utc::now());

        assert_eq!(entry.method.as_deref(), Some("POST"));
        assert_eq!(entry.path.as_deref(), Some("/rest/v1/orders"));
        assert_eq!(entry.status_code, Some(500));
        assert_eq!(entry.nested_status_code, None);
        assert_eq!(entry.message, "POST | 500 | /rest/v1/orders");
        assert_eq!(entry.timestamp.timestamp(), 1_714_000_000);
    }

    #[test]
    fn test_nested_metadata_as_array() {
        let raw = record(
            r#"{"event_message": "boom",
                "metadata": [{"request": [{"method": "GET", "path": "/x"}],
                              "response": [{"status_code": "404"}]}]}"#,
        );
        let entry = LogEntry::from_record(Service::Api, raw, Utc::now());

        assert_eq!(entry.method.as_deref(), Some("GET"));
        assert_eq!(entry.path.as_deref(), Some("/x"));
        assert_eq!(entry.nested_status_code, Some(404));
        assert_eq!(entry.status_code, None);
    }

    #[test]
    fn test_nested_metadata_as_object() {
        let raw = record(
            r#"{"message": "db down", "metadata": {"parsed": {"error_severity": "FATAL"},
                "response": {"status_code": 503}}}"#,
        );
        let entry = LogEntry::from_record(Service::Database, raw, Utc::now());

        assert_eq!(entry.error_severity.as_deref(), Some("FATAL"));
        assert_eq!(entry.nested_status_code, Some(503));
        assert_eq!(entry.message, "db down");
    }

    #[test]
    fn test_missing_timestamp_uses_fallback() {
        let fallback = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let entry = LogEntry::from_record(Service::Auth, RawLogRecord::default(), fallback);
        assert_eq!(entry.timestamp, fallback);
        assert_eq!(entry.message, "");
    }

    #[test]
    fn test_timestamp_units() {
        let micros = RawTimestamp::Number(1_714_000_000_123_456).to_utc().unwrap();
        let millis = RawTimestamp::Number(1_714_000_000_123).to_utc().unwrap();
        let secs = RawTimestamp::Number(1_714_000_000).to_utc().unwrap();

        assert_eq!(micros.timestamp(), 1_714_000_000);
        assert_eq!(millis.timestamp(), 1_714_000_000);
        assert_eq!(secs.timestamp(), 1_714_000_000);
    }

    #[test]
    fn test_timestamp_strings() {
        let rfc = RawTimestamp::Text("2024-05-01T10:15:30Z".to_string())
            .to_utc()
            .unwrap();
        assert_eq!(rfc.hour(), 10);

        let naive = RawTimestamp::Text("2024-05-01 10:15:30.250".to_string())
            .to_utc()
            .unwrap();
        assert_eq!(naive.minute(), 15);

        assert!(RawTimestamp::Text("yesterday".to_string()).to_utc().is_none());
    }

    #[test]
    fn test_raw_status_parsing() {
        assert_eq!(RawStatus::Number(502).to_u16(), Some(502));
        assert_eq!(RawStatus::Text(" 401 ".to_string()).to_u16(), Some(401));
        assert_eq!(RawStatus::Text("n/a".to_string()).to_u16(), None);
        assert_eq!(RawStatus::Number(70_000).to_u16(), None);
    }
}
