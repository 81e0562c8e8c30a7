//! Error classification for raw log entries
//!
//! Decides whether a [`LogEntry`] is an error and, if so, resolves the
//! effective (path, method, status) triple it is grouped under.

use crate::aggregator::normalize::{
    function_path_from_message, normalize_path, path_from_url, DATABASE_PATH, UNKNOWN_PATH,
};
use crate::events::{LogEntry, Service};

/// Database severities that always count as errors
pub const ERROR_SEVERITIES: [&str; 3] = ["ERROR", "FATAL", "PANIC"];

/// Status used for database errors that carry no status code
pub const DEFAULT_DATABASE_STATUS: u16 = 500;

/// Status recorded for non-database errors without any status code
pub const UNKNOWN_STATUS: u16 = 0;

/// Which field a status code was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    /// Top-level `status_code`
    TopLevel,
    /// `metadata.response[0].status_code`
    Nested,
    /// `response_status_code` (edge functions only)
    EdgeFunction,
}

/// Resolve the status code of an entry using a fixed precedence
///
/// Order: top-level `status_code`, then nested
/// `metadata.response[0].status_code`, then `response_status_code` for edge
/// functions. The first field that is present wins even when a later one holds
/// a different value.
pub fn extract_status(entry: &LogEntry) -> Option<(u16, StatusSource)> {
    if let Some(code) = entry.status_code {
        return Some((code, StatusSource::TopLevel));
    }
    if let Some(code) = entry.nested_status_code {
        return Some((code, StatusSource::Nested));
    }
    if entry.service == Service::EdgeFunctions {
        if let Some(code) = entry.response_status_code {
            return Some((code, StatusSource::EdgeFunction));
        }
    }
    None
}

/// Whether the entry carries a database severity of ERROR, FATAL or PANIC
pub fn has_error_severity(entry: &LogEntry) -> bool {
    entry.service == Service::Database
        && entry
            .error_severity
            .as_deref()
            .map(|s| ERROR_SEVERITIES.contains(&s.trim().to_uppercase().as_str()))
            .unwrap_or(false)
}

/// Whether an entry counts as an error
///
/// A resolved status of 400 or more, or a database error severity. Edge
/// function `response_status_code` is covered here through
/// [`extract_status`], which only falls back to it for edge functions.
pub fn is_error(entry: &LogEntry) -> bool {
    matches!(extract_status(entry), Some((code, _)) if code >= 400) || has_error_severity(entry)
}

/// The normalized identity of an error entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorKey {
    pub path: String,
    pub method: String,
    pub status_code: u16,
}

impl ErrorKey {
    /// Resolve path, method and status for an entry already classified as an error
    pub fn for_entry(entry: &LogEntry) -> Self {
        let is_database = entry.service == Service::Database;

        let raw_path = entry
            .path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| entry.url.as_deref().and_then(path_from_url))
            .or_else(|| {
                if entry.service == Service::EdgeFunctions {
                    function_path_from_message(&entry.message)
                } else {
                    None
                }
            });
        let path = match raw_path {
            Some(p) => normalize_path(&p),
            None if is_database => DATABASE_PATH.to_string(),
            None => UNKNOWN_PATH.to_string(),
        };

        let method = entry
            .method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_uppercase)
            .unwrap_or_else(|| {
                if is_database {
                    "SQL".to_string()
                } else {
                    "UNKNOWN".to_string()
                }
            });

        let status_code = match extract_status(entry) {
            Some((code, _)) => code,
            None if is_database => DEFAULT_DATABASE_STATUS,
            None => UNKNOWN_STATUS,
        };

        Self {
            path,
            method,
            status_code,
        }
    }
}
