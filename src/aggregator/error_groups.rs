//! Within-run error grouping
//!
//! This module provides [`ErrorAggregator`], which classifies log entries,
//! normalizes the errors among them and folds them into one [`ErrorGroup`] per
//! signature. It lives for a single run and is discarded afterwards.

use crate::aggregator::classifier::{is_error, ErrorKey};
use crate::aggregator::normalize::{extract_pattern, signature};
use crate::events::{LogEntry, Service, Timestamp};
use serde::Serialize;
use std::collections::HashMap;

/// All occurrences of one error signature within a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorGroup {
    pub signature: String,
    pub path: String,
    pub method: String,
    pub status_code: u16,
    pub message_pattern: String,
    pub service: Service,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    pub count: u64,
    /// Raw message of the first occurrence
    pub sample_message: String,
}

impl ErrorGroup {
    fn seed(signature: String, key: ErrorKey, pattern: String, entry: &LogEntry) -> Self {
        Self {
            signature,
            path: key.path,
            method: key.method,
            status_code: key.status_code,
            message_pattern: pattern,
            service: entry.service,
            first_seen: entry.timestamp,
            last_seen: entry.timestamp,
            count: 1,
            sample_message: entry.message.clone(),
        }
    }

    fn absorb(&mut self, timestamp: Timestamp) {
        self.count += 1;
        if timestamp > self.last_seen {
            self.last_seen = timestamp;
        }
        if timestamp < self.first_seen {
            self.first_seen = timestamp;
        }
    }
}

/// Accumulates error groups keyed by signature
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    groups: HashMap<String, ErrorGroup>,
    scanned: u64,
    errors: u64,
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one entry
    ///
    /// Every entry counts toward the scanned total. Returns the signature when
    /// the entry was an error and has been grouped.
    pub fn add(&mut self, entry: &LogEntry) -> Option<String> {
        self.scanned += 1;
        if !is_error(entry) {
            return None;
        }
        self.errors += 1;

        let key = ErrorKey::for_entry(entry);
        let pattern = extract_pattern(&entry.message);
        let sig = signature(&key.path, &key.method, key.status_code, &pattern);

        match self.groups.get_mut(&sig) {
            Some(group) => group.absorb(entry.timestamp),
            None => {
                self.groups.insert(
                    sig.clone(),
                    ErrorGroup::seed(sig.clone(), key, pattern, entry),
                );
            }
        }
        Some(sig)
    }

    /// Feed a batch of entries
    pub fn extend<'a>(&mut self, entries: impl IntoIterator<Item = &'a LogEntry>) {
        for entry in entries {
            self.add(entry);
        }
    }

    /// Number of entries seen, errors or not
    pub fn scanned(&self) -> u64 {
        self.scanned
    }

    /// Number of entries classified as errors
    pub fn error_count(&self) -> u64 {
        self.errors
    }

    /// Number of distinct signatures
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn get(&self, signature: &str) -> Option<&ErrorGroup> {
        self.groups.get(signature)
    }

    /// Consume the aggregator, returning groups by descending count
    ///
    /// Ties are broken by signature so the order is deterministic.
    pub fn into_groups(self) -> Vec<ErrorGroup> {
        let mut groups: Vec<ErrorGroup> = self.groups.into_values().collect();
        groups.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.signature.cmp(&b.signature))
        });
        groups
    }
}
