/// Error types for the log audit
pub mod error;

/// Services, raw log records and log entries
pub mod events;

/// Log sources and response envelopes
pub mod collectors;

/// Classification, normalization and within-run grouping
pub mod aggregator;

/// Persisted issues and audit runs
pub mod store;

/// Alert batching and delivery
pub mod alerts;

/// The audit run itself
pub mod audit;

/// HTTP trigger endpoint
pub mod server;

/// Configuration management
pub mod config;

// Re-export commonly used types
pub use audit::{AuditSummary, LogAuditor};
pub use error::{AlertError, AuditError, ConfigError, FetchError, StoreError};
