use thiserror::Error;

/// Errors that can occur while fetching logs from a single service
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Log API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unrecognized log response envelope: {0}")]
    Envelope(String),

    #[error("Log API reported an error: {0}")]
    Api(String),
}

/// Errors that can occur when reading or writing persisted issues and runs
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Store returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid store response: {0}")]
    InvalidResponse(String),

    #[error("Issue cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur when sending alerts
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Failed to send notification: {0}")]
    NotificationFailed(String),

    #[error("Notification endpoint not configured: {0}")]
    NotConfigured(&'static str),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors that abort an audit run as a whole
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Failed to open audit run: {0}")]
    Store(#[from] StoreError),
}
