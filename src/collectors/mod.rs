/// Log response envelope parsing
pub mod envelope;

/// Log source trait and fetch window
pub mod log_source;

/// Supabase Management API log source
pub mod management_api;

pub use envelope::{parse_log_entries, LogEnvelope};
pub use log_source::{FetchWindow, LogSource, ScriptedLogSource};
pub use management_api::ManagementApiLogSource;
