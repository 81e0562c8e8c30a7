//! Configuration loading
//!
//! Settings come from an optional TOML file with `[source]`, `[store]`,
//! `[alerts]` and `[trigger]` sections. Every section has defaults, and the
//! credentials can be supplied through environment variables, which win over
//! the file.

use crate::alerts::AlertSettings;
use crate::error::ConfigError;
use crate::events::Service;
use crate::store::postgrest::StoreTables;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const ENV_ACCESS_TOKEN: &str = "SUPABASE_ACCESS_TOKEN";
pub const ENV_PROJECT_REF: &str = "SUPABASE_PROJECT_REF";
pub const ENV_PROJECT_URL: &str = "SUPABASE_URL";
pub const ENV_SERVICE_ROLE_KEY: &str = "SUPABASE_SERVICE_ROLE_KEY";
pub const ENV_CRON_SECRET: &str = "CRON_SECRET";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub store: StoreConfig,
    pub alerts: AlertsConfig,
    pub trigger: TriggerConfig,
}

/// Where logs are read from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Management API root
    pub base_url: String,
    pub project_ref: Option<String>,
    pub access_token: Option<String>,
    /// Services to scan, by name
    pub services: Vec<String>,
    pub lookback_minutes: u32,
    pub request_timeout_seconds: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.supabase.com".to_string(),
            project_ref: None,
            access_token: None,
            services: Service::ALL.iter().map(|s| s.as_str().to_string()).collect(),
            lookback_minutes: 60,
            request_timeout_seconds: 30,
        }
    }
}

/// Where issues and runs are persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Project URL (e.g., "https://abc.supabase.co")
    pub project_url: Option<String>,
    /// Explicit PostgREST root; derived from `project_url` when absent
    pub rest_url: Option<String>,
    pub service_role_key: Option<String>,
    pub request_timeout_seconds: u64,
    pub tables: StoreTables,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            project_url: None,
            rest_url: None,
            service_role_key: None,
            request_timeout_seconds: 10,
            tables: StoreTables::default(),
        }
    }
}

/// Notification endpoints and alert shaping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Push-sending function; derived from the project URL when absent
    pub push_url: Option<String>,
    /// Email-sending function; derived from the project URL when absent
    pub email_url: Option<String>,
    /// Bearer token for both functions; defaults to the service role key
    pub function_token: Option<String>,
    pub request_timeout_seconds: u64,
    #[serde(flatten)]
    pub settings: AlertSettings,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            push_url: None,
            email_url: None,
            function_token: None,
            request_timeout_seconds: 10,
            settings: AlertSettings::default(),
        }
    }
}

/// HTTP trigger endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub listen_addr: String,
    /// Shared secret expected as a bearer token; unauthenticated when absent
    pub cron_secret: Option<String>,
    /// Requests allowed per client per window
    pub rate_limit_max: u32,
    pub rate_limit_window_seconds: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8787".to_string(),
            cron_secret: None,
            rate_limit_max: 10,
            rate_limit_window_seconds: 60,
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load the file (if any), apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override credentials with values from `lookup` (normally the environment)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = lookup(ENV_ACCESS_TOKEN) {
            self.source.access_token = Some(token);
        }
        if let Some(project_ref) = lookup(ENV_PROJECT_REF) {
            self.source.project_ref = Some(project_ref);
        }
        if let Some(url) = lookup(ENV_PROJECT_URL) {
            self.store.project_url = Some(url);
        }
        if let Some(key) = lookup(ENV_SERVICE_ROLE_KEY) {
            self.store.service_role_key = Some(key);
        }
        if let Some(secret) = lookup(ENV_CRON_SECRET) {
            self.trigger.cron_secret = Some(secret);
        }
    }

    /// Check value ranges and service names
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.lookback_minutes == 0 {
            return Err(ConfigError::ValidationError(
                "source.lookback_minutes must be greater than 0".to_string(),
            ));
        }
        for (name, seconds) in [
            ("source.request_timeout_seconds", self.source.request_timeout_seconds),
            ("store.request_timeout_seconds", self.store.request_timeout_seconds),
            ("alerts.request_timeout_seconds", self.alerts.request_timeout_seconds),
            ("trigger.rate_limit_window_seconds", self.trigger.rate_limit_window_seconds),
        ] {
            if seconds == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }
        if self.source.services.is_empty() {
            return Err(ConfigError::ValidationError(
                "source.services must name at least one service".to_string(),
            ));
        }
        self.services()?;

        if self.alerts.settings.top_n == 0 {
            return Err(ConfigError::ValidationError(
                "alerts.top_n must be greater than 0".to_string(),
            ));
        }
        if self.alerts.settings.push_body_limit < 16 {
            return Err(ConfigError::ValidationError(
                "alerts.push_body_limit must be at least 16".to_string(),
            ));
        }
        if self.trigger.rate_limit_max == 0 {
            return Err(ConfigError::ValidationError(
                "trigger.rate_limit_max must be greater than 0".to_string(),
            ));
        }
        self.listen_addr()?;
        Ok(())
    }

    /// Configured services, in configured order, without duplicates
    pub fn services(&self) -> Result<Vec<Service>, ConfigError> {
        let mut services = Vec::with_capacity(self.source.services.len());
        for name in &self.source.services {
            let service: Service = name.parse().map_err(ConfigError::ValidationError)?;
            if !services.contains(&service) {
                services.push(service);
            }
        }
        Ok(services)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.trigger.listen_addr.parse().map_err(|e| {
            ConfigError::ValidationError(format!(
                "trigger.listen_addr '{}': {}",
                self.trigger.listen_addr, e
            ))
        })
    }

    /// Log API project ref and access token
    pub fn source_credentials(&self) -> Result<(&str, &str), ConfigError> {
        let project_ref =
            non_empty(self.source.project_ref.as_ref()).ok_or(ConfigError::Missing(ENV_PROJECT_REF))?;
        let token = non_empty(self.source.access_token.as_ref())
            .ok_or(ConfigError::Missing(ENV_ACCESS_TOKEN))?;
        Ok((project_ref, token))
    }

    fn project_url(&self) -> Option<&str> {
        non_empty(self.store.project_url.as_ref()).map(|url| url.trim_end_matches('/'))
    }

    /// PostgREST root, explicit or derived from the project URL
    pub fn rest_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = non_empty(self.store.rest_url.as_ref()) {
            return Ok(url.to_string());
        }
        self.project_url()
            .map(|url| format!("{}/rest/v1", url))
            .ok_or(ConfigError::Missing(ENV_PROJECT_URL))
    }

    pub fn service_role_key(&self) -> Result<&str, ConfigError> {
        non_empty(self.store.service_role_key.as_ref()).ok_or(ConfigError::Missing(ENV_SERVICE_ROLE_KEY))
    }

    /// Push function endpoint, if one is configured or derivable
    pub fn push_url(&self) -> Option<String> {
        non_empty(self.alerts.push_url.as_ref())
            .map(str::to_string)
            .or_else(|| {
                self.project_url()
                    .map(|url| format!("{}/functions/v1/send-push-notification", url))
            })
    }

    /// Email function endpoint, if one is configured or derivable
    pub fn email_url(&self) -> Option<String> {
        non_empty(self.alerts.email_url.as_ref())
            .map(str::to_string)
            .or_else(|| {
                self.project_url()
                    .map(|url| format!("{}/functions/v1/send-email", url))
            })
    }

    /// Bearer token for the notification functions
    pub fn function_token(&self) -> Option<&str> {
        non_empty(self.alerts.function_token.as_ref())
            .or_else(|| non_empty(self.store.service_role_key.as_ref()))
    }

    /// Cron secret, if set and non-empty
    pub fn cron_secret(&self) -> Option<&str> {
        non_empty(self.trigger.cron_secret.as_ref())
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source.request_timeout_seconds)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store.request_timeout_seconds)
    }

    pub fn alerts_timeout(&self) -> Duration {
        Duration::from_secs(self.alerts.request_timeout_seconds)
    }
}
