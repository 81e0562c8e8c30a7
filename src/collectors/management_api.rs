use crate::collectors::envelope::parse_log_entries;
use crate::collectors::log_source::{FetchWindow, LogSource};
use crate::error::FetchError;
use crate::events::{LogEntry, Service};
use log::debug;
use reqwest::Client;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Log source backed by the Supabase Management API log endpoint
///
/// Issues one authenticated GET per service against
/// `{base_url}/v1/projects/{project_ref}/analytics/endpoints/logs.all`,
/// passing the service's log query and the ISO-8601 window bounds.
pub struct ManagementApiLogSource {
    client: Client,
    base_url: String,
    project_ref: String,
    access_token: String,
}

impl ManagementApiLogSource {
    /// Create a new log source
    ///
    /// # Arguments
    /// * `base_url` - Management API root (e.g., "https://api.supabase.com")
    /// * `project_ref` - Project reference id
    /// * `access_token` - Bearer token for the Management API
    /// * `timeout` - Per-request timeout
    pub fn new(
        base_url: String,
        project_ref: String,
        access_token: String,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            project_ref,
            access_token,
        })
    }

    /// Format the log endpoint URL
    fn api_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/analytics/endpoints/logs.all",
            self.base_url.trim_end_matches('/'),
            self.project_ref
        )
    }
}

impl LogSource for ManagementApiLogSource {
    fn fetch<'a>(
        &'a self,
        service: Service,
        window: &'a FetchWindow,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LogEntry>, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            let start = window.start_iso();
            let end = window.end_iso();

            let response = self
                .client
                .get(self.api_url())
                .bearer_auth(&self.access_token)
                .query(&[
                    ("sql", service.log_query()),
                    ("iso_timestamp_start", start.as_str()),
                    ("iso_timestamp_end", end.as_str()),
                ])
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;

            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    body: body.chars().take(500).collect(),
                });
            }

            let entries = parse_log_entries(service, &body, window.end)?;
            debug!("Fetched {} {} log entries", entries.len(), service);
            Ok(entries)
        })
    }
}
