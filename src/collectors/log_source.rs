use crate::error::FetchError;
use crate::events::{LogEntry, Service, Timestamp};
use chrono::Duration;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Time range of logs considered in one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl FetchWindow {
    /// The `minutes` preceding `end`
    pub fn lookback(end: Timestamp, minutes: u32) -> Self {
        Self {
            start: end - Duration::minutes(i64::from(minutes)),
            end,
        }
    }

    /// ISO-8601 start bound as sent to the log API
    pub fn start_iso(&self) -> String {
        self.start.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }

    /// ISO-8601 end bound as sent to the log API
    pub fn end_iso(&self) -> String {
        self.end.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }
}

/// Trait for anything that can return the logs of a service for a window
pub trait LogSource: Send + Sync {
    fn fetch<'a>(
        &'a self,
        service: Service,
        window: &'a FetchWindow,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LogEntry>, FetchError>> + Send + 'a>>;
}

/// Log source with canned per-service responses
///
/// Used by dry runs and tests. A service without a scripted response returns
/// an empty list.
#[derive(Clone, Default)]
pub struct ScriptedLogSource {
    responses: Arc<Mutex<HashMap<Service, Result<Vec<LogEntry>, String>>>>,
    fetch_count: Arc<Mutex<usize>>,
}

impl ScriptedLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `entries` for `service`
    pub fn with_entries(self, service: Service, entries: Vec<LogEntry>) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(service, Ok(entries));
        }
        self
    }

    /// Fail every fetch for `service` with `message`
    pub fn with_failure(self, service: Service, message: impl Into<String>) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(service, Err(message.into()));
        }
        self
    }

    /// Number of fetches served so far
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.lock().map(|count| *count).unwrap_or(0)
    }
}

impl LogSource for ScriptedLogSource {
    fn fetch<'a>(
        &'a self,
        service: Service,
        window: &'a FetchWindow,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LogEntry>, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            if let Ok(mut count) = self.fetch_count.lock() {
                *count += 1;
            }

            let scripted = self
                .responses
                .lock()
                .ok()
                .and_then(|responses| responses.get(&service).cloned());

            match scripted {
                Some(Ok(entries)) => Ok(entries
                    .into_iter()
                    .filter(|e| e.timestamp >= window.start && e.timestamp <= window.end)
                    .collect()),
                Some(Err(message)) => Err(FetchError::Api(message)),
                None => Ok(Vec::new()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_lookback_window() {
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let window = FetchWindow::lookback(end, 60);

        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap());
        assert_eq!(window.start_iso(), "2024-05-01T11:00:00.000Z");
        assert_eq!(window.end_iso(), "2024-05-01T12:00:00.000Z");
    }

    #[tokio::test]
    async fn test_scripted_source_filters_to_window() {
        let now = Utc::now();
        let window = FetchWindow::lookback(now, 60);
        let source = ScriptedLogSource::new().with_entries(
            Service::Api,
            vec![
                LogEntry::new(Service::Api, now - Duration::minutes(5), "inside"),
                LogEntry::new(Service::Api, now - Duration::minutes(90), "outside"),
            ],
        );

        let entries = source.fetch(Service::Api, &window).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "inside");
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_source_failure_and_default() {
        let window = FetchWindow::lookback(Utc::now(), 60);
        let source = ScriptedLogSource::new().with_failure(Service::Auth, "connection reset");

        assert!(matches!(
            source.fetch(Service::Auth, &window).await,
            Err(FetchError::Api(_))
        ));
        assert!(source
            .fetch(Service::Database, &window)
            .await
            .unwrap()
            .is_empty());
    }
}
