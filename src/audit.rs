//! One pass of the log audit
//!
//! [`LogAuditor::run`] fetches every configured service concurrently, groups
//! the errors by signature, reconciles the groups with the persisted issues,
//! alerts on new and recurring issues and records the run.

use crate::aggregator::{ErrorAggregator, ErrorGroup};
use crate::alerts::{AlertBatch, AlertItem, AlertManager, DeliveryReport};
use crate::collectors::{FetchWindow, LogSource};
use crate::error::{AuditError, FetchError, StoreError};
use crate::events::{LogEntry, Service, Timestamp};
use crate::store::{AuditRun, Issue, IssueStatus, IssueStore, RunTotals};
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

/// Per-service result of the fetch step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceReport {
    pub service: Service,
    pub logs: u64,
    pub errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one run, returned to the caller as JSON
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditSummary {
    pub run_id: String,
    pub started_at: Timestamp,
    pub duration_ms: u64,
    pub logs_scanned: u64,
    pub errors_found: u64,
    pub new_issues: u64,
    pub recurring_issues: u64,
    /// Issues included in the alert batch
    pub alerts_sent: usize,
    /// Groups whose issue could not be read or written
    pub persist_failures: usize,
    pub delivery: DeliveryReport,
    pub services: Vec<ServiceReport>,
}

impl AuditSummary {
    fn totals(&self) -> RunTotals {
        RunTotals {
            logs_scanned: self.logs_scanned,
            errors_found: self.errors_found,
            new_issues: self.new_issues,
            recurring_issues: self.recurring_issues,
            services_checked: self.services.iter().map(|s| s.service).collect(),
        }
    }

    /// Whether at least one service was configured and none could be fetched
    pub fn all_sources_failed(&self) -> bool {
        !self.services.is_empty() && self.services.iter().all(|s| s.error.is_some())
    }
}

/// What reconciling one group did to its issue
#[derive(Debug, Clone, PartialEq)]
enum Reconciled {
    Created(Issue),
    Recurred { issue: Issue, alert: bool },
    Updated,
}

/// Runs the audit against a log source, an issue store and alert channels
pub struct LogAuditor {
    source: Arc<dyn LogSource>,
    store: Arc<dyn IssueStore>,
    alerts: AlertManager,
    services: Vec<Service>,
    lookback_minutes: u32,
}

impl LogAuditor {
    pub fn new(
        source: Arc<dyn LogSource>,
        store: Arc<dyn IssueStore>,
        alerts: AlertManager,
        services: Vec<Service>,
        lookback_minutes: u32,
    ) -> Self {
        Self {
            source,
            store,
            alerts,
            services,
            lookback_minutes,
        }
    }

    /// Audit the lookback window ending now
    pub async fn run(&self) -> Result<AuditSummary, AuditError> {
        self.run_at(Utc::now()).await
    }

    /// Audit the lookback window ending at `now`
    ///
    /// The run row is opened before any work; if opening fails nothing else
    /// happens. Once open, the row is always closed as `completed`. Fetch and
    /// persistence failures are reported in the summary, and a run where every
    /// source failed carries that in its `error_message`.
    pub async fn run_at(&self, now: Timestamp) -> Result<AuditSummary, AuditError> {
        let started = Instant::now();
        let run = AuditRun::open(now, &self.services);
        self.store.open_run(&run).await?;

        let window = FetchWindow::lookback(now, self.lookback_minutes);
        info!(
            "Starting log audit {} for {} service(s) from {} to {}",
            run.id,
            self.services.len(),
            window.start_iso(),
            window.end_iso()
        );

        let mut summary = self.execute(&run, window, now).await;
        summary.duration_ms = started.elapsed().as_millis() as u64;

        let note = summary.all_sources_failed().then(|| {
            let note = format!("Every log source failed ({} services)", summary.services.len());
            error!("Log audit {}: {}", run.id, note);
            note
        });
        if let Err(e) = self
            .store
            .complete_run(&run.id, Utc::now(), &summary.totals(), note.as_deref())
            .await
        {
            error!("Failed to close audit run {}: {}", run.id, e);
        }

        info!(
            "Log audit {} finished in {}ms: {} logs, {} errors, {} new, {} recurring, {} persist failures",
            run.id,
            summary.duration_ms,
            summary.logs_scanned,
            summary.errors_found,
            summary.new_issues,
            summary.recurring_issues,
            summary.persist_failures
        );
        Ok(summary)
    }

    async fn execute(&self, run: &AuditRun, window: FetchWindow, now: Timestamp) -> AuditSummary {
        let fetched = self.fetch_all(window).await;

        let mut aggregator = ErrorAggregator::new();
        let mut services = Vec::with_capacity(fetched.len());
        for (service, result) in fetched {
            services.push(match result {
                Ok(entries) => {
                    let errors = entries
                        .iter()
                        .filter(|entry| aggregator.add(entry).is_some())
                        .count() as u64;
                    debug!("{}: {} logs, {} errors", service, entries.len(), errors);
                    ServiceReport {
                        service,
                        logs: entries.len() as u64,
                        errors,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("Skipping {} logs: {}", service, e);
                    ServiceReport {
                        service,
                        logs: 0,
                        errors: 0,
                        error: Some(e.to_string()),
                    }
                }
            });
        }

        let logs_scanned = aggregator.scanned();
        let errors_found = aggregator.error_count();
        let groups = aggregator.into_groups();
        info!("Found {} error group(s) in {} errors", groups.len(), errors_found);

        let mut new_issues = 0;
        let mut recurring_issues = 0;
        let mut persist_failures = 0;
        let mut alertable = Vec::new();

        for group in &groups {
            match self.reconcile(group).await {
                Ok(Reconciled::Created(issue)) => {
                    new_issues += 1;
                    alertable.push(AlertItem::from_issue(&issue, group.count));
                }
                Ok(Reconciled::Recurred { issue, alert }) => {
                    recurring_issues += 1;
                    if alert {
                        alertable.push(AlertItem::from_issue(&issue, group.count));
                    }
                }
                Ok(Reconciled::Updated) => {}
                Err(e) => {
                    persist_failures += 1;
                    error!(
                        "Failed to persist issue {} ({} {} {}): {}",
                        group.signature, group.status_code, group.method, group.path, e
                    );
                }
            }
        }

        let batch = AlertBatch::new(alertable);
        let delivery = self.alert(&batch, now).await;

        AuditSummary {
            run_id: run.id.clone(),
            started_at: run.started_at,
            duration_ms: 0,
            logs_scanned,
            errors_found,
            new_issues,
            recurring_issues,
            alerts_sent: batch.len(),
            persist_failures,
            delivery,
            services,
        }
    }

    /// Fetch every service concurrently, returning results in configured order
    async fn fetch_all(&self, window: FetchWindow) -> Vec<(Service, Result<Vec<LogEntry>, FetchError>)> {
        let mut tasks = JoinSet::new();
        for (index, service) in self.services.iter().copied().enumerate() {
            let source = Arc::clone(&self.source);
            tasks.spawn(async move { (index, source.fetch(service, &window).await) });
        }

        let mut results: Vec<Option<Result<Vec<LogEntry>, FetchError>>> =
            self.services.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!("Log fetch task failed: {}", e),
            }
        }

        self.services
            .iter()
            .copied()
            .zip(results)
            .map(|(service, result)| {
                let result = result.unwrap_or_else(|| {
                    Err(FetchError::Api("fetch task did not complete".to_string()))
                });
                (service, result)
            })
            .collect()
    }

    /// Fold one group into its persisted issue
    async fn reconcile(&self, group: &ErrorGroup) -> Result<Reconciled, StoreError> {
        let Some(mut issue) = self.store.find_issue(&group.signature).await? else {
            let issue = Issue::from_group(group);
            self.store.insert_issue(&issue).await?;
            debug!("New issue {}: {}", issue.signature, group.sample_message);
            return Ok(Reconciled::Created(issue));
        };

        let was_resolved = issue.status == IssueStatus::Resolved;
        let alert = issue.observe(group);
        self.store.update_issue(&issue).await?;

        if was_resolved {
            if !alert {
                info!("Issue {} recurred with alerts suppressed", issue.signature);
            }
            Ok(Reconciled::Recurred { issue, alert })
        } else {
            Ok(Reconciled::Updated)
        }
    }

    /// Deliver the batch and stamp the alerted issues
    async fn alert(&self, batch: &AlertBatch, now: Timestamp) -> DeliveryReport {
        if batch.is_empty() {
            return DeliveryReport::default();
        }

        let tokens = match self.store.admin_push_tokens().await {
            Ok(tokens) => tokens,
            Err(e) => {
                error!("Failed to load admin push tokens: {}", e);
                Vec::new()
            }
        };

        let report = self.alerts.dispatch(batch, &tokens).await;

        if let Err(e) = self.store.mark_alert_sent(&batch.signatures(), now).await {
            error!("Failed to stamp alert_sent_at on {} issue(s): {}", batch.len(), e);
        }
        report
    }
}
