//! Persisted issues and audit runs
//!
//! An [`Issue`] is the durable record of one error signature across runs; an
//! [`AuditRun`] is the append-only summary of one invocation. Both live behind
//! the [`IssueStore`] trait so the job can run against the hosted REST API or
//! an in-memory store.

/// In-memory store for dry runs and tests
pub mod memory;

/// PostgREST-backed store
pub mod postgrest;

pub use memory::MemoryStore;
pub use postgrest::PostgrestStore;

use crate::aggregator::ErrorGroup;
use crate::error::StoreError;
use crate::events::{Service, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

/// Boxed future returned by store operations
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Lifecycle status of an issue
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    /// First seen by the job, nobody has looked at it yet
    New,
    /// An operator is looking into it
    Investigating,
    /// Fixed; reappearance flips it to `Recurring`
    Resolved,
    /// Known and deliberately not acted on
    Ignored,
    /// Reappeared after being resolved
    Recurring,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::New => "new",
            IssueStatus::Investigating => "investigating",
            IssueStatus::Resolved => "resolved",
            IssueStatus::Ignored => "ignored",
            IssueStatus::Recurring => "recurring",
        }
    }

    /// Whether an operator may move an issue from `self` to `next`
    ///
    /// Transitions only move forward (open → investigating → closed). The one
    /// backward edge, resolved → recurring, belongs to the job and is not an
    /// operator transition.
    pub fn operator_can_move_to(&self, next: IssueStatus) -> bool {
        use IssueStatus::*;
        matches!(
            (*self, next),
            (New | Recurring, Investigating | Resolved | Ignored)
                | (Investigating, Resolved | Ignored)
        )
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "new" => Ok(IssueStatus::New),
            "investigating" => Ok(IssueStatus::Investigating),
            "resolved" => Ok(IssueStatus::Resolved),
            "ignored" => Ok(IssueStatus::Ignored),
            "recurring" => Ok(IssueStatus::Recurring),
            other => Err(format!("unknown issue status '{}'", other)),
        }
    }
}

/// Durable record of one error signature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub signature: String,
    pub path: String,
    pub method: String,
    pub status_code: u16,
    pub message_pattern: String,
    pub service: Service,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    pub occurrence_count: u64,
    pub status: IssueStatus,
    #[serde(default)]
    pub suppress_alerts: bool,
    #[serde(default)]
    pub alert_sent_at: Option<Timestamp>,
    #[serde(default)]
    pub resolved_at: Option<Timestamp>,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolution_note: Option<String>,
}

impl Issue {
    /// A fresh issue for a signature seen for the first time
    pub fn from_group(group: &ErrorGroup) -> Self {
        Self {
            signature: group.signature.clone(),
            path: group.path.clone(),
            method: group.method.clone(),
            status_code: group.status_code,
            message_pattern: group.message_pattern.clone(),
            service: group.service,
            first_seen: group.first_seen,
            last_seen: group.last_seen,
            occurrence_count: group.count,
            status: IssueStatus::New,
            suppress_alerts: false,
            alert_sent_at: None,
            resolved_at: None,
            resolved_by: None,
            resolution_note: None,
        }
    }

    /// Fold this run's occurrences into the issue
    ///
    /// Returns `true` when the issue should be alerted, which only happens on a
    /// resolved → recurring transition of an issue without `suppress_alerts`.
    pub fn observe(&mut self, group: &ErrorGroup) -> bool {
        if group.last_seen > self.last_seen {
            self.last_seen = group.last_seen;
        }
        self.occurrence_count = self.occurrence_count.saturating_add(group.count);

        if self.status == IssueStatus::Resolved {
            self.status = IssueStatus::Recurring;
            !self.suppress_alerts
        } else {
            false
        }
    }

    /// Apply an operator status change
    ///
    /// Resolving stamps the resolution metadata and resets the occurrence
    /// count, so a later recurrence counts from zero.
    pub fn apply_operator_status(
        &mut self,
        next: IssueStatus,
        resolution: Option<Resolution>,
    ) -> Result<(), StoreError> {
        if !self.status.operator_can_move_to(next) {
            return Err(StoreError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        self.status = next;
        if next == IssueStatus::Resolved {
            let resolution = resolution.unwrap_or_default();
            self.resolved_at = Some(resolution.at.unwrap_or_else(chrono::Utc::now));
            self.resolved_by = resolution.by;
            self.resolution_note = resolution.note;
            self.occurrence_count = 0;
        }
        Ok(())
    }
}

/// Who resolved an issue and why
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub at: Option<Timestamp>,
    pub by: Option<String>,
    pub note: Option<String>,
}

/// Status of an audit run row
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Totals written when a run completes
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunTotals {
    pub logs_scanned: u64,
    pub errors_found: u64,
    pub new_issues: u64,
    pub recurring_issues: u64,
    pub services_checked: Vec<Service>,
}

/// Summary of one invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRun {
    pub id: String,
    pub started_at: Timestamp,
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
    pub status: RunStatus,
    #[serde(flatten)]
    pub totals: RunTotals,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl AuditRun {
    /// A freshly opened run
    pub fn open(started_at: Timestamp, services: &[Service]) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at,
            completed_at: None,
            status: RunStatus::Running,
            totals: RunTotals {
                services_checked: services.to_vec(),
                ..RunTotals::default()
            },
            error_message: None,
        }
    }
}

/// Storage for issues, audit runs and admin device tokens
pub trait IssueStore: Send + Sync {
    /// Look up the issue for a signature
    fn find_issue<'a>(&'a self, signature: &'a str) -> StoreFuture<'a, Option<Issue>>;

    /// Insert a new issue
    fn insert_issue<'a>(&'a self, issue: &'a Issue) -> StoreFuture<'a, ()>;

    /// Persist the mutable fields of an existing issue (last_seen,
    /// occurrence_count, status, resolution metadata)
    fn update_issue<'a>(&'a self, issue: &'a Issue) -> StoreFuture<'a, ()>;

    /// Stamp `alert_sent_at` on the given signatures
    fn mark_alert_sent<'a>(&'a self, signatures: &'a [String], at: Timestamp)
        -> StoreFuture<'a, ()>;

    /// List issues, optionally restricted to one status, most recent first
    fn list_issues(&self, status: Option<IssueStatus>) -> StoreFuture<'_, Vec<Issue>>;

    /// Push tokens of every admin with a registered device
    fn admin_push_tokens(&self) -> StoreFuture<'_, Vec<String>>;

    /// Append an audit run row in `running` state
    fn open_run<'a>(&'a self, run: &'a AuditRun) -> StoreFuture<'a, ()>;

    /// Close a run as completed with its totals and an optional note on
    /// what went wrong along the way
    fn complete_run<'a>(
        &'a self,
        run_id: &'a str,
        completed_at: Timestamp,
        totals: &'a RunTotals,
        error_message: Option<&'a str>,
    ) -> StoreFuture<'a, ()>;
}

/// Move an issue to a new status on behalf of an operator
pub async fn transition_issue(
    store: &dyn IssueStore,
    signature: &str,
    next: IssueStatus,
    resolution: Option<Resolution>,
) -> Result<Issue, StoreError> {
    let mut issue = store
        .find_issue(signature)
        .await?
        .ok_or_else(|| StoreError::NotFound(signature.to_string()))?;

    issue.apply_operator_status(next, resolution)?;
    store.update_issue(&issue).await?;
    Ok(issue)
}
