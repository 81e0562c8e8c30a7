use crate::error::StoreError;
use crate::events::Timestamp;
use crate::store::{AuditRun, Issue, IssueStatus, IssueStore, RunStatus, RunTotals, StoreFuture};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    issues: HashMap<String, Issue>,
    runs: Vec<AuditRun>,
    push_tokens: Vec<String>,
    failing_signatures: HashSet<String>,
}

/// Issue store held entirely in memory
///
/// Clones share the same state, so a test can keep a handle while the auditor
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing issue
    pub fn with_issue(self, issue: Issue) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.issues.insert(issue.signature.clone(), issue);
        }
        self
    }

    /// Register an admin device token
    pub fn with_push_token(self, token: impl Into<String>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.push_tokens.push(token.into());
        }
        self
    }

    /// Make every write touching `signature` fail
    pub fn with_failing_signature(self, signature: impl Into<String>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.failing_signatures.insert(signature.into());
        }
        self
    }

    /// Snapshot of the issue for a signature
    pub fn issue(&self, signature: &str) -> Option<Issue> {
        self.lock().ok()?.issues.get(signature).cloned()
    }

    /// Snapshot of all issues
    pub fn issues(&self) -> Vec<Issue> {
        self.lock()
            .map(|state| state.issues.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of all audit runs, oldest first
    pub fn runs(&self) -> Vec<AuditRun> {
        self.lock()
            .map(|state| state.runs.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn check_writable(state: &State, signature: &str) -> Result<(), StoreError> {
        if state.failing_signatures.contains(signature) {
            Err(StoreError::Unavailable(format!(
                "write rejected for {}",
                signature
            )))
        } else {
            Ok(())
        }
    }

    fn close_run(
        &self,
        run_id: &str,
        completed_at: Timestamp,
        totals: &RunTotals,
        message: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let run = state
            .runs
            .iter_mut()
            .find(|run| run.id == run_id)
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;

        run.status = RunStatus::Completed;
        run.completed_at = Some(completed_at);
        run.totals = totals.clone();
        run.error_message = message.map(str::to_string);
        Ok(())
    }
}

impl IssueStore for MemoryStore {
    fn find_issue<'a>(&'a self, signature: &'a str) -> StoreFuture<'a, Option<Issue>> {
        Box::pin(async move { Ok(self.lock()?.issues.get(signature).cloned()) })
    }

    fn insert_issue<'a>(&'a self, issue: &'a Issue) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock()?;
            Self::check_writable(&state, &issue.signature)?;
            state.issues.insert(issue.signature.clone(), issue.clone());
            Ok(())
        })
    }

    fn update_issue<'a>(&'a self, issue: &'a Issue) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock()?;
            Self::check_writable(&state, &issue.signature)?;
            let stored = state
                .issues
                .get_mut(&issue.signature)
                .ok_or_else(|| StoreError::NotFound(issue.signature.clone()))?;

            stored.last_seen = issue.last_seen;
            stored.occurrence_count = issue.occurrence_count;
            stored.status = issue.status;
            stored.resolved_at = issue.resolved_at;
            stored.resolved_by = issue.resolved_by.clone();
            stored.resolution_note = issue.resolution_note.clone();
            Ok(())
        })
    }

    fn mark_alert_sent<'a>(
        &'a self,
        signatures: &'a [String],
        at: Timestamp,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock()?;
            for signature in signatures {
                if let Some(issue) = state.issues.get_mut(signature) {
                    issue.alert_sent_at = Some(at);
                }
            }
            Ok(())
        })
    }

    fn list_issues(&self, status: Option<IssueStatus>) -> StoreFuture<'_, Vec<Issue>> {
        Box::pin(async move {
            let state = self.lock()?;
            let mut issues: Vec<Issue> = state
                .issues
                .values()
                .filter(|issue| status.map_or(true, |s| issue.status == s))
                .cloned()
                .collect();
            issues.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
            Ok(issues)
        })
    }

    fn admin_push_tokens(&self) -> StoreFuture<'_, Vec<String>> {
        Box::pin(async move { Ok(self.lock()?.push_tokens.clone()) })
    }

    fn open_run<'a>(&'a self, run: &'a AuditRun) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.lock()?.runs.push(run.clone());
            Ok(())
        })
    }

    fn complete_run<'a>(
        &'a self,
        run_id: &'a str,
        completed_at: Timestamp,
        totals: &'a RunTotals,
        error_message: Option<&'a str>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.close_run(run_id, completed_at, totals, error_message) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Service;
    use crate::store::tests::group;
    use crate::store::{transition_issue, Resolution};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_insert_find_update() {
        let store = MemoryStore::new();
        let mut issue = Issue::from_group(&group(2, Utc::now()));

        store.insert_issue(&issue).await.unwrap();
        assert_eq!(store.find_issue("0badc0de").await.unwrap(), Some(issue.clone()));

        issue.occurrence_count = 10;
        issue.status = IssueStatus::Recurring;
        store.update_issue(&issue).await.unwrap();

        let stored = store.issue("0badc0de").unwrap();
        assert_eq!(stored.occurrence_count, 10);
        assert_eq!(stored.status, IssueStatus::Recurring);
    }

    #[tokio::test]
    async fn test_update_missing_issue() {
        let store = MemoryStore::new();
        let issue = Issue::from_group(&group(1, Utc::now()));
        assert!(matches!(
            store.update_issue(&issue).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failing_signature() {
        let store = MemoryStore::new().with_failing_signature("0badc0de");
        let issue = Issue::from_group(&group(1, Utc::now()));
        assert!(store.insert_issue(&issue).await.is_err());
        assert!(store.issue("0badc0de").is_none());
    }

    #[tokio::test]
    async fn test_mark_alert_sent_skips_unknown() {
        let issue = Issue::from_group(&group(1, Utc::now()));
        let store = MemoryStore::new().with_issue(issue);
        let at = Utc::now();

        store
            .mark_alert_sent(&["0badc0de".to_string(), "ffffffff".to_string()], at)
            .await
            .unwrap();

        assert_eq!(store.issue("0badc0de").unwrap().alert_sent_at, Some(at));
    }

    #[tokio::test]
    async fn test_list_issues_filters_and_orders() {
        let now = Utc::now();
        let mut old = Issue::from_group(&group(1, now - Duration::hours(2)));
        old.signature = "00000001".to_string();
        let mut recent = Issue::from_group(&group(1, now));
        recent.signature = "00000002".to_string();
        let mut resolved = Issue::from_group(&group(1, now));
        resolved.signature = "00000003".to_string();
        resolved.status = IssueStatus::Resolved;

        let store = MemoryStore::new()
            .with_issue(old)
            .with_issue(recent)
            .with_issue(resolved);

        let open = store.list_issues(Some(IssueStatus::New)).await.unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].signature, "00000002");

        assert_eq!(store.list_issues(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let store = MemoryStore::new();
        let run = AuditRun::open(Utc::now(), &[Service::Api]);
        store.open_run(&run).await.unwrap();

        let totals = RunTotals {
            logs_scanned: 42,
            errors_found: 3,
            new_issues: 1,
            recurring_issues: 0,
            services_checked: vec![Service::Api],
        };
        store
            .complete_run(&run.id, Utc::now(), &totals, None)
            .await
            .unwrap();

        let runs = store.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(runs[0].totals.logs_scanned, 42);

        assert!(runs[0].error_message.is_none());

        assert!(store
            .complete_run("missing", Utc::now(), &totals, Some("x"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_transition_issue() {
        let store = MemoryStore::new().with_issue(Issue::from_group(&group(4, Utc::now())));

        let issue = transition_issue(
            &store,
            "0badc0de",
            IssueStatus::Resolved,
            Some(Resolution {
                by: Some("dana".to_string()),
                ..Resolution::default()
            }),
        )
        .await
        .unwrap();

        assert_eq!(issue.status, IssueStatus::Resolved);
        let stored = store.issue("0badc0de").unwrap();
        assert_eq!(stored.status, IssueStatus::Resolved);
        assert_eq!(stored.occurrence_count, 0);
        assert_eq!(stored.resolved_by.as_deref(), Some("dana"));

        assert!(matches!(
            transition_issue(&store, "nope", IssueStatus::Ignored, None).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
