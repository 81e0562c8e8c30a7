use chrono::{Duration, Utc};
use logaudit::aggregator::{ErrorAggregator, ErrorGroup};
use logaudit::alerts::{AlertManager, AlertSettings, MockNotifier};
use logaudit::collectors::ScriptedLogSource;
use logaudit::events::{LogEntry, Service, Timestamp};
use logaudit::store::{Issue, IssueStatus, MemoryStore, RunStatus};
use logaudit::LogAuditor;
use std::sync::Arc;

const SERVICES: [Service; 4] = Service::ALL;

fn api_error(at: Timestamp, path: &str, status: u16) -> LogEntry {
    let mut entry = LogEntry::new(Service::Api, at, "upstream request failed");
    entry.path = Some(path.to_string());
    entry.method = Some("POST".to_string());
    entry.status_code = Some(status);
    entry
}

fn auth_error(at: Timestamp) -> LogEntry {
    let mut entry = LogEntry::new(Service::Auth, at, "invalid refresh token");
    entry.path = Some("/token".to_string());
    entry.method = Some("POST".to_string());
    entry.status_code = Some(400);
    entry
}

fn group_of(entry: &LogEntry) -> ErrorGroup {
    let mut aggregator = ErrorAggregator::new();
    aggregator.add(entry);
    aggregator.into_groups().remove(0)
}

fn auditor(source: ScriptedLogSource, store: &MemoryStore, notifier: &MockNotifier) -> LogAuditor {
    LogAuditor::new(
        Arc::new(source),
        Arc::new(store.clone()),
        AlertManager::new(
            Arc::new(notifier.clone()),
            Arc::new(notifier.clone()),
            AlertSettings {
                ops_email: "ops@example.com".to_string(),
                ..AlertSettings::default()
            },
        ),
        SERVICES.to_vec(),
        60,
    )
}

#[tokio::test]
async fn new_errors_become_issues_and_alert_once() {
    let now = Utc::now();
    let entries = vec![
        api_error(now - Duration::minutes(30), "/rest/v1/orders/1001", 500),
        api_error(now - Duration::minutes(20), "/rest/v1/orders/1002", 500),
        api_error(now - Duration::minutes(10), "/rest/v1/orders/1003?select=*", 500),
        api_error(now - Duration::minutes(5), "/rest/v1/health", 200),
    ];
    let source = ScriptedLogSource::new().with_entries(Service::Api, entries);
    let store = MemoryStore::new()
        .with_push_token("ExponentPushToken[a]")
        .with_push_token("ExponentPushToken[b]");
    let notifier = MockNotifier::new();

    let summary = auditor(source, &store, &notifier).run_at(now).await.unwrap();

    assert_eq!(summary.logs_scanned, 4);
    assert_eq!(summary.errors_found, 3);
    assert_eq!(summary.new_issues, 1);
    assert_eq!(summary.recurring_issues, 0);
    assert_eq!(summary.alerts_sent, 1);
    assert_eq!(summary.persist_failures, 0);
    assert_eq!(summary.services.len(), 4);

    let issues = store.issues();
    assert_eq!(issues.len(), 1);
    let issue = &issues[0];
    assert_eq!(issue.path, "/rest/v1/orders/{id}");
    assert_eq!(issue.status, IssueStatus::New);
    assert_eq!(issue.occurrence_count, 3);
    assert_eq!(issue.first_seen, now - Duration::minutes(30));
    assert_eq!(issue.last_seen, now - Duration::minutes(10));
    assert_eq!(issue.alert_sent_at, Some(now));

    let pushes = notifier.sent_pushes();
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[0].body, "500 POST /rest/v1/orders/{id} (3x)");
    assert_eq!(notifier.sent_emails().len(), 1);

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].totals.logs_scanned, 4);
    assert_eq!(runs[0].totals.new_issues, 1);
    assert_eq!(runs[0].totals.services_checked, SERVICES.to_vec());
    assert!(runs[0].completed_at.is_some());
}

#[tokio::test]
async fn second_run_updates_without_alerting() {
    let now = Utc::now();
    let store = MemoryStore::new();
    let notifier = MockNotifier::new();

    let first = ScriptedLogSource::new().with_entries(Service::Auth, vec![auth_error(now)]);
    auditor(first, &store, &notifier).run_at(now).await.unwrap();
    assert_eq!(notifier.sent_emails().len(), 1);

    let later = now + Duration::hours(1);
    let second = ScriptedLogSource::new().with_entries(
        Service::Auth,
        vec![auth_error(later), auth_error(later - Duration::minutes(1))],
    );
    let summary = auditor(second, &store, &notifier).run_at(later).await.unwrap();

    assert_eq!(summary.new_issues, 0);
    assert_eq!(summary.alerts_sent, 0);
    assert_eq!(notifier.sent_emails().len(), 1);

    let issue = &store.issues()[0];
    assert_eq!(issue.status, IssueStatus::New);
    assert_eq!(issue.occurrence_count, 3);
    assert_eq!(issue.last_seen, later);
    assert_eq!(store.runs().len(), 2);
}

#[tokio::test]
async fn resolved_issue_recurs_and_alerts() {
    let now = Utc::now();
    let entry = api_error(now, "/rest/v1/payments", 502);
    let mut issue = Issue::from_group(&group_of(&entry));
    issue.status = IssueStatus::Resolved;
    issue.occurrence_count = 0;
    issue.last_seen = now - Duration::days(3);
    let signature = issue.signature.clone();

    let store = MemoryStore::new().with_issue(issue).with_push_token("t");
    let notifier = MockNotifier::new();
    let source = ScriptedLogSource::new().with_entries(Service::Api, vec![entry.clone(), entry]);

    let summary = auditor(source, &store, &notifier).run_at(now).await.unwrap();

    assert_eq!(summary.new_issues, 0);
    assert_eq!(summary.recurring_issues, 1);
    assert_eq!(summary.alerts_sent, 1);

    let stored = store.issue(&signature).unwrap();
    assert_eq!(stored.status, IssueStatus::Recurring);
    assert_eq!(stored.occurrence_count, 2);
    assert_eq!(stored.last_seen, now);
    assert_eq!(stored.alert_sent_at, Some(now));

    let email = &notifier.sent_emails()[0];
    assert_eq!(email.metadata["recurring_count"], 1);
}

#[tokio::test]
async fn investigating_issue_is_counted_silently() {
    let now = Utc::now();
    let entry = api_error(now, "/rest/v1/profiles", 403);
    let mut issue = Issue::from_group(&group_of(&entry));
    issue.status = IssueStatus::Investigating;
    issue.occurrence_count = 10;
    let signature = issue.signature.clone();

    let store = MemoryStore::new().with_issue(issue).with_push_token("t");
    let notifier = MockNotifier::new();
    let source = ScriptedLogSource::new().with_entries(Service::Api, vec![entry]);

    let summary = auditor(source, &store, &notifier).run_at(now).await.unwrap();

    assert_eq!(summary.alerts_sent, 0);
    let stored = store.issue(&signature).unwrap();
    assert_eq!(stored.status, IssueStatus::Investigating);
    assert_eq!(stored.occurrence_count, 11);
    assert!(stored.alert_sent_at.is_none());
    assert!(notifier.sent_pushes().is_empty());
    assert!(notifier.sent_emails().is_empty());
}

#[tokio::test]
async fn failing_service_is_skipped() {
    let now = Utc::now();
    let source = ScriptedLogSource::new()
        .with_failure(Service::Api, "503 Service Unavailable")
        .with_entries(Service::Auth, vec![auth_error(now)]);
    let store = MemoryStore::new();
    let notifier = MockNotifier::new();

    let summary = auditor(source.clone(), &store, &notifier)
        .run_at(now)
        .await
        .unwrap();

    assert_eq!(source.fetch_count(), 4);
    assert_eq!(summary.new_issues, 1);
    assert_eq!(summary.logs_scanned, 1);

    let api = &summary.services[0];
    assert_eq!(api.service, Service::Api);
    assert!(api.error.as_deref().unwrap().contains("503"));
    let auth = &summary.services[2];
    assert_eq!(auth.service, Service::Auth);
    assert_eq!(auth.logs, 1);
    assert_eq!(auth.errors, 1);
    assert!(auth.error.is_none());

    assert_eq!(store.runs()[0].status, RunStatus::Completed);
}

#[tokio::test]
async fn persistence_failure_does_not_stop_other_groups() {
    let now = Utc::now();
    let broken = api_error(now, "/rest/v1/broken", 500);
    let fine = auth_error(now);
    let broken_signature = group_of(&broken).signature;

    let source = ScriptedLogSource::new()
        .with_entries(Service::Api, vec![broken])
        .with_entries(Service::Auth, vec![fine]);
    let store = MemoryStore::new().with_failing_signature(broken_signature.clone());
    let notifier = MockNotifier::new();

    let summary = auditor(source, &store, &notifier).run_at(now).await.unwrap();

    assert_eq!(summary.persist_failures, 1);
    assert_eq!(summary.new_issues, 1);
    assert_eq!(summary.alerts_sent, 1);
    assert!(store.issue(&broken_signature).is_none());
    assert_eq!(store.issues().len(), 1);
    assert_eq!(store.runs()[0].status, RunStatus::Completed);
}

#[tokio::test]
async fn alerts_are_stamped_even_when_delivery_fails() {
    let now = Utc::now();
    let source = ScriptedLogSource::new().with_entries(Service::Auth, vec![auth_error(now)]);
    let store = MemoryStore::new().with_push_token("dead-device");
    let notifier = MockNotifier::new()
        .failing_recipient("dead-device")
        .failing_email();

    let summary = auditor(source, &store, &notifier).run_at(now).await.unwrap();

    assert_eq!(summary.delivery.push_failed, 1);
    assert!(!summary.delivery.email_sent);
    assert_eq!(store.issues()[0].alert_sent_at, Some(now));
}

#[tokio::test]
async fn thousand_identical_errors_make_one_issue() {
    let now = Utc::now();
    let entries = (0..1000)
        .map(|i| {
            let mut entry = LogEntry::new(
                Service::Database,
                now - Duration::seconds(i),
                format!("duplicate key value violates unique constraint, id 10000{}", i % 10),
            );
            entry.error_severity = Some("ERROR".to_string());
            entry
        })
        .collect();
    let source = ScriptedLogSource::new().with_entries(Service::Database, entries);
    let store = MemoryStore::new();
    let notifier = MockNotifier::new();

    let summary = auditor(source, &store, &notifier).run_at(now).await.unwrap();

    assert_eq!(summary.errors_found, 1000);
    assert_eq!(summary.new_issues, 1);
    let issue = &store.issues()[0];
    assert_eq!(issue.occurrence_count, 1000);
    assert_eq!(issue.path, "/database");
    assert_eq!(issue.method, "SQL");
    assert_eq!(issue.status_code, 500);
}

#[tokio::test]
async fn top_level_status_takes_precedence() {
    let now = Utc::now();
    let mut ok_at_top = LogEntry::new(Service::EdgeFunctions, now, "function finished");
    ok_at_top.url = Some("https://abc.supabase.co/functions/v1/send-push".to_string());
    ok_at_top.status_code = Some(200);
    ok_at_top.response_status_code = Some(500);

    let mut failing = LogEntry::new(Service::EdgeFunctions, now, "function crashed");
    failing.url = Some("https://abc.supabase.co/functions/v1/send-push".to_string());
    failing.method = Some("POST".to_string());
    failing.response_status_code = Some(500);

    let source =
        ScriptedLogSource::new().with_entries(Service::EdgeFunctions, vec![ok_at_top, failing]);
    let store = MemoryStore::new();
    let notifier = MockNotifier::new();

    let summary = auditor(source, &store, &notifier).run_at(now).await.unwrap();

    assert_eq!(summary.logs_scanned, 2);
    assert_eq!(summary.errors_found, 1);
    let issue = &store.issues()[0];
    assert_eq!(issue.path, "/functions/v1/send-push");
    assert_eq!(issue.service, Service::EdgeFunctions);
}
