use axum::Router;
use chrono::{Duration, Utc};
use logaudit::alerts::{AlertManager, AlertSettings, FixedWindowLimiter, MockNotifier};
use logaudit::collectors::ScriptedLogSource;
use logaudit::events::{LogEntry, Service};
use logaudit::server::{build_router, TriggerState, TRIGGER_PATH};
use logaudit::store::{MemoryStore, RunStatus};
use logaudit::LogAuditor;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

fn auditor(store: &MemoryStore) -> LogAuditor {
    let mut entry = LogEntry::new(Service::Api, Utc::now(), "boom");
    entry.path = Some("/rest/v1/things/42".to_string());
    entry.method = Some("GET".to_string());
    entry.status_code = Some(500);

    let notifier = MockNotifier::new();
    LogAuditor::new(
        Arc::new(ScriptedLogSource::new().with_entries(Service::Api, vec![entry])),
        Arc::new(store.clone()),
        AlertManager::new(
            Arc::new(notifier.clone()),
            Arc::new(notifier),
            AlertSettings::default(),
        ),
        vec![Service::Api, Service::Auth],
        60,
    )
}

async fn start_server(state: TriggerState) -> (String, JoinHandle<()>) {
    let app: Router = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), handle)
}

fn limiter(max: u32) -> Arc<FixedWindowLimiter> {
    Arc::new(FixedWindowLimiter::new(max, Duration::minutes(1)))
}

#[tokio::test]
async fn health_reports_ok() {
    let store = MemoryStore::new();
    let (base, _srv) = start_server(TriggerState::new(Ok(auditor(&store)), None, limiter(10))).await;

    let res = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert!(res.status().is_success());
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_or_wrong_secret_is_rejected() {
    let store = MemoryStore::new();
    let state = TriggerState::new(Ok(auditor(&store)), Some("s3cret".to_string()), limiter(10));
    let (base, _srv) = start_server(state).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}{}", base, TRIGGER_PATH))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Unauthorized");

    let res = client
        .get(format!("{}{}", base, TRIGGER_PATH))
        .bearer_auth("guess")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::UNAUTHORIZED);

    // No run was opened
    assert!(store.runs().is_empty());
}

#[tokio::test]
async fn authorized_trigger_runs_the_audit() {
    let store = MemoryStore::new();
    let state = TriggerState::new(Ok(auditor(&store)), Some("s3cret".to_string()), limiter(10));
    let (base, _srv) = start_server(state).await;

    let res = reqwest::Client::new()
        .post(format!("{}{}", base, TRIGGER_PATH))
        .bearer_auth("s3cret")
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["logs_scanned"], 1);
    assert_eq!(body["errors_found"], 1);
    assert_eq!(body["new_issues"], 1);
    assert_eq!(body["alerts_sent"], 1);
    assert_eq!(body["persist_failures"], 0);
    assert_eq!(body["services"].as_array().unwrap().len(), 2);
    assert!(body["duration_ms"].is_u64());

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
}

#[tokio::test]
async fn no_secret_means_open_endpoint() {
    let store = MemoryStore::new();
    let (base, _srv) = start_server(TriggerState::new(Ok(auditor(&store)), None, limiter(10))).await;

    let res = reqwest::get(format!("{}{}", base, TRIGGER_PATH)).await.unwrap();
    assert!(res.status().is_success());
    assert_eq!(store.runs().len(), 1);
}

#[tokio::test]
async fn rate_limited_per_client() {
    let store = MemoryStore::new();
    let (base, _srv) = start_server(TriggerState::new(Ok(auditor(&store)), None, limiter(1))).await;
    let client = reqwest::Client::new();
    let url = format!("{}{}", base, TRIGGER_PATH);

    let first = client
        .get(&url)
        .header("x-forwarded-for", "198.51.100.1")
        .send()
        .await
        .unwrap();
    assert!(first.status().is_success());

    let second = client
        .get(&url)
        .header("x-forwarded-for", "198.51.100.1")
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);

    let other = client
        .get(&url)
        .header("x-forwarded-for", "198.51.100.2")
        .send()
        .await
        .unwrap();
    assert!(other.status().is_success());
}

#[tokio::test]
async fn configuration_error_is_a_500() {
    let state = TriggerState::new(
        Err("Missing required setting: SUPABASE_ACCESS_TOKEN".to_string()),
        None,
        limiter(10),
    );
    let (base, _srv) = start_server(state).await;

    let res = reqwest::get(format!("{}{}", base, TRIGGER_PATH)).await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = res.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("SUPABASE_ACCESS_TOKEN"));
}
