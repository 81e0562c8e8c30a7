//! HTTP trigger for external schedulers
//!
//! `GET|POST /api/cron/log-audit` runs one audit and answers with its JSON
//! summary. `GET /health` is a liveness probe.

use crate::alerts::RateLimit;
use crate::audit::LogAuditor;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::{error, info, warn};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Path the scheduler calls
pub const TRIGGER_PATH: &str = "/api/cron/log-audit";

/// Shared state of the trigger server
#[derive(Clone)]
pub struct TriggerState {
    /// The auditor, or the configuration error that prevented building it
    auditor: Arc<Result<LogAuditor, String>>,
    cron_secret: Option<Arc<str>>,
    limiter: Arc<dyn RateLimit>,
}

impl TriggerState {
    pub fn new(
        auditor: Result<LogAuditor, String>,
        cron_secret: Option<String>,
        limiter: Arc<dyn RateLimit>,
    ) -> Self {
        if cron_secret.is_none() {
            warn!("No cron secret configured; {} accepts unauthenticated requests", TRIGGER_PATH);
        }
        Self {
            auditor: Arc::new(auditor),
            cron_secret: cron_secret.map(Arc::from),
            limiter,
        }
    }
}

/// Assemble the trigger router
pub fn build_router(state: TriggerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(TRIGGER_PATH, get(trigger_audit).post(trigger_audit))
        .with_state(state)
}

/// Serve the router until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: TriggerState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Log audit trigger: http://{}{}", addr, TRIGGER_PATH);
    }
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Client key for rate limiting: first `x-forwarded-for` hop
fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// Compare without short-circuiting on the first differing byte
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn is_authorized(headers: &HeaderMap, secret: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| constant_time_eq(token.trim().as_bytes(), secret.as_bytes()))
}

async fn trigger_audit(State(state): State<TriggerState>, headers: HeaderMap) -> Response {
    let client = client_key(&headers);
    if !state.limiter.allow(&client) {
        warn!("Rate limited trigger request from {}", client);
        return error_response(StatusCode::TOO_MANY_REQUESTS, "Too many requests");
    }

    if let Some(secret) = state.cron_secret.as_deref() {
        if !is_authorized(&headers, secret) {
            warn!("Rejected unauthorized trigger request from {}", client);
            return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
        }
    }

    let auditor = match state.auditor.as_ref() {
        Ok(auditor) => auditor,
        Err(message) => {
            error!("Log audit not configured: {}", message);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, message);
        }
    };

    match auditor.run().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}
