use crate::error::StoreError;
use crate::events::Timestamp;
use crate::store::{AuditRun, Issue, IssueStatus, IssueStore, RunStatus, RunTotals, StoreFuture};
use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Table and column names used by [`PostgrestStore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreTables {
    pub issues: String,
    pub runs: String,
    /// Table holding admin flags and device tokens
    pub admins: String,
    pub admin_flag_column: String,
    pub push_token_column: String,
}

impl Default for StoreTables {
    fn default() -> Self {
        Self {
            issues: "error_issues".to_string(),
            runs: "error_audit_runs".to_string(),
            admins: "profiles".to_string(),
            admin_flag_column: "is_admin".to_string(),
            push_token_column: "push_token".to_string(),
        }
    }
}

/// Issue store backed by a PostgREST endpoint (`{project}/rest/v1`)
///
/// Authenticates with the service role key, which PostgREST expects both as
/// `apikey` and as a bearer token.
pub struct PostgrestStore {
    client: Client,
    rest_url: String,
    service_key: String,
    tables: StoreTables,
}

#[derive(Debug, Serialize)]
struct IssueUpdate<'a> {
    last_seen: Timestamp,
    occurrence_count: u64,
    status: IssueStatus,
    resolved_at: Option<Timestamp>,
    resolved_by: Option<&'a str>,
    resolution_note: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct AlertStamp {
    alert_sent_at: Timestamp,
}

#[derive(Debug, Serialize)]
struct RunClose<'a> {
    status: RunStatus,
    completed_at: Timestamp,
    #[serde(flatten)]
    totals: &'a RunTotals,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
}

impl PostgrestStore {
    /// Create a new store
    ///
    /// # Arguments
    /// * `rest_url` - PostgREST root (e.g., "https://abc.supabase.co/rest/v1")
    /// * `service_key` - Service role key
    /// * `tables` - Table and column names
    /// * `timeout` - Per-request timeout
    pub fn new(
        rest_url: String,
        service_key: String,
        tables: StoreTables,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            rest_url,
            service_key,
            tables,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.rest_url.trim_end_matches('/'), table)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    /// Turn a non-2xx response into [`StoreError::Status`]
    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn patch_issue<T: Serialize + Sync>(&self, signature: &str, body: &T) -> Result<(), StoreError> {
        let request = self
            .client
            .patch(self.table_url(&self.tables.issues))
            .query(&[("signature", format!("eq.{}", signature))])
            .json(body);
        Self::check(self.authed(request).send().await?).await?;
        Ok(())
    }

    async fn close_run(&self, run_id: &str, body: &RunClose<'_>) -> Result<(), StoreError> {
        let request = self
            .client
            .patch(self.table_url(&self.tables.runs))
            .query(&[("id", format!("eq.{}", run_id))])
            .json(body);
        Self::check(self.authed(request).send().await?).await?;
        Ok(())
    }
}

/// PostgREST `in.(...)` filter value
fn in_filter(values: &[String]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|v| format!("\"{}\"", v.replace('"', "")))
        .collect();
    format!("in.({})", quoted.join(","))
}

impl IssueStore for PostgrestStore {
    fn find_issue<'a>(&'a self, signature: &'a str) -> StoreFuture<'a, Option<Issue>> {
        Box::pin(async move {
            let request = self
                .client
                .get(self.table_url(&self.tables.issues))
                .query(&[
                    ("signature", format!("eq.{}", signature)),
                    ("select", "*".to_string()),
                    ("limit", "1".to_string()),
                ]);
            let response = Self::check(self.authed(request).send().await?).await?;
            let mut rows: Vec<Issue> = response
                .json()
                .await
                .map_err(|e| StoreError::InvalidResponse(format!("issue row: {}", e)))?;
            Ok(rows.pop())
        })
    }

    fn insert_issue<'a>(&'a self, issue: &'a Issue) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let request = self
                .client
                .post(self.table_url(&self.tables.issues))
                .header("Prefer", "return=minimal")
                .json(issue);
            Self::check(self.authed(request).send().await?).await?;
            debug!("Inserted issue {}", issue.signature);
            Ok(())
        })
    }

    fn update_issue<'a>(&'a self, issue: &'a Issue) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let update = IssueUpdate {
                last_seen: issue.last_seen,
                occurrence_count: issue.occurrence_count,
                status: issue.status,
                resolved_at: issue.resolved_at,
                resolved_by: issue.resolved_by.as_deref(),
                resolution_note: issue.resolution_note.as_deref(),
            };
            self.patch_issue(&issue.signature, &update).await
        })
    }

    fn mark_alert_sent<'a>(
        &'a self,
        signatures: &'a [String],
        at: Timestamp,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if signatures.is_empty() {
                return Ok(());
            }
            let request = self
                .client
                .patch(self.table_url(&self.tables.issues))
                .query(&[("signature", in_filter(signatures))])
                .json(&AlertStamp { alert_sent_at: at });
            Self::check(self.authed(request).send().await?).await?;
            Ok(())
        })
    }

    fn list_issues(&self, status: Option<IssueStatus>) -> StoreFuture<'_, Vec<Issue>> {
        Box::pin(async move {
            let mut query = vec![
                ("select", "*".to_string()),
                ("order", "last_seen.desc".to_string()),
            ];
            if let Some(status) = status {
                query.push(("status", format!("eq.{}", status)));
            }
            let request = self
                .client
                .get(self.table_url(&self.tables.issues))
                .query(&query);
            let response = Self::check(self.authed(request).send().await?).await?;
            response
                .json()
                .await
                .map_err(|e| StoreError::InvalidResponse(format!("issue rows: {}", e)))
        })
    }

    fn admin_push_tokens(&self) -> StoreFuture<'_, Vec<String>> {
        Box::pin(async move {
            let column = &self.tables.push_token_column;
            let request = self
                .client
                .get(self.table_url(&self.tables.admins))
                .query(&[
                    (self.tables.admin_flag_column.as_str(), "eq.true".to_string()),
                    (column.as_str(), "not.is.null".to_string()),
                    ("select", column.clone()),
                ]);
            let response = Self::check(self.authed(request).send().await?).await?;
            let rows: Vec<serde_json::Map<String, serde_json::Value>> = response
                .json()
                .await
                .map_err(|e| StoreError::InvalidResponse(format!("admin rows: {}", e)))?;

            Ok(rows
                .iter()
                .filter_map(|row| row.get(column).and_then(|v| v.as_str()))
                .filter(|token| !token.is_empty())
                .map(str::to_string)
                .collect())
        })
    }

    fn open_run<'a>(&'a self, run: &'a AuditRun) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let request = self
                .client
                .post(self.table_url(&self.tables.runs))
                .header("Prefer", "return=minimal")
                .json(run);
            Self::check(self.authed(request).send().await?).await?;
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
        Box::pin(async move {
            let body = RunClose {
                status: RunStatus::Completed,
                completed_at,
                totals,
                error_message,
            };
            self.close_run(run_id, &body).await
        })
    }
}
