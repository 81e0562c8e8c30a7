use crate::alerts::notifiers::{EmailMessage, EmailNotifier, PushData, PushMessage, PushNotifier};
use crate::events::Service;
use crate::store::{Issue, IssueStatus};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Payload type tag carried by every error push
pub const PUSH_KIND: &str = "error_alert";

/// One alertable issue as it appears in a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertItem {
    pub signature: String,
    /// `new` or `recurring`
    pub status: IssueStatus,
    pub status_code: u16,
    pub method: String,
    pub path: String,
    /// Occurrences in this run
    pub count: u64,
    pub service: Service,
    pub message_pattern: String,
}

impl AlertItem {
    /// Build an item from the reconciled issue and this run's group count
    pub fn from_issue(issue: &Issue, run_count: u64) -> Self {
        Self {
            signature: issue.signature.clone(),
            status: issue.status,
            status_code: issue.status_code,
            method: issue.method.clone(),
            path: issue.path.clone(),
            count: run_count,
            service: issue.service,
            message_pattern: issue.message_pattern.clone(),
        }
    }

    /// `<status_code> <method> <path> (<count>x)`
    pub fn line(&self) -> String {
        format!(
            "{} {} {} ({}x)",
            self.status_code, self.method, self.path, self.count
        )
    }
}

/// Every alertable issue of one run, highest count first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertBatch {
    items: Vec<AlertItem>,
}

impl AlertBatch {
    pub fn new(mut items: Vec<AlertItem>) -> Self {
        items.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.signature.cmp(&b.signature))
        });
        Self { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[AlertItem] {
        &self.items
    }

    /// Signatures of every alerted issue
    pub fn signatures(&self) -> Vec<String> {
        self.items.iter().map(|i| i.signature.clone()).collect()
    }

    fn count_with(&self, status: IssueStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }

    /// Title naming how many issues need attention
    pub fn title(&self) -> String {
        let n = self.items.len();
        if n == 1 {
            "1 error issue needs attention".to_string()
        } else {
            format!("{} error issues need attention", n)
        }
    }

    /// One line per issue for the top `limit` issues, plus a remainder line
    pub fn body(&self, limit: usize) -> String {
        let mut lines: Vec<String> = self.items.iter().take(limit).map(AlertItem::line).collect();

        if self.items.len() > limit {
            lines.push(format!("... and {} more", self.items.len() - limit));
        }

        lines.join("\n")
    }
}

/// How alerts are addressed and shaped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    /// Recipient of the summary email
    pub ops_email: String,
    /// Deep link into the admin error dashboard
    pub dashboard_url: String,
    /// Email template name understood by the email function
    pub email_template: String,
    /// Issues listed in the alert body
    pub top_n: usize,
    /// Maximum push body length in bytes
    pub push_body_limit: usize,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            ops_email: String::new(),
            dashboard_url: "/admin/errors".to_string(),
            email_template: "error-alert".to_string(),
            top_n: 5,
            push_body_limit: 178,
        }
    }
}

/// Outcome of delivering one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub push_sent: usize,
    pub push_failed: usize,
    pub email_sent: bool,
}

/// Delivers alert batches over push and email
///
/// Every device token gets its own push call and the operations address gets
/// one summary email. A failing recipient or channel is logged and never stops
/// the others.
pub struct AlertManager {
    push: Arc<dyn PushNotifier>,
    email: Arc<dyn EmailNotifier>,
    settings: AlertSettings,
}

impl AlertManager {
    pub fn new(
        push: Arc<dyn PushNotifier>,
        email: Arc<dyn EmailNotifier>,
        settings: AlertSettings,
    ) -> Self {
        Self {
            push,
            email,
            settings,
        }
    }

    pub fn settings(&self) -> &AlertSettings {
        &self.settings
    }

    /// Deliver a batch to every device token and the operations address
    pub async fn dispatch(&self, batch: &AlertBatch, push_tokens: &[String]) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if batch.is_empty() {
            return report;
        }

        let title = batch.title();
        let body = batch.body(self.settings.top_n);

        if push_tokens.is_empty() {
            warn!("No admin devices registered; skipping push for {}", title);
        }
        for token in push_tokens {
            let message = self.push_message(batch, token, &title, &body);
            match self.push.send_push(&message).await {
                Ok(()) => report.push_sent += 1,
                Err(e) => {
                    report.push_failed += 1;
                    error!("Failed to send push notification: {}", e);
                }
            }
        }

        if self.settings.ops_email.is_empty() {
            warn!("No operations email configured; skipping email for {}", title);
        } else {
            let message = self.email_message(batch, &title);
            match self.email.send_email(&message).await {
                Ok(()) => report.email_sent = true,
                Err(e) => error!("Failed to send alert email: {}", e),
            }
        }

        info!(
            "Alerted {} issue(s): {} push sent, {} push failed, email {}",
            batch.len(),
            report.push_sent,
            report.push_failed,
            if report.email_sent { "sent" } else { "not sent" }
        );
        report
    }

    fn push_message(&self, batch: &AlertBatch, token: &str, title: &str, body: &str) -> PushMessage {
        PushMessage {
            to: token.to_string(),
            title: title.to_string(),
            body: truncate_text(body, self.settings.push_body_limit),
            data: PushData {
                kind: PUSH_KIND.to_string(),
                url: self.settings.dashboard_url.clone(),
                count: batch.len(),
            },
        }
    }

    fn email_message(&self, batch: &AlertBatch, title: &str) -> EmailMessage {
        let top_errors: Vec<_> = batch
            .items()
            .iter()
            .take(self.settings.top_n)
            .map(|item| {
                json!({
                    "signature": item.signature,
                    "status": item.status,
                    "summary": item.line(),
                    "service": item.service,
                    "pattern": item.message_pattern,
                })
            })
            .collect();

        EmailMessage {
            to: self.settings.ops_email.clone(),
            subject: title.to_string(),
            template: self.settings.email_template.clone(),
            metadata: json!({
                "total": batch.len(),
                "new_count": batch.count_with(IssueStatus::New),
                "recurring_count": batch.count_with(IssueStatus::Recurring),
                "top_errors": top_errors,
                "dashboard_url": self.settings.dashboard_url,
            }),
        }
    }
}

/// Truncate text to a maximum byte length, appending "..."
///
/// Cuts on a UTF-8 character boundary so non-ASCII text never panics.
pub fn truncate_text(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }

    let mut truncate_at = max_length.saturating_sub(3);
    while truncate_at > 0 && !text.is_char_boundary(truncate_at) {
        truncate_at -= 1;
    }

    format!("{}...", &text[..truncate_at])
}
