use crate::error::AlertError;
use log::info;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Boxed future returned by notifiers
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>>;

/// Structured payload carried by a push notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushData {
    #[serde(rename = "type")]
    pub kind: String,
    /// Deep link opened when the notification is tapped
    pub url: String,
    pub count: usize,
}

/// One push notification for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Device push token
    pub to: String,
    pub title: String,
    pub body: String,
    pub data: PushData,
}

/// One summary email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub template: String,
    pub metadata: Value,
}

/// Delivers push notifications to a single device per call
pub trait PushNotifier: Send + Sync {
    fn send_push<'a>(&'a self, message: &'a PushMessage) -> NotifyFuture<'a>;
}

/// Delivers summary emails
pub trait EmailNotifier: Send + Sync {
    fn send_email<'a>(&'a self, message: &'a EmailMessage) -> NotifyFuture<'a>;
}

/// POST a JSON body to a notification function, authenticated with a bearer token
async fn post_json<T: Serialize + Sync>(
    client: &Client,
    url: &str,
    token: &str,
    body: &T,
) -> Result<(), AlertError> {
    let response = client.post(url).bearer_auth(token).json(body).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(AlertError::NotificationFailed(format!(
            "{} returned {}: {}",
            url, status, error_text
        )));
    }
    Ok(())
}

/// Push notifier that calls a push-sending function over HTTP
pub struct HttpPushNotifier {
    client: Client,
    endpoint: String,
    token: String,
}

impl HttpPushNotifier {
    pub fn new(endpoint: String, token: String, timeout: Duration) -> Result<Self, AlertError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            token,
        })
    }
}

impl PushNotifier for HttpPushNotifier {
    fn send_push<'a>(&'a self, message: &'a PushMessage) -> NotifyFuture<'a> {
        Box::pin(async move { post_json(&self.client, &self.endpoint, &self.token, message).await })
    }
}

/// Email notifier that calls an email-sending function over HTTP
pub struct HttpEmailNotifier {
    client: Client,
    endpoint: String,
    token: String,
}

impl HttpEmailNotifier {
    pub fn new(endpoint: String, token: String, timeout: Duration) -> Result<Self, AlertError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            token,
        })
    }
}

impl EmailNotifier for HttpEmailNotifier {
    fn send_email<'a>(&'a self, message: &'a EmailMessage) -> NotifyFuture<'a> {
        Box::pin(async move { post_json(&self.client, &self.endpoint, &self.token, message).await })
    }
}

/// Stand-in for a channel with no endpoint configured
///
/// Every send fails with [`AlertError::NotConfigured`], which the alert manager
/// logs like any other delivery failure.
pub struct UnconfiguredNotifier {
    channel: &'static str,
}

impl UnconfiguredNotifier {
    pub fn new(channel: &'static str) -> Self {
        Self { channel }
    }
}

impl PushNotifier for UnconfiguredNotifier {
    fn send_push<'a>(&'a self, _message: &'a PushMessage) -> NotifyFuture<'a> {
        Box::pin(async move { Err(AlertError::NotConfigured(self.channel)) })
    }
}

impl EmailNotifier for UnconfiguredNotifier {
    fn send_email<'a>(&'a self, _message: &'a EmailMessage) -> NotifyFuture<'a> {
        Box::pin(async move { Err(AlertError::NotConfigured(self.channel)) })
    }
}

/// Notifier that logs and records messages instead of sending them
///
/// Used for dry runs and tests. Individual recipients or the email channel can
/// be made to fail.
#[derive(Clone, Default)]
pub struct MockNotifier {
    pushes: Arc<Mutex<Vec<PushMessage>>>,
    emails: Arc<Mutex<Vec<EmailMessage>>>,
    failing_recipients: Arc<Mutex<HashSet<String>>>,
    fail_email: bool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail pushes addressed to `token`
    pub fn failing_recipient(self, token: impl Into<String>) -> Self {
        if let Ok(mut failing) = self.failing_recipients.lock() {
            failing.insert(token.into());
        }
        self
    }

    /// Fail every email
    pub fn failing_email(mut self) -> Self {
        self.fail_email = true;
        self
    }

    /// Pushes delivered so far
    pub fn sent_pushes(&self) -> Vec<PushMessage> {
        self.pushes.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Emails delivered so far
    pub fn sent_emails(&self) -> Vec<EmailMessage> {
        self.emails.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl PushNotifier for MockNotifier {
    fn send_push<'a>(&'a self, message: &'a PushMessage) -> NotifyFuture<'a> {
        Box::pin(async move {
            let failing = self
                .failing_recipients
                .lock()
                .map(|f| f.contains(&message.to))
                .unwrap_or(false);
            if failing {
                return Err(AlertError::NotificationFailed(format!(
                    "device {} rejected the notification",
                    message.to
                )));
            }

            info!(
                "MOCK PUSH - To: {}, Title: {}, Body: {}",
                message.to, message.title, message.body
            );
            if let Ok(mut pushes) = self.pushes.lock() {
                pushes.push(message.clone());
            }
            Ok(())
        })
    }
}

impl EmailNotifier for MockNotifier {
    fn send_email<'a>(&'a self, message: &'a EmailMessage) -> NotifyFuture<'a> {
        Box::pin(async move {
            if self.fail_email {
                return Err(AlertError::NotificationFailed(
                    "email provider unavailable".to_string(),
                ));
            }

            info!("MOCK EMAIL - To: {}, Subject: {}", message.to, message.subject);
            if let Ok(mut emails) = self.emails.lock() {
                emails.push(message.clone());
            }
            Ok(())
        })
    }
}
