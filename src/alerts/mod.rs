/// Alert batching, delivery channels and rate limiting
pub mod alert_manager;
pub mod notifiers;
pub mod rate_limiter;

pub use alert_manager::{AlertBatch, AlertItem, AlertManager, AlertSettings, DeliveryReport};
pub use notifiers::{
    EmailMessage, EmailNotifier, HttpEmailNotifier, HttpPushNotifier, MockNotifier, PushMessage,
    PushNotifier, UnconfiguredNotifier,
};
pub use rate_limiter::{FixedWindowLimiter, RateLimit};
