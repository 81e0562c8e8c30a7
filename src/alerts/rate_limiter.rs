use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Decides whether a caller identified by `key` may proceed
///
/// The trigger endpoint holds one of these behind an `Arc`, so a shared
/// limiter can be swapped in without touching the handler.
#[cfg_attr(test, mockall::automock)]
pub trait RateLimit: Send + Sync {
    /// Record an attempt for `key` and return whether it is allowed
    fn allow(&self, key: &str) -> bool;
}

/// Counter for one key inside the current window
#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

/// Fixed-window rate limiter keyed by caller
///
/// Each key gets `max_requests` attempts per window; the window restarts on the
/// first attempt after it expires. State is process-local.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    /// Maximum attempts per key per window
    max_requests: u32,
    /// Length of one window
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self::new(10, Duration::minutes(1)) // Default: 10 requests per minute
    }
}

impl FixedWindowLimiter {
    /// Create a limiter
    ///
    /// # Arguments
    ///
    /// * `max_requests` - Attempts allowed per key in one window
    /// * `window` - Window length
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt for `key` at a specific time
    ///
    /// This is primarily used for testing with controlled timestamps.
    pub fn allow_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        let Ok(mut windows) = self.windows.lock() else {
            // Fail open on a poisoned lock
            return true;
        };

        // Expired windows are dropped on every call so the map stays bounded
        let window = self.window;
        windows.retain(|_, w| now - w.started_at < window);

        let entry = windows.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if entry.count >= self.max_requests {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Number of keys with a live window
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }
}

impl RateLimit for FixedWindowLimiter {
    fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Utc::now())
    }
}
