//! Login rate limiting
//!
//! Process-wide map of `ip -> {count, reset_at}`. Each ip gets five
//! attempts per fifteen-minute window; a periodic sweep drops expired
//! entries so the map stays bounded.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Attempts allowed per window.
const MAX_ATTEMPTS: u32 = 5;

/// Window length: 15 minutes.
const WINDOW_SECS: i64 = 15 * 60;

struct Attempt {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Thread-safe login attempt counter keyed by client ip.
#[derive(Default)]
pub struct RateLimiter {
    attempts: DashMap<String, Attempt>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt from `ip`. Returns false when the ip has
    /// exhausted its attempts for the current window.
    pub fn check(&self, ip: &str) -> bool {
        let now = Utc::now();
        let mut entry = self.attempts.entry(ip.to_string()).or_insert_with(|| Attempt {
            count: 0,
            reset_at: now + Duration::seconds(WINDOW_SECS),
        });

        if now > entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + Duration::seconds(WINDOW_SECS);
        }

        entry.count += 1;
        entry.count <= MAX_ATTEMPTS
    }

    /// Drop entries whose window has passed. Run periodically.
    pub fn sweep(&self) {
        let now = Utc::now();
        self.attempts.retain(|_, attempt| attempt.reset_at > now);
    }

    #[cfg(test)]
    fn expire(&self, ip: &str) {
        if let Some(mut entry) = self.attempts.get_mut(ip) {
            entry.reset_at = Utc::now() - Duration::seconds(1);
        }
    }
}
