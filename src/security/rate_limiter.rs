//! Per-identity sliding window rate limiter.
//!
//! Each identity owns a deque of request instants. A check drops the instants that
//! have left the window, compares the remainder against the limit, and only then
//! records the new request. The whole read-modify-write happens under the DashMap
//! shard lock for that identity, so concurrent checks cannot undercount.
//!
//! Stale entries are only collected when their identity checks again. The map of
//! identities itself is never shrunk.

use crate::error::{SecurityError, SecurityResult};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Sliding window rate limiter keyed by identity.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter admitting `max_requests` per `window`.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: DashMap::new(),
        }
    }

    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::default()
    }

    /// Record a request for `identity` unless it is over the limit.
    pub fn check(&self, identity: &str) -> SecurityResult<()> {
        self.check_at(identity, Instant::now())
    }

    /// [`check`](Self::check) against an explicit clock reading.
    pub fn check_at(&self, identity: &str, now: Instant) -> SecurityResult<()> {
        let mut entry = self.windows.entry(identity.to_string()).or_default();
        let timestamps = entry.value_mut();

        while let Some(&oldest) = timestamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= self.max_requests as usize {
            let retry_after = timestamps
                .front()
                .map(|&oldest| self.window.saturating_sub(now.saturating_duration_since(oldest)))
                .unwrap_or(self.window);
            warn!(
                identity,
                limit = self.max_requests,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
            return Err(SecurityError::RateLimitExceeded {
                limit: self.max_requests,
                window: self.window,
                retry_after,
            });
        }

        timestamps.push_back(now);
        debug!(
            identity,
            used = timestamps.len(),
            limit = self.max_requests,
            "Rate limit slot recorded"
        );
        Ok(())
    }

    /// Current usage for `identity`, without recording a request.
    pub fn status(&self, identity: &str) -> RateLimitStatus {
        self.status_at(identity, Instant::now())
    }

    pub fn status_at(&self, identity: &str, now: Instant) -> RateLimitStatus {
        let used = self
            .windows
            .get(identity)
            .map(|timestamps| {
                timestamps
                    .iter()
                    .filter(|&&t| now.saturating_duration_since(t) < self.window)
                    .count() as u32
            })
            .unwrap_or(0);

        RateLimitStatus {
            used,
            max_requests: self.max_requests,
            window: self.window,
        }
    }

    /// Number of identities with a window entry, stale or not.
    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Rate limiter status for one identity.
#[derive(Debug, Clone)]
pub struct RateLimitStatus {
    pub used: u32,
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitStatus {
    pub fn remaining(&self) -> u32 {
        self.max_requests.saturating_sub(self.used)
    }
}

/// Rate limiter builder.
pub struct RateLimiterBuilder {
    max_requests: u32,
    window: Duration,
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimiterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_requests(mut self, max: u32) -> Self {
        self.max_requests = max;
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn build(self) -> RateLimiter {
        RateLimiter::new(self.max_requests, self.window)
    }
}
