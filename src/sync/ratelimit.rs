//! Per-source request spacing
//!
//! Each source owns one `RateLimiter`. A grant is exclusive: while a
//! `RateLimitGrant` is alive no other request to that source can start, and
//! the next grant is not issued until `interval` has elapsed since the
//! previous grant was released. After a 429 the interval is stretched for
//! the rest of the run.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::models::Source;

use super::cancel::{CancelSignal, Cancelled};

#[derive(Debug)]
struct LimiterState {
    interval: Duration,
    last_release: Option<Instant>,
}

/// Minimum-interval limiter for one source
#[derive(Debug, Clone)]
pub struct RateLimiter {
    source: Source,
    config: RateLimitConfig,
    state: Arc<Mutex<LimiterState>>,
}

impl RateLimiter {
    pub fn new(source: Source, config: RateLimitConfig) -> Self {
        let state = LimiterState {
            interval: config.min_interval,
            last_release: None,
        };
        Self {
            source,
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Wait until a request may start
    ///
    /// Returns `Cancelled` if the signal fires while waiting; in that case
    /// no grant was used and the spacing state is untouched.
    pub async fn acquire(&self, cancel: &CancelSignal) -> Result<RateLimitGrant, Cancelled> {
        let guard = tokio::select! {
            guard = self.state.clone().lock_owned() => guard,
            _ = cancel.cancelled() => return Err(Cancelled),
        };

        if let Some(last) = guard.last_release {
            let ready_at = last + guard.interval;
            if ready_at > Instant::now() {
                debug!(
                    source = %self.source,
                    wait_ms = (ready_at - Instant::now()).as_millis() as u64,
                    "Waiting for rate limit"
                );
                tokio::select! {
                    _ = tokio::time::sleep_until(ready_at) => {}
                    _ = cancel.cancelled() => return Err(Cancelled),
                }
            }
        }

        Ok(RateLimitGrant {
            source: self.source,
            config: self.config.clone(),
            guard,
        })
    }

    /// Interval currently enforced
    pub async fn current_interval(&self) -> Duration {
        self.state.lock().await.interval
    }

    pub fn source(&self) -> Source {
        self.source
    }
}

/// Exclusive permission to issue one request
///
/// Dropping the grant marks the end of the request.
#[derive(Debug)]
pub struct RateLimitGrant {
    source: Source,
    config: RateLimitConfig,
    guard: OwnedMutexGuard<LimiterState>,
}

impl RateLimitGrant {
    /// Stretch the source interval after the remote signalled rate limiting
    ///
    /// `RetryPolicy` honours the same Retry-After hint in its delay. Both
    /// waits start when this grant is dropped, so they overlap: the retry
    /// of the throttled resource waits for the longer of the two, not their sum.
    pub fn penalize(&mut self, retry_after: Option<Duration>) {
        let current = self.guard.interval;
        let stretched = current.mul_f64(self.config.penalty).max(self.config.min_interval);
        let mut next = stretched.min(self.config.max_interval).max(current);
        if let Some(hint) = retry_after {
            next = next.max(hint.min(self.config.max_interval));
        }

        if next != current {
            warn!(
                source = %self.source,
                previous_ms = current.as_millis() as u64,
                interval_ms = next.as_millis() as u64,
                "Remote rate limited us, slowing down"
            );
        }
        self.guard.interval = next;
    }
}

impl Drop for RateLimitGrant {
    fn drop(&mut self) {
        self.guard.last_release = Some(Instant::now());
    }
}
