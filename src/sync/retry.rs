//! Retry policy with exponential backoff
//!
//! This module decides, from the attempts already made for one resource,
//! whether to try again and how long to wait first. `RetryPolicy::decide`
//! is a pure function of the attempt history: jitter is drawn from a seeded
//! generator so the same history always yields the same decision.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::config::RetryConfig;
use crate::error::{RetryableError, TransportError};
use crate::models::Source;

/// Result of one network attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Transient {
        #[serde(serialize_with = "display")]
        error: TransportError,
    },
    Permanent {
        #[serde(serialize_with = "display")]
        error: TransportError,
    },
}

fn display<S: serde::Serializer>(error: &TransportError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(error)
}

impl AttemptOutcome {
    /// Classify a transport error
    pub fn from_error(error: TransportError) -> Self {
        if error.is_retryable() {
            AttemptOutcome::Transient { error }
        } else {
            AttemptOutcome::Permanent { error }
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, AttemptOutcome::Success)
    }

    pub fn error(&self) -> Option<&TransportError> {
        match self {
            AttemptOutcome::Success => None,
            AttemptOutcome::Transient { error } | AttemptOutcome::Permanent { error } => Some(error),
        }
    }
}

/// Immutable record of one network attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchAttempt {
    pub source: Source,
    pub resource: String,

    /// 1-based attempt number for this resource
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub latency: Duration,
    pub outcome: AttemptOutcome,

    /// Delay scheduled before the next attempt, if one was scheduled
    pub retry_delay: Option<Duration>,
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp(GiveUpReason),
}

impl RetryDecision {
    pub fn delay(&self) -> Option<Duration> {
        match self {
            RetryDecision::RetryAfter(delay) => Some(*delay),
            RetryDecision::GiveUp(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The last failure is not retryable
    Permanent,
    /// `max_attempts` consecutive transient failures
    Exhausted { attempts: u32 },
    /// The history does not end in a failure
    NothingToRetry,
}

/// Exponential backoff policy for one source
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    seed: u64,
}

impl RetryPolicy {
    /// Create a policy with a random jitter seed
    pub fn new(config: RetryConfig) -> Self {
        Self::with_seed(config, rand::random())
    }

    /// Create a policy with a fixed jitter seed
    pub fn with_seed(config: RetryConfig, seed: u64) -> Self {
        Self { config, seed }
    }

    /// Decide the next step from the attempts made so far for one resource
    ///
    /// With K trailing consecutive failures: give up when the last failure
    /// is permanent or K has reached `max_attempts`, otherwise wait
    /// `backoff(K)`, stretched to any Retry-After hint up to `max_backoff`.
    pub fn decide(&self, history: &[FetchAttempt]) -> RetryDecision {
        let failures = history
            .iter()
            .rev()
            .take_while(|attempt| attempt.outcome.is_failure())
            .count() as u32;

        let last = match history.last() {
            Some(last) if failures > 0 => last,
            _ => return RetryDecision::GiveUp(GiveUpReason::NothingToRetry),
        };

        if let AttemptOutcome::Permanent { .. } = last.outcome {
            return RetryDecision::GiveUp(GiveUpReason::Permanent);
        }
        if failures >= self.config.max_attempts {
            return RetryDecision::GiveUp(GiveUpReason::Exhausted { attempts: failures });
        }

        let mut delay = self.backoff(failures, &last.resource);
        if let Some(hint) = last.outcome.error().and_then(TransportError::retry_after) {
            delay = delay.max(hint.min(self.config.max_backoff));
        }
        RetryDecision::RetryAfter(delay)
    }

    /// Backoff before retrying after `failures` consecutive failures
    ///
    /// `base * multiplier^(failures-1)` plus up to 50% jitter, capped at
    /// `max_backoff`. With a multiplier of at least 1.5 the sequence is
    /// strictly increasing until it reaches the cap.
    pub fn backoff(&self, failures: u32, resource: &str) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.config.base_backoff.as_secs_f64() * self.config.backoff_multiplier.powi(exponent);

        let delay = if self.config.jitter {
            base * (1.0 + self.jitter(failures, resource))
        } else {
            base
        };

        let capped = delay.min(self.config.max_backoff.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.config.max_backoff)
    }

    fn jitter(&self, failures: u32, resource: &str) -> f64 {
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        resource.hash(&mut hasher);
        failures.hash(&mut hasher);
        StdRng::seed_from_u64(hasher.finish()).gen_range(0.0..0.5)
    }

    /// Get the retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
