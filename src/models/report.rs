//! Run report models
//!
//! A `RunReport` is the only output of a sync run besides the persisted
//! entities. It is handed to the caller and never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::source::Source;

/// Lifecycle of one source within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Idle,
    Running,
    Completed,
    Failed,
    PartiallyCompleted,
}

impl SourceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SourceState::Completed | SourceState::Failed | SourceState::PartiallyCompleted
        )
    }

    /// Allowed transitions: Idle -> Running -> one terminal state
    pub fn can_transition_to(&self, next: SourceState) -> bool {
        match (self, next) {
            (SourceState::Idle, SourceState::Running) => true,
            // setup failures never start running
            (SourceState::Idle, SourceState::Failed) => true,
            (SourceState::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

/// Fetch health of one source, driven only by attempt outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceHealth {
    #[default]
    Healthy,

    /// Transient failures are being retried
    Degraded,

    /// The remote answered 429 and the source interval was stretched
    RateLimited,

    /// Retries were exhausted or access was refused
    Down,
}

impl std::fmt::Display for SourceHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SourceHealth::Healthy => "healthy",
            SourceHealth::Degraded => "degraded",
            SourceHealth::RateLimited => "rate_limited",
            SourceHealth::Down => "down",
        };
        f.write_str(name)
    }
}

/// A resource that could not be fetched or parsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFailure {
    pub resource: String,
    pub reason: String,
}

/// An entity that could not be committed and was dropped from the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedEntity {
    pub entity: String,
    pub reason: String,
}

/// Per-source counts and outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: Source,
    pub state: SourceState,

    /// Fetch health when the source finished
    pub health: SourceHealth,

    /// Payloads obtained, from the network or the cache
    pub fetched: u64,
    pub cache_hits: u64,

    /// Domain records produced by the parser
    pub parsed: u64,

    /// Resources that failed to fetch or parse
    pub failed: u64,

    /// Resources enumerated but never attempted
    pub skipped: u64,

    /// Entities written to the store
    pub committed: u64,

    /// Merges that left the stored entity unchanged
    pub unchanged: u64,

    /// Entities dropped after storage errors
    pub storage_failed: u64,

    pub fetch_attempts: u64,
    pub retries: u64,
    pub elapsed_ms: u64,

    /// Source-level failure or stop reason
    pub error: Option<String>,
    pub failures: Vec<ResourceFailure>,
    pub dropped: Vec<DroppedEntity>,
}

impl SourceReport {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            state: SourceState::Idle,
            health: SourceHealth::Healthy,
            fetched: 0,
            cache_hits: 0,
            parsed: 0,
            failed: 0,
            skipped: 0,
            committed: 0,
            unchanged: 0,
            storage_failed: 0,
            fetch_attempts: 0,
            retries: 0,
            elapsed_ms: 0,
            error: None,
            failures: Vec::new(),
            dropped: Vec::new(),
        }
    }

    /// Report for a source that could not be set up
    pub fn setup_failed(source: Source, reason: impl Into<String>) -> Self {
        let mut report = Self::new(source);
        report.transition(SourceState::Failed);
        report.error = Some(reason.into());
        report
    }

    /// Move to `next`; invalid transitions are ignored
    pub fn transition(&mut self, next: SourceState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }

    pub fn record_failure(&mut self, resource: impl Into<String>, reason: impl Into<String>) {
        self.failed += 1;
        self.failures.push(ResourceFailure {
            resource: resource.into(),
            reason: reason.into(),
        });
    }
}

/// Aggregate result of one sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    pub fn source(&self, source: Source) -> Option<&SourceReport> {
        self.sources.iter().find(|report| report.source == source)
    }

    pub fn has_failures(&self) -> bool {
        self.sources
            .iter()
            .any(|report| report.state == SourceState::Failed)
    }

    pub fn total_committed(&self) -> u64 {
        self.sources.iter().map(|report| report.committed).sum()
    }
}
