//! Error types for nhl-stats-sync
//!
//! This module defines the error taxonomy shared by the fetch pipeline,
//! the source adapters, the reconciler and the persistence layer.
//! All error types use `thiserror` for ergonomic error handling.

use std::time::Duration;

use thiserror::Error;

/// Errors reported by the transport collaborator for a single request
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Connection could not be established or was reset
    #[error("Connection error: {0}")]
    Connection(String),

    /// Remote answered 429, optionally with a Retry-After hint in seconds
    #[error("Rate limited by remote{}", retry_hint(.0))]
    RateLimited(Option<u64>),

    /// Remote answered with a non-success status
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// Any other network-level failure
    #[error("Network error: {0}")]
    Network(String),
}

fn retry_hint(secs: &Option<u64>) -> String {
    match secs {
        Some(secs) => format!(", retry after {} seconds", secs),
        None => String::new(),
    }
}

impl TransportError {
    /// Retry-After hint carried by a rate-limited response
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::RateLimited(Some(secs)) => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    /// True when the remote refused access to the whole source
    pub fn is_access_denied(&self) -> bool {
        matches!(self, TransportError::HttpStatus(401) | TransportError::HttpStatus(403))
    }

    /// True when the resource itself does not exist
    pub fn is_missing_resource(&self) -> bool {
        matches!(self, TransportError::HttpStatus(404) | TransportError::HttpStatus(410))
    }
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;
}

impl RetryableError for TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout => true,
            TransportError::Connection(_) => true,
            TransportError::RateLimited(_) => true,
            TransportError::HttpStatus(code) if *code >= 500 => true,
            TransportError::HttpStatus(408) => true,
            TransportError::Network(_) => true,

            // 401/403/404/410 and every other 4xx
            TransportError::HttpStatus(_) => false,
        }
    }
}

/// Whether a fetch failure may succeed on a later run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Transient,
    Permanent,
}

/// Final outcome of a failed `FetchClient::fetch`
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    /// The remote answered with a non-retryable failure
    #[error("Permanent failure fetching {resource}: {cause}")]
    Permanent {
        resource: String,
        cause: TransportError,
    },

    /// Every allowed attempt failed with a transient error
    #[error("Gave up on {resource} after {attempts} attempts: {last}")]
    Exhausted {
        resource: String,
        attempts: u32,
        last: TransportError,
    },

    /// The run was cancelled while the fetch was pending
    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Permanent { .. } | FetchError::Exhausted { .. } => FetchErrorKind::Permanent,
            FetchError::Cancelled => FetchErrorKind::Transient,
        }
    }

    /// Underlying transport error, if any
    pub fn cause(&self) -> Option<&TransportError> {
        match self {
            FetchError::Permanent { cause, .. } => Some(cause),
            FetchError::Exhausted { last, .. } => Some(last),
            FetchError::Cancelled => None,
        }
    }
}

/// Payload parsing errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// This payload could not be read; other resources may still parse
    #[error("Malformed payload for {resource}: {reason}")]
    Malformed { resource: String, reason: String },

    /// The document no longer has the expected layout
    #[error("Unexpected document structure for {resource}: {reason}")]
    Structural { resource: String, reason: String },
}

impl ParseError {
    pub fn malformed(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        ParseError::Malformed {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    pub fn structural(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        ParseError::Structural {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, ParseError::Structural { .. })
    }
}

/// Cache-related errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// IO error during cache operation
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Cache serialization error: {0}")]
    Serialization(String),

    /// Cache entry not found
    #[error("Cache entry not found")]
    NotFound,

    /// Cache entry expired
    #[error("Cache entry expired")]
    Expired,
}

/// Persistence errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite connection or statement error
    #[error("Database error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),

    /// Stored row could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Reconciliation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReconcileError {
    /// Existing entity and incoming record describe different entities
    #[error("Cannot merge {incoming} into {existing}")]
    IdentityMismatch { existing: String, incoming: String },

    /// A float attribute is NaN or infinite and cannot be stored
    #[error("Attribute {attribute} of {entity} is not a finite number")]
    NonFiniteValue { entity: String, attribute: String },
}

/// Orchestrator-level errors
///
/// Per-source failures never surface here; they are recorded in the
/// run report. Only a run that cannot start any source fails.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// No sources were requested
    #[error("No sources requested")]
    NoSourcesRequested,

    /// Every requested source failed during setup
    #[error("No runnable sources: {0}")]
    NoRunnableSources(String),

    /// The scheduler is no longer running
    #[error("Scheduler stopped")]
    SchedulerStopped,
}
