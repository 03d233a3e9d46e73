//! Fetch and sync infrastructure
//!
//! This module provides the per-source politeness machinery and the
//! orchestration of multi-source sync runs.
//!
//! # Components
//!
//! - [`ratelimit`]: Per-source request spacing with adaptive slow-down after 429s
//! - [`retry`]: Pure retry decisions with seeded exponential backoff
//! - [`http_client`]: The transport seam and its reqwest implementation
//! - [`fetch`]: Rate-limited, retrying, cache-aware fetch client for one source
//! - [`orchestrator`]: Concurrent sync runs across sources with a single committer
//! - [`scheduler`]: Periodic re-runs for daemon mode
//! - [`cancel`]: Run-level cancellation signal
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use nhl_stats_sync::config::Config;
//! use nhl_stats_sync::database::SqliteStore;
//! use nhl_stats_sync::models::{Source, SyncScope};
//! use nhl_stats_sync::sync::{CancelSignal, HttpTransport, SyncOrchestrator};
//!
//! let config = Arc::new(Config::default());
//! let transport = Arc::new(HttpTransport::new(&config.http)?);
//! let store = Arc::new(SqliteStore::new(&config.database.path).await?);
//!
//! let orchestrator = SyncOrchestrator::new(config, transport, store);
//! let report = orchestrator
//!     .sync(&[Source::NhlApi], &SyncScope::current(), CancelSignal::never())
//!     .await?;
//! ```

pub mod cancel;
pub mod fetch;
pub mod http_client;
pub mod orchestrator;
pub mod ratelimit;
pub mod retry;
pub mod scheduler;

// Re-export main types for convenience
pub use cancel::{cancel_pair, CancelHandle, CancelSignal, Cancelled};
pub use fetch::FetchClient;
pub use http_client::{HttpTransport, Transport, TransportResponse};
pub use orchestrator::SyncOrchestrator;
pub use ratelimit::{RateLimitGrant, RateLimiter};
pub use retry::{AttemptOutcome, FetchAttempt, GiveUpReason, RetryDecision, RetryPolicy};
pub use scheduler::{
    ManualSyncHandle, OrchestratedSync, SchedulerStatus, SyncJob, SyncScheduler,
};
