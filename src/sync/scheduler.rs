//! Sync scheduler for daemon mode
//!
//! This module re-runs a sync job on a fixed interval with random jitter,
//! accepts manual sync requests between runs, and on shutdown cancels the
//! run in flight so its sources end `PartiallyCompleted` instead of being
//! dropped mid-attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::SyncError;
use crate::models::{RunReport, Source, SyncScope};

use super::cancel::{cancel_pair, CancelSignal};
use super::orchestrator::SyncOrchestrator;

/// One schedulable unit of work
#[async_trait]
pub trait SyncJob: Send + Sync {
    /// Get the name of this job
    fn name(&self) -> &str;

    /// Run once, stopping early when `cancel` fires
    async fn run(&self, cancel: CancelSignal) -> Result<RunReport, SyncError>;
}

/// A sync of fixed sources through an orchestrator
///
/// Without a fixed scope every run covers the season current at run time.
pub struct OrchestratedSync {
    orchestrator: Arc<SyncOrchestrator>,
    sources: Vec<Source>,
    scope: Option<SyncScope>,
}

impl OrchestratedSync {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, sources: Vec<Source>) -> Self {
        Self {
            orchestrator,
            sources,
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: SyncScope) -> Self {
        self.scope = Some(scope);
        self
    }
}

#[async_trait]
impl SyncJob for OrchestratedSync {
    fn name(&self) -> &str {
        "orchestrated_sync"
    }

    async fn run(&self, cancel: CancelSignal) -> Result<RunReport, SyncError> {
        let scope = self.scope.clone().unwrap_or_else(SyncScope::current);
        self.orchestrator.sync(&self.sources, &scope, cancel).await
    }
}

/// Status of the scheduler
#[derive(Debug, Clone, Default)]
pub struct SchedulerStatus {
    /// Completed runs, scheduled or manual
    pub runs: u64,
    /// Start of the most recent run
    pub last_started: Option<DateTime<Utc>>,
    /// Report of the most recent successful run
    pub last_report: Option<RunReport>,
    /// Error of the most recent run, if it failed to start
    pub last_error: Option<String>,
    /// Whether a run is currently in progress
    pub in_progress: bool,
}

/// Manual sync request
struct ManualSyncRequest {
    response: oneshot::Sender<Result<RunReport, SyncError>>,
}

/// Periodic runner for one sync job
pub struct SyncScheduler {
    config: SchedulerConfig,
    job: Arc<dyn SyncJob>,
    status: Arc<RwLock<SchedulerStatus>>,
    shutdown_rx: broadcast::Receiver<()>,
    manual_sync_rx: mpsc::Receiver<ManualSyncRequest>,
    manual_sync_tx: mpsc::Sender<ManualSyncRequest>,
    stopping: bool,
}

impl SyncScheduler {
    /// Create a new sync scheduler
    ///
    /// # Arguments
    ///
    /// * `config` - Interval, initial delay and jitter
    /// * `job` - The sync to repeat
    /// * `shutdown_rx` - Broadcast receiver for shutdown signal
    pub fn new(config: SchedulerConfig, job: Arc<dyn SyncJob>, shutdown_rx: broadcast::Receiver<()>) -> Self {
        let (manual_sync_tx, manual_sync_rx) = mpsc::channel(32);

        Self {
            config,
            job,
            status: Arc::new(RwLock::new(SchedulerStatus::default())),
            shutdown_rx,
            manual_sync_rx,
            manual_sync_tx,
            stopping: false,
        }
    }

    /// Get a handle for triggering manual syncs
    pub fn manual_sync_handle(&self) -> ManualSyncHandle {
        ManualSyncHandle {
            tx: self.manual_sync_tx.clone(),
        }
    }

    /// Shared view of the scheduler status
    pub fn status_handle(&self) -> Arc<RwLock<SchedulerStatus>> {
        self.status.clone()
    }

    /// Run until the shutdown signal
    pub async fn run(mut self) {
        info!(
            job = self.job.name(),
            interval_secs = self.config.interval_secs,
            "Starting sync scheduler"
        );

        if self.config.initial_delay_secs > 0 {
            debug!(delay_secs = self.config.initial_delay_secs, "Waiting for initial delay");
            let first = Instant::now() + Duration::from_secs(self.config.initial_delay_secs);
            if !self.wait_until(first).await {
                info!("Sync scheduler stopped");
                return;
            }
        }

        loop {
            info!(job = self.job.name(), "Performing scheduled sync");
            self.perform_sync().await;
            if self.stopping {
                break;
            }

            let jitter = if self.config.jitter_secs > 0 {
                rand::thread_rng().gen_range(0..self.config.jitter_secs)
            } else {
                0
            };
            let next = Instant::now() + Duration::from_secs(self.config.interval_secs + jitter);
            debug!(
                interval_secs = self.config.interval_secs,
                jitter_secs = jitter,
                "Scheduled next sync"
            );

            if !self.wait_until(next).await {
                break;
            }
        }

        info!("Sync scheduler stopped");
    }

    /// Serve manual requests until `deadline`; false once shutting down
    async fn wait_until(&mut self, deadline: Instant) -> bool {
        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping sync scheduler");
                    self.stopping = true;
                    return false;
                }
                Some(request) = self.manual_sync_rx.recv() => {
                    info!(job = self.job.name(), "Manual sync triggered");
                    let result = self.perform_sync().await;
                    let _ = request.response.send(result);
                    if self.stopping {
                        return false;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => return true,
            }
        }
    }

    async fn perform_sync(&mut self) -> Result<RunReport, SyncError> {
        {
            let mut status = self.status.write().await;
            status.in_progress = true;
            status.last_started = Some(Utc::now());
        }

        let (cancel, signal) = cancel_pair();
        let job = self.job.clone();
        let run = job.run(signal);
        tokio::pin!(run);

        let result = tokio::select! {
            result = &mut run => result,
            _ = self.shutdown_rx.recv() => {
                info!("Shutdown signal received, cancelling sync in progress");
                self.stopping = true;
                cancel.cancel();
                run.await
            }
        };

        let mut status = self.status.write().await;
        status.in_progress = false;
        status.runs += 1;
        match &result {
            Ok(report) => {
                info!(
                    elapsed_ms = report.elapsed_ms,
                    committed = report.total_committed(),
                    "Sync run completed"
                );
                status.last_report = Some(report.clone());
                status.last_error = None;
            }
            Err(err) => {
                warn!(error = %err, "Sync run failed");
                status.last_error = Some(err.to_string());
            }
        }

        result
    }
}

/// Handle for triggering manual syncs
#[derive(Clone)]
pub struct ManualSyncHandle {
    tx: mpsc::Sender<ManualSyncRequest>,
}

impl ManualSyncHandle {
    /// Run the job now and wait for its report
    pub async fn trigger_sync(&self) -> Result<RunReport, SyncError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.tx
            .send(ManualSyncRequest { response: response_tx })
            .await
            .map_err(|_| SyncError::SchedulerStopped)?;

        response_rx.await.map_err(|_| SyncError::SchedulerStopped)?
    }
}
