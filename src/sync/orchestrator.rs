//! Multi-source sync orchestration
//!
//! `SyncOrchestrator::sync` runs every requested source in its own task.
//! Each task owns a `FetchClient` (and with it the source's rate limiter
//! and retry policy) plus the source's `SourceReport`, walks the adapter's
//! resources in order, and sends parsed records to a single committer
//! task. The committer is the only writer to the entity store: it loads
//! the merge base, reconciles, and upserts, so concurrent sources never
//! race on the same entity.
//!
//! A source ends in one of three states:
//!
//! - `Completed`: every resource was processed
//! - `PartiallyCompleted`: cancelled, out of budget, or a source-level
//!   failure after at least one record was parsed
//! - `Failed`: a source-level failure before any record was parsed, or
//!   the source could not be set up

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{Config, SourceConfig, SyncSettings};
use crate::database::EntityStore;
use crate::error::{FetchError, ReconcileError, StorageError, SyncError};
use crate::models::{
    DomainRecord, DroppedEntity, RunReport, Source, SourceReport, SourceState, SyncScope,
};
use crate::plugins::cache::CachePlugin;
use crate::plugins::sources::{builtin_adapter, SourceAdapter};
use crate::reconcile::Reconciler;

use super::cancel::CancelSignal;
use super::fetch::FetchClient;
use super::http_client::Transport;
use super::retry::RetryPolicy;

/// Drives sync runs across sources
pub struct SyncOrchestrator {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn EntityStore>,
    reconciler: Reconciler,
    adapters: BTreeMap<Source, Arc<dyn SourceAdapter>>,
    cache: Option<Arc<dyn CachePlugin>>,
    retry_seed: Option<u64>,
}

impl SyncOrchestrator {
    /// Create an orchestrator with the built-in adapters registered
    pub fn new(config: Arc<Config>, transport: Arc<dyn Transport>, store: Arc<dyn EntityStore>) -> Self {
        let adapters = Source::ALL
            .into_iter()
            .filter_map(|source| builtin_adapter(source).map(|adapter| (source, adapter)))
            .collect();

        Self {
            reconciler: Reconciler::from_config(&config),
            config,
            transport,
            store,
            adapters,
            cache: None,
            retry_seed: None,
        }
    }

    /// Register or replace the adapter for the adapter's source
    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(adapter.source(), adapter);
        self
    }

    /// Share a raw payload cache across all sources
    pub fn with_cache(mut self, cache: Arc<dyn CachePlugin>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Fix the jitter seed of every source's retry policy
    pub fn with_retry_seed(mut self, seed: u64) -> Self {
        self.retry_seed = Some(seed);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sources with a registered adapter
    pub fn registered_sources(&self) -> Vec<Source> {
        self.adapters.keys().copied().collect()
    }

    /// Run one sync over `sources`
    ///
    /// Returns a report for every requested source, in request order.
    /// Fails only when nothing can run: no sources were requested, or
    /// every requested source failed setup.
    pub async fn sync(
        &self,
        sources: &[Source],
        scope: &SyncScope,
        cancel: CancelSignal,
    ) -> Result<RunReport, SyncError> {
        let mut requested: Vec<Source> = Vec::new();
        for source in sources {
            if !requested.contains(source) {
                requested.push(*source);
            }
        }
        if requested.is_empty() {
            return Err(SyncError::NoSourcesRequested);
        }

        let started_at = Utc::now();
        let started = Instant::now();

        let mut slots: Vec<Slot> = Vec::with_capacity(requested.len());
        let mut runnable = Vec::new();
        for source in requested {
            match self.setup(source) {
                Ok(job) => {
                    runnable.push(job);
                    slots.push(Slot::Pending(source));
                }
                Err(reason) => {
                    warn!(source = %source, reason = %reason, "Source setup failed");
                    slots.push(Slot::Ready(SourceReport::setup_failed(source, reason)));
                }
            }
        }

        if runnable.is_empty() {
            let reasons = slots
                .iter()
                .filter_map(|slot| match slot {
                    Slot::Ready(report) => Some(format!(
                        "{}: {}",
                        report.source,
                        report.error.as_deref().unwrap_or("unavailable")
                    )),
                    Slot::Pending(_) => None,
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SyncError::NoRunnableSources(reasons));
        }

        info!(
            sources = runnable.len(),
            season = %scope.season,
            "Starting sync run"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let committer = tokio::spawn(commit_loop(
            self.store.clone(),
            self.reconciler.clone(),
            self.config.sync.storage_retries,
            rx,
        ));

        let mut handles = Vec::with_capacity(runnable.len());
        for job in runnable {
            let source = job.source;
            let task = SourceTask {
                job,
                scope: scope.clone(),
                cancel: cancel.clone(),
                settings: self.config.sync.clone(),
                records: tx.clone(),
            };
            handles.push((source, tokio::spawn(task.run())));
        }
        drop(tx);

        let mut finished = BTreeMap::new();
        for (source, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    error!(source = %source, error = %e, "Source task aborted");
                    let mut report = SourceReport::new(source);
                    report.transition(SourceState::Running);
                    report.transition(SourceState::Failed);
                    report.error = Some(format!("source task aborted: {}", e));
                    report
                }
            };
            finished.insert(source, report);
        }

        let mut commits = match committer.await {
            Ok(commits) => commits,
            Err(e) => {
                error!(error = %e, "Committer task aborted");
                BTreeMap::new()
            }
        };

        let reports: Vec<SourceReport> = slots
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Ready(report) => Some(report),
                Slot::Pending(source) => finished.remove(&source).map(|mut report| {
                    if let Some(stats) = commits.remove(&source) {
                        stats.apply(&mut report);
                    }
                    report
                }),
            })
            .collect();

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            sources: reports,
        };

        info!(
            elapsed_ms = report.elapsed_ms,
            committed = report.total_committed(),
            failures = report.has_failures(),
            "Sync run finished"
        );
        Ok(report)
    }

    fn setup(&self, source: Source) -> Result<SourceJob, String> {
        let config = self.config.source(source);
        if !config.enabled {
            return Err("source disabled in configuration".to_string());
        }
        config.validate(source).map_err(|e| e.to_string())?;

        let adapter = self
            .adapters
            .get(&source)
            .cloned()
            .ok_or_else(|| "no adapter registered".to_string())?;

        let mut client = FetchClient::new(source, &config, self.transport.clone());
        if let Some(seed) = self.retry_seed {
            client = client.with_policy(RetryPolicy::with_seed(config.retry(), seed));
        }
        if let Some(cache) = &self.cache {
            client = client.with_cache(
                cache.clone(),
                Duration::from_secs(self.config.cache.ttl_secs),
            );
        }

        Ok(SourceJob {
            source,
            config,
            adapter,
            client,
        })
    }
}

enum Slot {
    Pending(Source),
    Ready(SourceReport),
}

struct SourceJob {
    source: Source,
    config: SourceConfig,
    adapter: Arc<dyn SourceAdapter>,
    client: FetchClient,
}

/// Record handed from a source task to the committer
struct CommitRequest {
    source: Source,
    record: DomainRecord,
}

/// Why a source stopped before its last resource
enum Stop {
    Cancelled,
    Budget(String),
    Fatal(String),
}

struct SourceTask {
    job: SourceJob,
    scope: SyncScope,
    cancel: CancelSignal,
    settings: SyncSettings,
    records: mpsc::UnboundedSender<CommitRequest>,
}

impl SourceTask {
    async fn run(self) -> SourceReport {
        let SourceTask {
            job,
            scope,
            cancel,
            settings,
            records,
        } = self;
        let source = job.source;

        let mut report = SourceReport::new(source);
        report.transition(SourceState::Running);
        info!(source = %source, "Source started");

        let started = Instant::now();
        let deadline = job.config.time_budget().map(|budget| started + budget);
        let attempt_budget = job.config.attempt_budget;

        let mut consecutive_exhausted = 0u32;
        let mut consecutive_parse_failures = 0u32;
        let mut parsed_any = false;
        let mut stop: Option<Stop> = None;

        let mut resources = job.adapter.list_resources(&scope);
        while let Some(resource) = resources.next() {
            if cancel.is_cancelled() {
                stop = Some(Stop::Cancelled);
            } else if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                stop = Some(Stop::Budget("time budget exhausted".to_string()));
            } else if attempt_budget.is_some_and(|budget| job.client.attempts_made() >= budget) {
                stop = Some(Stop::Budget("attempt budget exhausted".to_string()));
            }
            if stop.is_some() {
                report.skipped += 1;
                break;
            }

            let fetched = tokio::select! {
                result = job.client.fetch(&resource, &cancel) => result,
                _ = expire(deadline) => {
                    stop = Some(Stop::Budget("time budget exhausted".to_string()));
                    report.skipped += 1;
                    break;
                }
            };

            let payload = match fetched {
                Ok(payload) => payload,
                Err(FetchError::Cancelled) => {
                    stop = Some(Stop::Cancelled);
                    report.skipped += 1;
                    break;
                }
                Err(e) => {
                    report.record_failure(resource.id(), e.to_string());
                    let cause = e.cause();
                    if cause.is_some_and(|cause| cause.is_access_denied()) {
                        stop = Some(Stop::Fatal(format!("access denied: {}", e)));
                        break;
                    }
                    if matches!(e, FetchError::Exhausted { .. }) {
                        consecutive_exhausted += 1;
                        if consecutive_exhausted >= settings.max_consecutive_exhausted {
                            stop = Some(Stop::Fatal(format!(
                                "{} consecutive resources exhausted their retries",
                                consecutive_exhausted
                            )));
                            break;
                        }
                    }
                    continue;
                }
            };

            report.fetched += 1;
            if payload.from_cache {
                report.cache_hits += 1;
            }
            consecutive_exhausted = 0;

            match job.adapter.parse(&payload) {
                Ok(parsed) => {
                    consecutive_parse_failures = 0;
                    parsed_any = true;
                    report.parsed += parsed.len() as u64;
                    debug!(source = %source, resource = %resource, records = parsed.len(), "Parsed resource");

                    for record in parsed {
                        if records.send(CommitRequest { source, record }).is_err() {
                            error!(source = %source, "Committer stopped, records dropped");
                        }
                    }
                }
                Err(e) => {
                    warn!(source = %source, resource = %resource, error = %e, "Parse failed");
                    report.record_failure(resource.id(), e.to_string());

                    if e.is_structural() {
                        stop = Some(Stop::Fatal(format!("payload structure changed: {}", e)));
                        break;
                    }
                    consecutive_parse_failures += 1;
                    if !parsed_any && consecutive_parse_failures >= settings.structural_failure_threshold {
                        stop = Some(Stop::Fatal(format!(
                            "{} consecutive resources failed to parse",
                            consecutive_parse_failures
                        )));
                        break;
                    }
                }
            }
        }

        if stop.is_some() {
            report.skipped += resources.count() as u64;
        }

        let state = match &stop {
            None => SourceState::Completed,
            Some(Stop::Cancelled) | Some(Stop::Budget(_)) => SourceState::PartiallyCompleted,
            Some(Stop::Fatal(_)) if report.parsed > 0 => SourceState::PartiallyCompleted,
            Some(Stop::Fatal(_)) => SourceState::Failed,
        };
        report.error = match stop {
            None => None,
            Some(Stop::Cancelled) => Some("cancelled".to_string()),
            Some(Stop::Budget(reason)) | Some(Stop::Fatal(reason)) => Some(reason),
        };
        report.transition(state);

        report.fetch_attempts = job.client.attempts_made();
        report.retries = job.client.retries();
        report.health = job.client.health();
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        match report.state {
            SourceState::Completed => info!(
                source = %source,
                fetched = report.fetched,
                parsed = report.parsed,
                failed = report.failed,
                elapsed_ms = report.elapsed_ms,
                "Source completed"
            ),
            state => warn!(
                source = %source,
                state = ?state,
                fetched = report.fetched,
                parsed = report.parsed,
                failed = report.failed,
                skipped = report.skipped,
                reason = report.error.as_deref().unwrap_or(""),
                "Source stopped early"
            ),
        }

        report
    }
}

/// Resolves when the deadline passes; never without one
fn expire(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

/// Commit outcomes for one source
#[derive(Debug, Default)]
struct CommitStats {
    committed: u64,
    unchanged: u64,
    dropped: Vec<DroppedEntity>,
}

impl CommitStats {
    fn apply(self, report: &mut SourceReport) {
        report.committed += self.committed;
        report.unchanged += self.unchanged;
        report.storage_failed += self.dropped.len() as u64;
        report.dropped.extend(self.dropped);
    }
}

enum Committed {
    /// A value or its winning source changed
    Written,

    /// Same content with later observation times; written but counted unchanged
    Refreshed,

    /// Identical to the stored entity; nothing written
    Unchanged,
}

#[derive(Debug, Error)]
enum CommitError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

async fn commit_loop(
    store: Arc<dyn EntityStore>,
    reconciler: Reconciler,
    storage_retries: u32,
    mut rx: mpsc::UnboundedReceiver<CommitRequest>,
) -> BTreeMap<Source, CommitStats> {
    let mut stats: BTreeMap<Source, CommitStats> = BTreeMap::new();

    while let Some(CommitRequest { source, record }) = rx.recv().await {
        let entry = stats.entry(source).or_default();
        let mut retries_left = storage_retries;

        loop {
            match commit(store.as_ref(), &reconciler, &record).await {
                Ok(Committed::Written) => {
                    entry.committed += 1;
                    break;
                }
                Ok(Committed::Refreshed | Committed::Unchanged) => {
                    entry.unchanged += 1;
                    break;
                }
                Err(CommitError::Storage(e)) if retries_left > 0 => {
                    retries_left -= 1;
                    warn!(source = %source, entity = %record.identity(), error = %e, "Commit failed, retrying");
                }
                Err(e) => {
                    error!(source = %source, entity = %record.identity(), error = %e, "Entity dropped from run");
                    entry.dropped.push(DroppedEntity {
                        entity: record.identity(),
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }
    }

    stats
}

async fn commit(
    store: &dyn EntityStore,
    reconciler: &Reconciler,
    record: &DomainRecord,
) -> Result<Committed, CommitError> {
    let existing = store.get(record.kind, &record.key).await?;
    let merged = reconciler.merge(existing.as_ref(), record)?;

    let outcome = match existing {
        Some(existing) if existing == merged => return Ok(Committed::Unchanged),
        Some(existing) if existing.same_content(&merged) => Committed::Refreshed,
        _ => Committed::Written,
    };
    store.upsert(&merged).await?;
    Ok(outcome)
}
