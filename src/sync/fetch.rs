//! Rate-limited, retrying fetch client
//!
//! One `FetchClient` serves one source. Every network attempt is gated by
//! the source's `RateLimiter`, every failure is handed to the source's
//! `RetryPolicy`, and every completed attempt is recorded as a
//! `FetchAttempt`. Attempt outcomes also drive the source's
//! `SourceHealth`. An optional payload cache is consulted first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::error::{FetchError, TransportError};
use crate::models::{RawPayload, Resource, Source, SourceHealth};
use crate::plugins::cache::{CacheMeta, CachePlugin, PayloadKey};

use super::cancel::CancelSignal;
use super::http_client::Transport;
use super::ratelimit::RateLimiter;
use super::retry::{AttemptOutcome, FetchAttempt, GiveUpReason, RetryDecision, RetryPolicy};

/// Attempts kept for inspection
const ATTEMPT_LOG_CAPACITY: usize = 256;

/// Default lifetime of cached payloads
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Fetch client for one source
pub struct FetchClient {
    source: Source,
    base_url: String,
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
    policy: RetryPolicy,
    cache: Option<Arc<dyn CachePlugin>>,
    cache_ttl: Duration,
    attempt_log: Mutex<VecDeque<FetchAttempt>>,
    health: Mutex<SourceHealth>,
    attempts: AtomicU64,
    retries: AtomicU64,
}

impl FetchClient {
    /// Create a client with the source's rate limit and retry settings
    pub fn new(source: Source, config: &SourceConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            source,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            transport,
            limiter: RateLimiter::new(source, config.rate_limit()),
            policy: RetryPolicy::new(config.retry()),
            cache: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            attempt_log: Mutex::new(VecDeque::new()),
            health: Mutex::new(SourceHealth::Healthy),
            attempts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    /// Replace the retry policy, e.g. with a fixed jitter seed
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Consult `cache` before the network and store fetched payloads in it
    pub fn with_cache(mut self, cache: Arc<dyn CachePlugin>, ttl: Duration) -> Self {
        self.cache = Some(cache);
        self.cache_ttl = ttl;
        self
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Network attempts made so far
    pub fn attempts_made(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Backoff waits scheduled so far
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Health after the latest attempt outcome
    pub fn health(&self) -> SourceHealth {
        match self.health.lock() {
            Ok(health) => *health,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Most recent completed attempts, oldest first
    pub fn recent_attempts(&self) -> Vec<FetchAttempt> {
        match self.attempt_log.lock() {
            Ok(log) => log.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    /// Fetch one resource
    ///
    /// Returns `FetchError::Cancelled` as soon as `cancel` fires, whether
    /// waiting for the rate limiter, waiting on the network or backing off.
    /// An attempt interrupted by cancellation is not recorded.
    pub async fn fetch(&self, resource: &Resource, cancel: &CancelSignal) -> Result<RawPayload, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let key = PayloadKey::today(self.source, resource.id());
        if let Some(payload) = self.cached(&key, resource).await {
            return Ok(payload);
        }

        let url = format!("{}{}", self.base_url, resource.path);
        let mut history: Vec<FetchAttempt> = Vec::new();

        loop {
            let mut grant = self
                .limiter
                .acquire(cancel)
                .await
                .map_err(|_| FetchError::Cancelled)?;

            let started_at = Utc::now();
            let start = Instant::now();
            let result = tokio::select! {
                result = self.transport.get(&url) => result,
                _ = cancel.cancelled() => {
                    debug!(source = %self.source, resource = %resource, "Attempt aborted by cancellation");
                    return Err(FetchError::Cancelled);
                }
            };
            let latency = start.elapsed();
            self.attempts.fetch_add(1, Ordering::Relaxed);

            let error = match result {
                Ok(response) => {
                    drop(grant);
                    self.record(FetchAttempt {
                        source: self.source,
                        resource: resource.id().to_string(),
                        attempt: history.len() as u32 + 1,
                        started_at,
                        latency,
                        outcome: AttemptOutcome::Success,
                        retry_delay: None,
                    });
                    self.set_health(SourceHealth::Healthy);

                    let mut payload = RawPayload::new(self.source, resource.clone(), response.body);
                    payload.content_type = response.content_type;
                    self.store(&key, &payload).await;
                    return Ok(payload);
                }
                Err(error) => error,
            };

            if matches!(error, TransportError::RateLimited(_)) {
                grant.penalize(error.retry_after());
            }
            drop(grant);

            history.push(FetchAttempt {
                source: self.source,
                resource: resource.id().to_string(),
                attempt: history.len() as u32 + 1,
                started_at,
                latency,
                outcome: AttemptOutcome::from_error(error.clone()),
                retry_delay: None,
            });
            let decision = self.policy.decide(&history);
            if let Some(last) = history.last_mut() {
                last.retry_delay = decision.delay();
                self.record(last.clone());
            }
            if let Some(health) = health_after(&error, &decision) {
                self.set_health(health);
            }

            match decision {
                RetryDecision::RetryAfter(delay) => {
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            debug!(source = %self.source, resource = %resource, "Backoff interrupted by cancellation");
                            return Err(FetchError::Cancelled);
                        }
                    }
                }
                RetryDecision::GiveUp(GiveUpReason::Exhausted { attempts }) => {
                    return Err(FetchError::Exhausted {
                        resource: resource.id().to_string(),
                        attempts,
                        last: error,
                    });
                }
                RetryDecision::GiveUp(GiveUpReason::Permanent | GiveUpReason::NothingToRetry) => {
                    return Err(FetchError::Permanent {
                        resource: resource.id().to_string(),
                        cause: error,
                    });
                }
            }
        }
    }

    async fn cached(&self, key: &PayloadKey, resource: &Resource) -> Option<RawPayload> {
        let cache = self.cache.as_ref()?;

        match cache.get(key).await {
            Ok(Some(entry)) => {
                debug!(source = %self.source, resource = %resource, "Payload cache hit");
                let mut payload = RawPayload::new(self.source, resource.clone(), entry.data)
                    .with_fetched_at(entry.meta.fetched_at);
                payload.content_type = entry.meta.content_type;
                payload.from_cache = true;
                Some(payload)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(source = %self.source, resource = %resource, error = %e, "Payload cache read failed");
                None
            }
        }
    }

    async fn store(&self, key: &PayloadKey, payload: &RawPayload) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };

        let meta = CacheMeta::new(self.source, payload.body.len() as u64, self.cache_ttl, payload.fetched_at)
            .with_content_type(payload.content_type.clone());
        if let Err(e) = cache.set(key, payload.body.clone(), meta).await {
            warn!(source = %self.source, resource = %payload.resource, error = %e, "Payload cache write failed");
        }
    }

    fn set_health(&self, next: SourceHealth) {
        let mut health = match self.health.lock() {
            Ok(health) => health,
            Err(poisoned) => poisoned.into_inner(),
        };
        let previous = *health;
        if previous != next {
            info!(source = %self.source, from = %previous, to = %next, "Source health changed");
            *health = next;
        }
    }

    fn record(&self, attempt: FetchAttempt) {
        let latency_ms = attempt.latency.as_millis() as u64;
        match attempt.outcome.error() {
            None => debug!(
                source = %attempt.source,
                resource = %attempt.resource,
                attempt = attempt.attempt,
                latency_ms = latency_ms,
                "Fetch attempt succeeded"
            ),
            Some(error) => warn!(
                source = %attempt.source,
                resource = %attempt.resource,
                attempt = attempt.attempt,
                latency_ms = latency_ms,
                retry_delay_ms = attempt.retry_delay.map(|d| d.as_millis() as u64),
                error = %error,
                "Fetch attempt failed"
            ),
        }

        let mut log = match self.attempt_log.lock() {
            Ok(log) => log,
            Err(poisoned) => poisoned.into_inner(),
        };
        if log.len() == ATTEMPT_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(attempt);
    }
}

/// Health implied by a failed attempt and the decision taken on it
///
/// A missing resource says nothing about the source, so it leaves the
/// health as it was.
fn health_after(error: &TransportError, decision: &RetryDecision) -> Option<SourceHealth> {
    match decision {
        RetryDecision::GiveUp(GiveUpReason::Exhausted { .. }) => Some(SourceHealth::Down),
        _ if error.is_access_denied() => Some(SourceHealth::Down),
        _ if matches!(error, TransportError::RateLimited(_)) => Some(SourceHealth::RateLimited),
        RetryDecision::RetryAfter(_) => Some(SourceHealth::Degraded),
        RetryDecision::GiveUp(_) => None,
    }
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("source", &self.source)
            .field("base_url", &self.base_url)
            .field("cached", &self.cache.is_some())
            .field("health", &self.health())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::error::CacheError;
    use crate::plugins::cache::{CacheEntry, MockCachePlugin};
    use crate::sync::cancel::cancel_pair;
    use crate::sync::http_client::TransportResponse;
    use async_trait::async_trait;
    use bytes::Bytes;

    /// Transport that replays a script, then repeats the last entry
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        urls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                urls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.urls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
            self.urls.lock().unwrap().push(url.to_string());
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    fn ok(body: &str) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse {
            status: 200,
            body: Bytes::from(body.to_string()),
            content_type: Some("application/json".to_string()),
        })
    }

    fn client(source: Source, transport: Arc<ScriptedTransport>) -> FetchClient {
        let config = SourceConfig::defaults_for(source);
        FetchClient::new(source, &config, transport).with_policy(RetryPolicy::with_seed(config.retry(), 7))
    }

    fn resource() -> Resource {
        Resource::new("standings", "/standings/now")
    }

    // Test 1: Successful fetch builds the URL from the base and path
    #[tokio::test]
    async fn test_fetch_success() {
        tokio::time::pause();
        let transport = ScriptedTransport::new(vec![ok("{}")]);
        let client = client(Source::NhlApi, transport.clone());

        let payload = client.fetch(&resource(), &CancelSignal::never()).await.unwrap();

        assert_eq!(payload.body, Bytes::from("{}"));
        assert_eq!(payload.content_type.as_deref(), Some("application/json"));
        assert!(!payload.from_cache);
        assert_eq!(
            transport.urls.lock().unwrap()[0],
            "https://api-web.nhle.com/v1/standings/now"
        );
        assert_eq!(client.attempts_made(), 1);
        assert_eq!(client.recent_attempts()[0].outcome, AttemptOutcome::Success);
        assert_eq!(client.health(), SourceHealth::Healthy);
    }

    // Test 2: Four 503s then success, with increasing recorded delays
    #[tokio::test]
    async fn test_transient_failures_then_success() {
        tokio::time::pause();
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::HttpStatus(503)),
            Err(TransportError::HttpStatus(503)),
            Err(TransportError::HttpStatus(503)),
            Err(TransportError::HttpStatus(503)),
            ok("<table></table>"),
        ]);
        let client = client(Source::NaturalStatTrick, transport.clone());

        let payload = client.fetch(&resource(), &CancelSignal::never()).await;
        assert!(payload.is_ok());

        let attempts = client.recent_attempts();
        assert_eq!(attempts.len(), 5);
        let failures: Vec<&FetchAttempt> = attempts.iter().filter(|a| a.outcome.is_failure()).collect();
        assert_eq!(failures.len(), 4);

        let delays: Vec<Duration> = failures.iter().map(|a| a.retry_delay.unwrap()).collect();
        for pair in delays.windows(2) {
            assert!(pair[1] > pair[0], "delays must increase: {:?}", delays);
        }
        assert_eq!(attempts.iter().map(|a| a.attempt).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert_eq!(client.retries(), 4);
        assert_eq!(transport.calls(), 5);
    }

    // Test 3: Permanent failures are not retried
    #[tokio::test]
    async fn test_permanent_failure() {
        tokio::time::pause();
        let transport = ScriptedTransport::new(vec![Err(TransportError::HttpStatus(404))]);
        let client = client(Source::HockeyReference, transport.clone());

        let err = client.fetch(&resource(), &CancelSignal::never()).await.unwrap_err();

        assert!(matches!(
            err,
            FetchError::Permanent { cause: TransportError::HttpStatus(404), .. }
        ));
        assert_eq!(transport.calls(), 1);
        assert_eq!(client.recent_attempts()[0].retry_delay, None);
        assert_eq!(client.health(), SourceHealth::Healthy);
    }

    // Test 4: Retries stop at max_attempts
    #[tokio::test]
    async fn test_exhausted() {
        tokio::time::pause();
        let transport = ScriptedTransport::new(vec![Err(TransportError::Timeout)]);
        let client = client(Source::MoneyPuck, transport.clone());

        let err = client.fetch(&resource(), &CancelSignal::never()).await.unwrap_err();

        assert_eq!(
            err,
            FetchError::Exhausted {
                resource: "/standings/now".to_string(),
                attempts: 5,
                last: TransportError::Timeout,
            }
        );
        assert_eq!(transport.calls(), 5);
        assert_eq!(client.retries(), 4);
        assert_eq!(client.health(), SourceHealth::Down);
    }

    // Test 5: A 429 slows the source down for the rest of the run
    #[tokio::test]
    async fn test_rate_limited_penalizes_interval() {
        tokio::time::pause();
        let transport = ScriptedTransport::new(vec![Err(TransportError::RateLimited(Some(10))), ok("{}")]);
        let client = client(Source::NhlApi, transport);

        client.fetch(&resource(), &CancelSignal::never()).await.unwrap();

        let interval = client.rate_limiter().current_interval().await;
        assert_eq!(interval, Duration::from_secs(10));
        let delay = client.recent_attempts()[0].retry_delay.unwrap();
        assert!(delay >= Duration::from_secs(10));
    }

    // Test 6: Attempts are spaced by the minimum interval
    #[tokio::test]
    async fn test_attempts_respect_interval() {
        tokio::time::pause();
        let transport = ScriptedTransport::new(vec![ok("{}")]);
        let client = client(Source::EliteProspects, transport);
        let never = CancelSignal::never();

        let start = Instant::now();
        for _ in 0..3 {
            client.fetch(&resource(), &never).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    // Test 7: Cancellation during backoff returns promptly without a partial attempt
    #[tokio::test]
    async fn test_cancel_during_backoff() {
        tokio::time::pause();
        let transport = ScriptedTransport::new(vec![Err(TransportError::HttpStatus(503))]);
        let client = Arc::new(client(Source::EliteProspects, transport));
        let (handle, signal) = cancel_pair();

        let task = {
            let client = client.clone();
            tokio::spawn(async move { client.fetch(&resource(), &signal).await })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.cancel();
        let result = task.await.unwrap();

        assert_eq!(result, Err(FetchError::Cancelled));
        let attempts = client.recent_attempts();
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].retry_delay.is_some());
    }

    // Test 8: Already-cancelled signal never touches the network
    #[tokio::test]
    async fn test_cancelled_before_start() {
        let transport = ScriptedTransport::new(vec![ok("{}")]);
        let client = client(Source::NhlApi, transport.clone());
        let (handle, signal) = cancel_pair();
        handle.cancel();

        assert_eq!(client.fetch(&resource(), &signal).await, Err(FetchError::Cancelled));
        assert_eq!(transport.calls(), 0);
    }

    // Test 9: Cache hits skip the network
    #[tokio::test]
    async fn test_cache_hit() {
        let transport = ScriptedTransport::new(vec![ok("network")]);
        let fetched_at = Utc::now() - chrono::Duration::hours(2);

        let mut cache = MockCachePlugin::new();
        cache.expect_get().times(1).returning(move |_| {
            Ok(Some(CacheEntry {
                data: Bytes::from("cached"),
                meta: CacheMeta::new(Source::NhlApi, 6, Duration::from_secs(3600), fetched_at),
            }))
        });
        cache.expect_set().never();

        let client = client(Source::NhlApi, transport.clone()).with_cache(Arc::new(cache), Duration::from_secs(3600));
        let payload = client.fetch(&resource(), &CancelSignal::never()).await.unwrap();

        assert!(payload.from_cache);
        assert_eq!(payload.body, Bytes::from("cached"));
        assert_eq!(payload.fetched_at, fetched_at);
        assert_eq!(transport.calls(), 0);
        assert_eq!(client.attempts_made(), 0);
    }

    // Test 10: Cache misses fetch and store the payload
    #[tokio::test]
    async fn test_cache_miss_stores() {
        tokio::time::pause();
        let transport = ScriptedTransport::new(vec![ok("fresh")]);

        let mut cache = MockCachePlugin::new();
        cache.expect_get().returning(|_| Ok(None));
        cache
            .expect_set()
            .withf(|key, data, meta| {
                key.source == Source::NhlApi
                    && key.resource == "/standings/now"
                    && data == &Bytes::from("fresh")
                    && meta.size == 5
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let client = client(Source::NhlApi, transport.clone()).with_cache(Arc::new(cache), Duration::from_secs(60));
        let payload = client.fetch(&resource(), &CancelSignal::never()).await.unwrap();

        assert!(!payload.from_cache);
        assert_eq!(transport.calls(), 1);
    }

    // Test 11: Cache errors fall back to the network
    #[tokio::test]
    async fn test_cache_errors_ignored() {
        tokio::time::pause();
        let transport = ScriptedTransport::new(vec![ok("fresh")]);

        let mut cache = MockCachePlugin::new();
        cache
            .expect_get()
            .returning(|_| Err(CacheError::Serialization("corrupt".to_string())));
        cache
            .expect_set()
            .returning(|_, _, _| Err(CacheError::Serialization("read-only".to_string())));

        let client = client(Source::NhlApi, transport.clone()).with_cache(Arc::new(cache), Duration::from_secs(60));
        let payload = client.fetch(&resource(), &CancelSignal::never()).await.unwrap();

        assert_eq!(payload.body, Bytes::from("fresh"));
        assert_eq!(transport.calls(), 1);
    }

    // Test 12: A 429 marks the source rate limited until the retry succeeds
    #[tokio::test]
    async fn test_health_rate_limited_then_recovered() {
        tokio::time::pause();
        let transport = ScriptedTransport::new(vec![Err(TransportError::RateLimited(Some(10))), ok("{}")]);
        let client = Arc::new(client(Source::NhlApi, transport));

        let task = {
            let client = client.clone();
            tokio::spawn(async move { client.fetch(&resource(), &CancelSignal::never()).await })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(client.health(), SourceHealth::RateLimited);

        task.await.unwrap().unwrap();
        assert_eq!(client.health(), SourceHealth::Healthy);
    }

    // Test 13: Retried server errors degrade the source, a refusal takes it down
    #[tokio::test]
    async fn test_health_degraded_and_down() {
        tokio::time::pause();
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::HttpStatus(503)),
            Err(TransportError::HttpStatus(403)),
        ]);
        let client = Arc::new(client(Source::MoneyPuck, transport));

        let task = {
            let client = client.clone();
            tokio::spawn(async move { client.fetch(&resource(), &CancelSignal::never()).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.health(), SourceHealth::Degraded);

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, FetchError::Permanent { cause: TransportError::HttpStatus(403), .. }));
        assert_eq!(client.health(), SourceHealth::Down);
    }

    // Test 14: The stretched interval and the retry delay overlap after a 429
    #[tokio::test]
    async fn test_rate_limited_wait_not_doubled() {
        tokio::time::pause();
        let transport = ScriptedTransport::new(vec![Err(TransportError::RateLimited(Some(10))), ok("{}")]);
        let client = client(Source::NhlApi, transport);

        let start = Instant::now();
        client.fetch(&resource(), &CancelSignal::never()).await.unwrap();
        let elapsed = start.elapsed();

        let delay = client.recent_attempts()[0].retry_delay.unwrap();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < delay + Duration::from_secs(1), "waited {:?} for a {:?} delay", elapsed, delay);
    }
}
