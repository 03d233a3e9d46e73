//! Payload cache trait and related types
//!
//! This module defines the CachePlugin trait for raw payload caches, the
//! key under which the fetch client stores payloads, and the associated
//! CacheEntry, CacheMeta and CacheStats types.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::CacheError;
use crate::models::Source;

/// Identity of a cached payload: one resource of one source on one day
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PayloadKey {
    pub source: Source,
    pub resource: String,
    pub day: NaiveDate,
}

impl PayloadKey {
    pub fn new(source: Source, resource: impl Into<String>, day: NaiveDate) -> Self {
        Self {
            source,
            resource: resource.into(),
            day,
        }
    }

    /// Key for a resource fetched today (UTC)
    pub fn today(source: Source, resource: impl Into<String>) -> Self {
        Self::new(source, resource, Utc::now().date_naive())
    }
}

impl fmt::Display for PayloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source, self.day.format("%Y-%m-%d"), self.resource)
    }
}

/// A cached entry containing data and metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached payload body
    pub data: Bytes,
    /// Metadata about the cached entry
    pub meta: CacheMeta,
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    /// Source the payload came from
    pub source: Source,
    /// Size of the cached data in bytes
    pub size: u64,
    /// Time-to-live duration
    #[serde(with = "duration_serde")]
    pub ttl: Duration,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
    /// When the payload was fetched from the network
    pub fetched_at: DateTime<Utc>,
    /// Content-Type of the cached data
    pub content_type: Option<String>,
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl CacheMeta {
    /// Creates metadata for a payload fetched at `fetched_at`
    pub fn new(source: Source, size: u64, ttl: Duration, fetched_at: DateTime<Utc>) -> Self {
        Self {
            source,
            size,
            ttl,
            created_at: Utc::now(),
            fetched_at,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    /// Checks if the cache entry has expired
    pub fn is_expired(&self) -> bool {
        let expires_at = self.created_at + chrono::Duration::from_std(self.ttl).unwrap_or_default();
        Utc::now() > expires_at
    }
}

/// Statistics about cache usage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total number of cached entries
    pub entries: u64,
    /// Total size of all cached data in bytes
    pub total_size_bytes: u64,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of evictions due to size limits
    pub evictions: u64,
}

impl CacheStats {
    /// Calculates the hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Raw payload cache
///
/// Consulted by the fetch client before a network call. A cache is an
/// optimisation only: callers treat every error as a miss.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CachePlugin: Send + Sync {
    /// Returns the name of this cache plugin
    fn name(&self) -> &str;

    /// Retrieves a cached payload
    ///
    /// Returns `Ok(Some(entry))` if found, `Ok(None)` if missing or expired.
    async fn get(&self, key: &PayloadKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Stores a payload, overwriting any existing entry for the key
    async fn set(&self, key: &PayloadKey, data: Bytes, meta: CacheMeta) -> Result<(), CacheError>;

    /// Deletes a cached entry; missing entries are not an error
    async fn delete(&self, key: &PayloadKey) -> Result<(), CacheError>;

    /// Returns statistics about cache usage
    async fn stats(&self) -> CacheStats;

    /// Deletes all cached entries
    async fn purge(&self) -> Result<(), CacheError>;

    /// Deletes all expired entries and returns how many were removed
    async fn purge_expired(&self) -> Result<u64, CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: PayloadKey display includes source, day and resource
    #[test]
    fn test_payload_key_display() {
        let key = PayloadKey::new(
            Source::NhlApi,
            "/standings/now",
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        );
        assert_eq!(key.to_string(), "nhl_api:2024-01-15:/standings/now");
    }

    // Test 2: Keys differ by day
    #[test]
    fn test_payload_key_per_day() {
        let day1 = PayloadKey::new(Source::NhlApi, "/x", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let day2 = PayloadKey::new(Source::NhlApi, "/x", NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_ne!(day1, day2);
        assert_ne!(day1.to_string(), day2.to_string());
    }

    // Test 3: CacheMeta expiration
    #[test]
    fn test_cache_meta_expiration() {
        let meta = CacheMeta::new(Source::MoneyPuck, 10, Duration::from_secs(3600), Utc::now());
        assert!(!meta.is_expired());

        let mut meta = CacheMeta::new(Source::MoneyPuck, 10, Duration::from_secs(0), Utc::now());
        meta.created_at = Utc::now() - chrono::Duration::seconds(10);
        assert!(meta.is_expired());
    }

    // Test 4: CacheMeta serialization
    #[test]
    fn test_cache_meta_serialization() {
        let meta = CacheMeta::new(Source::NaturalStatTrick, 1024, Duration::from_secs(3600), Utc::now())
            .with_content_type(Some("text/html".to_string()));
        let json = serde_json::to_string(&meta).expect("Serialization should succeed");

        assert!(json.contains("\"size\":1024"));
        assert!(json.contains("\"ttl\":3600"));
        assert!(json.contains("\"source\":\"nst\""));
        assert!(json.contains("\"content_type\":\"text/html\""));
    }

    // Test 5: CacheStats hit rate
    #[test]
    fn test_cache_stats_hit_rate() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);

        let stats = CacheStats {
            entries: 10,
            total_size_bytes: 10240,
            hits: 75,
            misses: 25,
            evictions: 0,
        };
        assert_eq!(stats.hit_rate(), 75.0);
    }

    // Test 6: MockCachePlugin can be created and used
    #[tokio::test]
    async fn test_mock_cache_plugin() {
        let mut mock = MockCachePlugin::new();
        mock.expect_name().return_const("mock_cache".to_string());
        mock.expect_get().returning(|_| Ok(None));

        assert_eq!(mock.name(), "mock_cache");
        let key = PayloadKey::today(Source::NhlApi, "/standings/now");
        assert!(mock.get(&key).await.unwrap().is_none());
    }
}
