//! Filesystem-based payload cache
//!
//! Each payload is stored as a file under a per-source directory with an
//! accompanying .meta.json file. File names are the URL-safe base64 of the
//! payload key, so resource paths with slashes and query strings never
//! collide.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::models::Source;

use super::traits::{CacheEntry, CacheMeta, CachePlugin, CacheStats, PayloadKey};

/// Configuration for the filesystem cache
#[derive(Debug, Clone)]
pub struct FilesystemCacheConfig {
    /// Base path for cache storage
    pub base_path: PathBuf,
    /// Maximum cache size in bytes
    pub max_size_bytes: u64,
    /// Lifetime of new entries
    pub ttl: Duration,
}

impl Default for FilesystemCacheConfig {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for FilesystemCacheConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            base_path: PathBuf::from(&config.base_path),
            max_size_bytes: config.max_size_mb.saturating_mul(1024 * 1024),
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }
}

/// Metadata stored in .meta.json files
/// Includes the original key to support recovery during scan
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMeta {
    original_key: String,
    #[serde(flatten)]
    meta: CacheMeta,
}

#[derive(Debug, Clone)]
struct LruEntry {
    source: Source,
    size: u64,
    last_accessed: chrono::DateTime<chrono::Utc>,
}

#[derive(Default)]
struct CacheState {
    total_size: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    /// original key -> entry
    lru_map: HashMap<String, LruEntry>,
}

/// Filesystem-based payload cache
pub struct FilesystemCache {
    config: FilesystemCacheConfig,
    state: Arc<RwLock<CacheState>>,
}

impl FilesystemCache {
    /// Creates the cache and indexes entries left by earlier runs
    pub async fn open(config: FilesystemCacheConfig) -> Result<Self, CacheError> {
        fs::create_dir_all(&config.base_path).await?;

        let cache = Self {
            config,
            state: Arc::new(RwLock::new(CacheState::default())),
        };
        cache.scan_existing_entries().await?;
        Ok(cache)
    }

    /// Returns the base path for cache storage
    pub fn base_path(&self) -> &Path {
        &self.config.base_path
    }

    /// Lifetime applied to new entries
    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    fn encode_key(key: &str) -> String {
        URL_SAFE_NO_PAD.encode(key.as_bytes())
    }

    fn data_path(&self, source: Source, key: &str) -> PathBuf {
        self.config
            .base_path
            .join(source.as_str())
            .join(Self::encode_key(key))
    }

    fn meta_path(&self, source: Source, key: &str) -> PathBuf {
        self.config
            .base_path
            .join(source.as_str())
            .join(format!("{}.meta.json", Self::encode_key(key)))
    }

    async fn remove_files(&self, source: Source, key: &str) {
        let _ = fs::remove_file(self.data_path(source, key)).await;
        let _ = fs::remove_file(self.meta_path(source, key)).await;
    }

    /// Reads every .meta.json file to rebuild the LRU index
    async fn scan_existing_entries(&self) -> Result<(), CacheError> {
        let mut state = self.state.write().await;

        for source in Source::ALL {
            let dir = self.config.base_path.join(source.as_str());
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default();
                let Some(encoded_base) = file_name.strip_suffix(".meta.json") else {
                    continue;
                };

                let Ok(meta_content) = fs::read_to_string(&path).await else {
                    continue;
                };
                let Ok(stored) = serde_json::from_str::<StoredMeta>(&meta_content) else {
                    continue;
                };
                if let Ok(file_meta) = fs::metadata(dir.join(encoded_base)).await {
                    let size = file_meta.len();
                    state.total_size += size;
                    state.lru_map.insert(
                        stored.original_key,
                        LruEntry {
                            source,
                            size,
                            last_accessed: chrono::Utc::now(),
                        },
                    );
                }
            }
        }

        debug!(entries = state.lru_map.len(), "Indexed payload cache");
        Ok(())
    }

    /// Evicts least recently used entries until `required_space` fits
    async fn evict_lru(&self, required_space: u64) {
        loop {
            let target = {
                let mut state = self.state.write().await;
                if state.total_size + required_space <= self.config.max_size_bytes {
                    break;
                }

                let lru_key = state
                    .lru_map
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_accessed)
                    .map(|(k, _)| k.clone());

                match lru_key.and_then(|key| state.lru_map.remove(&key).map(|e| (key, e))) {
                    Some((key, entry)) => {
                        state.total_size = state.total_size.saturating_sub(entry.size);
                        state.evictions += 1;
                        Some((key, entry.source))
                    }
                    None => None,
                }
            };

            match target {
                Some((key, source)) => self.remove_files(source, &key).await,
                None => break,
            }
        }
    }

    async fn forget(&self, key: &str, miss: bool) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.lru_map.remove(key) {
            state.total_size = state.total_size.saturating_sub(entry.size);
        }
        if miss {
            state.misses += 1;
        }
    }
}

#[async_trait]
impl CachePlugin for FilesystemCache {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn get(&self, key: &PayloadKey) -> Result<Option<CacheEntry>, CacheError> {
        let key_str = key.to_string();
        let meta_path = self.meta_path(key.source, &key_str);

        let meta_content = match fs::read_to_string(&meta_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.state.write().await.misses += 1;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let stored: StoredMeta = serde_json::from_str(&meta_content)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        if stored.meta.is_expired() {
            self.remove_files(key.source, &key_str).await;
            self.forget(&key_str, true).await;
            return Ok(None);
        }

        let data = match fs::read(self.data_path(key.source, &key_str)).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // meta without data
                let _ = fs::remove_file(&meta_path).await;
                self.forget(&key_str, true).await;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut state = self.state.write().await;
        state.hits += 1;
        if let Some(entry) = state.lru_map.get_mut(&key_str) {
            entry.last_accessed = chrono::Utc::now();
        }

        Ok(Some(CacheEntry {
            data,
            meta: stored.meta,
        }))
    }

    async fn set(&self, key: &PayloadKey, data: Bytes, meta: CacheMeta) -> Result<(), CacheError> {
        let key_str = key.to_string();
        let data_len = data.len() as u64;

        let over_limit = {
            let state = self.state.read().await;
            let existing = state.lru_map.get(&key_str).map(|e| e.size).unwrap_or(0);
            state.total_size.saturating_sub(existing) + data_len > self.config.max_size_bytes
        };
        if over_limit {
            self.evict_lru(data_len).await;
        }

        let data_path = self.data_path(key.source, &key_str);
        if let Some(parent) = data_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&data_path, &data).await?;

        let stored = StoredMeta {
            original_key: key_str.clone(),
            meta,
        };
        let meta_json = serde_json::to_string_pretty(&stored)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        fs::write(self.meta_path(key.source, &key_str), meta_json).await?;

        let mut state = self.state.write().await;
        if let Some(old) = state.lru_map.get(&key_str) {
            state.total_size = state.total_size.saturating_sub(old.size);
        }
        state.total_size += data_len;
        state.lru_map.insert(
            key_str,
            LruEntry {
                source: key.source,
                size: data_len,
                last_accessed: chrono::Utc::now(),
            },
        );

        Ok(())
    }

    async fn delete(&self, key: &PayloadKey) -> Result<(), CacheError> {
        let key_str = key.to_string();
        self.forget(&key_str, false).await;
        self.remove_files(key.source, &key_str).await;
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        CacheStats {
            entries: state.lru_map.len() as u64,
            total_size_bytes: state.total_size,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }

    async fn purge(&self) -> Result<(), CacheError> {
        let entries: Vec<(String, Source)> = {
            let mut state = self.state.write().await;
            let entries = state
                .lru_map
                .drain()
                .map(|(key, entry)| (key, entry.source))
                .collect();
            state.total_size = 0;
            entries
        };

        for (key, source) in entries {
            self.remove_files(source, &key).await;
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let entries: Vec<(String, Source)> = {
            let state = self.state.read().await;
            state
                .lru_map
                .iter()
                .map(|(key, entry)| (key.clone(), entry.source))
                .collect()
        };

        let mut deleted = 0u64;
        for (key, source) in entries {
            let Ok(content) = fs::read_to_string(self.meta_path(source, &key)).await else {
                continue;
            };
            let Ok(stored) = serde_json::from_str::<StoredMeta>(&content) else {
                continue;
            };
            if stored.meta.is_expired() {
                self.forget(&key, false).await;
                self.remove_files(source, &key).await;
                deleted += 1;
            }
        }

        Ok(deleted)
    }
}
