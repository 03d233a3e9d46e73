//! Configuration management for nhl-stats-sync
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.
//!
//! Per-source settings are written as sparse overrides and resolved against
//! the defaults of each source, so a config file only needs to mention what
//! it changes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::models::Source;

/// Prefix for environment-only configuration
pub const ENV_PREFIX: &str = "NHL_STATS_SYNC_";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Outbound HTTP configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Raw payload cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Orchestration thresholds
    #[serde(default)]
    pub sync: SyncSettings,

    /// Daemon mode schedule
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Per-source overrides
    #[serde(default)]
    pub sources: BTreeMap<Source, SourceOverrides>,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with prefix NHL_STATS_SYNC_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(path) = std::env::var(format!("{}DATABASE_PATH", ENV_PREFIX)) {
            config.database.path = path;
        }

        if let Ok(level) = std::env::var(format!("{}LOG_LEVEL", ENV_PREFIX)) {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var(format!("{}LOG_FORMAT", ENV_PREFIX)) {
            config.logging.format = format;
        }

        if let Ok(enabled) = std::env::var(format!("{}CACHE_ENABLED", ENV_PREFIX)) {
            config.cache.enabled = enabled.parse().map_err(|_| {
                ConfigError::Parse(format!("Invalid {}CACHE_ENABLED: {}", ENV_PREFIX, enabled))
            })?;
        }
        if let Ok(path) = std::env::var(format!("{}CACHE_PATH", ENV_PREFIX)) {
            config.cache.base_path = path;
        }

        if let Ok(agent) = std::env::var(format!("{}USER_AGENT", ENV_PREFIX)) {
            config.http.user_agent = agent;
        }

        config.validate()?;
        Ok(config)
    }

    /// Resolved settings for one source
    pub fn source(&self, source: Source) -> SourceConfig {
        let defaults = SourceConfig::defaults_for(source);
        match self.sources.get(&source) {
            Some(overrides) => defaults.apply(overrides),
            None => defaults,
        }
    }

    /// Sources that are enabled after resolving overrides
    pub fn enabled_sources(&self) -> Vec<Source> {
        Source::ALL
            .into_iter()
            .filter(|source| self.source(*source).enabled)
            .collect()
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "http.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err(ConfigError::InvalidValue(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            )));
        }
        if self.scheduler.interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "scheduler.interval_secs must be greater than zero".to_string(),
            ));
        }
        for source in Source::ALL {
            self.source(source).validate(source)?;
        }
        Ok(())
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    /// User-Agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_user_agent() -> String {
    format!(
        "nhl-stats-sync/{} (analytics research project)",
        env!("CARGO_PKG_VERSION")
    )
}

fn default_timeout() -> u64 {
    30
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// SQLite database path
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "data/nhl_stats.db".to_string()
}

/// Raw payload cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Whether fetched payloads are cached on disk
    #[serde(default)]
    pub enabled: bool,

    /// Cache directory
    #[serde(default = "default_cache_base_path")]
    pub base_path: String,

    /// Maximum cache size in megabytes
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,

    /// Entry lifetime in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_path: default_cache_base_path(),
            max_size_mb: default_max_size_mb(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_cache_base_path() -> String {
    "data/cache".to_string()
}

fn default_max_size_mb() -> u64 {
    512
}

fn default_cache_ttl() -> u64 {
    86400
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Orchestration thresholds shared by all sources
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncSettings {
    /// Consecutive retry-exhausted resources that end a source
    #[serde(default = "default_max_consecutive_exhausted")]
    pub max_consecutive_exhausted: u32,

    /// Consecutive parse failures, before any success, that end a source
    #[serde(default = "default_structural_failure_threshold")]
    pub structural_failure_threshold: u32,

    /// Extra attempts for a failed storage write
    #[serde(default = "default_storage_retries")]
    pub storage_retries: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_consecutive_exhausted: default_max_consecutive_exhausted(),
            structural_failure_threshold: default_structural_failure_threshold(),
            storage_retries: default_storage_retries(),
        }
    }
}

fn default_max_consecutive_exhausted() -> u32 {
    3
}

fn default_structural_failure_threshold() -> u32 {
    3
}

fn default_storage_retries() -> u32 {
    1
}

/// Daemon mode schedule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Seconds between runs
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    /// Delay before the first run
    #[serde(default)]
    pub initial_delay_secs: u64,

    /// Upper bound of the random delay added to each interval
    #[serde(default = "default_scheduler_jitter")]
    pub jitter_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval(),
            initial_delay_secs: 0,
            jitter_secs: default_scheduler_jitter(),
        }
    }
}

fn default_sync_interval() -> u64 {
    21600 // 6 hours
}

fn default_scheduler_jitter() -> u64 {
    60
}

/// Sparse per-source settings as written in the config file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceOverrides {
    pub enabled: Option<bool>,
    pub base_url: Option<String>,
    pub min_interval_secs: Option<f64>,
    pub max_attempts: Option<u32>,
    pub base_backoff_secs: Option<f64>,
    pub max_backoff_secs: Option<f64>,
    pub backoff_multiplier: Option<f64>,
    pub jitter: Option<bool>,
    pub priority_rank: Option<u8>,
    pub rate_limit_penalty: Option<f64>,
    pub max_interval_secs: Option<f64>,
    pub time_budget_secs: Option<f64>,
    pub attempt_budget: Option<u64>,
}

/// Resolved settings for one source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub enabled: bool,
    pub base_url: String,

    /// Minimum spacing between the end of one request and the start of the next
    pub min_interval_secs: f64,
    pub max_attempts: u32,
    pub base_backoff_secs: f64,
    pub max_backoff_secs: f64,
    pub backoff_multiplier: f64,
    pub jitter: bool,

    /// Lower rank wins attribute conflicts
    pub priority_rank: u8,

    /// Interval multiplier applied after a 429
    pub rate_limit_penalty: f64,

    /// Upper bound for the penalised interval
    pub max_interval_secs: f64,

    /// Wall-clock budget for one run
    pub time_budget_secs: Option<f64>,

    /// Network attempt budget for one run
    pub attempt_budget: Option<u64>,
}

impl SourceConfig {
    /// Built-in defaults for a source
    pub fn defaults_for(source: Source) -> Self {
        let (base_url, min_interval_secs, priority_rank) = match source {
            Source::NhlApi => ("https://api-web.nhle.com/v1", 1.0, 0),
            Source::MoneyPuck => ("https://moneypuck.com", 2.0, 1),
            Source::HockeyReference => ("https://www.hockey-reference.com", 3.0, 2),
            Source::NaturalStatTrick => ("https://www.naturalstattrick.com", 5.0, 2),
            Source::EliteProspects => ("https://www.eliteprospects.com", 5.0, 3),
        };

        Self {
            enabled: true,
            base_url: base_url.to_string(),
            min_interval_secs,
            max_attempts: 5,
            base_backoff_secs: 2.0,
            max_backoff_secs: 30.0,
            backoff_multiplier: 2.0,
            jitter: true,
            priority_rank,
            rate_limit_penalty: 2.0,
            max_interval_secs: 60.0,
            time_budget_secs: None,
            attempt_budget: None,
        }
    }

    /// Apply sparse overrides on top of these settings
    pub fn apply(mut self, overrides: &SourceOverrides) -> Self {
        if let Some(v) = overrides.enabled {
            self.enabled = v;
        }
        if let Some(v) = &overrides.base_url {
            self.base_url = v.clone();
        }
        if let Some(v) = overrides.min_interval_secs {
            self.min_interval_secs = v;
        }
        if let Some(v) = overrides.max_attempts {
            self.max_attempts = v;
        }
        if let Some(v) = overrides.base_backoff_secs {
            self.base_backoff_secs = v;
        }
        if let Some(v) = overrides.max_backoff_secs {
            self.max_backoff_secs = v;
        }
        if let Some(v) = overrides.backoff_multiplier {
            self.backoff_multiplier = v;
        }
        if let Some(v) = overrides.jitter {
            self.jitter = v;
        }
        if let Some(v) = overrides.priority_rank {
            self.priority_rank = v;
        }
        if let Some(v) = overrides.rate_limit_penalty {
            self.rate_limit_penalty = v;
        }
        if let Some(v) = overrides.max_interval_secs {
            self.max_interval_secs = v;
        }
        if overrides.time_budget_secs.is_some() {
            self.time_budget_secs = overrides.time_budget_secs;
        }
        if overrides.attempt_budget.is_some() {
            self.attempt_budget = overrides.attempt_budget;
        }
        self
    }

    pub fn validate(&self, source: Source) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::InvalidValue(format!("{}: {}", source, msg)));
        let non_negative = |v: f64| v.is_finite() && v >= 0.0;

        if self.base_url.is_empty() {
            return invalid("base_url must not be empty".to_string());
        }
        if !non_negative(self.min_interval_secs) {
            return invalid(format!(
                "min_interval_secs must be non-negative, got {}",
                self.min_interval_secs
            ));
        }
        if self.max_attempts == 0 {
            return invalid("max_attempts must be at least 1".to_string());
        }
        if !non_negative(self.base_backoff_secs) || !non_negative(self.max_backoff_secs) {
            return invalid("backoff durations must be non-negative".to_string());
        }
        if self.max_backoff_secs < self.base_backoff_secs {
            return invalid("max_backoff_secs must not be below base_backoff_secs".to_string());
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 1.0 {
            return invalid("backoff_multiplier must be greater than 1.0".to_string());
        }
        if self.jitter && self.backoff_multiplier < 1.5 {
            return invalid("backoff_multiplier must be at least 1.5 when jitter is enabled".to_string());
        }
        if !self.rate_limit_penalty.is_finite() || self.rate_limit_penalty < 1.0 {
            return invalid("rate_limit_penalty must be at least 1.0".to_string());
        }
        if !non_negative(self.max_interval_secs) || self.max_interval_secs < self.min_interval_secs {
            return invalid("max_interval_secs must not be below min_interval_secs".to_string());
        }
        if let Some(budget) = self.time_budget_secs {
            if !non_negative(budget) {
                return invalid("time_budget_secs must be non-negative".to_string());
            }
        }
        Ok(())
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_backoff: secs(self.base_backoff_secs),
            max_backoff: secs(self.max_backoff_secs),
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.jitter,
        }
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            min_interval: secs(self.min_interval_secs),
            penalty: self.rate_limit_penalty,
            max_interval: secs(self.max_interval_secs),
        }
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_secs.map(secs)
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Retry schedule for one source
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per resource, including the first
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,

    /// Add up to 50% random extra delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        SourceConfig::defaults_for(Source::NhlApi).retry()
    }
}

/// Request spacing for one source
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub min_interval: Duration,
    pub penalty: f64,
    pub max_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        SourceConfig::defaults_for(Source::NhlApi).rate_limit()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax. Unset variables are left as written.
fn expand_env_vars(input: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
