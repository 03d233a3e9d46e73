//! Tracing subscriber setup
//!
//! Installs a global `tracing` subscriber built from [`LoggingConfig`]:
//! a level filter plus a `fmt` layer that renders either JSON lines or
//! human-readable output.

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Logging setup errors
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber is already installed
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// Parse a configured format name; anything other than `pretty` is JSON
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Map a configured level name to a tracing level
///
/// Unknown names fall back to `info`.
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global tracing subscriber
///
/// Returns an error instead of panicking when a subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = LevelFilter::from_level(parse_level(&config.level));

    match LogFormat::parse(&config.format) {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    }
    .map_err(|e| LoggingError::Init(e.to_string()))
}
