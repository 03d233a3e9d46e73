//! nhl-stats-sync - Polite multi-source NHL statistics collector
//!
//! This crate fetches hockey statistics from the official NHL API and a set of
//! statistics sites, pacing each source independently, retrying transient
//! failures with backoff, reconciling overlapping observations by source
//! priority and persisting the merged entities to SQLite.

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod plugins;
pub mod reconcile;
pub mod sync;
