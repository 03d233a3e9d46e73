//! Pluggable parts of a sync run
//!
//! - [`cache`]: Raw payload caches consulted before the network
//! - [`sources`]: Per-source resource enumeration and payload parsing

pub mod cache;
pub mod sources;
