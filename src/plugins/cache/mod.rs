//! Raw payload caches
//!
//! The fetch client consults a cache before going to the network. The
//! default implementation uses the filesystem.

pub mod traits;

mod filesystem;

pub use traits::{CacheEntry, CacheMeta, CachePlugin, CacheStats, PayloadKey};

#[cfg(test)]
pub use traits::MockCachePlugin;

pub use filesystem::{FilesystemCache, FilesystemCacheConfig};
