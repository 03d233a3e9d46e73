//! Source adapters for the supported statistics sources
//!
//! - [`traits`]: The `SourceAdapter` and `PayloadParser` traits
//! - [`nhl_api`]: The official league JSON API, with a built-in parser
//! - [`sites`]: MoneyPuck, Hockey Reference, Natural Stat Trick and Elite
//!   Prospects, parsed by an injected `PayloadParser`
//!
//! # Example
//!
//! ```ignore
//! use nhl_stats_sync::plugins::sources::{builtin_adapter, SourceAdapter};
//! use nhl_stats_sync::models::Source;
//!
//! let adapter = builtin_adapter(Source::NhlApi).expect("league API has a parser");
//! assert_eq!(adapter.source(), Source::NhlApi);
//! ```

pub mod nhl_api;
pub mod sites;
pub mod traits;

use std::sync::Arc;

use crate::models::Source;

pub use nhl_api::NhlApiAdapter;
pub use sites::SiteAdapter;
pub use traits::{PayloadParser, SourceAdapter};

#[cfg(test)]
pub use traits::MockPayloadParser;

/// Adapter for sources that ship with a parser
///
/// Only the league API does; scraped sites need a `PayloadParser` and
/// are built with [`SiteAdapter::new`].
pub fn builtin_adapter(source: Source) -> Option<Arc<dyn SourceAdapter>> {
    match source {
        Source::NhlApi => Some(Arc::new(NhlApiAdapter::new())),
        _ => None,
    }
}
