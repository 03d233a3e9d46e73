//! Source adapter trait definition
//!
//! A source adapter knows which documents a source publishes for a scope
//! and how to turn a fetched document into domain records. Adapters never
//! touch the network themselves: fetching, spacing and retries belong to
//! the fetch client.

use crate::error::ParseError;
use crate::models::{DomainRecord, RawPayload, Resource, Source, SyncScope};

/// Trait for source adapters
///
/// # Example
///
/// ```ignore
/// use nhl_stats_sync::plugins::sources::{NhlApiAdapter, SourceAdapter};
/// use nhl_stats_sync::models::{Season, SyncScope};
///
/// let adapter = NhlApiAdapter::new();
/// for resource in adapter.list_resources(&SyncScope::new(Season::new(2023))) {
///     println!("{}", resource);
/// }
/// ```
pub trait SourceAdapter: Send + Sync {
    /// The source this adapter serves
    fn source(&self) -> Source;

    /// Resources to fetch for `scope`
    ///
    /// The sequence is finite, and calling again yields the same sequence
    /// from the start.
    fn list_resources<'a>(
        &'a self,
        scope: &SyncScope,
    ) -> Box<dyn Iterator<Item = Resource> + Send + 'a>;

    /// Decode one payload into domain records
    ///
    /// A payload that cannot be read yields `ParseError::Malformed`; a
    /// document whose layout no longer matches yields
    /// `ParseError::Structural`.
    fn parse(&self, payload: &RawPayload) -> Result<Vec<DomainRecord>, ParseError>;
}

/// Payload decoder for a source whose documents are parsed elsewhere
///
/// Parsers must build natural keys from league identifiers and attribute
/// every record to the payload it came from (`DomainRecord::observed`).
#[cfg_attr(test, mockall::automock)]
pub trait PayloadParser: Send + Sync {
    fn parse(&self, payload: &RawPayload) -> Result<Vec<DomainRecord>, ParseError>;
}
