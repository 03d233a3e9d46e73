//! Domain models for nhl-stats-sync
//!
//! This module contains the core domain models used throughout the application.

pub mod record;
pub mod report;
pub mod source;

// Re-export commonly used types
pub use record::{AttrValue, DomainRecord, EntityKind, MergedAttribute, MergedEntity, NaturalKey};
pub use report::{DroppedEntity, ResourceFailure, RunReport, SourceHealth, SourceReport, SourceState};
pub use source::{RawPayload, Resource, Season, Source, SyncScope};
