//! Persistence layer for nhl-stats-sync
//!
//! This module defines the entity store trait and its SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::{EntityKind, MergedEntity, NaturalKey};

/// Store of reconciled entities
///
/// Entities are keyed by `(kind, natural key)`; the SQLite implementation
/// enforces that uniqueness with the table's primary key. Each `upsert` is
/// atomic: it either replaces the whole entity or fails without effect.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch the merge base for an entity
    async fn get(&self, kind: EntityKind, key: &NaturalKey) -> Result<Option<MergedEntity>, StorageError>;

    /// Insert or replace an entity
    async fn upsert(&self, entity: &MergedEntity) -> Result<(), StorageError>;

    /// Number of stored entities of a kind
    async fn count(&self, kind: EntityKind) -> Result<u64, StorageError>;

    /// All stored entities of a kind, ordered by natural key
    async fn list(&self, kind: EntityKind) -> Result<Vec<MergedEntity>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: MockEntityStore returns a merge base
    #[tokio::test]
    async fn test_mock_store_get() {
        let mut mock = MockEntityStore::new();
        mock.expect_get()
            .withf(|kind, key| *kind == EntityKind::Player && key.as_str() == "8478402")
            .returning(|kind, key| Ok(Some(MergedEntity::empty(kind, key.clone()))));

        let entity = mock
            .get(EntityKind::Player, &NaturalKey::player(8478402))
            .await
            .unwrap();
        assert!(entity.is_some());
    }

    // Test 2: MockEntityStore can fail an upsert
    #[tokio::test]
    async fn test_mock_store_upsert_failure() {
        let mut mock = MockEntityStore::new();
        mock.expect_upsert()
            .times(1)
            .returning(|_| Err(StorageError::Serialization("disk full".to_string())));

        let entity = MergedEntity::empty(EntityKind::Team, NaturalKey::team("BOS"));
        assert!(mock.upsert(&entity).await.is_err());
    }
}
