//! SQLite implementation of the EntityStore trait
//!
//! This module provides a SQLite-based entity store using rusqlite and
//! tokio-rusqlite for async operations. Attributes, with their provenance,
//! are stored as one JSON document per entity.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::debug;

use super::migrations::{migration_version, CREATE_SCHEMA};
use super::EntityStore;
use crate::error::StorageError;
use crate::models::{EntityKind, MergedAttribute, MergedEntity, NaturalKey};

/// SQLite entity store
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a store
    ///
    /// Use `:memory:` for an in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, StorageError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if path != ":memory:" && !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Migration(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        let conn = Connection::open(path).await?;

        let version = migration_version();
        let stored: Option<i32> = conn
            .call(move |conn| {
                conn.execute_batch(CREATE_SCHEMA)?;
                let stored = conn
                    .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
                    .optional()?
                    .flatten();
                if stored.is_none() {
                    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
                }
                Ok(stored)
            })
            .await?;

        if let Some(stored) = stored {
            if stored > version {
                return Err(StorageError::Migration(format!(
                    "database schema version {} is newer than supported version {}",
                    stored, version
                )));
            }
        }

        debug!(path = path, schema_version = version, "Opened entity store");
        Ok(Self { conn })
    }

    /// Create a new in-memory store (useful for testing)
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::new(":memory:").await
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn get(&self, kind: EntityKind, key: &NaturalKey) -> Result<Option<MergedEntity>, StorageError> {
        let kind_str = kind.as_str();
        let key_str = key.as_str().to_string();

        let attributes: Option<String> = self
            .conn
            .call(move |conn| {
                let attributes = conn
                    .query_row(
                        "SELECT attributes FROM entities WHERE entity_kind = ?1 AND natural_key = ?2",
                        rusqlite::params![kind_str, key_str],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(attributes)
            })
            .await?;

        attributes
            .map(|json| decode_entity(kind, key.clone(), &json))
            .transpose()
    }

    async fn upsert(&self, entity: &MergedEntity) -> Result<(), StorageError> {
        let kind = entity.kind.as_str();
        let key = entity.key.as_str().to_string();
        let attributes = serde_json::to_string(&entity.attributes)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let updated_at = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO entities (entity_kind, natural_key, attributes, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(entity_kind, natural_key) DO UPDATE SET
                        attributes = excluded.attributes,
                        updated_at = excluded.updated_at
                    "#,
                    rusqlite::params![kind, key, attributes, updated_at],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn count(&self, kind: EntityKind) -> Result<u64, StorageError> {
        let kind = kind.as_str();

        self.conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM entities WHERE entity_kind = ?1",
                    [kind],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Into::into)
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<MergedEntity>, StorageError> {
        let kind_str = kind.as_str();

        let rows: Vec<(String, String)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT natural_key, attributes
                    FROM entities
                    WHERE entity_kind = ?1
                    ORDER BY natural_key
                    "#,
                )?;

                let rows = stmt
                    .query_map([kind_str], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(key, json)| decode_entity(kind, NaturalKey::new(key), &json))
            .collect()
    }
}

fn decode_entity(kind: EntityKind, key: NaturalKey, json: &str) -> Result<MergedEntity, StorageError> {
    let attributes: BTreeMap<String, MergedAttribute> = serde_json::from_str(json)
        .map_err(|e| StorageError::Serialization(format!("entity {}/{}: {}", kind, key, e)))?;

    Ok(MergedEntity { kind, key, attributes })
}
