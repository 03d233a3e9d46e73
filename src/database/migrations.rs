//! Database migrations for nhl-stats-sync
//!
//! This module contains SQL migrations for the SQLite database schema.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
-- Reconciled entities, one row per (kind, natural key)
CREATE TABLE IF NOT EXISTS entities (
    entity_kind TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    attributes TEXT NOT NULL,
    updated_at DATETIME NOT NULL,
    PRIMARY KEY (entity_kind, natural_key)
);

CREATE INDEX IF NOT EXISTS idx_entities_updated ON entities(updated_at DESC);

-- Applied schema version
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);
"#;

/// Get the migration version
pub fn migration_version() -> i32 {
    1
}
