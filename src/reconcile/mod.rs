//! Cross-source reconciliation
//!
//! The reconciler folds domain records into merged entities one attribute
//! at a time. For every attribute the surviving value is the greatest
//! candidate under a fixed total order:
//!
//! 1. higher source priority (lower `priority_rank`)
//! 2. later observation time
//! 3. lower `Source` ordinal
//! 4. greater value
//!
//! Because the winner is a maximum, folding the same records in any order
//! or grouping yields the same entity. Values are always replaced whole;
//! cumulative counts from different sources are never added together.

use std::cmp::{Ordering, Reverse};
use std::collections::BTreeMap;

use tracing::{trace, warn};

use crate::config::Config;
use crate::error::ReconcileError;
use crate::models::{DomainRecord, EntityKind, MergedAttribute, MergedEntity, NaturalKey, Source};

/// Rank used for sources missing from the priority map
const LOWEST_PRIORITY: u8 = u8::MAX;

/// Merges domain records into entities using a static source priority
#[derive(Debug, Clone)]
pub struct Reconciler {
    ranks: BTreeMap<Source, u8>,
}

impl Reconciler {
    /// Creates a reconciler from per-source ranks; lower ranks win
    pub fn new(ranks: BTreeMap<Source, u8>) -> Self {
        Self { ranks }
    }

    /// Ranks taken from each source's resolved configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Source::ALL
                .into_iter()
                .map(|source| (source, config.source(source).priority_rank))
                .collect(),
        )
    }

    pub fn rank(&self, source: Source) -> u8 {
        self.ranks.get(&source).copied().unwrap_or(LOWEST_PRIORITY)
    }

    /// Merge one incoming record into the existing entity
    ///
    /// Attributes the record does not carry keep their existing value.
    /// A record carrying a NaN or infinite float is rejected whole.
    pub fn merge(
        &self,
        existing: Option<&MergedEntity>,
        incoming: &DomainRecord,
    ) -> Result<MergedEntity, ReconcileError> {
        if let Some(attribute) = incoming.non_finite_attribute() {
            return Err(ReconcileError::NonFiniteValue {
                entity: incoming.identity(),
                attribute: attribute.to_string(),
            });
        }

        let mut merged = match existing {
            Some(entity) => {
                if entity.kind != incoming.kind || entity.key != incoming.key {
                    return Err(ReconcileError::IdentityMismatch {
                        existing: entity.identity(),
                        incoming: incoming.identity(),
                    });
                }
                entity.clone()
            }
            None => MergedEntity::empty(incoming.kind, incoming.key.clone()),
        };

        for (name, value) in &incoming.attributes {
            let candidate = MergedAttribute {
                value: value.clone(),
                source: incoming.source,
                observed_at: incoming.observed_at,
            };
            self.offer(&mut merged, name, candidate);
        }

        Ok(merged)
    }

    /// Merge two entities with the same identity
    pub fn merge_entities(&self, a: &MergedEntity, b: &MergedEntity) -> Result<MergedEntity, ReconcileError> {
        if a.kind != b.kind || a.key != b.key {
            return Err(ReconcileError::IdentityMismatch {
                existing: a.identity(),
                incoming: b.identity(),
            });
        }

        let mut merged = a.clone();
        for (name, attr) in &b.attributes {
            self.offer(&mut merged, name, attr.clone());
        }
        Ok(merged)
    }

    /// Reconcile a batch of records into one entity per identity
    ///
    /// Records `merge` would reject are left out.
    pub fn merge_all<'a, I>(&self, records: I) -> BTreeMap<(EntityKind, NaturalKey), MergedEntity>
    where
        I: IntoIterator<Item = &'a DomainRecord>,
    {
        let mut entities: BTreeMap<(EntityKind, NaturalKey), MergedEntity> = BTreeMap::new();

        for record in records {
            if let Some(attribute) = record.non_finite_attribute() {
                warn!(entity = %record.identity(), attribute, "Record with non-finite value skipped");
                continue;
            }
            let identity = (record.kind, record.key.clone());
            let entity = entities
                .entry(identity)
                .or_insert_with(|| MergedEntity::empty(record.kind, record.key.clone()));
            for (name, value) in &record.attributes {
                let candidate = MergedAttribute {
                    value: value.clone(),
                    source: record.source,
                    observed_at: record.observed_at,
                };
                self.offer(entity, name, candidate);
            }
        }

        entities
    }

    fn offer(&self, entity: &mut MergedEntity, name: &str, candidate: MergedAttribute) {
        match entity.attributes.get_mut(name) {
            Some(current) => {
                if self.compare(&candidate, current) == Ordering::Greater {
                    trace!(
                        entity = %entity.key,
                        attribute = name,
                        winner = %candidate.source,
                        loser = %current.source,
                        "Attribute replaced"
                    );
                    *current = candidate;
                }
            }
            None => {
                entity.attributes.insert(name.to_string(), candidate);
            }
        }
    }

    /// Total order over candidates for one attribute; the greatest wins
    fn compare(&self, a: &MergedAttribute, b: &MergedAttribute) -> Ordering {
        let key = |attr: &MergedAttribute| (Reverse(self.rank(attr.source)), attr.observed_at, Reverse(attr.source));

        key(a).cmp(&key(b)).then_with(|| a.value.cmp(&b.value))
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
