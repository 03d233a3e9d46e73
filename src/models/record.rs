//! Domain records and merged entities
//!
//! A `DomainRecord` is what one source said about one entity at one
//! point in time. A `MergedEntity` is the reconciled view persisted by
//! the store, with per-attribute provenance.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::source::{RawPayload, Season, Source};

/// Type of a league entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    Team,
    Game,
    PlayerGameStats,
    PlayerSeasonStats,
    GoalieStats,
    TeamStandings,
    DraftPick,
    Contract,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Player,
        EntityKind::Team,
        EntityKind::Game,
        EntityKind::PlayerGameStats,
        EntityKind::PlayerSeasonStats,
        EntityKind::GoalieStats,
        EntityKind::TeamStandings,
        EntityKind::DraftPick,
        EntityKind::Contract,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Player => "player",
            EntityKind::Team => "team",
            EntityKind::Game => "game",
            EntityKind::PlayerGameStats => "player_game_stats",
            EntityKind::PlayerSeasonStats => "player_season_stats",
            EntityKind::GoalieStats => "goalie_stats",
            EntityKind::TeamStandings => "team_standings",
            EntityKind::DraftPick => "draft_pick",
            EntityKind::Contract => "contract",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        EntityKind::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source-independent identity of an entity within its kind
///
/// Keys are built from league identifiers only, so every source maps the
/// same real-world entity to the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NaturalKey(String);

impl NaturalKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn player(player_id: u64) -> Self {
        Self(player_id.to_string())
    }

    pub fn team(abbrev: &str) -> Self {
        Self(abbrev.trim().to_ascii_uppercase())
    }

    pub fn game(game_id: u64) -> Self {
        Self(game_id.to_string())
    }

    pub fn player_season(player_id: u64, season: Season) -> Self {
        Self(format!("{}:{}", player_id, season))
    }

    pub fn player_game(player_id: u64, game_id: u64) -> Self {
        Self(format!("{}:{}", player_id, game_id))
    }

    pub fn team_season(abbrev: &str, season: Season) -> Self {
        Self(format!("{}:{}", abbrev.trim().to_ascii_uppercase(), season))
    }

    pub fn contract(player_id: u64, signing_year: i32) -> Self {
        Self(format!("{}:{}", player_id, signing_year))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scalar attribute value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl AttrValue {
    fn rank(&self) -> u8 {
        match self {
            AttrValue::Int(_) => 0,
            AttrValue::Float(_) => 1,
            AttrValue::Text(_) => 2,
            AttrValue::Bool(_) => 3,
        }
    }

    /// False for NaN and infinite floats, which cannot be persisted
    pub fn is_finite(&self) -> bool {
        match self {
            AttrValue::Float(v) => v.is_finite(),
            _ => true,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

// Total order so ties between equally ranked observations resolve the same
// way regardless of merge order. Floats compare with `total_cmp`.
impl Ord for AttrValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (AttrValue::Int(a), AttrValue::Int(b)) => a.cmp(b),
            (AttrValue::Float(a), AttrValue::Float(b)) => a.total_cmp(b),
            (AttrValue::Text(a), AttrValue::Text(b)) => a.cmp(b),
            (AttrValue::Bool(a), AttrValue::Bool(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for AttrValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for AttrValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AttrValue {}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::Int(i64::from(v))
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        AttrValue::Int(i64::from(v))
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Text(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Text(v)
    }
}

/// What one source observed about one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub kind: EntityKind,
    pub key: NaturalKey,
    pub source: Source,
    pub observed_at: DateTime<Utc>,

    /// Present attributes only; a missing value is never stored as null
    pub attributes: BTreeMap<String, AttrValue>,
}

impl DomainRecord {
    pub fn new(kind: EntityKind, key: NaturalKey, source: Source, observed_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            key,
            source,
            observed_at,
            attributes: BTreeMap::new(),
        }
    }

    /// Record attributed to the payload it was parsed from
    pub fn observed(kind: EntityKind, key: NaturalKey, payload: &RawPayload) -> Self {
        Self::new(kind, key, payload.source, payload.fetched_at)
    }

    /// Set an attribute; NaN and infinite floats are treated as absent
    pub fn with(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        let value = value.into();
        if value.is_finite() {
            self.attributes.insert(name.to_string(), value);
        }
        self
    }

    /// Set the attribute only when a value is present
    pub fn with_opt<V: Into<AttrValue>>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.with(name, value),
            None => self,
        }
    }

    /// First attribute holding a NaN or infinite float
    pub fn non_finite_attribute(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(_, value)| !value.is_finite())
            .map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    pub fn identity(&self) -> String {
        format!("{}/{}", self.kind, self.key)
    }
}

/// Winning value of one attribute with its provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedAttribute {
    pub value: AttrValue,
    pub source: Source,
    pub observed_at: DateTime<Utc>,
}

/// Reconciled entity as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedEntity {
    pub kind: EntityKind,
    pub key: NaturalKey,
    pub attributes: BTreeMap<String, MergedAttribute>,
}

impl MergedEntity {
    pub fn empty(kind: EntityKind, key: NaturalKey) -> Self {
        Self {
            kind,
            key,
            attributes: BTreeMap::new(),
        }
    }

    pub fn value(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name).map(|attr| &attr.value)
    }

    pub fn provenance(&self, name: &str) -> Option<Source> {
        self.attributes.get(name).map(|attr| attr.source)
    }

    pub fn identity(&self) -> String {
        format!("{}/{}", self.kind, self.key)
    }

    /// Same values from the same sources, ignoring observation times
    ///
    /// Two entities can share content and still differ in `observed_at`;
    /// the later timestamps must still be persisted for recency ties.
    pub fn same_content(&self, other: &MergedEntity) -> bool {
        self.kind == other.kind
            && self.key == other.key
            && self.attributes.len() == other.attributes.len()
            && self
                .attributes
                .iter()
                .zip(other.attributes.iter())
                .all(|((name_a, a), (name_b, b))| {
                    name_a == name_b && a.value == b.value && a.source == b.source
                })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    // Test 1: Natural keys are source independent
    #[test]
    fn test_natural_key_constructors() {
        assert_eq!(NaturalKey::team(" bos ").as_str(), "BOS");
        assert_eq!(
            NaturalKey::player_season(8478402, Season::new(2023)).as_str(),
            "8478402:20232024"
        );
        assert_eq!(
            NaturalKey::team_season("tor", Season::new(2022)).as_str(),
            "TOR:20222023"
        );
        assert_eq!(NaturalKey::player_game(1, 2023020001).as_str(), "1:2023020001");
    }

    // Test 2: AttrValue total order
    #[test]
    fn test_attr_value_ordering() {
        assert!(AttrValue::Int(1) < AttrValue::Int(2));
        assert!(AttrValue::Int(100) < AttrValue::Float(0.0));
        assert!(AttrValue::Float(f64::NAN) == AttrValue::Float(f64::NAN));
        assert!(AttrValue::from("a") < AttrValue::from("b"));
        assert_eq!(AttrValue::from(3i32), AttrValue::Int(3));
    }

    // Test 3: with_opt skips absent values
    #[test]
    fn test_record_with_opt() {
        let record = DomainRecord::new(
            EntityKind::Player,
            NaturalKey::player(1),
            Source::NhlApi,
            ts(0),
        )
        .with("name", "Connor McDavid")
        .with_opt::<i64>("weight", None)
        .with_opt("height", Some(73i64));

        assert_eq!(record.get("name"), Some(&AttrValue::from("Connor McDavid")));
        assert!(record.get("weight").is_none());
        assert_eq!(record.get("height"), Some(&AttrValue::Int(73)));
        assert_eq!(record.identity(), "player/1");
    }

    // Test 4: same_content ignores observation time
    #[test]
    fn test_same_content_ignores_timestamps() {
        let mut a = MergedEntity::empty(EntityKind::Team, NaturalKey::team("BOS"));
        a.attributes.insert(
            "wins".to_string(),
            MergedAttribute {
                value: AttrValue::Int(47),
                source: Source::NhlApi,
                observed_at: ts(10),
            },
        );
        let mut b = a.clone();
        b.attributes.get_mut("wins").unwrap().observed_at = ts(20);
        assert!(a.same_content(&b));
        assert_ne!(a, b);

        b.attributes.get_mut("wins").unwrap().source = Source::MoneyPuck;
        assert!(!a.same_content(&b));
    }

    // Test 5: AttrValue serializes with an explicit type tag
    #[test]
    fn test_attr_value_serde() {
        let json = serde_json::to_string(&AttrValue::Float(10.0)).unwrap();
        assert_eq!(json, r#"{"type":"float","value":10.0}"#);
        let back: AttrValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AttrValue::Float(10.0));
    }

    // Test 6: NaN and infinite floats never become attributes
    #[test]
    fn test_non_finite_floats_skipped() {
        let record = DomainRecord::new(
            EntityKind::GoalieStats,
            NaturalKey::player_season(1, Season::new(2023)),
            Source::MoneyPuck,
            ts(0),
        )
        .with("save_pct", f64::NAN)
        .with("gaa", f64::INFINITY)
        .with_opt("xgoals", Some(f64::NEG_INFINITY))
        .with("wins", 30);

        assert!(record.get("save_pct").is_none());
        assert!(record.get("gaa").is_none());
        assert!(record.get("xgoals").is_none());
        assert_eq!(record.non_finite_attribute(), None);

        let mut raw = record.clone();
        raw.attributes.insert("save_pct".to_string(), AttrValue::Float(f64::NAN));
        assert_eq!(raw.non_finite_attribute(), Some("save_pct"));
        assert!(AttrValue::Float(0.5).is_finite());
    }
}
