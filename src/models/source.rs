//! Source, resource and scope models
//!
//! This module defines the closed set of upstream sources, the resources
//! they expose, and the season scope a sync run covers.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Upstream data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Source {
    /// Official league stats API
    #[serde(rename = "nhl_api")]
    NhlApi,
    /// MoneyPuck season summary exports
    #[serde(rename = "moneypuck")]
    MoneyPuck,
    /// Hockey-Reference league pages
    #[serde(rename = "hockey_ref")]
    HockeyReference,
    /// Natural Stat Trick stat tables
    #[serde(rename = "nst")]
    NaturalStatTrick,
    /// EliteProspects biographical pages
    #[serde(rename = "elite")]
    EliteProspects,
}

impl Source {
    pub const ALL: [Source; 5] = [
        Source::NhlApi,
        Source::MoneyPuck,
        Source::HockeyReference,
        Source::NaturalStatTrick,
        Source::EliteProspects,
    ];

    /// Configuration and CLI name
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::NhlApi => "nhl_api",
            Source::MoneyPuck => "moneypuck",
            Source::HockeyReference => "hockey_ref",
            Source::NaturalStatTrick => "nst",
            Source::EliteProspects => "elite",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| format!("unknown source '{}'", s))
    }
}

/// NHL season, identified by the year it starts in
///
/// Displays as the eight-digit season id used by the league API
/// (`20232024`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Season {
    start_year: i32,
}

impl Season {
    pub fn new(start_year: i32) -> Self {
        Self { start_year }
    }

    /// Season in progress on `date`; seasons start in October
    pub fn containing(date: NaiveDate) -> Self {
        if date.month() >= 10 {
            Self::new(date.year())
        } else {
            Self::new(date.year() - 1)
        }
    }

    pub fn current() -> Self {
        Self::containing(Utc::now().date_naive())
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    pub fn end_year(&self) -> i32 {
        self.start_year + 1
    }

    /// Default schedule window: October 1st through June 30th
    pub fn default_window(&self) -> (NaiveDate, NaiveDate) {
        let start = NaiveDate::from_ymd_opt(self.start_year, 10, 1).unwrap_or(NaiveDate::MIN);
        let end = NaiveDate::from_ymd_opt(self.end_year(), 6, 30).unwrap_or(NaiveDate::MAX);
        (start, end)
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.start_year, self.end_year())
    }
}

impl FromStr for Season {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("season must look like 20232024, got '{}'", s));
        }
        let start: i32 = s[..4].parse().map_err(|_| format!("bad season '{}'", s))?;
        let end: i32 = s[4..].parse().map_err(|_| format!("bad season '{}'", s))?;
        if end != start + 1 {
            return Err(format!("season years must be consecutive, got '{}'", s));
        }
        Ok(Season::new(start))
    }
}

impl Serialize for Season {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Season {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// What a sync run covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncScope {
    pub season: Season,

    /// Inclusive date range for schedule resources; defaults to the season window
    pub schedule_window: Option<(NaiveDate, NaiveDate)>,

    /// Players whose individual pages should be fetched
    pub player_ids: Vec<u32>,
}

impl SyncScope {
    pub fn new(season: Season) -> Self {
        Self {
            season,
            schedule_window: None,
            player_ids: Vec::new(),
        }
    }

    pub fn current() -> Self {
        Self::new(Season::current())
    }

    pub fn with_schedule_window(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.schedule_window = Some((start, end));
        self
    }

    pub fn with_players(mut self, player_ids: Vec<u32>) -> Self {
        self.player_ids = player_ids;
        self
    }

    /// Week start dates covering the schedule window, produced lazily
    pub fn schedule_weeks(&self) -> impl Iterator<Item = NaiveDate> + Send + 'static {
        let (start, end) = self
            .schedule_window
            .unwrap_or_else(|| self.season.default_window());
        std::iter::successors(Some(start), |day| day.checked_add_signed(ChronoDuration::days(7)))
            .take_while(move |day| *day <= end)
    }
}

/// One fetchable document of a source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    /// Adapter-defined document type, e.g. `standings`
    pub kind: String,

    /// Path and query relative to the source base URL; the resource id
    pub path: String,

    /// Season the document belongs to
    pub season: Option<Season>,
}

impl Resource {
    pub fn new(kind: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            path: path.into(),
            season: None,
        }
    }

    pub fn for_season(mut self, season: Season) -> Self {
        self.season = Some(season);
        self
    }

    pub fn id(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Undecoded body returned by a successful fetch
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    pub source: Source,
    pub resource: Resource,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub fetched_at: DateTime<Utc>,

    /// Served from the payload cache instead of the network
    pub from_cache: bool,
}

impl RawPayload {
    pub fn new(source: Source, resource: Resource, body: impl Into<Bytes>) -> Self {
        Self {
            source,
            resource,
            body: body.into(),
            content_type: None,
            fetched_at: Utc::now(),
            from_cache: false,
        }
    }

    pub fn with_fetched_at(mut self, fetched_at: DateTime<Utc>) -> Self {
        self.fetched_at = fetched_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Source names round-trip through FromStr
    #[test]
    fn test_source_names() {
        for source in Source::ALL {
            assert_eq!(source.as_str().parse::<Source>().unwrap(), source);
        }
        assert!("espn".parse::<Source>().is_err());
        assert_eq!(Source::NaturalStatTrick.to_string(), "nst");
    }

    // Test 2: Source deserializes from config names
    #[test]
    fn test_source_serde_names() {
        let source: Source = serde_yaml::from_str("hockey_ref").unwrap();
        assert_eq!(source, Source::HockeyReference);
        assert_eq!(serde_json::to_string(&Source::NhlApi).unwrap(), "\"nhl_api\"");
    }

    // Test 3: Season containing a date
    #[test]
    fn test_season_containing() {
        let october = NaiveDate::from_ymd_opt(2023, 10, 10).unwrap();
        let march = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let september = NaiveDate::from_ymd_opt(2024, 9, 30).unwrap();

        assert_eq!(Season::containing(october).to_string(), "20232024");
        assert_eq!(Season::containing(march).to_string(), "20232024");
        assert_eq!(Season::containing(september).to_string(), "20232024");
    }

    // Test 4: Season parsing
    #[test]
    fn test_season_parse() {
        assert_eq!("20232024".parse::<Season>().unwrap(), Season::new(2023));
        assert!("20232025".parse::<Season>().is_err());
        assert!("2023".parse::<Season>().is_err());
        assert!("2023202a".parse::<Season>().is_err());
    }

    // Test 5: Schedule weeks cover the window inclusively
    #[test]
    fn test_schedule_weeks() {
        let scope = SyncScope::new(Season::new(2023)).with_schedule_window(
            NaiveDate::from_ymd_opt(2023, 10, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 10, 15).unwrap(),
        );

        let weeks: Vec<NaiveDate> = scope.schedule_weeks().collect();
        assert_eq!(weeks.len(), 3);
        assert_eq!(weeks[2], NaiveDate::from_ymd_opt(2023, 10, 15).unwrap());

        let empty = SyncScope::new(Season::new(2023)).with_schedule_window(
            NaiveDate::from_ymd_opt(2023, 10, 15).unwrap(),
            NaiveDate::from_ymd_opt(2023, 10, 1).unwrap(),
        );
        assert_eq!(empty.schedule_weeks().count(), 0);
    }

    // Test 6: Default window spans the full season
    #[test]
    fn test_default_schedule_window() {
        let (start, end) = Season::new(2023).default_window();
        assert_eq!(start, NaiveDate::from_ymd_opt(2023, 10, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 6, 30).unwrap());
    }
}
