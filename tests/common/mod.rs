//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use nhl_stats_sync::config::{Config, SourceOverrides};
use nhl_stats_sync::database::{EntityStore, SqliteStore};
use nhl_stats_sync::error::ParseError;
use nhl_stats_sync::models::{
    AttrValue, DomainRecord, EntityKind, MergedEntity, NaturalKey, RawPayload, Season, Source,
    SyncScope,
};
use nhl_stats_sync::plugins::sources::PayloadParser;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const MCDAVID: u64 = 8478402;
pub const HELLEBUYCK: u64 = 8476945;

/// Create an in-memory entity store for testing
pub async fn create_test_store() -> Arc<SqliteStore> {
    Arc::new(
        SqliteStore::in_memory()
            .await
            .expect("Failed to create test store"),
    )
}

/// Overrides pointing a source at a mock server with millisecond pacing
pub fn fast_source(base_url: &str) -> SourceOverrides {
    SourceOverrides {
        enabled: Some(true),
        base_url: Some(base_url.to_string()),
        min_interval_secs: Some(0.0),
        base_backoff_secs: Some(0.01),
        max_backoff_secs: Some(0.5),
        jitter: Some(false),
        ..Default::default()
    }
}

/// Configuration with the given sources redirected to mock servers
pub fn create_test_config(sources: &[(Source, &str)]) -> Config {
    let mut config = Config::default();
    for (source, base_url) in sources {
        config.sources.insert(*source, fast_source(base_url));
    }
    config
}

/// The 2023-24 season with a one-week schedule window and one player page
pub fn test_scope() -> SyncScope {
    let day = NaiveDate::from_ymd_opt(2023, 10, 10).expect("valid date");
    SyncScope::new(Season::new(2023))
        .with_schedule_window(day, day)
        .with_players(vec![MCDAVID as u32])
}

pub fn standings_body() -> serde_json::Value {
    serde_json::json!({
        "standings": [
            {
                "seasonId": 20232024,
                "teamAbbrev": {"default": "BOS"},
                "teamName": {"default": "Boston Bruins"},
                "conferenceName": "Eastern",
                "divisionName": "Atlantic",
                "gamesPlayed": 82, "wins": 47, "losses": 20, "otLosses": 15,
                "points": 109, "pointPctg": 0.664634,
                "goalFor": 267, "goalAgainst": 224, "regulationWins": 36,
                "streakCode": "L"
            },
            {
                "seasonId": 20232024,
                "teamAbbrev": {"default": "EDM"},
                "teamName": {"default": "Edmonton Oilers"},
                "conferenceName": "Western",
                "divisionName": "Pacific",
                "gamesPlayed": 82, "wins": 49, "losses": 27, "otLosses": 6,
                "points": 104, "pointPctg": 0.634146,
                "goalFor": 294, "goalAgainst": 237, "regulationWins": 40,
                "streakCode": "W"
            }
        ]
    })
}

fn mcdavid_row(value: i64) -> serde_json::Value {
    serde_json::json!({
        "id": MCDAVID,
        "firstName": {"default": "Connor"},
        "lastName": {"default": "McDavid"},
        "sweaterNumber": 97,
        "position": "C",
        "teamAbbrev": "EDM",
        "value": value
    })
}

pub fn skater_leaders_body() -> serde_json::Value {
    serde_json::json!({
        "points": [mcdavid_row(132)],
        "goals": [mcdavid_row(32)],
        "assists": [mcdavid_row(100)]
    })
}

pub fn goalie_leaders_body() -> serde_json::Value {
    let row = |value: serde_json::Value| {
        serde_json::json!({
            "id": HELLEBUYCK,
            "firstName": {"default": "Connor"},
            "lastName": {"default": "Hellebuyck"},
            "sweaterNumber": 37,
            "position": "G",
            "teamAbbrev": "WPG",
            "value": value
        })
    };
    serde_json::json!({
        "wins": [row(serde_json::json!(37))],
        "savePctg": [row(serde_json::json!(0.921))],
        "goalsAgainstAverage": [row(serde_json::json!(2.39))],
        "shutouts": [row(serde_json::json!(5))]
    })
}

pub fn schedule_body() -> serde_json::Value {
    serde_json::json!({
        "gameWeek": [
            {
                "date": "2023-10-10",
                "games": [
                    {
                        "id": 2023020001,
                        "season": 20232024,
                        "gameType": 2,
                        "venue": {"default": "Amalie Arena"},
                        "gameState": "OFF",
                        "startTimeUTC": "2023-10-10T22:30:00Z",
                        "awayTeam": {"abbrev": "NSH", "score": 3},
                        "homeTeam": {"abbrev": "TBL", "score": 5}
                    }
                ]
            }
        ]
    })
}

pub fn player_landing_body() -> serde_json::Value {
    serde_json::json!({
        "playerId": MCDAVID,
        "isActive": true,
        "currentTeamAbbrev": "EDM",
        "firstName": {"default": "Connor"},
        "lastName": {"default": "McDavid"},
        "sweaterNumber": 97,
        "position": "C",
        "birthDate": "1997-01-13",
        "birthCity": {"default": "Richmond Hill"},
        "birthCountry": "CAN",
        "heightInInches": 73,
        "weightInPounds": 194,
        "shootsCatches": "L",
        "draftDetails": {
            "year": 2015, "teamAbbrev": "EDM", "round": 1,
            "pickInRound": 1, "overallPick": 1
        }
    })
}

/// Mount every league API document `test_scope()` enumerates
pub async fn mount_nhl_api(server: &MockServer) {
    let routes = [
        ("/standings/now".to_string(), standings_body()),
        (
            "/skater-stats-leaders/20232024/2".to_string(),
            skater_leaders_body(),
        ),
        (
            "/goalie-stats-leaders/20232024/2".to_string(),
            goalie_leaders_body(),
        ),
        ("/schedule/2023-10-10".to_string(), schedule_body()),
        (format!("/player/{}/landing", MCDAVID), player_landing_body()),
    ];

    for (route, body) in routes {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }
}

/// Mount the three Natural Stat Trick tables as `player_id,attribute,value` CSV
pub async fn mount_nst(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/playerteams.php"))
        .and(query_param("pos", "S"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(format!("{},xgoals_5v5,14.2\n", MCDAVID)),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/playerteams.php"))
        .and(query_param("pos", "G"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "{},gsax_5v5,21.7\n",
            HELLEBUYCK
        )))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/teamtable.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(server)
        .await;
}

/// Parses `player_id,attribute,value` lines into season stat records
pub struct CsvStatsParser;

impl PayloadParser for CsvStatsParser {
    fn parse(&self, payload: &RawPayload) -> Result<Vec<DomainRecord>, ParseError> {
        let text = std::str::from_utf8(&payload.body)
            .map_err(|e| ParseError::malformed(payload.resource.id(), e.to_string()))?;
        let season = payload
            .resource
            .season
            .ok_or_else(|| ParseError::malformed(payload.resource.id(), "no season"))?;

        let mut records = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let [id, attr, value] = fields.as_slice() else {
                return Err(ParseError::structural(
                    payload.resource.id(),
                    format!("expected 3 columns, got '{}'", line),
                ));
            };
            let id: u64 = id
                .parse()
                .map_err(|_| ParseError::malformed(payload.resource.id(), "bad player id"))?;
            let value = match value.parse::<i64>() {
                Ok(v) => AttrValue::Int(v),
                Err(_) => match value.parse::<f64>() {
                    Ok(v) => AttrValue::Float(v),
                    Err(_) => AttrValue::Text(value.to_string()),
                },
            };

            records.push(
                DomainRecord::observed(
                    EntityKind::PlayerSeasonStats,
                    NaturalKey::player_season(id, season),
                    payload,
                )
                .with(attr, value),
            );
        }
        Ok(records)
    }
}

/// Every persisted entity, grouped by kind
pub async fn snapshot(store: &dyn EntityStore) -> Vec<MergedEntity> {
    let mut all = Vec::new();
    for kind in EntityKind::ALL {
        all.extend(store.list(kind).await.expect("list entities"));
    }
    all
}
