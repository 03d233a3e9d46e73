//! Official league stats API adapter
//!
//! This module maps the public JSON API at `https://api-web.nhle.com/v1`
//! onto domain records.
//!
//! # Resources
//!
//! - `/standings/now`: teams and their standings line
//! - `/skater-stats-leaders/{season}/2?categories={c}&limit=-1`: skater season totals
//! - `/goalie-stats-leaders/{season}/2?categories={c}&limit=-1`: goalie season totals
//! - `/schedule/{date}`: one week of games
//! - `/player/{id}/landing`: biography and draft details

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::models::{
    AttrValue, DomainRecord, EntityKind, NaturalKey, RawPayload, Resource, Season, Source, SyncScope,
};

use super::traits::SourceAdapter;

const STANDINGS: &str = "standings";
const SKATER_LEADERS: &str = "skater_leaders";
const GOALIE_LEADERS: &str = "goalie_leaders";
const SCHEDULE: &str = "schedule";
const PLAYER_LANDING: &str = "player_landing";

/// Skater leader categories and the attribute each one fills
const SKATER_CATEGORIES: [(&str, &str); 3] = [("points", "points"), ("goals", "goals"), ("assists", "assists")];

/// Goalie leader categories and the attribute each one fills
const GOALIE_CATEGORIES: [(&str, &str); 4] = [
    ("wins", "wins"),
    ("savePctg", "save_pct"),
    ("goalsAgainstAverage", "goals_against_avg"),
    ("shutouts", "shutouts"),
];

/// Game type 2 is the regular season
const REGULAR_SEASON: u8 = 2;

/// Adapter for the official league API
#[derive(Debug, Clone, Default)]
pub struct NhlApiAdapter;

impl NhlApiAdapter {
    pub fn new() -> Self {
        Self
    }

    fn parse_document(&self, payload: &RawPayload, doc: &Value) -> Result<Vec<DomainRecord>, ParseError> {
        match payload.resource.kind.as_str() {
            STANDINGS => parse_standings(payload, doc),
            SKATER_LEADERS => parse_leaders(payload, doc, &SKATER_CATEGORIES, EntityKind::PlayerSeasonStats),
            GOALIE_LEADERS => parse_leaders(payload, doc, &GOALIE_CATEGORIES, EntityKind::GoalieStats),
            SCHEDULE => parse_schedule(payload, doc),
            PLAYER_LANDING => parse_player_landing(payload, doc),
            other => Err(ParseError::malformed(
                payload.resource.id(),
                format!("unknown resource kind '{}'", other),
            )),
        }
    }
}

fn leaders_path(group: &str, season: Season, category: &str) -> String {
    format!(
        "/{}-stats-leaders/{}/{}?categories={}&limit=-1",
        group, season, REGULAR_SEASON, category
    )
}

impl SourceAdapter for NhlApiAdapter {
    fn source(&self) -> Source {
        Source::NhlApi
    }

    fn list_resources<'a>(&'a self, scope: &SyncScope) -> Box<dyn Iterator<Item = Resource> + Send + 'a> {
        let season = scope.season;

        let standings = std::iter::once(Resource::new(STANDINGS, "/standings/now"));
        let skaters = SKATER_CATEGORIES
            .into_iter()
            .map(move |(category, _)| Resource::new(SKATER_LEADERS, leaders_path("skater", season, category)));
        let goalies = GOALIE_CATEGORIES
            .into_iter()
            .map(move |(category, _)| Resource::new(GOALIE_LEADERS, leaders_path("goalie", season, category)));
        let schedule = scope
            .schedule_weeks()
            .map(|week| Resource::new(SCHEDULE, format!("/schedule/{}", week.format("%Y-%m-%d"))));
        let players = scope
            .player_ids
            .clone()
            .into_iter()
            .map(|id| Resource::new(PLAYER_LANDING, format!("/player/{}/landing", id)));

        Box::new(
            standings
                .chain(skaters)
                .chain(goalies)
                .chain(schedule)
                .chain(players)
                .map(move |resource| resource.for_season(season)),
        )
    }

    fn parse(&self, payload: &RawPayload) -> Result<Vec<DomainRecord>, ParseError> {
        let doc: Value = serde_json::from_slice(&payload.body)
            .map_err(|e| ParseError::malformed(payload.resource.id(), e.to_string()))?;

        let records = self.parse_document(payload, &doc)?;
        debug!(
            resource = %payload.resource,
            records = records.len(),
            "Parsed league API document"
        );
        Ok(records)
    }
}

/// Text that may be a plain string or a `{"default": "..."}` object
fn localized(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("default").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}

fn int(value: &Value, field: &str) -> Option<i64> {
    value.get(field).and_then(Value::as_i64)
}

fn float(value: &Value, field: &str) -> Option<f64> {
    value.get(field).and_then(Value::as_f64)
}

fn text(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(String::from)
}

fn pointer_text(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(Value::as_str).map(String::from)
}

fn array<'v>(doc: &'v Value, field: &str, payload: &RawPayload) -> Result<&'v Vec<Value>, ParseError> {
    doc.get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| ParseError::structural(payload.resource.id(), format!("missing '{}' array", field)))
}

fn season_of(entry: &Value, payload: &RawPayload) -> Option<Season> {
    int(entry, "seasonId")
        .or_else(|| int(entry, "season"))
        .and_then(|id| id.to_string().parse().ok())
        .or(payload.resource.season)
}

fn parse_standings(payload: &RawPayload, doc: &Value) -> Result<Vec<DomainRecord>, ParseError> {
    let mut records = Vec::new();

    for entry in array(doc, "standings", payload)? {
        let Some(abbrev) = localized(entry, "teamAbbrev") else {
            warn!(resource = %payload.resource, "Skipping standings row without team abbreviation");
            continue;
        };

        records.push(
            DomainRecord::observed(EntityKind::Team, NaturalKey::team(&abbrev), payload)
                .with("abbreviation", abbrev.to_ascii_uppercase())
                .with_opt("name", localized(entry, "teamName"))
                .with_opt("conference", text(entry, "conferenceName"))
                .with_opt("division", text(entry, "divisionName")),
        );

        if let Some(season) = season_of(entry, payload) {
            records.push(
                DomainRecord::observed(EntityKind::TeamStandings, NaturalKey::team_season(&abbrev, season), payload)
                    .with("team", abbrev.to_ascii_uppercase())
                    .with("season", season.to_string())
                    .with_opt("games_played", int(entry, "gamesPlayed"))
                    .with_opt("wins", int(entry, "wins"))
                    .with_opt("losses", int(entry, "losses"))
                    .with_opt("ot_losses", int(entry, "otLosses"))
                    .with_opt("points", int(entry, "points"))
                    .with_opt("point_pct", float(entry, "pointPctg"))
                    .with_opt("goals_for", int(entry, "goalFor"))
                    .with_opt("goals_against", int(entry, "goalAgainst"))
                    .with_opt("regulation_wins", int(entry, "regulationWins"))
                    .with_opt("streak", text(entry, "streakCode")),
            );
        }
    }

    Ok(records)
}

fn parse_leaders(
    payload: &RawPayload,
    doc: &Value,
    categories: &[(&str, &str)],
    stats_kind: EntityKind,
) -> Result<Vec<DomainRecord>, ParseError> {
    let season = payload
        .resource
        .season
        .ok_or_else(|| ParseError::malformed(payload.resource.id(), "leader resource without season"))?;

    let present: Vec<(&Value, &str)> = categories
        .iter()
        .filter_map(|(category, attr)| doc.get(*category).map(|rows| (rows, *attr)))
        .collect();
    if present.is_empty() {
        return Err(ParseError::structural(payload.resource.id(), "no leader category in document"));
    }

    let mut records = Vec::new();
    for (rows, attr) in present {
        let rows = rows
            .as_array()
            .ok_or_else(|| ParseError::structural(payload.resource.id(), "leader category is not an array"))?;

        for row in rows {
            let Some(player_id) = int(row, "id").and_then(|id| u64::try_from(id).ok()) else {
                warn!(resource = %payload.resource, "Skipping leader row without player id");
                continue;
            };
            let first = localized(row, "firstName");
            let last = localized(row, "lastName");
            let team = text(row, "teamAbbrev");

            records.push(
                DomainRecord::observed(EntityKind::Player, NaturalKey::player(player_id), payload)
                    .with_opt("name", full_name(first.as_deref(), last.as_deref()))
                    .with_opt("first_name", first)
                    .with_opt("last_name", last)
                    .with_opt("position", text(row, "position"))
                    .with_opt("sweater_number", int(row, "sweaterNumber"))
                    .with_opt("team", team.clone()),
            );

            let value: Option<AttrValue> = match row.get("value") {
                Some(Value::Number(n)) if n.is_i64() => n.as_i64().map(Into::into),
                Some(Value::Number(n)) => n.as_f64().map(Into::into),
                _ => None,
            };
            records.push(
                DomainRecord::observed(stats_kind, NaturalKey::player_season(player_id, season), payload)
                    .with("player_id", player_id as i64)
                    .with("season", season.to_string())
                    .with_opt("team", team)
                    .with_opt(attr, value),
            );
        }
    }

    Ok(records)
}

fn parse_schedule(payload: &RawPayload, doc: &Value) -> Result<Vec<DomainRecord>, ParseError> {
    let mut records = Vec::new();

    for day in array(doc, "gameWeek", payload)? {
        let date = text(day, "date");
        let Some(games) = day.get("games").and_then(Value::as_array) else {
            continue;
        };

        for game in games {
            let Some(game_id) = int(game, "id").and_then(|id| u64::try_from(id).ok()) else {
                warn!(resource = %payload.resource, "Skipping game without id");
                continue;
            };

            records.push(
                DomainRecord::observed(EntityKind::Game, NaturalKey::game(game_id), payload)
                    .with_opt("date", text(game, "gameDate").or_else(|| date.clone()))
                    .with_opt("season", season_of(game, payload).map(|s| s.to_string()))
                    .with_opt("game_type", int(game, "gameType"))
                    .with_opt("venue", localized(game, "venue"))
                    .with_opt("state", text(game, "gameState"))
                    .with_opt("start_time_utc", text(game, "startTimeUTC"))
                    .with_opt("home_team", pointer_text(game, "/homeTeam/abbrev"))
                    .with_opt("away_team", pointer_text(game, "/awayTeam/abbrev"))
                    .with_opt("home_score", game.pointer("/homeTeam/score").and_then(Value::as_i64))
                    .with_opt("away_score", game.pointer("/awayTeam/score").and_then(Value::as_i64)),
            );
        }
    }

    Ok(records)
}

fn parse_player_landing(payload: &RawPayload, doc: &Value) -> Result<Vec<DomainRecord>, ParseError> {
    let player_id = int(doc, "playerId")
        .and_then(|id| u64::try_from(id).ok())
        .ok_or_else(|| ParseError::structural(payload.resource.id(), "missing 'playerId'"))?;

    let first = localized(doc, "firstName");
    let last = localized(doc, "lastName");
    let mut records = vec![DomainRecord::observed(EntityKind::Player, NaturalKey::player(player_id), payload)
        .with_opt("name", full_name(first.as_deref(), last.as_deref()))
        .with_opt("first_name", first)
        .with_opt("last_name", last)
        .with_opt("position", text(doc, "position"))
        .with_opt("sweater_number", int(doc, "sweaterNumber"))
        .with_opt("team", text(doc, "currentTeamAbbrev"))
        .with_opt("birth_date", text(doc, "birthDate"))
        .with_opt("birth_city", localized(doc, "birthCity"))
        .with_opt("birth_country", text(doc, "birthCountry"))
        .with_opt("height_inches", int(doc, "heightInInches"))
        .with_opt("weight_pounds", int(doc, "weightInPounds"))
        .with_opt("shoots_catches", text(doc, "shootsCatches"))
        .with_opt("active", doc.get("isActive").and_then(Value::as_bool))];

    if let Some(draft) = doc.get("draftDetails").filter(|d| d.is_object()) {
        records.push(
            DomainRecord::observed(EntityKind::DraftPick, NaturalKey::player(player_id), payload)
                .with("player_id", player_id as i64)
                .with_opt("year", int(draft, "year"))
                .with_opt("team", text(draft, "teamAbbrev"))
                .with_opt("round", int(draft, "round"))
                .with_opt("pick_in_round", int(draft, "pickInRound"))
                .with_opt("overall_pick", int(draft, "overallPick")),
        );
    }

    Ok(records)
}

fn full_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    match (first, last) {
        (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
        (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
        (None, None) => None,
    }
}
