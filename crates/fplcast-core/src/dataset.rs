// Historical dataset: fixed-schema per-round records, metadata snapshot and
// fixture difficulty entries, plus CSV loading and the join that builds the
// flat historical table.

use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ForecastError, Result};

/// Difficulty assumed when a team has no fixture entry for a round.
pub const DEFAULT_FIXTURE_DIFFICULTY: f64 = 3.0;

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Position category of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Position {
    Goalkeeper,
    Defender,
    Midfielder,
    Forward,
}

impl Position {
    pub const ALL: [Position; 4] = [
        Position::Goalkeeper,
        Position::Defender,
        Position::Midfielder,
        Position::Forward,
    ];

    /// Parse either the numeric element type (1-4) or the abbreviation.
    pub fn from_str_pos(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "1" | "GK" | "GKP" => Some(Position::Goalkeeper),
            "2" | "DEF" => Some(Position::Defender),
            "3" | "MID" => Some(Position::Midfielder),
            "4" | "FWD" => Some(Position::Forward),
            _ => None,
        }
    }

    /// Numeric code used as the model's `position` feature.
    pub fn code(&self) -> u8 {
        match self {
            Position::Goalkeeper => 1,
            Position::Defender => 2,
            Position::Midfielder => 3,
            Position::Forward => 4,
        }
    }

    pub fn display_str(&self) -> &'static str {
        match self {
            Position::Goalkeeper => "GK",
            Position::Defender => "DEF",
            Position::Midfielder => "MID",
            Position::Forward => "FWD",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_str())
    }
}

// ---------------------------------------------------------------------------
// Public record types
// ---------------------------------------------------------------------------

/// Raw per-round performance of one player, as supplied by the data provider.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoundStats {
    pub player_id: u32,
    pub gameweek: u32,
    pub points: f64,
    pub minutes: f64,
    pub goals_scored: f64,
    pub assists: f64,
    pub clean_sheets: f64,
    pub goals_conceded: f64,
    pub own_goals: f64,
    pub penalties_saved: f64,
    pub penalties_missed: f64,
    pub yellow_cards: f64,
    pub red_cards: f64,
    pub saves: f64,
    pub bonus: f64,
    pub bps: f64,
    pub influence: f64,
    pub creativity: f64,
    pub threat: f64,
    pub ict_index: f64,
    pub starts: f64,
    pub expected_goals: f64,
    pub expected_assists: f64,
    pub expected_goal_involvements: f64,
    pub expected_goals_conceded: f64,
}

/// Slowly-changing attributes of a player from the current metadata snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerAttributes {
    pub player_id: u32,
    pub name: String,
    pub position: Position,
    pub team: u32,
    pub price: f64,
    pub selected_by_percent: f64,
    pub value_form: f64,
    pub value_season: f64,
}

/// Opponent difficulty for one team in one round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixtureEntry {
    pub team: u32,
    pub gameweek: u32,
    pub difficulty: f64,
    pub is_home: bool,
}

/// One row of the joined historical table. Identity key is
/// `(stats.player_id, stats.gameweek)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundRecord {
    pub stats: RoundStats,
    pub name: Option<String>,
    pub position: Position,
    pub team: u32,
    pub price: f64,
    pub selected_by_percent: f64,
    pub value_form: f64,
    pub value_season: f64,
    pub fixture_difficulty: f64,
    pub is_home: bool,
}

impl RoundRecord {
    pub fn player_id(&self) -> u32 {
        self.stats.player_id
    }

    pub fn gameweek(&self) -> u32 {
        self.stats.gameweek
    }
}

// ---------------------------------------------------------------------------
// Join
// ---------------------------------------------------------------------------

/// Join raw round stats with the metadata snapshot and fixture entries.
///
/// Stats for players missing from the snapshot are dropped. A team without
/// a fixture entry for the round gets the default difficulty and is treated
/// as playing at home.
pub fn assemble_records(
    stats: Vec<RoundStats>,
    metadata: &HashMap<u32, PlayerAttributes>,
    fixtures: &[FixtureEntry],
) -> Vec<RoundRecord> {
    let fixture_index: HashMap<(u32, u32), &FixtureEntry> = fixtures
        .iter()
        .map(|f| ((f.team, f.gameweek), f))
        .collect();

    let mut dropped = 0usize;
    let mut records = Vec::with_capacity(stats.len());
    for row in stats {
        let Some(attrs) = metadata.get(&row.player_id) else {
            dropped += 1;
            continue;
        };
        let (fixture_difficulty, is_home) = fixture_index
            .get(&(attrs.team, row.gameweek))
            .map(|f| (f.difficulty, f.is_home))
            .unwrap_or((DEFAULT_FIXTURE_DIFFICULTY, true));
        records.push(RoundRecord {
            stats: row,
            name: Some(attrs.name.clone()),
            position: attrs.position,
            team: attrs.team,
            price: attrs.price,
            selected_by_percent: attrs.selected_by_percent,
            value_form: attrs.value_form,
            value_season: attrs.value_season,
            fixture_difficulty,
            is_home,
        });
    }

    if dropped > 0 {
        warn!("dropped {dropped} round rows for players missing from the metadata snapshot");
    }
    info!("assembled {} player-round records", records.len());
    records
}

// ---------------------------------------------------------------------------
// Raw CSV serde structs (private)
// ---------------------------------------------------------------------------

/// Columns every historical table must carry.
pub const REQUIRED_ROUND_COLUMNS: &[&str] = &[
    "player_id",
    "gameweek",
    "points",
    "minutes",
    "goals_scored",
    "assists",
    "clean_sheets",
    "goals_conceded",
    "own_goals",
    "penalties_saved",
    "penalties_missed",
    "yellow_cards",
    "red_cards",
    "saves",
    "bonus",
    "bps",
    "influence",
    "creativity",
    "threat",
    "ict_index",
    "starts",
    "expected_goals",
    "expected_assists",
    "expected_goal_involvements",
    "expected_goals_conceded",
    "position",
    "team",
    "price",
    "selected_by_percent",
    "value_form",
    "value_season",
    "fixture_difficulty",
    "is_home",
];

/// Identity and per-round stat columns: the leading part of
/// `REQUIRED_ROUND_COLUMNS`.
const STAT_COLUMNS: &[&str] = REQUIRED_ROUND_COLUMNS.split_at(25).0;

const REQUIRED_PLAYER_COLUMNS: &[&str] = &[
    "player_id",
    "name",
    "position",
    "team",
    "price",
    "selected_by_percent",
    "value_form",
    "value_season",
];

const REQUIRED_FIXTURE_COLUMNS: &[&str] = &["team", "gameweek", "difficulty", "is_home"];

/// Flat historical row as written by `write_rounds`.
#[derive(Debug, Serialize)]
struct RawRoundRow {
    player_id: u32,
    gameweek: u32,
    #[serde(default)]
    name: Option<String>,
    points: Option<f64>,
    minutes: Option<f64>,
    goals_scored: Option<f64>,
    assists: Option<f64>,
    clean_sheets: Option<f64>,
    goals_conceded: Option<f64>,
    own_goals: Option<f64>,
    penalties_saved: Option<f64>,
    penalties_missed: Option<f64>,
    yellow_cards: Option<f64>,
    red_cards: Option<f64>,
    saves: Option<f64>,
    bonus: Option<f64>,
    bps: Option<f64>,
    influence: Option<f64>,
    creativity: Option<f64>,
    threat: Option<f64>,
    ict_index: Option<f64>,
    starts: Option<f64>,
    expected_goals: Option<f64>,
    expected_assists: Option<f64>,
    expected_goal_involvements: Option<f64>,
    expected_goals_conceded: Option<f64>,
    position: String,
    team: u32,
    price: Option<f64>,
    selected_by_percent: Option<f64>,
    value_form: Option<f64>,
    value_season: Option<f64>,
    fixture_difficulty: Option<f64>,
    is_home: String,
}

/// Metadata and fixture columns of a flat row. The stat columns of the same
/// row are read through `RawStatsRow`.
#[derive(Debug, Deserialize)]
struct RawRoundMeta {
    #[serde(default)]
    name: Option<String>,
    position: String,
    team: u32,
    price: Option<f64>,
    selected_by_percent: Option<f64>,
    value_form: Option<f64>,
    value_season: Option<f64>,
    fixture_difficulty: Option<f64>,
    is_home: String,
}

#[derive(Debug, Deserialize)]
struct RawPlayerRow {
    player_id: u32,
    name: String,
    position: String,
    team: u32,
    price: f64,
    #[serde(default)]
    selected_by_percent: Option<f64>,
    #[serde(default)]
    value_form: Option<f64>,
    #[serde(default)]
    value_season: Option<f64>,
}

/// Raw per-round stats row, before the metadata join. Numeric cells may be
/// empty (missing); they are carried as NaN and zero-filled by the feature
/// pipeline.
#[derive(Debug, Deserialize)]
struct RawStatsRow {
    player_id: u32,
    gameweek: u32,
    points: Option<f64>,
    minutes: Option<f64>,
    goals_scored: Option<f64>,
    assists: Option<f64>,
    clean_sheets: Option<f64>,
    goals_conceded: Option<f64>,
    own_goals: Option<f64>,
    penalties_saved: Option<f64>,
    penalties_missed: Option<f64>,
    yellow_cards: Option<f64>,
    red_cards: Option<f64>,
    saves: Option<f64>,
    bonus: Option<f64>,
    bps: Option<f64>,
    influence: Option<f64>,
    creativity: Option<f64>,
    threat: Option<f64>,
    ict_index: Option<f64>,
    starts: Option<f64>,
    expected_goals: Option<f64>,
    expected_assists: Option<f64>,
    expected_goal_involvements: Option<f64>,
    expected_goals_conceded: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawFixtureRow {
    team: u32,
    gameweek: u32,
    difficulty: f64,
    is_home: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn nan_if_missing(value: Option<f64>) -> f64 {
    value.unwrap_or(f64::NAN)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "1.0" | "yes" => Some(true),
        "false" | "0" | "0.0" | "no" => Some(false),
        _ => None,
    }
}

fn line_of(err: &csv::Error) -> String {
    err.position()
        .map(|p| format!("line {}", p.line()))
        .unwrap_or_else(|| "unknown line".into())
}

/// Fail with every absent required column named, rather than defaulting.
fn check_columns(
    reader: &mut csv::Reader<impl Read>,
    required: &[&str],
    operation: &'static str,
) -> Result<()> {
    let headers = reader
        .headers()
        .map_err(|e| ForecastError::data(operation, format!("unreadable header row: {e}")))?
        .clone();
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h.trim() == *col))
        .collect();
    if !missing.is_empty() {
        return Err(ForecastError::data(
            operation,
            format!("missing required columns: {}", missing.join(", ")),
        ));
    }
    Ok(())
}

fn trimmed_reader<R: Read>(rdr: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(rdr)
}

impl RawStatsRow {
    fn into_stats(self) -> RoundStats {
        RoundStats {
            player_id: self.player_id,
            gameweek: self.gameweek,
            points: nan_if_missing(self.points),
            minutes: nan_if_missing(self.minutes),
            goals_scored: nan_if_missing(self.goals_scored),
            assists: nan_if_missing(self.assists),
            clean_sheets: nan_if_missing(self.clean_sheets),
            goals_conceded: nan_if_missing(self.goals_conceded),
            own_goals: nan_if_missing(self.own_goals),
            penalties_saved: nan_if_missing(self.penalties_saved),
            penalties_missed: nan_if_missing(self.penalties_missed),
            yellow_cards: nan_if_missing(self.yellow_cards),
            red_cards: nan_if_missing(self.red_cards),
            saves: nan_if_missing(self.saves),
            bonus: nan_if_missing(self.bonus),
            bps: nan_if_missing(self.bps),
            influence: nan_if_missing(self.influence),
            creativity: nan_if_missing(self.creativity),
            threat: nan_if_missing(self.threat),
            ict_index: nan_if_missing(self.ict_index),
            starts: nan_if_missing(self.starts),
            expected_goals: nan_if_missing(self.expected_goals),
            expected_assists: nan_if_missing(self.expected_assists),
            expected_goal_involvements: nan_if_missing(self.expected_goal_involvements),
            expected_goals_conceded: nan_if_missing(self.expected_goals_conceded),
        }
    }
}

impl RawRoundMeta {
    fn into_record(self, stats: RoundStats, line: &str) -> Result<RoundRecord> {
        let position = Position::from_str_pos(&self.position).ok_or_else(|| {
            ForecastError::data(
                "load rounds",
                format!("{line}: unknown position '{}'", self.position),
            )
        })?;
        let is_home = parse_bool(&self.is_home).ok_or_else(|| {
            ForecastError::data(
                "load rounds",
                format!("{line}: unparsable is_home '{}'", self.is_home),
            )
        })?;
        Ok(RoundRecord {
            stats,
            name: self.name.filter(|n| !n.is_empty()),
            position,
            team: self.team,
            price: nan_if_missing(self.price),
            selected_by_percent: nan_if_missing(self.selected_by_percent),
            value_form: nan_if_missing(self.value_form),
            value_season: nan_if_missing(self.value_season),
            fixture_difficulty: self
                .fixture_difficulty
                .unwrap_or(DEFAULT_FIXTURE_DIFFICULTY),
            is_home,
        })
    }
}

impl RawRoundRow {
    fn from_record(record: &RoundRecord) -> Self {
        let s = &record.stats;
        RawRoundRow {
            player_id: s.player_id,
            gameweek: s.gameweek,
            name: record.name.clone(),
            points: Some(s.points),
            minutes: Some(s.minutes),
            goals_scored: Some(s.goals_scored),
            assists: Some(s.assists),
            clean_sheets: Some(s.clean_sheets),
            goals_conceded: Some(s.goals_conceded),
            own_goals: Some(s.own_goals),
            penalties_saved: Some(s.penalties_saved),
            penalties_missed: Some(s.penalties_missed),
            yellow_cards: Some(s.yellow_cards),
            red_cards: Some(s.red_cards),
            saves: Some(s.saves),
            bonus: Some(s.bonus),
            bps: Some(s.bps),
            influence: Some(s.influence),
            creativity: Some(s.creativity),
            threat: Some(s.threat),
            ict_index: Some(s.ict_index),
            starts: Some(s.starts),
            expected_goals: Some(s.expected_goals),
            expected_assists: Some(s.expected_assists),
            expected_goal_involvements: Some(s.expected_goal_involvements),
            expected_goals_conceded: Some(s.expected_goals_conceded),
            position: record.position.code().to_string(),
            team: record.team,
            price: Some(record.price),
            selected_by_percent: Some(record.selected_by_percent),
            value_form: Some(record.value_form),
            value_season: Some(record.value_season),
            fixture_difficulty: Some(record.fixture_difficulty),
            is_home: record.is_home.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reader-based loaders
// ---------------------------------------------------------------------------

/// Read the flat historical table. Duplicate `(player_id, gameweek)` keys
/// are rejected since every downstream stage relies on the key being unique.
pub fn read_rounds<R: Read>(rdr: R) -> Result<Vec<RoundRecord>> {
    let mut reader = trimmed_reader(rdr);
    check_columns(&mut reader, REQUIRED_ROUND_COLUMNS, "load rounds")?;

    let headers = reader
        .headers()
        .map_err(|e| ForecastError::data("load rounds", format!("unreadable header row: {e}")))?
        .clone();
    let parse_err = |e: csv::Error| ForecastError::data("load rounds", format!("{}: {e}", line_of(&e)));

    let mut seen: HashMap<(u32, u32), usize> = HashMap::new();
    let mut records = Vec::new();
    for result in reader.records() {
        let row = result.map_err(parse_err)?;
        let stats: RawStatsRow = row.deserialize(Some(&headers)).map_err(parse_err)?;
        let meta: RawRoundMeta = row.deserialize(Some(&headers)).map_err(parse_err)?;
        let line = format!("row {}", records.len() + 2);
        let record = meta.into_record(stats.into_stats(), &line)?;
        let key = (record.player_id(), record.gameweek());
        if let Some(first) = seen.insert(key, records.len()) {
            return Err(ForecastError::data(
                "load rounds",
                format!(
                    "duplicate record for player {} gameweek {} (rows {} and {})",
                    key.0,
                    key.1,
                    first + 2,
                    records.len() + 2
                ),
            ));
        }
        records.push(record);
    }
    Ok(records)
}

/// Read raw per-round stats (the leading stat columns of the flat table,
/// without metadata or fixture columns).
pub fn read_round_stats<R: Read>(rdr: R) -> Result<Vec<RoundStats>> {
    let mut reader = trimmed_reader(rdr);
    check_columns(&mut reader, STAT_COLUMNS, "load round stats")?;

    let mut stats = Vec::new();
    for result in reader.deserialize::<RawStatsRow>() {
        let raw = result
            .map_err(|e| ForecastError::data("load round stats", format!("{}: {e}", line_of(&e))))?;
        stats.push(raw.into_stats());
    }
    Ok(stats)
}

/// Read a metadata snapshot keyed by player id.
pub fn read_player_metadata<R: Read>(rdr: R) -> Result<HashMap<u32, PlayerAttributes>> {
    let mut reader = trimmed_reader(rdr);
    check_columns(&mut reader, REQUIRED_PLAYER_COLUMNS, "load player metadata")?;

    let mut map = HashMap::new();
    for result in reader.deserialize::<RawPlayerRow>() {
        let raw = result.map_err(|e| {
            ForecastError::data("load player metadata", format!("{}: {e}", line_of(&e)))
        })?;
        let position = Position::from_str_pos(&raw.position).ok_or_else(|| {
            ForecastError::data(
                "load player metadata",
                format!("player {}: unknown position '{}'", raw.player_id, raw.position),
            )
        })?;
        if map.contains_key(&raw.player_id) {
            warn!("duplicate metadata entry for player {}, using latest", raw.player_id);
        }
        map.insert(
            raw.player_id,
            PlayerAttributes {
                player_id: raw.player_id,
                name: raw.name,
                position,
                team: raw.team,
                price: raw.price,
                selected_by_percent: raw.selected_by_percent.unwrap_or(0.0),
                value_form: raw.value_form.unwrap_or(0.0),
                value_season: raw.value_season.unwrap_or(0.0),
            },
        );
    }
    Ok(map)
}

pub fn read_fixtures<R: Read>(rdr: R) -> Result<Vec<FixtureEntry>> {
    let mut reader = trimmed_reader(rdr);
    check_columns(&mut reader, REQUIRED_FIXTURE_COLUMNS, "load fixtures")?;

    let mut fixtures = Vec::new();
    for result in reader.deserialize::<RawFixtureRow>() {
        let raw = result
            .map_err(|e| ForecastError::data("load fixtures", format!("{}: {e}", line_of(&e))))?;
        let is_home = parse_bool(&raw.is_home).ok_or_else(|| {
            ForecastError::data(
                "load fixtures",
                format!("team {} gameweek {}: unparsable is_home '{}'", raw.team, raw.gameweek, raw.is_home),
            )
        })?;
        fixtures.push(FixtureEntry {
            team: raw.team,
            gameweek: raw.gameweek,
            difficulty: raw.difficulty,
            is_home,
        });
    }
    Ok(fixtures)
}

pub fn write_rounds_to<W: Write>(wtr: W, records: &[RoundRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(wtr);
    for record in records {
        writer
            .serialize(RawRoundRow::from_record(record))
            .map_err(|e| ForecastError::data("write rounds", e.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| ForecastError::data("write rounds", e.to_string()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Public path-based loaders
// ---------------------------------------------------------------------------

fn open(path: &Path) -> Result<std::fs::File> {
    std::fs::File::open(path).map_err(|e| ForecastError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Load the flat historical table from a CSV file.
pub fn load_rounds(path: &Path) -> Result<Vec<RoundRecord>> {
    let records = read_rounds(open(path)?)?;
    info!("loaded {} player-round records from {}", records.len(), path.display());
    Ok(records)
}

pub fn load_round_stats(path: &Path) -> Result<Vec<RoundStats>> {
    let stats = read_round_stats(open(path)?)?;
    info!("loaded {} raw stat rows from {}", stats.len(), path.display());
    Ok(stats)
}

pub fn load_player_metadata(path: &Path) -> Result<HashMap<u32, PlayerAttributes>> {
    let map = read_player_metadata(open(path)?)?;
    info!("loaded metadata for {} players from {}", map.len(), path.display());
    Ok(map)
}

pub fn load_fixtures(path: &Path) -> Result<Vec<FixtureEntry>> {
    read_fixtures(open(path)?)
}

/// Persist the joined table in the same flat layout `load_rounds` reads.
pub fn write_rounds(path: &Path, records: &[RoundRecord]) -> Result<()> {
    let csv_err = |source| ForecastError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    for record in records {
        writer
            .serialize(RawRoundRow::from_record(record))
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|e| ForecastError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    info!("wrote {} player-round records to {}", records.len(), path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
