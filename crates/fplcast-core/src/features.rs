// Temporal feature construction over each player's round history.
//
// Every value for (player, gameweek) is computed from a trailing window that
// ends at that gameweek, so no row can see a later round of the same player.

use std::collections::BTreeMap;

use crate::dataset::{Position, RoundRecord};
use crate::error::{ForecastError, Result};

pub const FEATURE_COUNT: usize = 59;

/// Canonical ordered feature list. The trained artifact stores a copy of
/// this list and inference resolves columns by name against it.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    // Current round
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
    // Rolling means
    "points_avg_3",
    "points_avg_5",
    "points_avg_10",
    "minutes_avg_3",
    "minutes_avg_5",
    "minutes_avg_10",
    "goals_avg_3",
    "goals_avg_5",
    "goals_avg_10",
    "assists_avg_3",
    "assists_avg_5",
    "assists_avg_10",
    "ict_avg_3",
    "ict_avg_5",
    "ict_avg_10",
    "xg_avg_3",
    "xg_avg_5",
    "xg_avg_10",
    "xa_avg_3",
    "xa_avg_5",
    "xa_avg_10",
    // Form, trend, volatility
    "form_3gw",
    "form_5gw",
    "points_trend",
    "minutes_trend",
    "points_std_5",
    "minutes_std_5",
    // Market movement
    "price_change_3gw",
    "ownership_change_3gw",
    // Static
    "position",
    "price",
    "selected_by_percent",
    "value_form",
    "value_season",
    // Fixture
    "fixture_difficulty",
    "is_home",
];

const ROLLING_WINDOWS: [usize; 3] = [3, 5, 10];
const TREND_WINDOW: usize = 3;
const STD_WINDOW: usize = 5;
const DELTA_WINDOW: usize = 3;

/// Index of a feature in `FEATURE_NAMES`.
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_NAMES.iter().position(|n| *n == name)
}

// ---------------------------------------------------------------------------
// Feature table
// ---------------------------------------------------------------------------

/// One record augmented with its derived feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub player_id: u32,
    pub gameweek: u32,
    pub name: Option<String>,
    pub position: Position,
    pub team: u32,
    pub price: f64,
    /// Raw points of this round, kept unsanitised for label construction.
    pub points: f64,
    /// Values aligned with `FEATURE_NAMES`; always finite.
    pub values: Vec<f64>,
}

/// Feature rows ordered by `(player_id, gameweek)`.
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Find the row for a given player and round.
    pub fn find(&self, player_id: u32, gameweek: u32) -> Option<&FeatureRow> {
        self.rows
            .binary_search_by(|r| (r.player_id, r.gameweek).cmp(&(player_id, gameweek)))
            .ok()
            .map(|i| &self.rows[i])
    }

    /// Build a dense matrix for the selected rows with columns in the order
    /// given by `feature_names`. Fails if a requested feature is not one this
    /// pipeline produces.
    pub fn matrix(&self, rows: &[usize], feature_names: &[String]) -> Result<Vec<Vec<f64>>> {
        let columns = feature_names
            .iter()
            .map(|name| {
                feature_index(name).ok_or_else(|| ForecastError::UnknownFeature { name: name.clone() })
            })
            .collect::<Result<Vec<usize>>>()?;

        Ok(rows
            .iter()
            .map(|&r| columns.iter().map(|&c| self.rows[r].values[c]).collect())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Per-player signal series in chronological order.
struct PlayerSeries<'a> {
    records: Vec<&'a RoundRecord>,
    points: Vec<f64>,
    minutes: Vec<f64>,
    goals: Vec<f64>,
    assists: Vec<f64>,
    ict: Vec<f64>,
    xg: Vec<f64>,
    xa: Vec<f64>,
    price: Vec<f64>,
    ownership: Vec<f64>,
}

impl<'a> PlayerSeries<'a> {
    fn new(mut records: Vec<&'a RoundRecord>) -> Self {
        records.sort_by_key(|r| r.gameweek());
        let series = |f: fn(&RoundRecord) -> f64| records.iter().map(|r| f(r)).collect::<Vec<_>>();
        PlayerSeries {
            points: series(|r| r.stats.points),
            minutes: series(|r| r.stats.minutes),
            goals: series(|r| r.stats.goals_scored),
            assists: series(|r| r.stats.assists),
            ict: series(|r| r.stats.ict_index),
            xg: series(|r| r.stats.expected_goals),
            xa: series(|r| r.stats.expected_assists),
            price: series(|r| r.price),
            ownership: series(|r| r.selected_by_percent),
            records,
        }
    }

    fn feature_vector(&self, i: usize) -> Vec<f64> {
        let r = self.records[i];
        let s = &r.stats;
        let mut v = Vec::with_capacity(FEATURE_COUNT);

        v.extend_from_slice(&[
            s.points,
            s.minutes,
            s.goals_scored,
            s.assists,
            s.clean_sheets,
            s.goals_conceded,
            s.own_goals,
            s.penalties_saved,
            s.penalties_missed,
            s.yellow_cards,
            s.red_cards,
            s.saves,
            s.bonus,
            s.bps,
            s.influence,
            s.creativity,
            s.threat,
            s.ict_index,
            s.starts,
            s.expected_goals,
            s.expected_assists,
            s.expected_goal_involvements,
            s.expected_goals_conceded,
        ]);

        for signal in [
            &self.points,
            &self.minutes,
            &self.goals,
            &self.assists,
            &self.ict,
            &self.xg,
            &self.xa,
        ] {
            for window in ROLLING_WINDOWS {
                v.push(rolling_mean(trailing(signal, i, window)));
            }
        }

        v.push(rolling_mean(trailing(&self.points, i, 3)));
        v.push(rolling_mean(trailing(&self.points, i, 5)));
        v.push(trend(trailing(&self.points, i, TREND_WINDOW)));
        v.push(trend(trailing(&self.minutes, i, TREND_WINDOW)));
        v.push(sample_std(trailing(&self.points, i, STD_WINDOW)));
        v.push(sample_std(trailing(&self.minutes, i, STD_WINDOW)));
        v.push(first_to_last(trailing(&self.price, i, DELTA_WINDOW)));
        v.push(first_to_last(trailing(&self.ownership, i, DELTA_WINDOW)));

        v.extend_from_slice(&[
            f64::from(r.position.code()),
            r.price,
            r.selected_by_percent,
            r.value_form,
            r.value_season,
            r.fixture_difficulty,
            if r.is_home { 1.0 } else { 0.0 },
        ]);

        debug_assert_eq!(v.len(), FEATURE_COUNT);
        for x in &mut v {
            *x = sanitize(*x);
        }
        v
    }
}

/// Compute the feature table for every record.
///
/// Records are grouped by player and ordered by gameweek; the output is
/// ordered by `(player_id, gameweek)`.
pub fn build_features(records: &[RoundRecord]) -> FeatureTable {
    let mut by_player: BTreeMap<u32, Vec<&RoundRecord>> = BTreeMap::new();
    for record in records {
        by_player.entry(record.player_id()).or_default().push(record);
    }

    let mut rows = Vec::with_capacity(records.len());
    for (player_id, history) in by_player {
        let series = PlayerSeries::new(history);
        for (i, record) in series.records.iter().enumerate() {
            rows.push(FeatureRow {
                player_id,
                gameweek: record.gameweek(),
                name: record.name.clone(),
                position: record.position,
                team: record.team,
                price: sanitize(record.price),
                points: record.stats.points,
                values: series.feature_vector(i),
            });
        }
    }

    FeatureTable { rows }
}

// ---------------------------------------------------------------------------
// Window statistics
// ---------------------------------------------------------------------------

/// Trailing window of at most `window` values ending at `end` (inclusive),
/// clipped at the start of the series.
fn trailing(series: &[f64], end: usize, window: usize) -> &[f64] {
    let start = (end + 1).saturating_sub(window);
    &series[start..=end]
}

/// Missing and infinite values become 0 before reaching the model.
fn sanitize(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

/// Mean of the observed (non-NaN) values; NaN when nothing was observed.
fn rolling_mean(window: &[f64]) -> f64 {
    let observed: Vec<f64> = window.iter().copied().filter(|x| !x.is_nan()).collect();
    if observed.is_empty() {
        return f64::NAN;
    }
    observed.iter().sum::<f64>() / observed.len() as f64
}

/// Least-squares slope against the position in the window. Fewer than two
/// observations yields the neutral value 0.
fn trend(window: &[f64]) -> f64 {
    let n = window.len();
    if n < 2 || window.iter().filter(|x| !x.is_nan()).count() < 2 {
        return 0.0;
    }
    let nf = n as f64;
    let x_mean = (nf - 1.0) / 2.0;
    let y_mean = window.iter().sum::<f64>() / nf;
    let mut num = 0.0;
    let mut den = 0.0;
    for (x, y) in window.iter().enumerate() {
        let dx = x as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    num / den
}

/// Sample standard deviation (n - 1); undefined (NaN) below two observations.
fn sample_std(window: &[f64]) -> f64 {
    let observed: Vec<f64> = window.iter().copied().filter(|x| !x.is_nan()).collect();
    if observed.len() < 2 {
        return f64::NAN;
    }
    let n = observed.len() as f64;
    let mean = observed.iter().sum::<f64>() / n;
    let var = observed.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

fn first_to_last(window: &[f64]) -> f64 {
    match window {
        [first, .., last] => last - first,
        _ => 0.0,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
