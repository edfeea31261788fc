// Squad selection under formation quotas, a per-player price ceiling and an
// exclusion list.
//
// Selection is a greedy two-pass fill over candidates ranked by forecast. It
// is not a budget-constrained optimum: the budget only filters individual
// players and the aggregate cost is reported, not enforced. A true optimum
// would need integer programming over the budget and all quotas jointly.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dataset::Position;
use crate::error::{ForecastError, Result};
use crate::inference::PredictionCandidate;

pub const STARTING_SIZE: usize = 11;
pub const BENCH_SIZE: usize = 4;
pub const SQUAD_SIZE: usize = STARTING_SIZE + BENCH_SIZE;

// ---------------------------------------------------------------------------
// Formations and quotas
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Formation {
    #[serde(rename = "3-4-3")]
    F343,
    #[serde(rename = "3-5-2")]
    F352,
    #[serde(rename = "4-3-3")]
    F433,
    #[serde(rename = "4-4-2")]
    F442,
    #[serde(rename = "4-5-1")]
    F451,
    #[serde(rename = "5-3-2")]
    F532,
    #[serde(rename = "5-4-1")]
    F541,
}

impl Default for Formation {
    fn default() -> Self {
        Formation::F343
    }
}

impl Formation {
    pub const ALL: [Formation; 7] = [
        Formation::F343,
        Formation::F352,
        Formation::F433,
        Formation::F442,
        Formation::F451,
        Formation::F532,
        Formation::F541,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Formation::F343 => "3-4-3",
            Formation::F352 => "3-5-2",
            Formation::F433 => "4-3-3",
            Formation::F442 => "4-4-2",
            Formation::F451 => "4-5-1",
            Formation::F532 => "5-3-2",
            Formation::F541 => "5-4-1",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Formation::ALL.into_iter().find(|f| f.name() == s)
    }

    /// Parse a formation name, falling back to 3-4-3 for anything unknown.
    pub fn parse_or_default(s: &str) -> Self {
        Formation::parse(s).unwrap_or_else(|| {
            warn!("unknown formation '{s}', using {}", Formation::default());
            Formation::default()
        })
    }

    /// Outfield counts (DEF, MID, FWD).
    fn outfield(&self) -> (usize, usize, usize) {
        match self {
            Formation::F343 => (3, 4, 3),
            Formation::F352 => (3, 5, 2),
            Formation::F433 => (4, 3, 3),
            Formation::F442 => (4, 4, 2),
            Formation::F451 => (4, 5, 1),
            Formation::F532 => (5, 3, 2),
            Formation::F541 => (5, 4, 1),
        }
    }

    /// Players of `position` required in the starting XI.
    pub fn starting_quota(&self, position: Position) -> usize {
        let (def, mid, fwd) = self.outfield();
        match position {
            Position::Goalkeeper => 1,
            Position::Defender => def,
            Position::Midfielder => mid,
            Position::Forward => fwd,
        }
    }

    /// The formation whose starting counts match, if any.
    pub fn from_counts(counts: &PositionCounts) -> Option<Self> {
        Formation::ALL
            .into_iter()
            .find(|f| Position::ALL.iter().all(|&p| counts.get(p) == f.starting_quota(p)))
    }
}

impl fmt::Display for Formation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Maximum players of `position` across starting XI and bench.
pub fn total_quota(position: Position) -> usize {
    match position {
        Position::Goalkeeper => 2,
        Position::Defender => 5,
        Position::Midfielder => 5,
        Position::Forward => 3,
    }
}

/// Per-position tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionCounts([usize; 4]);

impl PositionCounts {
    fn slot(position: Position) -> usize {
        match position {
            Position::Goalkeeper => 0,
            Position::Defender => 1,
            Position::Midfielder => 2,
            Position::Forward => 3,
        }
    }

    pub fn get(&self, position: Position) -> usize {
        self.0[Self::slot(position)]
    }

    pub fn add(&mut self, position: Position) {
        self.0[Self::slot(position)] += 1;
    }

    pub fn of<'a>(players: impl IntoIterator<Item = &'a PredictionCandidate>) -> Self {
        let mut counts = PositionCounts::default();
        for p in players {
            counts.add(p.position);
        }
        counts
    }
}

impl fmt::Display for PositionCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GK {} DEF {} MID {} FWD {}",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquadSelection {
    pub formation: Formation,
    pub starting: Vec<PredictionCandidate>,
    pub bench: Vec<PredictionCandidate>,
    pub total_cost: f64,
    pub expected_points: f64,
}

impl SquadSelection {
    /// Starting XI followed by the bench, in selection order.
    pub fn players(&self) -> impl Iterator<Item = &PredictionCandidate> {
        self.starting.iter().chain(self.bench.iter())
    }

    pub fn len(&self) -> usize {
        self.starting.len() + self.bench.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pick a starting XI and bench from `candidates`.
///
/// Candidates that are excluded or priced above `budget` are dropped, the
/// rest are ranked by forecast (stable on ties). The first pass fills the
/// formation's starting quotas; the second pass rescans from the top,
/// skipping players already picked, and fills the bench up to the total
/// quotas. Fails when the starting XI cannot be completed.
pub fn select_squad(
    candidates: &[PredictionCandidate],
    budget: f64,
    formation: Formation,
    excluded: &HashSet<u32>,
) -> Result<SquadSelection> {
    let mut pool: Vec<&PredictionCandidate> = candidates
        .iter()
        .filter(|c| !excluded.contains(&c.player_id) && c.price <= budget)
        .collect();
    pool.sort_by(|a, b| b.predicted_points.total_cmp(&a.predicted_points));
    info!(
        "Selecting {formation} squad from {} of {} candidates (budget {budget:.1}, {} excluded)",
        pool.len(),
        candidates.len(),
        excluded.len()
    );

    let mut picked: HashSet<u32> = HashSet::new();
    let mut counts = PositionCounts::default();

    let mut starting = Vec::with_capacity(STARTING_SIZE);
    for c in &pool {
        if starting.len() >= STARTING_SIZE {
            break;
        }
        if picked.contains(&c.player_id) || counts.get(c.position) >= formation.starting_quota(c.position) {
            continue;
        }
        debug!("Selected {} as {} (starting XI)", c.display_name(), c.position);
        picked.insert(c.player_id);
        counts.add(c.position);
        starting.push((*c).clone());
    }

    if starting.len() < STARTING_SIZE {
        return Err(ForecastError::InsufficientCandidates {
            eligible: pool.len(),
            required: STARTING_SIZE,
            formation: formation.to_string(),
        });
    }

    let mut bench = Vec::with_capacity(BENCH_SIZE);
    for c in &pool {
        if starting.len() + bench.len() >= SQUAD_SIZE {
            break;
        }
        if picked.contains(&c.player_id) || counts.get(c.position) >= total_quota(c.position) {
            continue;
        }
        debug!("Selected {} as {} (bench)", c.display_name(), c.position);
        picked.insert(c.player_id);
        counts.add(c.position);
        bench.push((*c).clone());
    }

    let total_cost: f64 = starting.iter().chain(&bench).map(|c| c.price).sum();
    let expected_points: f64 = starting.iter().chain(&bench).map(|c| c.predicted_points).sum();
    info!(
        "Selected {} players ({counts}), cost {total_cost:.1}, expected points {expected_points:.2}",
        starting.len() + bench.len()
    );

    Ok(SquadSelection {
        formation,
        starting,
        bench,
        total_cost,
        expected_points,
    })
}

// ---------------------------------------------------------------------------
// Rankings and validation
// ---------------------------------------------------------------------------

/// The `n` highest forecasts in each position, in GK, DEF, MID, FWD order.
pub fn top_players_by_position(
    candidates: &[PredictionCandidate],
    n: usize,
) -> Vec<(Position, Vec<PredictionCandidate>)> {
    Position::ALL
        .iter()
        .map(|&position| {
            let mut group: Vec<&PredictionCandidate> =
                candidates.iter().filter(|c| c.position == position).collect();
            group.sort_by(|a, b| b.predicted_points.total_cmp(&a.predicted_points));
            (position, group.into_iter().take(n).cloned().collect())
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum SquadViolation {
    StartingSize(usize),
    BenchSize(usize),
    UnknownFormation(PositionCounts),
    OverBudget { total_cost: f64, ceiling: f64 },
    DuplicatePlayer(u32),
}

impl fmt::Display for SquadViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SquadViolation::StartingSize(n) => {
                write!(f, "starting XI has {n} players, expected {STARTING_SIZE}")
            }
            SquadViolation::BenchSize(n) => write!(f, "bench has {n} players, expected {BENCH_SIZE}"),
            SquadViolation::UnknownFormation(counts) => {
                write!(f, "starting positions ({counts}) match no formation")
            }
            SquadViolation::OverBudget { total_cost, ceiling } => {
                write!(f, "total cost {total_cost:.1} exceeds budget {ceiling:.1}")
            }
            SquadViolation::DuplicatePlayer(id) => write!(f, "player {id} selected more than once"),
        }
    }
}

/// Check a selection against full-squad rules. An empty result means valid.
pub fn validate_squad(selection: &SquadSelection, budget_ceiling: f64) -> Vec<SquadViolation> {
    let mut violations = Vec::new();

    if selection.starting.len() != STARTING_SIZE {
        violations.push(SquadViolation::StartingSize(selection.starting.len()));
    }
    if selection.bench.len() != BENCH_SIZE {
        violations.push(SquadViolation::BenchSize(selection.bench.len()));
    }

    let counts = PositionCounts::of(&selection.starting);
    if Formation::from_counts(&counts).is_none() {
        violations.push(SquadViolation::UnknownFormation(counts));
    }

    let total_cost: f64 = selection.players().map(|c| c.price).sum();
    if total_cost > budget_ceiling {
        violations.push(SquadViolation::OverBudget {
            total_cost,
            ceiling: budget_ceiling,
        });
    }

    let mut seen = HashSet::new();
    for c in selection.players() {
        if !seen.insert(c.player_id) {
            violations.push(SquadViolation::DuplicatePlayer(c.player_id));
        }
    }

    violations
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn candidate(player_id: u32, position: Position, price: f64, points: f64) -> PredictionCandidate {
        PredictionCandidate {
            player_id,
            name: Some(format!("P{player_id}")),
            position,
            team: player_id % 20,
            price,
            predicted_points: points,
            confidence: crate::inference::confidence(points),
            gameweek: 10,
        }
    }

    /// Five players per position, strictly descending within each position.
    pub(crate) fn pool_of_twenty() -> Vec<PredictionCandidate> {
        let mut out = Vec::new();
        for (p, position) in Position::ALL.iter().enumerate() {
            for k in 0..5u32 {
                let id = (p as u32) * 10 + k;
                out.push(candidate(id, *position, 5.0, 10.0 - k as f64 + p as f64 * 0.1));
            }
        }
        out
    }

    #[test]
    fn formation_parsing_and_default() {
        assert_eq!(Formation::parse("4-4-2"), Some(Formation::F442));
        assert_eq!(Formation::parse(" 5-4-1 "), Some(Formation::F541));
        assert_eq!(Formation::parse("4-2-4"), None);
        assert_eq!(Formation::parse_or_default("2-3-5"), Formation::F343);
        for f in Formation::ALL {
            let total: usize = Position::ALL.iter().map(|&p| f.starting_quota(p)).sum();
            assert_eq!(total, STARTING_SIZE, "{f}");
            assert_eq!(f.starting_quota(Position::Goalkeeper), 1);
        }
        let total: usize = Position::ALL.iter().map(|&p| total_quota(p)).sum();
        assert_eq!(total, SQUAD_SIZE);
    }

    #[test]
    fn four_four_two_takes_top_scorers_per_position() {
        let pool = pool_of_twenty();
        let squad = select_squad(&pool, 100.0, Formation::F442, &HashSet::new()).unwrap();

        let counts = PositionCounts::of(&squad.starting);
        assert_eq!(counts.get(Position::Goalkeeper), 1);
        assert_eq!(counts.get(Position::Defender), 4);
        assert_eq!(counts.get(Position::Midfielder), 4);
        assert_eq!(counts.get(Position::Forward), 2);

        // Starting GK is the top GK; top DEF/MID/FWD all start.
        assert!(squad.starting.iter().any(|c| c.player_id == 0));
        for top in [10, 20, 30] {
            assert!(squad.starting.iter().any(|c| c.player_id == top));
        }
        assert!(squad.bench.iter().all(|c| c.player_id != 0));

        assert_eq!(squad.len(), SQUAD_SIZE);
        let total = PositionCounts::of(squad.players());
        for p in Position::ALL {
            assert!(total.get(p) <= total_quota(p));
        }
        assert!(validate_squad(&squad, 100.0).is_empty());
        assert!((squad.total_cost - 75.0).abs() < 1e-9);
    }

    #[test]
    fn excluded_and_expensive_players_are_skipped() {
        let mut pool = pool_of_twenty();
        pool[0].price = 12.0; // top GK too expensive
        let excluded: HashSet<u32> = [10].into_iter().collect(); // top DEF
        let squad = select_squad(&pool, 10.0, Formation::F343, &excluded).unwrap();
        assert!(squad.players().all(|c| c.player_id != 0 && c.player_id != 10));
        assert!(squad.starting.iter().any(|c| c.player_id == 1));
    }

    #[test]
    fn too_few_forwards_fails() {
        let pool: Vec<_> = pool_of_twenty()
            .into_iter()
            .map(|mut c| {
                if c.position == Position::Forward {
                    c.price = 20.0;
                }
                c
            })
            .collect();
        let err = select_squad(&pool, 10.0, Formation::F442, &HashSet::new()).unwrap_err();
        match err {
            ForecastError::InsufficientCandidates { eligible, required, formation } => {
                assert_eq!(eligible, 15);
                assert_eq!(required, STARTING_SIZE);
                assert_eq!(formation, "4-4-2");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_ids_are_selected_once() {
        let mut pool = pool_of_twenty();
        let dup = pool[10].clone();
        pool.push(dup.clone());
        let squad = select_squad(&pool, 100.0, Formation::F343, &HashSet::new()).unwrap();
        assert_eq!(squad.players().filter(|c| c.player_id == dup.player_id).count(), 1);
        assert!(validate_squad(&squad, 100.0).is_empty());
    }

    #[test]
    fn short_bench_is_allowed_but_flagged() {
        // Exactly eleven players fit 3-4-3; nobody left for the bench.
        let mut pool = Vec::new();
        pool.push(candidate(1, Position::Goalkeeper, 5.0, 5.0));
        for i in 0..3 {
            pool.push(candidate(10 + i, Position::Defender, 5.0, 5.0));
            pool.push(candidate(30 + i, Position::Forward, 5.0, 5.0));
        }
        for i in 0..4 {
            pool.push(candidate(20 + i, Position::Midfielder, 5.0, 5.0));
        }
        let squad = select_squad(&pool, 100.0, Formation::F343, &HashSet::new()).unwrap();
        assert_eq!(squad.starting.len(), STARTING_SIZE);
        assert!(squad.bench.is_empty());
        assert_eq!(validate_squad(&squad, 100.0), vec![SquadViolation::BenchSize(0)]);
    }

    #[test]
    fn ties_keep_input_order() {
        let mut pool = Vec::new();
        for id in 0..3 {
            pool.push(candidate(id, Position::Goalkeeper, 4.0, 6.0));
        }
        let top = top_players_by_position(&pool, 2);
        let gk: Vec<u32> = top[0].1.iter().map(|c| c.player_id).collect();
        assert_eq!(gk, vec![0, 1]);
        assert_eq!(top[0].0, Position::Goalkeeper);
        assert!(top[1].1.is_empty());
    }

    #[test]
    fn validation_reports_budget_and_duplicates() {
        let pool = pool_of_twenty();
        let mut squad = select_squad(&pool, 100.0, Formation::F433, &HashSet::new()).unwrap();
        squad.bench[0] = squad.starting[0].clone();
        let violations = validate_squad(&squad, 50.0);
        assert!(violations.iter().any(|v| matches!(v, SquadViolation::OverBudget { .. })));
        assert!(violations.contains(&SquadViolation::DuplicatePlayer(squad.starting[0].player_id)));
    }
}
