// Forecasts for the players of one round.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifact::ModelArtifact;
use crate::dataset::{PlayerAttributes, Position, RoundRecord};
use crate::error::{ForecastError, Result};
use crate::features::{build_features, FeatureTable};

/// One player's forecast for the round after the one it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionCandidate {
    pub player_id: u32,
    pub name: Option<String>,
    pub position: Position,
    pub team: u32,
    pub price: f64,
    pub predicted_points: f64,
    pub confidence: f64,
    /// The round being forecast.
    pub gameweek: u32,
}

impl PredictionCandidate {
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("#{}", self.player_id),
        }
    }
}

/// Confidence shrinks as the forecast grows: `clamp(0.8 - 0.02 p, 0.3, 0.95)`.
pub fn confidence(predicted_points: f64) -> f64 {
    (0.8 - 0.02 * predicted_points).clamp(0.3, 0.95)
}

/// Forecast every player present in `round` (the latest round when `None`).
/// Results are ordered by forecast, highest first.
pub fn predict_round(
    records: &[RoundRecord],
    artifact: &ModelArtifact,
    round: Option<u32>,
) -> Result<Vec<PredictionCandidate>> {
    let (table, rows, round) = round_features(records, round)?;
    let x = table.matrix(&rows, artifact.feature_names())?;
    let predictions = artifact.predict(&x);

    let mut candidates: Vec<PredictionCandidate> = rows
        .iter()
        .zip(predictions)
        .map(|(&i, predicted_points)| {
            let row = &table.rows()[i];
            PredictionCandidate {
                player_id: row.player_id,
                name: row.name.clone(),
                position: row.position,
                team: row.team,
                price: row.price,
                predicted_points,
                confidence: confidence(predicted_points),
                gameweek: round + 1,
            }
        })
        .collect();
    candidates.sort_by(|a, b| b.predicted_points.total_cmp(&a.predicted_points));

    info!("Forecast {} players for gameweek {}", candidates.len(), round + 1);
    Ok(candidates)
}

/// Feature rows for the players of `round`, with the resolved round.
///
/// Features are computed over the full history and then restricted to the
/// round, so each player's windows include everything up to it.
fn round_features(records: &[RoundRecord], round: Option<u32>) -> Result<(FeatureTable, Vec<usize>, u32)> {
    let latest = records
        .iter()
        .map(RoundRecord::gameweek)
        .max()
        .ok_or_else(|| ForecastError::data("predict", "no records to predict from"))?;
    let round = round.unwrap_or(latest);

    let table = build_features(records);
    let rows: Vec<usize> = table
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, r)| r.gameweek == round)
        .map(|(i, _)| i)
        .collect();
    if rows.is_empty() {
        return Err(ForecastError::EmptyRound { round });
    }
    Ok((table, rows, round))
}

/// Overwrite name and position with the current metadata snapshot where the
/// player is known to it.
pub fn apply_metadata(candidates: &mut [PredictionCandidate], metadata: &HashMap<u32, PlayerAttributes>) {
    for candidate in candidates.iter_mut() {
        if let Some(attrs) = metadata.get(&candidate.player_id) {
            candidate.name = Some(attrs.name.clone());
            candidate.position = attrs.position;
        }
    }
}
