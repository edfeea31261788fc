// Explicit service context: the loaded model plus the current metadata
// snapshot. Query methods take `&self`; the model is shared read-only.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::artifact::ModelArtifact;
use crate::dataset::{PlayerAttributes, Position, RoundRecord};
use crate::error::{ForecastError, Result};
use crate::inference::{apply_metadata, predict_round, PredictionCandidate};
use crate::squad::{select_squad, top_players_by_position, Formation, SquadSelection};
use crate::trainer::{train, TrainingOptions, TrainingOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextStatus {
    pub model_loaded: bool,
    pub feature_count: Option<usize>,
    pub metadata_players: usize,
}

#[derive(Debug, Default)]
pub struct ForecastContext {
    model: Option<Arc<ModelArtifact>>,
    metadata: HashMap<u32, PlayerAttributes>,
}

impl ForecastContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the persisted artifact from `dir`, replacing any loaded model.
    pub fn load_model(&mut self, dir: &Path) -> Result<()> {
        let artifact = ModelArtifact::load(dir)?;
        info!(
            "Loaded model from {} ({} features)",
            dir.display(),
            artifact.feature_names().len()
        );
        self.install_model(artifact);
        Ok(())
    }

    pub fn install_model(&mut self, artifact: ModelArtifact) {
        self.model = Some(Arc::new(artifact));
    }

    /// Train on `records`, install the result and return it.
    pub fn train(&mut self, records: &[RoundRecord], options: &TrainingOptions) -> Result<TrainingOutcome> {
        let outcome = train(records, options)?;
        self.install_model(outcome.artifact.clone());
        Ok(outcome)
    }

    pub fn refresh_metadata(&mut self, metadata: HashMap<u32, PlayerAttributes>) {
        info!("Metadata snapshot refreshed: {} players", metadata.len());
        self.metadata = metadata;
    }

    /// Shared handle to the loaded model.
    pub fn model(&self, operation: &'static str) -> Result<Arc<ModelArtifact>> {
        self.model
            .clone()
            .ok_or(ForecastError::ModelNotReady { operation })
    }

    pub fn status(&self) -> ContextStatus {
        ContextStatus {
            model_loaded: self.model.is_some(),
            feature_count: self.model.as_ref().map(|m| m.feature_names().len()),
            metadata_players: self.metadata.len(),
        }
    }

    /// Forecast `round` (latest when `None`), with names and positions taken
    /// from the metadata snapshot where available.
    pub fn predict(&self, records: &[RoundRecord], round: Option<u32>) -> Result<Vec<PredictionCandidate>> {
        let model = self.model("predict")?;
        let mut candidates = predict_round(records, &model, round)?;
        apply_metadata(&mut candidates, &self.metadata);
        Ok(candidates)
    }

    pub fn top_players(
        &self,
        records: &[RoundRecord],
        n: usize,
    ) -> Result<Vec<(Position, Vec<PredictionCandidate>)>> {
        let candidates = self.predict(records, None)?;
        Ok(top_players_by_position(&candidates, n))
    }

    /// Forecast the latest round and pick a squad from it.
    pub fn select_squad(
        &self,
        records: &[RoundRecord],
        budget: f64,
        formation: Formation,
        excluded: &HashSet<u32>,
    ) -> Result<SquadSelection> {
        self.model("select squad")?;
        let candidates = self.predict(records, None)?;
        select_squad(&candidates, budget, formation, excluded)
    }
}
