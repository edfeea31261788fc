// Training pipeline: features -> labels -> temporal split -> scale -> fit ->
// evaluate -> rank importances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifact::ModelArtifact;
use crate::config::Config;
use crate::dataset::RoundRecord;
use crate::error::{ForecastError, Result};
use crate::features::{build_features, FEATURE_COUNT, FEATURE_NAMES};
use crate::forest::{ForestParams, RandomForest};
use crate::metrics::{evaluate, rank_importances, EvalMetrics, FeatureImportance};
use crate::scaler::StandardScaler;
use crate::split::temporal_split;
use crate::target::labeled_rows;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingOptions {
    pub horizon: usize,
    pub train_fraction: f64,
    pub forest: ForestParams,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            horizon: 1,
            train_fraction: 0.8,
            forest: ForestParams::default(),
        }
    }
}

impl TrainingOptions {
    pub fn from_config(config: &Config) -> Self {
        TrainingOptions {
            horizon: config.training.horizon,
            train_fraction: config.model.train_fraction,
            forest: ForestParams {
                n_trees: config.model.n_trees,
                max_depth: config.model.max_depth,
                min_samples_split: config.model.min_samples_split,
                min_samples_leaf: config.model.min_samples_leaf,
                seed: config.model.seed,
            },
        }
    }
}

/// Summary of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub trained_at: DateTime<Utc>,
    pub horizon: usize,
    pub train_samples: usize,
    pub eval_samples: usize,
    pub train_rounds: Vec<u32>,
    pub eval_rounds: Vec<u32>,
    /// `None` when the evaluation partition was empty.
    pub metrics: Option<EvalMetrics>,
    pub feature_count: usize,
    /// All features, most important first.
    pub feature_importances: Vec<FeatureImportance>,
}

impl TrainingReport {
    pub fn top_features(&self, n: usize) -> &[FeatureImportance] {
        &self.feature_importances[..n.min(self.feature_importances.len())]
    }
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub artifact: ModelArtifact,
    pub report: TrainingReport,
}

/// Fit a model on the full record set.
pub fn train(records: &[RoundRecord], options: &TrainingOptions) -> Result<TrainingOutcome> {
    if options.horizon == 0 {
        return Err(ForecastError::data("train", "horizon must be at least 1"));
    }

    let table = build_features(records);
    let labeled = labeled_rows(&table, options.horizon);
    if labeled.is_empty() {
        return Err(ForecastError::data(
            "train",
            format!(
                "no eligible rows: {} records but no player has a following round",
                records.len()
            ),
        ));
    }

    let split = temporal_split(&table, &labeled, options.train_fraction);
    info!(
        "Temporal split: {} training rows over {} rounds, {} evaluation rows over {} rounds",
        split.train.len(),
        split.train_rounds.len(),
        split.eval.len(),
        split.eval_rounds.len()
    );

    let feature_names: Vec<String> = FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
    let x_train = table.matrix(&split.train.rows, &feature_names)?;
    let x_eval = table.matrix(&split.eval.rows, &feature_names)?;

    let scaler = StandardScaler::fit(&x_train, FEATURE_COUNT)?;
    let x_train = scaler.transform(&x_train);
    let x_eval = scaler.transform(&x_eval);

    debug!(
        "Fitting {} trees (max_depth={}, min_samples_split={}, min_samples_leaf={}, seed={})",
        options.forest.n_trees,
        options.forest.max_depth,
        options.forest.min_samples_split,
        options.forest.min_samples_leaf,
        options.forest.seed
    );
    let forest = RandomForest::fit(&x_train, &split.train.labels, options.forest)?;

    let metrics = if split.has_eval() {
        let predictions = forest.predict(&x_eval);
        evaluate(&split.eval.labels, &predictions)
    } else {
        None
    };
    match &metrics {
        Some(m) => info!(
            "Evaluation: mse={:.4} mae={:.4} rmse={:.4} r2={:.4}",
            m.mse, m.mae, m.rmse, m.r2
        ),
        None => warn!("Evaluation set is empty (single eligible round); metrics undefined"),
    }

    let feature_importances = rank_importances(&feature_names, forest.feature_importances());
    for fi in feature_importances.iter().take(10) {
        debug!("Feature importance {}: {:.4}", fi.feature, fi.importance);
    }

    let report = TrainingReport {
        trained_at: Utc::now(),
        horizon: options.horizon,
        train_samples: split.train.len(),
        eval_samples: split.eval.len(),
        train_rounds: split.train_rounds,
        eval_rounds: split.eval_rounds,
        metrics,
        feature_count: feature_names.len(),
        feature_importances,
    };

    let artifact = ModelArtifact::new(forest, scaler, feature_names)?;
    Ok(TrainingOutcome { artifact, report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::feature_index;
    use crate::features::tests::record;
    use crate::scaler::{column_stats, ColumnStats};

    fn quick_options() -> TrainingOptions {
        TrainingOptions {
            forest: ForestParams {
                n_trees: 10,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn history(players: u32, rounds: u32) -> Vec<RoundRecord> {
        (1..=players)
            .flat_map(|p| {
                (1..=rounds).map(move |gw| record(p, gw, ((p * 3 + gw) % 7) as f64))
            })
            .collect()
    }

    #[test]
    fn trains_and_reports_metrics() {
        let outcome = train(&history(6, 11), &quick_options()).unwrap();
        let report = &outcome.report;
        assert_eq!(report.train_rounds, (1..=8).collect::<Vec<_>>());
        assert_eq!(report.eval_rounds, vec![9, 10]);
        assert_eq!(report.train_samples, 6 * 8);
        assert_eq!(report.eval_samples, 6 * 2);
        assert!(report.metrics.is_some());
        assert_eq!(report.feature_count, FEATURE_COUNT);
        assert_eq!(report.feature_importances.len(), FEATURE_COUNT);
        assert_eq!(report.top_features(10).len(), 10);
        let ranked: Vec<f64> = report.feature_importances.iter().map(|f| f.importance).collect();
        assert!(ranked.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(outcome.artifact.feature_names().len(), FEATURE_COUNT);
    }

    #[test]
    fn single_eligible_round_has_no_metrics() {
        let outcome = train(&history(4, 2), &quick_options()).unwrap();
        assert!(outcome.report.metrics.is_none());
        assert_eq!(outcome.report.eval_samples, 0);
        assert_eq!(outcome.report.train_samples, 4);
    }

    #[test]
    fn no_eligible_rows_is_data_error() {
        let err = train(&history(3, 1), &quick_options()).unwrap_err();
        assert!(matches!(err, ForecastError::Data { operation: "train", .. }));
    }

    #[test]
    fn scaler_is_fitted_on_training_rows_only() {
        let records = history(6, 11);
        let options = quick_options();
        let outcome = train(&records, &options).unwrap();

        let table = build_features(&records);
        let labeled = labeled_rows(&table, options.horizon);
        let split = temporal_split(&table, &labeled, options.train_fraction);
        let names: Vec<String> = FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
        let x_train = table.matrix(&split.train.rows, &names).unwrap();
        let all_rows: Vec<usize> = split.train.rows.iter().chain(&split.eval.rows).copied().collect();
        let x_all = table.matrix(&all_rows, &names).unwrap();

        fn column(x: &[Vec<f64>], c: usize) -> Vec<f64> {
            x.iter().map(|row| row[c]).collect()
        }
        let expected: Vec<ColumnStats> = (0..FEATURE_COUNT)
            .map(|c| column_stats(&column(&x_train, c)))
            .collect();
        assert_eq!(outcome.artifact.scaler().columns(), expected.as_slice());

        // Evaluation rows would have moved the statistics.
        let points = feature_index("points").unwrap();
        assert_ne!(
            outcome.artifact.scaler().columns()[points],
            column_stats(&column(&x_all, points))
        );
    }

    #[test]
    fn training_is_deterministic() {
        let records = history(5, 9);
        let a = train(&records, &quick_options()).unwrap();
        let b = train(&records, &quick_options()).unwrap();
        assert_eq!(a.artifact, b.artifact);
        assert_eq!(a.report.metrics, b.report.metrics);
    }
}
