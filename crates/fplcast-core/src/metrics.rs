// Regression metrics and feature-importance ranking.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub mse: f64,
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
}

/// Metrics over paired truth/prediction vectors. `None` when there is
/// nothing to evaluate.
///
/// R² follows the usual convention for a constant target: 1.0 for a perfect
/// fit, otherwise 0.0.
pub fn evaluate(y_true: &[f64], y_pred: &[f64]) -> Option<EvalMetrics> {
    if y_true.is_empty() || y_true.len() != y_pred.len() {
        return None;
    }
    let n = y_true.len() as f64;
    let mean = y_true.iter().sum::<f64>() / n;

    let mut ss_res = 0.0;
    let mut abs = 0.0;
    let mut ss_tot = 0.0;
    for (t, p) in y_true.iter().zip(y_pred) {
        let err = t - p;
        ss_res += err * err;
        abs += err.abs();
        ss_tot += (t - mean).powi(2);
    }

    let mse = ss_res / n;
    let r2 = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };

    Some(EvalMetrics {
        mse,
        mae: abs / n,
        rmse: mse.sqrt(),
        r2,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Features ordered by importance, highest first. Equal importances keep
/// the order of `names`.
pub fn rank_importances(names: &[String], importances: &[f64]) -> Vec<FeatureImportance> {
    let mut ranked: Vec<FeatureImportance> = names
        .iter()
        .zip(importances)
        .map(|(name, &importance)| FeatureImportance {
            feature: name.clone(),
            importance,
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked
}
