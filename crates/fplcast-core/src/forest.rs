// Random forest regression.
//
// Bootstrap-aggregated variance-reduction trees. Each tree draws its
// bootstrap sample from its own seeded generator, so the fitted forest does
// not depend on how rayon schedules the trees.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};

/// Forest hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 200,
            max_depth: 10,
            min_samples_split: 5,
            min_samples_leaf: 2,
            seed: 42,
        }
    }
}

// ---------------------------------------------------------------------------
// Regression tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        /// Rows with `x[feature] <= threshold` go left.
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut node = self;
        loop {
            match node {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold {
                        left.as_ref()
                    } else {
                        right.as_ref()
                    };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Node::Leaf { .. } => 0,
            Node::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    /// Largest feature index any split in this subtree reads.
    fn max_feature(&self) -> Option<usize> {
        match self {
            Node::Leaf { .. } => None,
            Node::Split {
                feature, left, right, ..
            } => [Some(*feature), left.max_feature(), right.max_feature()]
                .into_iter()
                .flatten()
                .max(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    root: Node,
    /// Impurity decrease per feature, normalised to sum 1 (all zero for a
    /// tree that never split).
    #[serde(default)]
    importances: Vec<f64>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    sse: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    params: &'a ForestParams,
    importances: Vec<f64>,
}

impl<'a> TreeBuilder<'a> {
    fn build(&mut self, indices: &[usize], depth: usize) -> Node {
        let n = indices.len();
        let (sum, sum_sq) = indices
            .iter()
            .fold((0.0, 0.0), |(s, q), &i| (s + self.y[i], q + self.y[i] * self.y[i]));
        let mean = sum / n as f64;
        let sse = (sum_sq - sum * sum / n as f64).max(0.0);

        if depth >= self.params.max_depth || n < self.params.min_samples_split || sse < 1e-10 {
            return Node::Leaf { value: mean };
        }

        match self.best_split(indices) {
            Some(best) if best.sse < sse => {
                self.importances[best.feature] += sse - best.sse;
                let left = self.build(&best.left, depth + 1);
                let right = self.build(&best.right, depth + 1);
                Node::Split {
                    feature: best.feature,
                    threshold: best.threshold,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
            _ => Node::Leaf { value: mean },
        }
    }

    /// Scan every feature in sorted order with running sums; candidate
    /// thresholds sit between consecutive distinct values and both sides
    /// must hold at least `min_samples_leaf` rows. Ties on the resulting
    /// error keep the earliest feature and threshold.
    fn best_split(&self, indices: &[usize]) -> Option<BestSplit> {
        let n = indices.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        if n < 2 * min_leaf {
            return None;
        }
        let n_features = self.x[indices[0]].len();
        let total: f64 = indices.iter().map(|&i| self.y[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| self.y[i] * self.y[i]).sum();

        let mut best: Option<(usize, f64, f64)> = None;
        let mut order = indices.to_vec();

        for feature in 0..n_features {
            order.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for k in 1..n {
                let yi = self.y[order[k - 1]];
                left_sum += yi;
                left_sq += yi * yi;

                if k < min_leaf || n - k < min_leaf {
                    continue;
                }
                let lo = self.x[order[k - 1]][feature];
                let hi = self.x[order[k]][feature];
                if lo >= hi {
                    continue;
                }

                let nl = k as f64;
                let nr = (n - k) as f64;
                let right_sum = total - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sq - left_sum * left_sum / nl) + (right_sq - right_sum * right_sum / nr);

                if best.map_or(true, |(_, _, b)| sse < b) {
                    let mid = lo + (hi - lo) / 2.0;
                    let threshold = if mid < hi { mid } else { lo };
                    best = Some((feature, threshold, sse));
                }
            }
        }

        let (feature, threshold, sse) = best?;
        let (left, right) = indices
            .iter()
            .copied()
            .partition(|&i| self.x[i][feature] <= threshold);
        Some(BestSplit {
            feature,
            threshold,
            sse: sse.max(0.0),
            left,
            right,
        })
    }
}

impl RegressionTree {
    fn fit(x: &[Vec<f64>], y: &[f64], indices: &[usize], params: &ForestParams, n_features: usize) -> Self {
        let mut builder = TreeBuilder {
            x,
            y,
            params,
            importances: vec![0.0; n_features],
        };
        let root = builder.build(indices, 0);
        let mut importances = builder.importances;
        normalize(&mut importances);
        RegressionTree { root, importances }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.root.predict(row)
    }

    pub fn depth(&self) -> usize {
        self.root.depth()
    }
}

fn normalize(values: &mut [f64]) {
    let sum: f64 = values.iter().sum();
    if sum > 0.0 {
        for v in values.iter_mut() {
            *v /= sum;
        }
    }
}

// ---------------------------------------------------------------------------
// Forest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    n_features: usize,
    trees: Vec<RegressionTree>,
    importances: Vec<f64>,
}

impl RandomForest {
    /// Fit on a row-major matrix `x` with labels `y`.
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: ForestParams) -> Result<Self> {
        if x.is_empty() {
            return Err(ForecastError::data("model fit", "training set is empty"));
        }
        if x.len() != y.len() {
            return Err(ForecastError::data(
                "model fit",
                format!("{} feature rows but {} labels", x.len(), y.len()),
            ));
        }
        if params.n_trees == 0 {
            return Err(ForecastError::data("model fit", "n_trees must be positive"));
        }
        let n_features = x[0].len();
        if let Some(bad) = x.iter().position(|row| row.len() != n_features) {
            return Err(ForecastError::data(
                "model fit",
                format!("row {bad} has {} values, expected {n_features}", x[bad].len()),
            ));
        }

        let n = x.len();
        let trees: Vec<RegressionTree> = (0..params.n_trees)
            .into_par_iter()
            .map(|i| {
                let indices = bootstrap_indices(n, params.seed.wrapping_add(i as u64));
                RegressionTree::fit(x, y, &indices, &params, n_features)
            })
            .collect();

        let mut importances = vec![0.0; n_features];
        for tree in &trees {
            for (acc, imp) in importances.iter_mut().zip(&tree.importances) {
                *acc += imp;
            }
        }
        for v in importances.iter_mut() {
            *v /= trees.len() as f64;
        }
        normalize(&mut importances);

        Ok(RandomForest {
            params,
            n_features,
            trees,
            importances,
        })
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
        total / self.trees.len() as f64
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.par_iter().map(|row| self.predict_row(row)).collect()
    }

    /// Importance per feature column, summing to 1 unless no tree split.
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// Check a deserialised forest before it is used for prediction: at
    /// least one tree, and every split reads a column below `n_features`.
    pub fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(ForecastError::ArtifactMismatch {
                message: "model has no trees".to_string(),
            });
        }
        for (i, tree) in self.trees.iter().enumerate() {
            if let Some(feature) = tree.root.max_feature().filter(|&f| f >= self.n_features) {
                return Err(ForecastError::ArtifactMismatch {
                    message: format!(
                        "tree {i} splits on column {feature}, model has {} features",
                        self.n_features
                    ),
                });
            }
        }
        if self.importances.len() != self.n_features {
            return Err(ForecastError::ArtifactMismatch {
                message: format!(
                    "model has {} importances for {} features",
                    self.importances.len(),
                    self.n_features
                ),
            });
        }
        Ok(())
    }
}

fn bootstrap_indices(n: usize, seed: u64) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(0..n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params(n_trees: usize) -> ForestParams {
        ForestParams {
            n_trees,
            ..Default::default()
        }
    }

    /// y = 10 when x0 > 5, else 0; x1 is noise.
    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..40 {
            let x0 = i as f64 / 4.0;
            x.push(vec![x0, ((i * 7) % 11) as f64]);
            y.push(if x0 > 5.0 { 10.0 } else { 0.0 });
        }
        (x, y)
    }

    #[test]
    fn learns_a_step_function() {
        let (x, y) = step_data();
        let forest = RandomForest::fit(&x, &y, small_params(25)).unwrap();
        assert!(forest.predict_row(&[1.0, 3.0]) < 2.0);
        assert!(forest.predict_row(&[9.0, 3.0]) > 8.0);
        let imp = forest.feature_importances();
        assert!(imp[0] > imp[1]);
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fitting_is_reproducible() {
        let (x, y) = step_data();
        let a = RandomForest::fit(&x, &y, small_params(10)).unwrap();
        let b = RandomForest::fit(&x, &y, small_params(10)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.predict(&x), b.predict(&x));
    }

    #[test]
    fn respects_depth_and_leaf_limits() {
        let (x, y) = step_data();
        let params = ForestParams {
            n_trees: 5,
            max_depth: 1,
            ..Default::default()
        };
        let forest = RandomForest::fit(&x, &y, params).unwrap();
        assert!(forest.trees().iter().all(|t| t.depth() <= 1));

        // Too few rows to split: every tree is a single leaf.
        let tiny = RandomForest::fit(&x[..4], &y[..4], small_params(3)).unwrap();
        assert!(tiny.trees().iter().all(|t| t.depth() == 0));
    }

    #[test]
    fn constant_labels_give_constant_predictions() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y = vec![4.0; 20];
        let forest = RandomForest::fit(&x, &y, small_params(4)).unwrap();
        assert!((forest.predict_row(&[100.0]) - 4.0).abs() < 1e-12);
        assert!(forest.feature_importances().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn rejects_empty_or_mismatched_input() {
        assert!(RandomForest::fit(&[], &[], small_params(1)).is_err());
        let x = vec![vec![1.0], vec![2.0]];
        assert!(RandomForest::fit(&x, &[1.0], small_params(1)).is_err());
    }

    #[test]
    fn validate_accepts_a_fitted_forest() {
        let (x, y) = step_data();
        let forest = RandomForest::fit(&x, &y, small_params(5)).unwrap();
        assert!(forest.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_split_feature() {
        let (x, y) = step_data();
        let mut forest = RandomForest::fit(&x, &y, small_params(3)).unwrap();
        forest.trees[0].root = Node::Split {
            feature: 57,
            threshold: 0.0,
            left: Box::new(Node::Leaf { value: 1.0 }),
            right: Box::new(Node::Leaf { value: 2.0 }),
        };
        assert!(matches!(
            forest.validate(),
            Err(ForecastError::ArtifactMismatch { .. })
        ));
    }

    #[test]
    fn validate_rejects_treeless_forest() {
        let (x, y) = step_data();
        let mut forest = RandomForest::fit(&x, &y, small_params(3)).unwrap();
        forest.trees.clear();
        assert!(matches!(
            forest.validate(),
            Err(ForecastError::ArtifactMismatch { .. })
        ));
    }

    #[test]
    fn serde_round_trip_preserves_predictions() {
        let (x, y) = step_data();
        let forest = RandomForest::fit(&x, &y, small_params(5)).unwrap();
        let json = serde_json::to_string(&forest).unwrap();
        let back: RandomForest = serde_json::from_str(&json).unwrap();
        assert_eq!(forest.predict(&x), back.predict(&x));
    }
}
