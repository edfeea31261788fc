// Per-feature standardisation fitted on the training partition.

use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};

/// Mean and population standard deviation of one feature column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub mean: f64,
    /// Divisor applied after centring; 1.0 for zero-variance columns.
    pub scale: f64,
}

/// Mean and population standard deviation of a column. An empty column has
/// mean 0; a constant column keeps a scale of 1.
pub fn column_stats(values: &[f64]) -> ColumnStats {
    if values.is_empty() {
        return ColumnStats {
            mean: 0.0,
            scale: 1.0,
        };
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let stdev = variance.sqrt();
    ColumnStats {
        mean,
        scale: if stdev > 0.0 { stdev } else { 1.0 },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    columns: Vec<ColumnStats>,
}

impl StandardScaler {
    /// Fit on a row-major matrix. Every row must have `n_features` values.
    pub fn fit(x: &[Vec<f64>], n_features: usize) -> Result<Self> {
        if let Some(bad) = x.iter().position(|row| row.len() != n_features) {
            return Err(ForecastError::data(
                "scaler fit",
                format!(
                    "row {bad} has {} values, expected {n_features}",
                    x[bad].len()
                ),
            ));
        }
        let columns = (0..n_features)
            .map(|c| {
                let col: Vec<f64> = x.iter().map(|row| row[c]).collect();
                column_stats(&col)
            })
            .collect();
        Ok(StandardScaler { columns })
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[ColumnStats] {
        &self.columns
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(&self.columns)
            .map(|(v, s)| (v - s.mean) / s.scale)
            .collect()
    }

    pub fn transform(&self, x: &[Vec<f64>]) -> Vec<Vec<f64>> {
        x.iter().map(|row| self.transform_row(row)).collect()
    }
}
