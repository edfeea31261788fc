// SQLite ledger of training runs.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};

use crate::metrics::{EvalMetrics, FeatureImportance};
use crate::trainer::TrainingReport;

/// Number of ranked features stored with each run.
pub const STORED_TOP_FEATURES: usize = 10;

/// A training run as recorded in the database.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRun {
    pub id: i64,
    /// RFC 3339 timestamp.
    pub trained_at: String,
    pub horizon: usize,
    pub train_samples: usize,
    pub eval_samples: usize,
    pub train_rounds: usize,
    pub eval_rounds: usize,
    pub metrics: Option<EvalMetrics>,
    pub feature_count: usize,
    pub top_features: Vec<FeatureImportance>,
}

/// SQLite-backed history of training runs.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure the schema
    /// exists. Pass `":memory:"` for an ephemeral database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS training_runs (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                trained_at    TEXT NOT NULL,
                horizon       INTEGER NOT NULL,
                train_samples INTEGER NOT NULL,
                eval_samples  INTEGER NOT NULL,
                train_rounds  INTEGER NOT NULL,
                eval_rounds   INTEGER NOT NULL,
                mse           REAL,
                mae           REAL,
                rmse          REAL,
                r2            REAL,
                feature_count INTEGER NOT NULL,
                top_features  TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    /// Panics if the mutex is poisoned.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Store a training report and return the new run id.
    pub fn record_training_run(&self, report: &TrainingReport) -> Result<i64> {
        let conn = self.conn();
        let top_json = serde_json::to_string(report.top_features(STORED_TOP_FEATURES))
            .context("failed to serialize top features")?;
        let m = report.metrics.as_ref();
        conn.execute(
            "INSERT INTO training_runs
                (trained_at, horizon, train_samples, eval_samples, train_rounds, eval_rounds,
                 mse, mae, rmse, r2, feature_count, top_features)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                report.trained_at.to_rfc3339(),
                report.horizon as i64,
                report.train_samples as i64,
                report.eval_samples as i64,
                report.train_rounds.len() as i64,
                report.eval_rounds.len() as i64,
                m.map(|m| m.mse),
                m.map(|m| m.mae),
                m.map(|m| m.rmse),
                m.map(|m| m.r2),
                report.feature_count as i64,
                top_json,
            ],
        )
        .context("failed to record training run")?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent run, if any.
    pub fn latest_training_run(&self) -> Result<Option<TrainingRun>> {
        Ok(self.list_training_runs(1)?.into_iter().next())
    }

    /// Up to `limit` runs, newest first.
    pub fn list_training_runs(&self, limit: usize) -> Result<Vec<TrainingRun>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, trained_at, horizon, train_samples, eval_samples, train_rounds, eval_rounds,
                        mse, mae, rmse, r2, feature_count, top_features
                 FROM training_runs ORDER BY id DESC LIMIT ?1",
            )
            .context("failed to prepare list_training_runs query")?;

        let rows = stmt
            .query_map(params![limit as i64], read_run)
            .context("failed to query training runs")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map training run rows")?;

        rows.into_iter()
            .map(|(run, top_json)| {
                let top_features: Vec<FeatureImportance> = serde_json::from_str(&top_json)
                    .with_context(|| format!("failed to parse top features of run {}", run.id))?;
                Ok(TrainingRun { top_features, ..run })
            })
            .collect()
    }
}

fn read_run(row: &Row<'_>) -> rusqlite::Result<(TrainingRun, String)> {
    let mse: Option<f64> = row.get(7)?;
    let mae: Option<f64> = row.get(8)?;
    let rmse: Option<f64> = row.get(9)?;
    let r2: Option<f64> = row.get(10)?;
    let metrics = match (mse, mae, rmse, r2) {
        (Some(mse), Some(mae), Some(rmse), Some(r2)) => Some(EvalMetrics { mse, mae, rmse, r2 }),
        _ => None,
    };
    let run = TrainingRun {
        id: row.get(0)?,
        trained_at: row.get(1)?,
        horizon: row.get::<_, i64>(2)? as usize,
        train_samples: row.get::<_, i64>(3)? as usize,
        eval_samples: row.get::<_, i64>(4)? as usize,
        train_rounds: row.get::<_, i64>(5)? as usize,
        eval_rounds: row.get::<_, i64>(6)? as usize,
        metrics,
        feature_count: row.get::<_, i64>(11)? as usize,
        top_features: Vec::new(),
    };
    Ok((run, row.get(12)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    fn report(metrics: Option<EvalMetrics>, n_features: usize) -> TrainingReport {
        TrainingReport {
            trained_at: Utc::now(),
            horizon: 1,
            train_samples: 120,
            eval_samples: if metrics.is_some() { 30 } else { 0 },
            train_rounds: vec![1, 2, 3, 4],
            eval_rounds: if metrics.is_some() { vec![5] } else { vec![] },
            metrics,
            feature_count: n_features,
            feature_importances: (0..n_features)
                .map(|i| FeatureImportance {
                    feature: format!("f{i}"),
                    importance: 1.0 / (i + 1) as f64,
                })
                .collect(),
        }
    }

    #[test]
    fn empty_database_has_no_runs() {
        let db = test_db();
        assert!(db.latest_training_run().unwrap().is_none());
        assert!(db.list_training_runs(5).unwrap().is_empty());
    }

    #[test]
    fn record_and_read_back() {
        let db = test_db();
        let metrics = EvalMetrics {
            mse: 4.0,
            mae: 1.5,
            rmse: 2.0,
            r2: 0.25,
        };
        let id = db.record_training_run(&report(Some(metrics), 12)).unwrap();
        let run = db.latest_training_run().unwrap().unwrap();
        assert_eq!(run.id, id);
        assert_eq!(run.metrics, Some(metrics));
        assert_eq!(run.train_rounds, 4);
        assert_eq!(run.eval_rounds, 1);
        assert_eq!(run.feature_count, 12);
        assert_eq!(run.top_features.len(), STORED_TOP_FEATURES);
        assert_eq!(run.top_features[0].feature, "f0");
    }

    #[test]
    fn undefined_metrics_are_stored_as_null() {
        let db = test_db();
        db.record_training_run(&report(None, 3)).unwrap();
        let run = db.latest_training_run().unwrap().unwrap();
        assert!(run.metrics.is_none());
        assert_eq!(run.eval_samples, 0);
        assert_eq!(run.top_features.len(), 3);
    }

    #[test]
    fn runs_listed_newest_first_with_limit() {
        let db = test_db();
        let first = db.record_training_run(&report(None, 2)).unwrap();
        let second = db.record_training_run(&report(None, 2)).unwrap();
        let third = db.record_training_run(&report(None, 2)).unwrap();
        let runs = db.list_training_runs(2).unwrap();
        let ids: Vec<i64> = runs.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![third, second]);
        assert!(first < second);
    }
}
