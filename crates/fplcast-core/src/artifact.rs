// Persisted model unit: forest, scaler and the feature-name list.
//
// The three parts are written as separate JSON files into one directory and
// are only meaningful together. A save builds the whole directory next to
// the live one and swaps it in, so readers never see files from two runs.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ForecastError, Result};
use crate::forest::RandomForest;
use crate::scaler::StandardScaler;

pub const MODEL_FILE: &str = "model.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const FEATURES_FILE: &str = "features.json";

const ARTIFACT_FILES: [&str; 3] = [MODEL_FILE, SCALER_FILE, FEATURES_FILE];

#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    forest: RandomForest,
    scaler: StandardScaler,
    feature_names: Vec<String>,
}

impl ModelArtifact {
    /// Bundle fitted parts, checking that they agree on the feature count
    /// and that the forest only reads columns it was given.
    pub fn new(forest: RandomForest, scaler: StandardScaler, feature_names: Vec<String>) -> Result<Self> {
        forest.validate()?;
        let n = feature_names.len();
        if forest.n_features() != n || scaler.n_features() != n {
            return Err(ForecastError::ArtifactMismatch {
                message: format!(
                    "feature list has {n} names, model expects {}, scaler expects {}",
                    forest.n_features(),
                    scaler.n_features()
                ),
            });
        }
        Ok(ModelArtifact {
            forest,
            scaler,
            feature_names,
        })
    }

    pub fn forest(&self) -> &RandomForest {
        &self.forest
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Scale a raw feature matrix and predict.
    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        self.forest.predict(&self.scaler.transform(x))
    }

    /// Write all three files into `dir`, replacing any previous artifact.
    ///
    /// The files go into a sibling `<dir>.staging` directory first. Only
    /// once all three are written is the old directory moved aside to
    /// `<dir>.previous` and the staging directory renamed into place.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let staging = sibling(dir, "staging")?;
        let previous = sibling(dir, "previous")?;

        remove_dir_if_present(&staging)?;
        fs::create_dir_all(&staging).map_err(|source| ForecastError::Io {
            path: staging.clone(),
            source,
        })?;
        write_json(&staging.join(MODEL_FILE), &self.forest)?;
        write_json(&staging.join(SCALER_FILE), &self.scaler)?;
        write_json(&staging.join(FEATURES_FILE), &self.feature_names)?;

        if dir.exists() {
            remove_dir_if_present(&previous)?;
            fs::rename(dir, &previous).map_err(|source| ForecastError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        fs::rename(&staging, dir).map_err(|source| ForecastError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        if let Err(e) = remove_dir_if_present(&previous) {
            warn!("Could not remove replaced artifact: {e}");
        }

        info!(
            "Saved model artifact to {} ({} trees, {} features)",
            dir.display(),
            self.forest.n_trees(),
            self.feature_names.len()
        );
        Ok(())
    }

    /// Load an artifact from `dir`.
    ///
    /// No files present means no model has been trained yet
    /// (`ModelNotReady`); a partial set or disagreeing parts is
    /// `ArtifactMismatch`.
    pub fn load(dir: &Path) -> Result<Self> {
        let missing: Vec<&str> = ARTIFACT_FILES
            .iter()
            .copied()
            .filter(|name| !dir.join(name).is_file())
            .collect();

        if missing.len() == ARTIFACT_FILES.len() {
            return Err(ForecastError::ModelNotReady {
                operation: "load model",
            });
        }
        if !missing.is_empty() {
            return Err(ForecastError::ArtifactMismatch {
                message: format!(
                    "incomplete artifact in {}: missing {}",
                    dir.display(),
                    missing.join(", ")
                ),
            });
        }

        let forest: RandomForest = read_json(&dir.join(MODEL_FILE))?;
        let scaler: StandardScaler = read_json(&dir.join(SCALER_FILE))?;
        let feature_names: Vec<String> = read_json(&dir.join(FEATURES_FILE))?;
        debug!("Loaded model artifact from {}", dir.display());

        Self::new(forest, scaler, feature_names)
    }
}

/// True when any artifact file is present in `dir`.
pub fn artifact_present(dir: &Path) -> bool {
    ARTIFACT_FILES.iter().any(|name| dir.join(name).is_file())
}

/// `<parent>/<name>.<suffix>` for an artifact directory `<parent>/<name>`.
fn sibling(dir: &Path, suffix: &str) -> Result<PathBuf> {
    let name = dir.file_name().ok_or_else(|| {
        ForecastError::data(
            "save model",
            format!("model directory {} has no final component", dir.display()),
        )
    })?;
    let mut sibling = name.to_os_string();
    sibling.push(format!(".{suffix}"));
    Ok(dir.with_file_name(sibling))
}

fn remove_dir_if_present(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ForecastError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec(value).map_err(|source| ForecastError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| ForecastError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|source| ForecastError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ForecastError::Json {
        path: path.to_path_buf(),
        source,
    })
}
