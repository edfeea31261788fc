// Error taxonomy shared by the forecasting pipeline and the squad selector.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForecastError {
    /// Structural problems with the input table: missing columns, unparsable
    /// cells, or an eligible row set that turned out empty.
    #[error("data error during {operation}: {message}")]
    Data {
        operation: &'static str,
        message: String,
    },

    #[error("no trained model loaded; {operation} requires a model (run `fplcast train` first)")]
    ModelNotReady { operation: &'static str },

    #[error(
        "insufficient candidates for formation {formation}: {eligible} eligible, {required} needed for the starting XI"
    )]
    InsufficientCandidates {
        eligible: usize,
        required: usize,
        formation: String,
    },

    #[error("model artifact mismatch: {message}")]
    ArtifactMismatch { message: String },

    #[error("no rows found for latest round {round}")]
    EmptyRound { round: u32 },

    #[error("feature `{name}` expected by the model is not produced by the feature pipeline")]
    UnknownFeature { name: String },

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl ForecastError {
    pub(crate) fn data(operation: &'static str, message: impl Into<String>) -> Self {
        ForecastError::Data {
            operation,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
