// Library root: forecasting pipeline, squad selection and run history.

pub mod artifact;
pub mod config;
pub mod context;
pub mod dataset;
pub mod db;
pub mod error;
pub mod features;
pub mod forest;
pub mod inference;
pub mod metrics;
pub mod scaler;
pub mod split;
pub mod squad;
pub mod target;
pub mod trainer;

pub use error::{ForecastError, Result};
