// Configuration loading and validation (config/fplcast.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

/// Name of the single configuration file under `config/` and `defaults/`.
pub const CONFIG_FILE: &str = "fplcast.toml";

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub data: DataPaths,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub squad: SquadConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataPaths {
    /// Flat historical table, one row per (player, gameweek).
    pub rounds: String,
    /// Current metadata snapshot. When absent, candidates keep the
    /// attributes recorded in the historical table.
    #[serde(default)]
    pub players: Option<String>,
    #[serde(default)]
    pub fixtures: Option<String>,
}

/// Fixed regressor hyperparameters plus the split fraction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub dir: String,
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
    pub train_fraction: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            dir: "models".into(),
            n_trees: 200,
            max_depth: 10,
            min_samples_split: 5,
            min_samples_leaf: 2,
            seed: 42,
            train_fraction: 0.8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub horizon: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig { horizon: 1 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SquadConfig {
    /// Per-player price ceiling applied before selection.
    pub budget: f64,
    pub formation: String,
    /// Aggregate squad ceiling, only checked by `validate_squad`.
    pub squad_budget: f64,
    pub top_n: usize,
}

impl Default for SquadConfig {
    fn default() -> Self {
        SquadConfig {
            budget: 100.0,
            formation: "3-4-3".into(),
            squad_budget: 100.0,
            top_n: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: "fplcast.db".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/fplcast.toml` relative to
/// `base_dir`. Does not copy defaults; prefer `load_config()`.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let config = parse_config(&text, &path)?;
    validate(&config)?;
    Ok(config)
}

fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Seed `config/fplcast.toml` from `defaults/fplcast.toml` on first run.
///
/// Returns the path written, or `None` when a config file already exists (it
/// is never overwritten). Fails only when neither file is present.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let default_path = base_dir.join("defaults").join(CONFIG_FILE);
    let config_dir = base_dir.join("config");
    let target = config_dir.join(CONFIG_FILE);

    if !default_path.is_file() {
        if target.is_file() {
            return Ok(None);
        }
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "no config/{CONFIG_FILE} or defaults/{CONFIG_FILE} under {}; run fplcast from the project root",
                base_dir.display()
            ),
        });
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("cannot create {}: {e}", config_dir.display()),
    })?;

    let mut dest = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
    {
        Ok(dest) => dest,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
        Err(e) => {
            return Err(ConfigError::DefaultsCopyError {
                message: format!("cannot create {}: {e}", target.display()),
            })
        }
    };
    let content = std::fs::read(&default_path).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("cannot read {}: {e}", default_path.display()),
    })?;
    std::io::Write::write_all(&mut dest, &content).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("cannot write {}: {e}", target.display()),
    })?;

    info!("Seeded {} from shipped defaults", target.display());
    Ok(Some(target))
}

/// Convenience wrapper: loads config relative to the current working directory.
/// Seeds `config/fplcast.toml` from the shipped defaults before loading.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_file(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.data.rounds.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "data.rounds".into(),
            message: "must not be empty".into(),
        });
    }

    let model = &config.model;
    let positive_fields: &[(&str, usize)] = &[
        ("model.n_trees", model.n_trees),
        ("model.max_depth", model.max_depth),
        ("model.min_samples_leaf", model.min_samples_leaf),
        ("training.horizon", config.training.horizon),
        ("squad.top_n", config.squad.top_n),
    ];
    for (name, val) in positive_fields {
        if *val == 0 {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must be > 0".into(),
            });
        }
    }

    if model.min_samples_split < 2 {
        return Err(ConfigError::ValidationError {
            field: "model.min_samples_split".into(),
            message: format!("must be >= 2, got {}", model.min_samples_split),
        });
    }

    let frac = model.train_fraction;
    if !(frac > 0.0 && frac < 1.0) {
        return Err(ConfigError::ValidationError {
            field: "model.train_fraction".into(),
            message: format!("must be strictly between 0.0 and 1.0, got {frac}"),
        });
    }

    for (name, val) in [
        ("squad.budget", config.squad.budget),
        ("squad.squad_budget", config.squad.squad_budget),
    ] {
        if !(val > 0.0) {
            return Err(ConfigError::ValidationError {
                field: name.into(),
                message: format!("must be > 0, got {val}"),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const MINIMAL: &str = r#"
[data]
rounds = "data/rounds.csv"
"#;

    fn parse(text: &str) -> Result<Config, ConfigError> {
        let config = parse_config(text, Path::new("inline.toml"))?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.data.rounds, "data/rounds.csv");
        assert!(config.data.players.is_none());
        assert_eq!(config.model.n_trees, 200);
        assert_eq!(config.model.max_depth, 10);
        assert_eq!(config.model.min_samples_split, 5);
        assert_eq!(config.model.min_samples_leaf, 2);
        assert_eq!(config.model.seed, 42);
        assert!((config.model.train_fraction - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.training.horizon, 1);
        assert_eq!(config.squad.formation, "3-4-3");
        assert_eq!(config.database.path, "fplcast.db");
    }

    #[test]
    fn shipped_defaults_parse_and_validate() {
        let text = include_str!("../../../defaults/fplcast.toml");
        let config = parse(text).unwrap();
        assert_eq!(config.model.n_trees, 200);
        assert!(config.data.players.is_none());
        assert!((config.squad.squad_budget - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_section_keeps_remaining_defaults() {
        let text = r#"
[data]
rounds = "r.csv"

[model]
n_trees = 25
"#;
        let config = parse(text).unwrap();
        assert_eq!(config.model.n_trees, 25);
        assert_eq!(config.model.max_depth, 10);
        assert_eq!(config.model.dir, "models");
    }

    #[test]
    fn missing_data_section_is_parse_error() {
        let err = parse("[model]\nn_trees = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn zero_horizon_rejected() {
        let text = format!("{MINIMAL}\n[training]\nhorizon = 0\n");
        match parse(&text).unwrap_err() {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "training.horizon"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn train_fraction_bounds_enforced() {
        for bad in ["0.0", "1.0", "1.5"] {
            let text = format!("{MINIMAL}\n[model]\ntrain_fraction = {bad}\n");
            match parse(&text).unwrap_err() {
                ConfigError::ValidationError { field, .. } => {
                    assert_eq!(field, "model.train_fraction")
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn min_samples_split_below_two_rejected() {
        let text = format!("{MINIMAL}\n[model]\nmin_samples_split = 1\n");
        assert!(matches!(
            parse(&text).unwrap_err(),
            ConfigError::ValidationError { .. }
        ));
    }

    #[test]
    fn unknown_formation_is_not_a_validation_error() {
        let text = format!("{MINIMAL}\n[squad]\nformation = \"2-2-6\"\n");
        let config = parse(&text).unwrap();
        assert_eq!(config.squad.formation, "2-2-6");
    }

    #[test]
    fn first_run_seeds_config_without_overwriting() {
        let tmp = std::env::temp_dir().join("fplcast_config_copy_test");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::write(tmp.join("defaults").join(CONFIG_FILE), MINIMAL).unwrap();
        fs::write(tmp.join("defaults").join("notes.toml"), "x = 1").unwrap();

        let seeded = ensure_config_file(&tmp).unwrap();
        assert_eq!(seeded, Some(tmp.join("config").join(CONFIG_FILE)));
        assert!(!tmp.join("config").join("notes.toml").exists());

        // A later run leaves the edited copy alone.
        fs::write(
            tmp.join("config").join(CONFIG_FILE),
            "[data]\nrounds = \"custom.csv\"\n",
        )
        .unwrap();
        assert_eq!(ensure_config_file(&tmp).unwrap(), None);
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.data.rounds, "custom.csv");

        // Without shipped defaults an existing config is enough.
        fs::remove_dir_all(tmp.join("defaults")).unwrap();
        assert_eq!(ensure_config_file(&tmp).unwrap(), None);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_config_dir_and_defaults_is_error() {
        let tmp = std::env::temp_dir().join("fplcast_config_missing_test");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        assert!(matches!(
            ensure_config_file(&tmp).unwrap_err(),
            ConfigError::DefaultsCopyError { .. }
        ));
        assert!(matches!(
            load_config_from(&tmp).unwrap_err(),
            ConfigError::FileNotFound { .. }
        ));
        let _ = fs::remove_dir_all(&tmp);
    }
}
