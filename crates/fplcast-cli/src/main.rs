// fplcast entry point.
//
// Every command:
// 1. Initializes tracing (log to file, stdout carries only command output)
// 2. Loads config (copying defaults on first run)
// 3. Builds a ForecastContext and calls into fplcast-core

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use fplcast_core::config::{self, Config};
use fplcast_core::context::ForecastContext;
use fplcast_core::dataset::{self, RoundRecord};
use fplcast_core::db::Database;
use fplcast_core::inference::PredictionCandidate;
use fplcast_core::squad::{validate_squad, Formation};
use fplcast_core::trainer::TrainingOptions;

#[derive(Parser)]
#[command(name = "fplcast")]
#[command(about = "Fantasy football points forecasting and squad selection", long_about = None)]
struct Cli {
    /// Print predictions and selections as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join raw round stats with player metadata and fixtures into the rounds table
    Assemble {
        /// Raw per-round stats CSV
        #[arg(long)]
        stats: String,
    },
    /// Train a model on the rounds table and persist it
    Train {
        /// Number of future rounds summed into the label
        #[arg(long)]
        horizon: Option<usize>,
    },
    /// Forecast points for the players of a round
    Predict {
        /// Round to forecast from (defaults to the latest)
        #[arg(long)]
        round: Option<u32>,
        /// Number of players to print
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Best forecasts per position
    Top {
        #[arg(long)]
        n: Option<usize>,
    },
    /// Pick a starting XI and bench
    Select {
        /// Per-player price ceiling
        #[arg(long)]
        budget: Option<f64>,
        /// One of 3-4-3, 3-5-2, 4-3-3, 4-4-2, 4-5-1, 5-3-2, 5-4-1
        #[arg(long)]
        formation: Option<String>,
        /// Player ids to leave out
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<u32>,
    },
    /// List recorded training runs
    Runs {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Show model and metadata status
    Status,
}

fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    info!("fplcast {} starting", env!("CARGO_PKG_VERSION"));

    let config = config::load_config().context("failed to load configuration")?;
    info!("Config loaded: rounds={}, model dir={}", config.data.rounds, config.model.dir);

    match cli.command {
        Commands::Assemble { stats } => cmd_assemble(&config, &stats),
        Commands::Train { horizon } => cmd_train(&config, horizon),
        Commands::Predict { round, limit } => cmd_predict(&config, round, limit, cli.json),
        Commands::Top { n } => cmd_top(&config, n.unwrap_or(config.squad.top_n)),
        Commands::Select {
            budget,
            formation,
            exclude,
        } => cmd_select(&config, budget, formation.as_deref(), exclude, cli.json),
        Commands::Runs { limit } => cmd_runs(&config, limit),
        Commands::Status => cmd_status(&config),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_assemble(config: &Config, stats_path: &str) -> anyhow::Result<()> {
    let Some(players) = &config.data.players else {
        bail!("data.players must be set in config to assemble the rounds table");
    };
    let stats = dataset::load_round_stats(Path::new(stats_path))?;
    let metadata = dataset::load_player_metadata(Path::new(players))?;
    let fixtures = match &config.data.fixtures {
        Some(path) => dataset::load_fixtures(Path::new(path))?,
        None => Vec::new(),
    };

    let records = dataset::assemble_records(stats, &metadata, &fixtures);
    dataset::write_rounds(Path::new(&config.data.rounds), &records)?;
    println!("Wrote {} records to {}", records.len(), config.data.rounds);
    Ok(())
}

fn cmd_train(config: &Config, horizon: Option<usize>) -> anyhow::Result<()> {
    let records = load_records(config)?;
    let mut options = TrainingOptions::from_config(config);
    if let Some(h) = horizon {
        options.horizon = h;
    }

    let mut ctx = ForecastContext::new();
    let outcome = ctx.train(&records, &options)?;
    outcome
        .artifact
        .save(Path::new(&config.model.dir))
        .context("failed to save model artifact")?;

    let db = Database::open(&config.database.path).context("failed to open database")?;
    let run_id = db.record_training_run(&outcome.report)?;

    let report = &outcome.report;
    println!("Training run #{run_id} (horizon {})", report.horizon);
    println!(
        "  train: {} rows over {} rounds",
        report.train_samples,
        report.train_rounds.len()
    );
    println!(
        "  eval:  {} rows over {} rounds",
        report.eval_samples,
        report.eval_rounds.len()
    );
    match &report.metrics {
        Some(m) => println!(
            "  mse {:.4}  mae {:.4}  rmse {:.4}  r2 {:.4}",
            m.mse, m.mae, m.rmse, m.r2
        ),
        None => println!("  evaluation undefined (single eligible round)"),
    }
    println!("Top features:");
    for fi in report.top_features(10) {
        println!("  {:<28} {:.4}", fi.feature, fi.importance);
    }
    Ok(())
}

fn cmd_predict(config: &Config, round: Option<u32>, limit: usize, json: bool) -> anyhow::Result<()> {
    let records = load_records(config)?;
    let ctx = load_context(config)?;
    let candidates = ctx.predict(&records, round)?;
    let shown = &candidates[..limit.min(candidates.len())];
    if json {
        println!("{}", serde_json::to_string_pretty(shown)?);
    } else {
        print_candidates(shown);
    }
    Ok(())
}

fn cmd_top(config: &Config, n: usize) -> anyhow::Result<()> {
    let records = load_records(config)?;
    let ctx = load_context(config)?;
    for (position, group) in ctx.top_players(&records, n)? {
        println!("{position}");
        print_candidates(&group);
    }
    Ok(())
}

fn cmd_select(
    config: &Config,
    budget: Option<f64>,
    formation: Option<&str>,
    exclude: Vec<u32>,
    json: bool,
) -> anyhow::Result<()> {
    let records = load_records(config)?;
    let ctx = load_context(config)?;
    let budget = budget.unwrap_or(config.squad.budget);
    let formation = Formation::parse_or_default(formation.unwrap_or(&config.squad.formation));
    let excluded: HashSet<u32> = exclude.into_iter().collect();

    let squad = ctx.select_squad(&records, budget, formation, &excluded)?;
    let violations = validate_squad(&squad, config.squad.squad_budget);
    if json {
        println!("{}", serde_json::to_string_pretty(&squad)?);
        for v in &violations {
            eprintln!("warning: {v}");
        }
        return Ok(());
    }

    println!("Formation {}", squad.formation);
    println!("Starting XI");
    print_candidates(&squad.starting);
    println!("Bench");
    print_candidates(&squad.bench);
    println!(
        "Total cost {:.1}, expected points {:.2}",
        squad.total_cost, squad.expected_points
    );

    for v in &violations {
        println!("warning: {v}");
    }
    Ok(())
}

fn cmd_runs(config: &Config, limit: usize) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path).context("failed to open database")?;
    let runs = db.list_training_runs(limit)?;
    if runs.is_empty() {
        println!("No training runs recorded");
    }
    for run in runs {
        let metrics = match run.metrics {
            Some(m) => format!("rmse {:.4} r2 {:.4}", m.rmse, m.r2),
            None => "no evaluation".to_string(),
        };
        let top = run
            .top_features
            .first()
            .map(|f| f.feature.as_str())
            .unwrap_or("-");
        println!(
            "#{:<4} {}  h={} train={} eval={}  {metrics}  top={top}",
            run.id, run.trained_at, run.horizon, run.train_samples, run.eval_samples
        );
    }
    Ok(())
}

fn cmd_status(config: &Config) -> anyhow::Result<()> {
    let mut ctx = ForecastContext::new();
    let model_dir = Path::new(&config.model.dir);
    if fplcast_core::artifact::artifact_present(model_dir) {
        ctx.load_model(model_dir)?;
    }
    if let Some(path) = &config.data.players {
        ctx.refresh_metadata(dataset::load_player_metadata(Path::new(path))?);
    }

    let status = ctx.status();
    println!(
        "Model: {}",
        match status.feature_count {
            Some(n) => format!("loaded ({n} features) from {}", model_dir.display()),
            None => "not trained".to_string(),
        }
    );
    println!("Metadata: {} players", status.metadata_players);

    let db = Database::open(&config.database.path).context("failed to open database")?;
    if let Some(run) = db.latest_training_run()? {
        println!("Last training run: #{} at {}", run.id, run.trained_at);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_records(config: &Config) -> anyhow::Result<Vec<RoundRecord>> {
    let path = Path::new(&config.data.rounds);
    dataset::load_rounds(path).with_context(|| format!("failed to load rounds from {}", path.display()))
}

/// Context with the persisted model and, when configured, the metadata
/// snapshot.
fn load_context(config: &Config) -> anyhow::Result<ForecastContext> {
    let mut ctx = ForecastContext::new();
    ctx.load_model(Path::new(&config.model.dir))?;
    if let Some(path) = &config.data.players {
        ctx.refresh_metadata(dataset::load_player_metadata(Path::new(path))?);
    }
    Ok(ctx)
}

fn print_candidates(candidates: &[PredictionCandidate]) {
    for c in candidates {
        println!(
            "  {:>6}  {:<24} {:<3} team {:>2}  £{:>5.1}  {:>6.2} pts  conf {:.2}  gw {}",
            c.player_id,
            c.display_name(),
            c.position.display_str(),
            c.team,
            c.price,
            c.predicted_points,
            c.confidence,
            c.gameweek
        );
    }
}

/// Route logs to `logs/fplcast.log`, appending so that successive commands
/// build one history. `RUST_LOG` overrides the default filter.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("cannot create log directory {}", log_dir.display()))?;
    let log_path = log_dir.join("fplcast.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("cannot open log file {}", log_path.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("fplcast_core=info,fplcast=info,warn"));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install the fplcast log subscriber")?;

    Ok(())
}
