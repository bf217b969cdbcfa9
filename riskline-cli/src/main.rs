//! Riskline CLI tool

use clap::{Parser, Subcommand};
use riskline_registry::{PromotionPolicy, PromotionState, VersionId};
use riskline_runtime::stages::DataFormat;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::run::RunArgs;
use config::{Overrides, RuntimeConfig};

#[derive(Parser)]
#[command(name = "riskline")]
#[command(author, version, about = "Riskline credit-risk model pipeline CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory of the object store (overrides RISKLINE_STORE_DIR)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Maximum stages running at once (overrides RISKLINE_MAX_PARALLEL)
    #[arg(long, global = true)]
    max_parallel: Option<usize>,

    /// Per-stage timeout in seconds (overrides RISKLINE_STAGE_TIMEOUT_SECS)
    #[arg(long, global = true)]
    stage_timeout_secs: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the training pipeline over a dataset
    Run {
        /// Pipeline config file (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Schema definition file (JSON); repeat for several schemas
        #[arg(long = "schema", required = true)]
        schemas: Vec<PathBuf>,

        /// Raw dataset: JSON, newline-delimited JSON or CSV file, or a
        /// directory whose first CSV file is used
        #[arg(long)]
        data: PathBuf,

        /// Dataset encoding (json, csv); guessed from the extension if unset
        #[arg(long, value_parser = parse_format)]
        format: Option<DataFormat>,

        /// Promote the new version to this state at the end of the run
        #[arg(long, value_parser = parse_state)]
        promote: Option<PromotionState>,

        /// Opaque compute parameter recorded on the run (key=value)
        #[arg(long)]
        compute: Vec<String>,
    },

    /// Move a model version to another promotion state
    Promote {
        /// Model name
        model: String,

        /// Version, e.g. v3 or 3
        #[arg(value_parser = parse_version)]
        version: VersionId,

        /// Target state (staging, production, archived)
        #[arg(value_parser = parse_state)]
        state: PromotionState,

        /// Minimum holdout AUC required for production
        #[arg(long)]
        min_auc: Option<f64>,

        /// Maximum calibration error allowed for production
        #[arg(long)]
        max_calibration_error: Option<f64>,
    },

    /// List models, or the versions of one model
    Models {
        /// Model name
        model: Option<String>,
    },

    /// Score a batch with the production model and audit it for drift
    Audit {
        /// Model name
        model: String,

        /// Batch of raw records (CSV, JSON array or newline-delimited JSON)
        #[arg(long)]
        batch: PathBuf,

        /// Exit with a non-zero status when drift is detected
        #[arg(long)]
        fail_on_drift: bool,
    },

    /// Show model lineage
    Lineage {
        /// Restrict to one model
        #[arg(long)]
        model: Option<String>,

        /// Trace one version of the model
        #[arg(long, value_parser = parse_version, requires = "model")]
        version: Option<VersionId>,
    },

    /// Inspect and clean up pipeline runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List runs, newest first
    List {
        /// Maximum number of runs to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show the report of one run
    Show {
        /// Run ID
        run_id: String,
    },

    /// Remove old finished runs from the ledger
    Cleanup {
        /// Always keep this many of the newest runs
        #[arg(long, default_value = "10")]
        keep_last: usize,

        /// Only remove runs at least this many days old
        #[arg(long)]
        max_age_days: Option<i64>,
    },
}

fn parse_state(raw: &str) -> Result<PromotionState, String> {
    raw.parse()
}

fn parse_version(raw: &str) -> Result<VersionId, String> {
    raw.parse()
}

fn parse_format(raw: &str) -> Result<DataFormat, String> {
    raw.parse()
}

/// Exit status when an audit finds drift and `--fail-on-drift` is set
const EXIT_DRIFT: i32 = 8;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let runtime = RuntimeConfig::from_env()?.with_overrides(Overrides {
        store_dir: cli.store_dir,
        max_parallel: cli.max_parallel,
        stage_timeout_secs: cli.stage_timeout_secs,
    })?;

    // Execute command
    let code = match cli.command {
        Commands::Run {
            config,
            schemas,
            data,
            format,
            promote,
            compute,
        } => {
            let args = RunArgs {
                config,
                schemas,
                data,
                format,
                promote,
                compute,
            };
            commands::run::execute(args, &runtime).await?
        }
        Commands::Promote {
            model,
            version,
            state,
            min_auc,
            max_calibration_error,
        } => {
            let policy = PromotionPolicy::new(min_auc, max_calibration_error);
            commands::promote::execute(&model, version, state, policy, &runtime).await?
        }
        Commands::Models { model } => {
            commands::models::execute(model.as_deref(), &runtime).await?;
            commands::EXIT_OK
        }
        Commands::Audit {
            model,
            batch,
            fail_on_drift,
        } => {
            let alerts = commands::audit::execute(&model, &batch, &runtime).await?;
            if fail_on_drift && alerts > 0 {
                EXIT_DRIFT
            } else {
                commands::EXIT_OK
            }
        }
        Commands::Lineage { model, version } => {
            commands::lineage::execute(model.as_deref(), version, &runtime).await?;
            commands::EXIT_OK
        }
        Commands::Runs { action } => match action {
            RunsAction::List { limit } => {
                commands::runs::list(limit, &runtime).await?;
                commands::EXIT_OK
            }
            RunsAction::Show { run_id } => commands::runs::show(&run_id, &runtime).await?,
            RunsAction::Cleanup {
                keep_last,
                max_age_days,
            } => {
                commands::runs::cleanup(keep_last, max_age_days, &runtime).await?;
                commands::EXIT_OK
            }
        },
    };

    if code != commands::EXIT_OK {
        std::process::exit(code);
    }
    Ok(())
}
