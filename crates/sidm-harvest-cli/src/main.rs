//! sidm-harvest: batch harvester for the SIDM Tableau workbook.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use sidm_harvest::{DebugCache, Orchestrator, Persistence, TableauDecoder, UnitStatus};
use sidm_harvest_cli::{
    find_chromium, load_config, resolve_cache_dir, resolve_config_path, resolve_db_path,
    ChromiumFactory, SqliteStore,
};

#[derive(Parser)]
#[command(
    name = "sidm-harvest",
    about = "Harvest every municipal variable of the SIDM Tableau workbook",
    version
)]
struct Cli {
    /// Path to a JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the SQLite database.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process queued units until none is pending (default).
    Run {
        /// Directory for raw payload copies.
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Chromium executable.
        #[arg(long)]
        chromium_path: Option<PathBuf>,

        /// Harvest only this variable of each unit.
        #[arg(long)]
        variable: Option<String>,

        /// Show the browser window.
        #[arg(long)]
        headful: bool,
    },

    /// Seed the catalog and queue without harvesting.
    Seed,

    /// Print queue counts per status.
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = load_config(config_path.as_deref())?;
    let db_path = resolve_db_path(cli.db.as_deref());
    let mut store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open database: {}", db_path.display()))?;
    store.seed_catalog().context("failed to seed catalog")?;

    match cli.command.unwrap_or(Commands::Run {
        cache_dir: None,
        chromium_path: None,
        variable: None,
        headful: false,
    }) {
        Commands::Run {
            cache_dir,
            chromium_path,
            variable,
            headful,
        } => {
            let executable = find_chromium(chromium_path.as_deref())
                .context("Chromium not found. Pass --chromium-path or set SIDM_CHROMIUM_PATH.")?;
            let mut factory = ChromiumFactory::new(executable)
                .with_navigation_timeout(Duration::from_secs(config.wait_deadline_secs));
            if headful {
                factory = factory.headful();
            }

            let cache = resolve_cache_dir(cache_dir.as_deref(), &config);
            let mut orchestrator =
                Orchestrator::new(factory, store, Box::new(TableauDecoder), config)
                    .with_variable(variable);
            if let Some(dir) = cache {
                let cache = DebugCache::new(&dir)
                    .with_context(|| format!("failed to create cache dir: {}", dir.display()))?;
                orchestrator = orchestrator.with_cache(cache);
            }

            tracing::info!("Database: {}", db_path.display());
            let report = orchestrator.run().await.context("harvest run aborted")?;
            println!(
                "Processed: {}  Failed attempts: {}  Records: {}  Exhausted: {}",
                report.processed, report.failed, report.records, report.exhausted
            );
            if !report.is_clean() {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Seed => {
            println!("Catalog seeded: {}", db_path.display());
        }

        Commands::Status => {
            let counts = store.status_counts()?;
            println!("Database: {}", db_path.display());
            for status in [UnitStatus::Pending, UnitStatus::Error, UnitStatus::Processed] {
                let count = counts
                    .iter()
                    .find(|(s, _)| *s == status)
                    .map(|(_, n)| *n)
                    .unwrap_or(0);
                println!("  {:<10} {count}", status.as_str());
            }
            println!("  {:<10} {}", "exhausted", store.count_exhausted(config.max_errors)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}
