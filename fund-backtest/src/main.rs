//! Fund Backtest - momentum rotation backtester.
//!
//! Imports security lists and daily prices into a local SQLite store, ranks
//! securities by trailing return, and runs the monthly top-N backtest.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fund_backtest::backtest::report::{export_ranked_list, export_result_json, export_trade_log};
use fund_backtest::backtest::{grid, run_sweep, BacktestConfig, BacktestEngine, BacktestReport};
use fund_backtest::data::{import, LocalStorage, UniverseFilter};
use fund_common::config::config_path;
use fund_common::logging::init_logging_with_exclusions;
use fund_common::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "fund-backtest")]
#[command(version)]
#[command(about = "Backtest a monthly top-N momentum rotation", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.fundmanager/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a backtest
    Run {
        /// First rebalance date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Horizon end (YYYY-MM-DD)
        #[arg(long, conflicts_with = "periods")]
        end: Option<NaiveDate>,

        /// Number of monthly periods, instead of --end
        #[arg(long)]
        periods: Option<u32>,

        /// Number of slots
        #[arg(long)]
        top_n: Option<usize>,

        /// Trailing return window (months)
        #[arg(long)]
        trailing_months: Option<u32>,

        /// "all" or comma-separated tiers
        #[arg(long)]
        universe: Option<UniverseFilter>,

        /// Initial capital
        #[arg(long)]
        capital: Option<f64>,

        /// Compute drawdown for every closed position
        #[arg(long)]
        position_drawdown: bool,

        /// Trade log CSV path (overrides config)
        #[arg(long)]
        export: Option<PathBuf>,

        /// Also write the full result as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Run a grid of top-N and trailing window combinations
    Sweep {
        /// Slot counts to try, comma-separated
        #[arg(long, value_delimiter = ',', default_value = "5,10,20")]
        top_n: Vec<usize>,

        /// Trailing windows to try (months), comma-separated
        #[arg(long, value_delimiter = ',', default_value = "3,6,12")]
        trailing_months: Vec<u32>,
    },

    /// Show the ranked list for a date
    Rank {
        /// Ranking date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        #[arg(long)]
        top_n: Option<usize>,

        #[arg(long)]
        trailing_months: Option<u32>,

        #[arg(long)]
        universe: Option<UniverseFilter>,

        /// Write the list as CSV
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Import an exchange security list
    ImportSecurities {
        /// Security list CSV
        path: PathBuf,

        /// Tier label (defaults to the file stem)
        #[arg(long)]
        tier: Option<String>,

        /// F&O list CSV marking derivative-eligible symbols
        #[arg(long)]
        fno: Option<PathBuf>,
    },

    /// Import `<symbol>.csv` daily price files from a directory
    ImportPrices {
        dir: PathBuf,
    },

    /// Mark a security as delisted so it drops out of rankings
    Delist {
        symbol: String,

        /// Mark it listed again instead
        #[arg(long)]
        relist: bool,
    },

    /// Show database statistics
    Stats,

    /// Write the effective configuration to the config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        tracing::error!(error = %err, "Command failed");
        eprintln!("Error: {}", err);
        if err.is_config() {
            eprintln!("Check the config file or the FUND_* environment variables.");
        }
        std::process::exit(err.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let Cli {
        config: config_file,
        db,
        command,
    } = cli;

    let mut config = match &config_file {
        Some(path) => {
            let mut config = Config::load_from(path).map_err(config_error)?;
            config.apply_env_overrides();
            config
        }
        None => Config::load_with_env().map_err(config_error)?,
    };
    if let Some(db) = db {
        config.database.path = db;
    }

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    validate_for(&command, &config)?;

    tracing::info!("Fund Backtest v{}", env!("CARGO_PKG_VERSION"));

    match command {
        Commands::Run {
            start,
            end,
            periods,
            top_n,
            trailing_months,
            universe,
            capital,
            position_drawdown,
            export,
            json,
        } => {
            let mut bt = BacktestConfig::from_settings(&config.backtest)?;
            if let Some(start) = start {
                bt.start_date = start;
            }
            if let Some(end) = end {
                bt.end_date = end;
            }
            if let Some(periods) = periods {
                bt.end_date = BacktestConfig::with_periods(bt.start_date, periods)?.end_date;
            }
            if let Some(n) = top_n {
                bt.top_n = n;
            }
            if let Some(m) = trailing_months {
                bt.trailing_months = m;
            }
            if let Some(u) = universe {
                bt.universe = u;
            }
            if let Some(c) = capital {
                bt.initial_capital = c;
            }
            bt.position_drawdown |= position_drawdown;

            let export = export.unwrap_or_else(|| config.backtest.trade_log_path.clone());
            run_backtest(open_storage(&config)?, &bt, &export, json.as_deref()).await
        }

        Commands::Sweep {
            top_n,
            trailing_months,
        } => {
            let base = BacktestConfig::from_settings(&config.backtest)?;
            let engine = Arc::new(BacktestEngine::from_store(open_storage(&config)?));
            let outcomes = run_sweep(engine, grid(&base, &top_n, &trailing_months)).await;

            println!("{:>6} {:>9} {:>10} {:>10} {:>8} {:>16}", "TopN", "Trailing", "CAGR%", "MaxDD%", "Trades", "NetProfit");
            for outcome in outcomes {
                let c = &outcome.config;
                match outcome.result {
                    Ok(r) => println!(
                        "{:>6} {:>9} {:>10.2} {:>10.2} {:>8} {:>16.2}",
                        c.top_n,
                        c.trailing_months,
                        r.metrics.cagr * 100.0,
                        r.metrics.max_drawdown * 100.0,
                        r.metrics.total_trades,
                        r.metrics.net_profit
                    ),
                    Err(e) => println!("{:>6} {:>9}  failed: {}", c.top_n, c.trailing_months, e),
                }
            }
            Ok(())
        }

        Commands::Rank {
            date,
            top_n,
            trailing_months,
            universe,
            export,
        } => {
            let storage = open_storage(&config)?;
            let ranked = storage
                .rank_by_trailing_return(
                    date,
                    trailing_months.unwrap_or(config.backtest.trailing_months),
                    &universe.unwrap_or(BacktestConfig::from_settings(&config.backtest)?.universe),
                    top_n.unwrap_or(config.backtest.top_n),
                )
                .await?;

            for (i, r) in ranked.iter().enumerate() {
                println!("{:>3}. {:<16} {:>9.2}%", i + 1, r.symbol, r.trailing_return * 100.0);
            }
            if let Some(path) = export {
                export_ranked_list(&path, &ranked)?;
            }
            Ok(())
        }

        Commands::ImportSecurities { path, tier, fno } => {
            let tier = match tier {
                Some(t) => t,
                None => file_stem(&path)?,
            };
            let storage = open_storage(&config)?;
            let report = import::import_securities_file(&storage, &path, &tier, fno.as_deref()).await?;
            println!("Securities: {}", report);
            Ok(())
        }

        Commands::ImportPrices { dir } => {
            let storage = open_storage(&config)?;
            let report = import::import_price_dir(&storage, &dir).await?;
            println!("Prices: {}", report);
            Ok(())
        }

        Commands::Delist { symbol, relist } => {
            let storage = open_storage(&config)?;
            set_listed(&storage, &symbol, relist).await?;
            println!("{} {}", symbol, if relist { "listed" } else { "delisted" });
            Ok(())
        }

        Commands::Stats => {
            println!("{}", open_storage(&config)?.get_stats().await?);
            Ok(())
        }

        Commands::InitConfig { force } => {
            let path = config_file.clone().unwrap_or_else(config_path);
            if path.exists() && !force {
                return Err(Error::InvalidInput(format!(
                    "{} already exists, pass --force to overwrite",
                    path.display()
                )));
            }
            match &config_file {
                Some(path) => config.save_to(path)?,
                None => config.save()?,
            }
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

fn config_error(err: anyhow::Error) -> Error {
    Error::Config(format!("{:#}", err))
}

/// Database and logging settings are checked for every command. The backtest
/// section only matters to commands that rank or simulate.
fn validate_for(command: &Commands, config: &Config) -> Result<()> {
    config.database.validate().context("Invalid database settings")?;
    config
        .observability
        .validate()
        .context("Invalid logging settings")?;

    match command {
        Commands::Run { .. } | Commands::InitConfig { .. } => {
            config.validate().context("Invalid configuration")
        }
        Commands::Sweep { .. } | Commands::Rank { .. } => config
            .backtest
            .validate()
            .context("Invalid backtest settings"),
        Commands::ImportSecurities { .. }
        | Commands::ImportPrices { .. }
        | Commands::Delist { .. }
        | Commands::Stats => Ok(()),
    }
}

fn open_storage(config: &Config) -> Result<Arc<LocalStorage>> {
    let storage = LocalStorage::open(&config.database.path).context(format!(
        "Failed to open database {}",
        config.database.path.display()
    ))?;
    Ok(Arc::new(storage))
}

async fn set_listed(storage: &LocalStorage, symbol: &str, listed: bool) -> Result<()> {
    if storage.set_listed(symbol, listed).await? {
        Ok(())
    } else {
        Err(Error::NotFound(format!("security {}", symbol)))
    }
}

async fn run_backtest(
    storage: Arc<LocalStorage>,
    config: &BacktestConfig,
    export: &Path,
    json: Option<&Path>,
) -> Result<()> {
    let engine = BacktestEngine::from_store(storage);

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping after the current period");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let result = engine.run_with_cancel(config, &cancel).await?;
    let report = BacktestReport::generate(&result);
    println!("{}", report.text_report);

    export_trade_log(export, &result.trades)?;
    if let Some(path) = json {
        export_result_json(path, &result)?;
    }
    Ok(())
}

fn file_stem(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_lowercase)
        .ok_or_else(|| Error::InvalidInput(format!("Cannot derive tier from {}", path.display())))
}

// ============================================================================
// Tests
// ============================================================================
