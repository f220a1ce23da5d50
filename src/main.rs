mod config;
mod loader;
mod logging;
mod models;
mod notify;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use crate::config::AppConfig;
use crate::notify::DayPhase;
use crate::pipeline::{Job, Pipeline, schedule};
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "nepse-feed", about = "NEPSE market news and data feed", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// DuckDB file (overrides database.path)
    #[arg(long, env = "NEPSE_DB", global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape news listings, insert new items and schedule notifications
    News,

    /// Scrape company announcements
    Announcements {
        /// Only this symbol (default: every stored stock)
        #[arg(short, long)]
        symbol: Option<String>,
    },

    /// Scrape the floorsheet for the trailing window of days
    Floorsheet {
        #[arg(short, long)]
        symbol: Option<String>,

        /// Calendar days back from today (default: scrape.floorsheet_days)
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Snapshot the live indices if the market is open
    Indices {
        /// Scrape even when the market reads closed
        #[arg(long)]
        force: bool,
    },

    /// Check and store whether the market is live
    MarketStatus,

    /// Scrape EPS and P/E ratios
    Eps,

    /// Assign news notify times (default: the phase of the current hour)
    Notify {
        #[arg(short, long, value_enum)]
        phase: Option<DayPhase>,
    },

    /// Run every job on its configured schedule until interrupted
    Daemon,

    /// Apply schema migrations
    Migrate,

    /// Import stocks.csv and sectors.csv
    LoadReference {
        #[arg(short, long, default_value = "data")]
        dir: PathBuf,
    },

    /// Show database statistics
    Stats,

    /// List all stored stock symbols
    Symbols,

    /// Print a source's run log
    Logs {
        /// schedule | announcements | floorsheet | live_nepse_index | EPS | market_status
        source: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let mut config = AppConfig::load()?;
    if let Some(db) = cli.db {
        config.database.path = db;
    }

    let job = match cli.command {
        Command::News => Job::News,
        Command::Announcements { symbol } => Job::Announcements { symbol },
        Command::Floorsheet { symbol, days } => Job::Floorsheet { symbol, days },
        Command::Indices { force } => Job::Indices { force },
        Command::MarketStatus => Job::MarketStatus,
        Command::Eps => Job::Eps,
        Command::Notify { phase } => Job::Notify { phase },

        Command::Daemon => {
            let pipeline = Pipeline::open(config).await?;
            return schedule::run_daemon(pipeline).await;
        }

        Command::Migrate => {
            Repository::open(&config.database.path)?.run_migrations()?;
            println!("Migrations applied.");
            return Ok(());
        }

        Command::LoadReference { dir } => {
            let _t = utils::Timer::start("load-reference");
            let repo = pipeline::open_repository(&config.database).await?;
            let (stocks, sectors) = loader::load_reference(&dir)?;
            if stocks.is_empty() && sectors.is_empty() {
                bail!("No {} or {} found in {:?}", loader::STOCKS_FILE, loader::SECTORS_FILE, dir);
            }
            let tz = config.schedule.tz()?;
            let now = chrono::Utc::now().with_timezone(&tz).naive_local();
            repo.upsert_stocks(&stocks, now)?;
            repo.upsert_sectors(&sectors, now)?;
            info!("Done: {} stocks, {} sectors", stocks.len(), sectors.len());
            return Ok(());
        }

        Command::Stats => {
            let repo = Repository::open_existing(&config.database.path)?;
            let s = repo.stats()?;
            let (from, to) = s.floorsheet_range;
            println!("─────────────────────────────────");
            println!("  NEPSE Feed — Database Stats");
            println!("─────────────────────────────────");
            println!("  Stocks         : {}", utils::fmt_number(s.stocks));
            println!("  Sectors        : {}", utils::fmt_number(s.sectors));
            println!("  News           : {} ({} scheduled)", utils::fmt_number(s.news), utils::fmt_number(s.news_scheduled));
            println!("  Announcements  : {}", utils::fmt_number(s.announcements));
            println!("  Index prices   : {}", utils::fmt_number(s.indices));
            println!("  EPS / PE       : {}", utils::fmt_number(s.eps));
            println!("  Floorsheet     : {}", utils::fmt_number(s.floorsheet));
            println!("    From         : {}", utils::fmt_date(from));
            println!("    To           : {}", utils::fmt_date(to));
            println!(
                "  Market         : {}",
                match s.market_open {
                    Some(true) => "open",
                    Some(false) => "closed",
                    None => "—",
                }
            );
            println!("  Job runs       : {}", utils::fmt_number(s.runs));
            for job in ["news", "announcements", "floorsheet", "indices", "market-status", "eps", "notify"] {
                if let Some((status, started)) = repo.last_run(job)? {
                    println!("    {:<13}: {} at {}", job, status, started);
                }
            }
            println!("─────────────────────────────────");
            return Ok(());
        }

        Command::Symbols => {
            let repo = Repository::open_existing(&config.database.path)?;
            let syms = repo.list_symbols()?;
            if syms.is_empty() {
                println!("No symbols — run `nepse-feed load-reference` first.");
            } else {
                println!("{} symbols:", syms.len());
                for s in &syms {
                    println!("  {}", s);
                }
            }
            return Ok(());
        }

        Command::Logs { source } => {
            let Some(path) = logging::log_path(&config.scrape.logs_dir, &source) else {
                bail!("Unknown log source {:?}; expected one of {}", source, logging::SOURCES.join(", "));
            };
            let content = std::fs::read_to_string(&path).with_context(|| format!("Could not read {:?}", path))?;
            print!("{}", content);
            return Ok(());
        }
    };

    let pipeline = Pipeline::open(config).await?;
    let stats = pipeline.run(&job).await?;
    info!("Done: {} — {}", job.name(), stats);
    Ok(())
}
