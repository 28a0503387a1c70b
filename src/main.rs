use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use oversold_screener::acquisition::SourceChain;
use oversold_screener::config::AppConfig;
use oversold_screener::scan::{ScanRunner, ScanTracker};
use oversold_screener::server::{self, ServerState};
use oversold_screener::storage::Repository;
use oversold_screener::universe;

#[derive(Parser)]
#[command(
    name = "oversold-screener",
    about = "Oversold-reversal equity screener",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server
    Serve,

    /// Run one scan over the symbol universe and exit
    Scan,

    /// Re-read the symbols file and add new symbols to the universe
    ReloadSymbols,

    /// List all stored symbols
    Symbols,

    /// Show database statistics
    Stats,

    /// Delete all stored scans, results and symbols
    Clear {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },

    /// Apply schema migrations without scanning
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "oversold_screener=info,warn",
        1 => "oversold_screener=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Serve => {
            let repo = open_repo(&config).await?;
            seed_universe_if_empty(&repo, &config).await?;
            let chain = Arc::new(SourceChain::from_config(&config.acquisition)?);
            let tracker = Arc::new(ScanTracker::new());
            let runner = Arc::new(ScanRunner::new(
                Arc::clone(&repo),
                chain,
                tracker,
                config.scan.clone(),
            ));
            let state = ServerState {
                repo,
                runner,
                universe: config.universe.clone(),
            };
            server::serve(state, &config.server).await?;
        }

        Command::Scan => {
            let repo = open_repo(&config).await?;
            seed_universe_if_empty(&repo, &config).await?;
            let chain = Arc::new(SourceChain::from_config(&config.acquisition)?);
            let tracker = Arc::new(ScanTracker::new());
            let runner = ScanRunner::new(Arc::clone(&repo), chain, tracker, config.scan.clone());
            let summary = runner.execute().await?;
            info!(
                "Done: scan {} over {} symbols ({} completed, {} skipped, {} errors)",
                summary.scan_id, summary.total, summary.completed, summary.skipped, summary.errors
            );
        }

        Command::ReloadSymbols => {
            let repo = open_repo(&config).await?;
            let symbols = universe::read_symbols_file(&config.universe.symbols_file)?;
            let added = repo.upsert_symbols(&symbols).await?;
            println!("{} symbols in file, {} newly added.", symbols.len(), added);
        }

        Command::Symbols => {
            let repo = open_repo(&config).await?;
            let syms = repo.list_symbols().await?;
            if syms.is_empty() {
                println!("No symbols — run `oversold-screener reload-symbols` first.");
            } else {
                println!("{} symbols:", syms.len());
                for s in &syms {
                    println!("  {}", s);
                }
            }
        }

        Command::Stats => {
            let repo = open_repo(&config).await?;
            let symbols = repo.symbol_count().await?;
            let scans = repo.scan_count().await?;
            let recommendations = repo.recommendation_count().await?;
            let logs = repo.log_count().await?;
            let latest = repo.latest_scan().await?;
            println!("──────────────────────────────────────");
            println!("  Oversold Screener — Database Stats");
            println!("──────────────────────────────────────");
            println!("  Symbols         : {}", symbols);
            println!("  Scans           : {}", scans);
            println!("  Recommendations : {}", recommendations);
            println!("  Log entries     : {}", logs);
            match latest {
                Some(scan) => println!(
                    "  Latest scan     : #{} {} ({} ok / {} skip / {} err)",
                    scan.id,
                    scan.status.as_str(),
                    scan.completed_count,
                    scan.skipped_count,
                    scan.error_count
                ),
                None => println!("  Latest scan     : —"),
            }
            println!("──────────────────────────────────────");
        }

        Command::Clear { yes } => {
            if !yes {
                println!("Refusing to wipe without --yes.");
                return Ok(());
            }
            let repo = open_repo(&config).await?;
            let cleared = repo.clear_all().await?;
            println!(
                "Cleared {} scans, {} symbols, {} fundamentals, {} technicals, {} recommendations, {} logs.",
                cleared.scans,
                cleared.symbols,
                cleared.fundamentals,
                cleared.technicals,
                cleared.recommendations,
                cleared.logs
            );
        }

        Command::Migrate => {
            let repo = Repository::open(&config.storage.db_path)?;
            repo.run_migrations().await?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

async fn open_repo(config: &AppConfig) -> Result<Arc<Repository>> {
    let repo = Repository::open(&config.storage.db_path)?;
    if config.storage.run_migrations {
        repo.run_migrations().await?;
    }
    Ok(Arc::new(repo))
}

/// Seed the universe from the symbols file on a fresh database so `serve`
/// and `scan` work out of the box. A missing file is not fatal; symbols can
/// still be loaded later through the API.
async fn seed_universe_if_empty(repo: &Arc<Repository>, config: &AppConfig) -> Result<()> {
    if repo.symbol_count().await? > 0 {
        return Ok(());
    }
    match universe::read_symbols_file(&config.universe.symbols_file) {
        Ok(symbols) if !symbols.is_empty() => {
            let added = repo.upsert_symbols(&symbols).await?;
            info!("Seeded universe with {} symbols", added);
        }
        Ok(_) => {}
        Err(e) => warn!("No universe seeded: {:#}", e),
    }
    Ok(())
}
