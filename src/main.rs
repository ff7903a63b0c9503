use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use tailscan::checkpoint::{CheckpointStore, FileCheckpoints};
use tailscan::config::{PrintLevel, ScanConfig};
use tailscan::lifecycle::Scanner;
use tailscan::request::HttpFetcher;
use tailscan::store::{JsonlResultStore, ResultStore};
use tailscan::{info_time, logging, Error, Result};

#[derive(Debug, Parser)]
#[command(name = "tailscan", about = "Resumable descending ID-space scraper")]
struct Cli {
    /// Increase verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Only print warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,
    /// JSON-lines file holding assigned and unassigned results.
    #[arg(long, default_value = "results.jsonl", global = true)]
    results: PathBuf,
    /// JSON file holding scan checkpoints.
    #[arg(long, default_value = "checkpoints.json", global = true)]
    checkpoints: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan the ID space downwards from the checkpoint (or --start) to --floor.
    Scan(ScanArgs),
    /// Print how many assigned and unassigned IDs have been recorded.
    Report {
        /// Checkpoint key to show alongside the counts.
        #[arg(long, default_value = "tail")]
        scan_name: String,
    },
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// Search endpoint, queried with `?tdcj=<8-digit id>`.
    #[arg(long)]
    base_url: String,
    /// Tailmax to use when no checkpoint is stored yet.
    #[arg(long)]
    start: u64,
    /// Exclusive lower bound of the scan.
    #[arg(long, default_value_t = 0)]
    floor: u64,
    #[arg(long, default_value_t = 4)]
    workers: usize,
    #[arg(long, default_value_t = 50)]
    batch_size: u64,
    /// Base fetch timeout in milliseconds.
    #[arg(long, default_value_t = 1500)]
    base_wait_ms: u64,
    /// Range manager poll interval in milliseconds.
    #[arg(long, default_value_t = 1000)]
    poll_ms: u64,
    #[arg(long, default_value = "tail")]
    scan_name: String,
    /// Re-fetch IDs that already have a result.
    #[arg(long)]
    rescan_recorded: bool,
    /// Stop the whole scan on the first terminal fetch failure.
    #[arg(long)]
    halt_on_fetch_failure: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let print_level = if cli.quiet {
        PrintLevel::Quiet
    } else {
        PrintLevel::from_count(cli.verbose.saturating_add(1))
    };
    logging::init(print_level);

    let start_time = Local::now();
    let checkpoints = Arc::new(FileCheckpoints::open(&cli.checkpoints).await.map_err(Error::Checkpoint)?);
    let results = Arc::new(
        JsonlResultStore::open(&cli.results)
            .await
            .map_err(Error::ResultStore)?,
    );

    match cli.command {
        Command::Scan(args) => {
            let config = ScanConfig {
                workers: args.workers,
                batch_size: args.batch_size,
                queue_capacity: None,
                base_wait: Duration::from_millis(args.base_wait_ms),
                poll_interval: Duration::from_millis(args.poll_ms),
                floor: args.floor,
                start: args.start,
                scan_name: args.scan_name,
                print_level,
                skip_recorded: !args.rescan_recorded,
                halt_on_fetch_failure: args.halt_on_fetch_failure,
            };
            let fetcher = Arc::new(HttpFetcher::new(args.base_url)?);
            let scanner = Scanner::new(config, fetcher, checkpoints, results);
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            let report = scanner.run(shutdown).await?;
            if !report.stats.failed_ids.is_empty() {
                info_time!("Failed ids: {:?}", report.stats.failed_ids);
            }
            report.into_result()?;
        }
        Command::Report { scan_name } => {
            let counts = results.counts().await.map_err(Error::ResultStore)?;
            let checkpoint = checkpoints.get(&scan_name).await.map_err(Error::Checkpoint)?;
            println!("{} assigned ids scraped", counts.assigned);
            println!("{} unassigned ids scraped", counts.unassigned);
            match checkpoint {
                Some(tailmax) => println!("checkpoint '{scan_name}': {tailmax}"),
                None => println!("checkpoint '{scan_name}': none"),
            }
        }
    }

    info_time!(start_time, "Full program time:");
    Ok(())
}
