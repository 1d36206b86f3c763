use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::warn;

use bcb_scraper::{update, Bcb, CheckpointStore, Mode};

/// Download the weekly statistics spreadsheets published by the BCB
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// full downloads whatever is missing, incremental only what is new since the last run
    #[arg(long, value_enum, default_value_t = Mode::Full)]
    mode: Mode,

    /// Download directory
    #[arg(long, default_value = "temporal")]
    folder: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let bcb = Bcb::new()?;
    let store = CheckpointStore::default();

    let summary = update(&bcb, &store, &args.folder, args.mode).await?;

    println!(
        "{} reports, {} saved, {} already present",
        summary.reports, summary.saved, summary.skipped
    );
    if !summary.errors.is_empty() {
        for error in &summary.errors {
            warn!("{} page {}: {}", error.category, error.page, error.cause);
        }
        println!("errors found: {}", summary.errors.len());
    }

    Ok(())
}
