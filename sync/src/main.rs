use std::path::Path;

use anyhow::Result;
use log::info;

use bcb_sync::{sync_dataset, Batching, Config, Supabase, DATASETS};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // a local .env is optional, the variables may come from the environment
    if let Ok(path) = dotenvy::dotenv() {
        info!("loaded {}", path.display());
    }
    let config = Config::from_env()?;

    let store = Supabase::new(&config)?;
    let batching = Batching::default();

    for dataset in &DATASETS {
        let report = sync_dataset(&store, dataset, Path::new("."), &batching).await?;
        info!(
            "{}: {} rows in {} chunks",
            dataset.table, report.rows, report.chunks
        );
    }

    Ok(())
}
