use anyhow::Result;
use clap::Args;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::services::{IndexBuilder, create_backend};
use crate::utils::PollConfig;

#[derive(Debug, Args)]
pub struct BuildIndexArgs {
    #[arg(long, help = "HNSW m to enable (defaults to collection.hnsw_m)")]
    pub m: Option<u64>,

    #[arg(long, help = "Seconds between status polls")]
    pub interval: Option<u64>,

    #[arg(long, help = "Give up after this many seconds")]
    pub timeout: Option<u64>,
}

pub async fn handle_build_index(
    args: BuildIndexArgs,
    config: &Config,
    format: OutputFormat,
    _verbose: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let formatter = get_formatter(format);
    let store = create_backend(&config.vector_store)?;
    let name = config.collection.name.clone();

    if !store.collection_exists(&name).await? {
        anyhow::bail!("collection not found: {}", name);
    }

    let interval = args
        .interval
        .unwrap_or(config.ingestion.poll_interval_secs)
        .max(1);
    let deadline = args.timeout.or(config.ingestion.index_timeout_secs);
    let poll = PollConfig::new(Duration::from_secs(interval))
        .with_deadline(deadline.map(Duration::from_secs));

    let status = IndexBuilder::new(store, name.clone())
        .with_hnsw_m(args.m.unwrap_or(config.collection.hnsw_m))
        .with_poll(poll)
        .enable_and_wait(&cancel)
        .await?;

    print!("{}", formatter.format_collection_status(&name, &status));
    Ok(())
}
