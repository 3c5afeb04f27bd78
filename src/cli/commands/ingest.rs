use anyhow::{Context, Result};
use clap::Args;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::collection::ensure_collection;
use crate::cli::output::{IngestSummary, get_formatter, ingest_progress_bar};
use crate::models::{Config, IdStrategy, OutputFormat};
use crate::services::{
    BatchProcessor, HttpEmbeddingProvider, IndexBuilder, IngestionProgress, IngestionScheduler,
    SchedulerConfig, create_backend,
};
use crate::sources::{Batcher, JsonlSource, RecordFields, RecordSource};

#[derive(Debug, Args)]
pub struct IngestArgs {
    #[arg(help = "JSONL file with one record per line, or '-' for stdin")]
    pub file: PathBuf,

    #[arg(long, short = 'n', help = "Stop after this many records")]
    pub limit: Option<usize>,

    #[arg(long, help = "Drop and recreate the collection before loading")]
    pub recreate: bool,

    #[arg(long, short = 'b', help = "Records per upsert batch")]
    pub batch_size: Option<usize>,

    #[arg(long, short = 'w', help = "Concurrent embed+upsert workers")]
    pub workers: Option<usize>,

    #[arg(long, help = "Batches in flight per worker")]
    pub inflight_multiplier: Option<usize>,

    #[arg(long = "ids", help = "Id strategy for records without an id: content or random")]
    pub id_strategy: Option<IdStrategy>,

    #[arg(long, help = "Leave indexing disabled after the load")]
    pub skip_index_build: bool,
}

impl IngestArgs {
    /// Fold command-line overrides into the loaded configuration.
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(batch_size) = self.batch_size {
            config.ingestion.batch_size = batch_size;
        }
        if let Some(workers) = self.workers {
            config.ingestion.max_workers = workers;
        }
        if let Some(multiplier) = self.inflight_multiplier {
            config.ingestion.max_inflight_multiplier = multiplier;
        }
        if let Some(strategy) = self.id_strategy {
            config.ingestion.id_strategy = strategy;
        }
        config.validate()?;
        Ok(())
    }

    fn open_source(&self, fields: RecordFields) -> Result<Box<dyn RecordSource>> {
        let source: Box<dyn RecordSource> = if self.file.as_os_str() == "-" {
            Box::new(apply_limit(JsonlSource::stdin(fields), self.limit))
        } else {
            let source = JsonlSource::open(&self.file, fields)
                .with_context(|| format!("failed to open {}", self.file.display()))?;
            Box::new(apply_limit(source, self.limit))
        };
        Ok(source)
    }
}

fn apply_limit<R>(source: JsonlSource<R>, limit: Option<usize>) -> JsonlSource<R>
where
    R: std::io::BufRead,
{
    match limit {
        Some(limit) => source.take_records(limit),
        None => source,
    }
}

pub async fn handle_ingest(
    args: IngestArgs,
    config: &Config,
    format: OutputFormat,
    verbose: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let mut config = config.clone();
    args.apply(&mut config)?;
    let formatter = get_formatter(format);

    let store = create_backend(&config.vector_store)?;
    if !store.health_check().await.unwrap_or(false) {
        anyhow::bail!(
            "vector store not reachable at {} ({})",
            config.vector_store.url,
            config.vector_store.driver
        );
    }
    let embedder = Arc::new(HttpEmbeddingProvider::new(&config.embedding)?);

    if ensure_collection(store.as_ref(), &config.collection, args.recreate).await? {
        info!(collection = %config.collection.name, "collection ready for bulk load");
    } else {
        warn!(
            collection = %config.collection.name,
            "collection exists; loading into it as-is"
        );
    }

    let source = args.open_source(RecordFields::from(&config.ingestion))?;
    let batch_size = NonZeroUsize::new(config.ingestion.batch_size)
        .context("ingestion.batch_size must be at least 1")?;
    let batches = Batcher::new(source, batch_size);

    let processor = Arc::new(BatchProcessor::new(
        store.clone(),
        embedder,
        &config.collection,
        config.ingestion.id_strategy,
    ));
    let progress = Arc::new(IngestionProgress::new());
    let scheduler = IngestionScheduler::new(
        processor,
        SchedulerConfig::try_from(&config.ingestion)?,
    )
    .with_progress(progress.clone());

    let show_progress = format == OutputFormat::Text && !verbose;
    let ticker = show_progress.then(|| spawn_progress_ticker(progress, args.limit));

    let result = scheduler.run(batches, cancel.clone()).await;

    if let Some((stop, handle)) = ticker {
        stop.cancel();
        let _ = handle.await;
    }
    let report = result?;

    let index = if args.skip_index_build {
        None
    } else {
        let builder = IndexBuilder::from_config(
            store.clone(),
            config.collection.name.clone(),
            &config.ingestion,
        )
        .with_hnsw_m(config.collection.hnsw_m);
        Some(builder.enable_and_wait(&cancel).await?)
    };

    let summary = IngestSummary {
        collection: config.collection.name.clone(),
        report,
        index,
    };
    print!("{}", formatter.format_ingest(&summary));
    Ok(())
}

/// Mirror the scheduler's counters onto a progress bar until `stop` fires.
fn spawn_progress_ticker(
    progress: Arc<IngestionProgress>,
    limit: Option<usize>,
) -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let stop = CancellationToken::new();
    let token = stop.clone();
    let handle = tokio::spawn(async move {
        let pb = ingest_progress_bar(limit.map(|l| l as u64));
        let mut ticks = tokio::time::interval(Duration::from_millis(200));
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticks.tick() => {
                    let snapshot = progress.snapshot();
                    pb.set_position(snapshot.points);
                    pb.set_message(format!("{} batches in flight", snapshot.in_flight));
                }
            }
        }
        let snapshot = progress.snapshot();
        pb.set_position(snapshot.points);
        pb.finish_and_clear();
    });
    (stop, handle)
}
