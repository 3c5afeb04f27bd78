use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;
use std::time::Instant;

use crate::cli::output::{SearchResults, get_formatter};
use crate::models::{Config, Filter, FilterMode, OutputFormat, QuantizationParams};
use crate::services::{
    HttpEmbeddingProvider, QueryPlanner, SearchMode, SearchOptions, create_backend,
};

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[arg(required = true, help = "Search query text")]
    pub query: String,

    #[arg(long, short = 'm', default_value = "hybrid", help = "dense, sparse or hybrid")]
    pub mode: SearchMode,

    #[arg(long, short = 'n', help = "Maximum number of results to return")]
    pub limit: Option<u64>,

    #[arg(long, help = "Candidates per prefetch stage in hybrid mode")]
    pub prefetch_limit: Option<u64>,

    #[arg(long, help = "Search the quantized dense vectors")]
    pub quantized: bool,

    #[arg(long, requires = "quantized", help = "Skip rescoring with full vectors")]
    pub no_rescore: bool,

    #[arg(long, requires = "quantized", help = "Candidate oversampling factor")]
    pub oversampling: Option<f64>,

    #[arg(
        long,
        help = r#"Payload filter as JSON, e.g. '{"must":[{"key":"lang","match":{"value":"en"}}]}'"#
    )]
    pub filter: Option<String>,

    #[arg(long, requires = "filter", help = "Apply the filter after fusion")]
    pub post_filter: bool,
}

impl SearchArgs {
    fn options(&self, config: &Config) -> Result<SearchOptions> {
        let mut options = SearchOptions::from_config(&config.search);
        options.mode = self.mode;
        if let Some(limit) = self.limit {
            options.limit = limit;
        }
        if let Some(prefetch) = self.prefetch_limit {
            options.prefetch_limit = prefetch;
        }
        if options.limit == 0 || options.prefetch_limit == 0 {
            anyhow::bail!("limit must be at least 1");
        }

        if self.quantized {
            let oversampling = self.oversampling.unwrap_or(config.search.oversampling);
            options.quantization = Some(if self.no_rescore {
                QuantizationParams::approximate()
            } else {
                QuantizationParams::rescored(oversampling)
            });
        }

        if let Some(ref raw) = self.filter {
            let filter: Filter = serde_json::from_str(raw).context("invalid --filter JSON")?;
            options.filter = Some(filter);
            if self.post_filter {
                options.filter_mode = FilterMode::PostFusion;
            }
        }
        Ok(options)
    }
}

pub async fn handle_search(
    args: SearchArgs,
    config: &Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let query = args.query.trim();
    if query.is_empty() {
        anyhow::bail!("search query cannot be empty");
    }

    let options = args.options(config)?;
    let formatter = get_formatter(format);
    let start_time = Instant::now();

    if verbose {
        eprintln!("Query: \"{query}\"");
        eprintln!("  Mode: {:?}", options.mode);
        eprintln!("  Limit: {}", options.limit);
        if options.mode == SearchMode::Hybrid {
            eprintln!("  Prefetch: {}", options.prefetch_limit);
        }
        if let Some(ref q) = options.quantization {
            eprintln!("  Quantization: rescore={} oversampling={:?}", q.rescore, q.oversampling);
        }
        if options.filter.is_some() {
            eprintln!("  Filter mode: {:?}", options.filter_mode);
        }
    }

    let store = create_backend(&config.vector_store)?;
    let embedder = Arc::new(HttpEmbeddingProvider::new(&config.embedding)?);
    let planner =
        QueryPlanner::new(store, &config.collection, &config.search).with_embedder(embedder);

    let hits = planner
        .hybrid_search(query, &options)
        .await
        .context("search failed")?;

    let duration_ms = start_time.elapsed().as_millis() as u64;
    if verbose {
        eprintln!("Total: {duration_ms}ms");
        eprintln!();
    }

    let results = SearchResults {
        query: query.to_string(),
        mode: options.mode,
        hits,
        duration_ms,
    };
    print!("{}", formatter.format_search_results(&results));

    Ok(())
}
