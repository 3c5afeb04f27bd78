//! End-to-end ingestion and retrieval against the in-memory store.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use hybridload::error::{EmbeddingError, IngestError};
use hybridload::models::{
    CollectionConfig, Condition, Filter, FilterMode, IdStrategy, PointId, Quantization,
    QuantizationParams, SearchConfig, SparseVector, VectorQuery,
};
use hybridload::services::{
    BatchProcessor, EmbeddingProvider, IndexBuilder, IngestReport, IngestionScheduler,
    MemoryBackend, QueryPlanner, SchedulerConfig, SearchMode, SearchOptions, VectorStore,
};
use hybridload::sources::{Batcher, JsonlSource, RecordFields};
use hybridload::utils::PollConfig;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf29ce484222325, |h, b| {
        (h ^ u64::from(*b)).wrapping_mul(0x100000001b3)
    })
}

/// Deterministic embeddings: dense from a text-seeded xorshift stream,
/// sparse as hashed token counts.
struct HashEmbedder {
    dim: usize,
    poison: Option<&'static str>,
}

impl HashEmbedder {
    fn new(dim: usize) -> Self {
        Self { dim, poison: None }
    }

    fn failing_on(dim: usize, marker: &'static str) -> Self {
        Self {
            dim,
            poison: Some(marker),
        }
    }

    fn dense(&self, text: &str) -> Vec<f32> {
        let mut state = fnv1a(text.as_bytes()) | 1;
        (0..self.dim)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                ((state % 2001) as f32 / 1000.0) - 1.0
            })
            .collect()
    }

    fn sparse(text: &str) -> SparseVector {
        let mut weights: BTreeMap<u32, f32> = BTreeMap::new();
        for token in text.split_whitespace() {
            *weights.entry((fnv1a(token.as_bytes()) % 30_000) as u32).or_default() += 1.0;
        }
        let (indices, values) = weights.into_iter().unzip();
        SparseVector::new(indices, values).unwrap()
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_dense_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if let Some(marker) = self.poison
            && texts.iter().any(|t| t.contains(marker))
        {
            return Err(EmbeddingError::ServerError("model rejected input".to_string()));
        }
        Ok(texts.iter().map(|t| self.dense(t)).collect())
    }

    async fn embed_sparse_batch(
        &self,
        texts: &[String],
    ) -> Result<Vec<SparseVector>, EmbeddingError> {
        Ok(texts.iter().map(|t| Self::sparse(t)).collect())
    }
}

fn record_text(i: usize) -> String {
    format!("record {} about topic {}", i, i % 7)
}

fn jsonl(count: usize, poison_at: Option<usize>) -> String {
    (0..count)
        .map(|i| {
            let text = if poison_at == Some(i) {
                "poison".to_string()
            } else {
                record_text(i)
            };
            let category = if i % 2 == 0 { "a" } else { "b" };
            format!(
                "{{\"_id\": {}, \"text\": \"{}\", \"category\": \"{}\"}}\n",
                i, text, category
            )
        })
        .collect()
}

fn collection(name: &str, dim: u64, quantization: Quantization) -> CollectionConfig {
    CollectionConfig {
        name: name.to_string(),
        dense_size: dim,
        quantization,
        ..Default::default()
    }
}

struct Run {
    batch_size: usize,
    workers: usize,
    multiplier: usize,
}

async fn ingest(
    store: Arc<MemoryBackend>,
    embedder: Arc<HashEmbedder>,
    config: &CollectionConfig,
    data: String,
    run: Run,
    cancel: CancellationToken,
) -> Result<IngestReport, IngestError> {
    if !store.collection_exists(&config.name).await.unwrap() {
        store.create_collection(&config.to_schema()).await.unwrap();
    }
    let source = JsonlSource::new(Cursor::new(data), RecordFields::default());
    let batches = Batcher::new(source, NonZeroUsize::new(run.batch_size).unwrap());
    let processor = Arc::new(BatchProcessor::new(
        store,
        embedder,
        config,
        IdStrategy::Content,
    ));
    let scheduler = IngestionScheduler::new(
        processor,
        SchedulerConfig::new(
            NonZeroUsize::new(run.workers).unwrap(),
            NonZeroUsize::new(run.multiplier).unwrap(),
        ),
    );
    scheduler.run(batches, cancel).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_then_build_index() {
    let store = Arc::new(MemoryBackend::new().with_polls_until_ready(3));
    let config = collection("load", 16, Quantization::Binary { always_ram: true });
    let run = Run {
        batch_size: 100,
        workers: 4,
        multiplier: 2,
    };

    let report = ingest(
        store.clone(),
        Arc::new(HashEmbedder::new(16)),
        &config,
        jsonl(1000, None),
        run,
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.batches, 10);
    assert_eq!(report.points, 1000);
    assert!(report.peak_in_flight <= 8);
    assert_eq!(store.hnsw_m("load").await, Some(0));

    let status = IndexBuilder::new(store.clone(), "load")
        .with_hnsw_m(config.hnsw_m)
        .with_poll(PollConfig::new(Duration::from_millis(5)))
        .enable_and_wait(&CancellationToken::new())
        .await
        .unwrap();
    assert!(status.is_ready());
    assert_eq!(status.point_count, 1000);
    assert_eq!(store.hnsw_m("load").await, Some(config.hnsw_m));
}

#[tokio::test]
async fn test_rerun_with_content_ids_is_idempotent() {
    let store = Arc::new(MemoryBackend::new());
    let config = collection("rerun", 8, Quantization::None);
    let embedder = Arc::new(HashEmbedder::new(8));
    let run = || Run {
        batch_size: 25,
        workers: 2,
        multiplier: 2,
    };

    for _ in 0..2 {
        ingest(
            store.clone(),
            embedder.clone(),
            &config,
            jsonl(100, None),
            run(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    }
    let status = store.collection_status("rerun").await.unwrap();
    assert_eq!(status.point_count, 100);
}

#[tokio::test]
async fn test_single_worker_keeps_source_order() {
    let store = Arc::new(MemoryBackend::new());
    let config = collection("ordered", 8, Quantization::None);
    let run = Run {
        batch_size: 7,
        workers: 1,
        multiplier: 1,
    };

    ingest(
        store.clone(),
        Arc::new(HashEmbedder::new(8)),
        &config,
        jsonl(50, None),
        run,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let log = store.upsert_log("ordered").await;
    assert_eq!(log.len(), 8);
    assert!(log[..7].iter().all(|batch| batch.len() == 7));
    assert_eq!(log[7].len(), 1);

    let ids: Vec<PointId> = log.into_iter().flatten().collect();
    let expected: Vec<PointId> = (0..50).map(PointId::Num).collect();
    assert_eq!(ids, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_bounded_under_slow_upserts() {
    let store = Arc::new(MemoryBackend::new().with_upsert_delay(Duration::from_millis(5)));
    let config = collection("bounded", 8, Quantization::None);
    let run = Run {
        batch_size: 10,
        workers: 3,
        multiplier: 2,
    };

    let report = ingest(
        store,
        Arc::new(HashEmbedder::new(8)),
        &config,
        jsonl(300, None),
        run,
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.points, 300);
    assert!(report.peak_in_flight >= 1);
    assert!(report.peak_in_flight <= 6);
}

#[tokio::test]
async fn test_failed_batch_stops_the_run() {
    let store = Arc::new(MemoryBackend::new());
    let config = collection("failing", 8, Quantization::None);
    let run = Run {
        batch_size: 100,
        workers: 1,
        multiplier: 1,
    };

    let err = ingest(
        store.clone(),
        Arc::new(HashEmbedder::failing_on(8, "poison")),
        &config,
        jsonl(1000, Some(250)),
        run,
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, IngestError::Embedding { batch: 2, .. }));
    assert_eq!(store.upsert_log("failing").await.len(), 2);
    let status = store.collection_status("failing").await.unwrap();
    assert_eq!(status.point_count, 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_leaves_whole_batches() {
    let store = Arc::new(MemoryBackend::new().with_upsert_delay(Duration::from_millis(10)));
    let config = collection("cancelled", 8, Quantization::None);
    let run = Run {
        batch_size: 50,
        workers: 2,
        multiplier: 1,
    };
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(35)).await;
        trigger.cancel();
    });

    let err = ingest(
        store.clone(),
        Arc::new(HashEmbedder::new(8)),
        &config,
        jsonl(1000, None),
        run,
        cancel,
    )
    .await
    .unwrap_err();

    let IngestError::Cancelled { completed } = err else {
        panic!("expected cancellation, got {err:?}");
    };
    let log = store.upsert_log("cancelled").await;
    assert_eq!(log.len() as u64, completed);
    assert!(log.len() < 20);
    let status = store.collection_status("cancelled").await.unwrap();
    assert_eq!(status.point_count, completed * 50);
}

async fn searchable(name: &str, dim: u64, quantization: Quantization) -> QueryPlanner {
    let store = Arc::new(MemoryBackend::new());
    let embedder = Arc::new(HashEmbedder::new(dim as usize));
    let config = collection(name, dim, quantization);
    let run = Run {
        batch_size: 50,
        workers: 4,
        multiplier: 2,
    };
    ingest(
        store.clone(),
        embedder.clone(),
        &config,
        jsonl(300, None),
        run,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    QueryPlanner::new(store, &config, &SearchConfig::default()).with_embedder(embedder)
}

#[tokio::test]
async fn test_rescored_quantized_search_agrees_with_exact() {
    let planner = searchable("rescore", 64, Quantization::Binary { always_ram: true }).await;
    let query = HashEmbedder::new(64).dense(&record_text(42));

    let mut exact_query = VectorQuery::new("dense", query.clone(), 5);
    exact_query.quantization = Some(QuantizationParams {
        ignore: true,
        ..Default::default()
    });
    let exact = planner.plain_query(&exact_query).await.unwrap();

    let rescored = planner
        .plain_query(
            &VectorQuery::new("dense", query, 5)
                .with_quantization(QuantizationParams::rescored(3.0)),
        )
        .await
        .unwrap();

    assert_eq!(exact[0].id, PointId::Num(42));
    assert_eq!(rescored[0].id, exact[0].id);
    assert_eq!(rescored.len(), 5);
}

#[tokio::test]
async fn test_hybrid_search_honours_filter_in_both_modes() {
    let planner = searchable("filtered", 16, Quantization::None).await;
    let filter = Filter::must([Condition::keyword("category", "a")]);

    for mode in [FilterMode::PerStage, FilterMode::PostFusion] {
        let options = SearchOptions {
            mode: SearchMode::Hybrid,
            limit: 5,
            prefetch_limit: 20,
            filter: Some(filter.clone()),
            filter_mode: mode,
            quantization: None,
        };
        let hits = planner
            .hybrid_search("record 10 about topic 3", &options)
            .await
            .unwrap();

        assert!(hits.len() <= 5);
        assert!(
            hits.iter()
                .all(|h| h.payload.get("category").and_then(|v| v.as_str()) == Some("a")),
            "{mode:?} returned a hit outside the filter"
        );
        if mode == FilterMode::PerStage {
            assert_eq!(hits.len(), 5);
        }
    }
}

#[tokio::test]
async fn test_hybrid_search_finds_exact_text() {
    let planner = searchable("hybrid", 16, Quantization::None).await;
    let options = SearchOptions {
        limit: 3,
        ..SearchOptions::from_config(&SearchConfig::default())
    };

    let hits = planner
        .hybrid_search(&record_text(123), &options)
        .await
        .unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].id, PointId::Num(123));
}
