//! Query planning: plain nearest-neighbour queries and multi-stage fusion.

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ConfigError, EmbeddingError, QueryError};
use crate::models::{
    CollectionConfig, CollectionSchema, Filter, FilterMode, FusionMethod, FusionQuery,
    QuantizationParams, QuerySpec, ScoredRecord, SearchConfig, VectorQuery,
};
use crate::services::{EmbeddingProvider, VectorStore, reciprocal_rank_fusion};

/// Which representations a text search uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Dense,
    Sparse,
    #[default]
    Hybrid,
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dense" => Ok(SearchMode::Dense),
            "sparse" => Ok(SearchMode::Sparse),
            "hybrid" => Ok(SearchMode::Hybrid),
            _ => Err(format!("unknown search mode: {}", s)),
        }
    }
}

/// Options for [`QueryPlanner::hybrid_search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub mode: SearchMode,
    pub limit: u64,
    /// Per-stage candidate count in hybrid mode.
    pub prefetch_limit: u64,
    pub filter: Option<Filter>,
    pub filter_mode: FilterMode,
    /// Applied to the dense stage only.
    pub quantization: Option<QuantizationParams>,
}

impl SearchOptions {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            mode: SearchMode::Hybrid,
            limit: config.default_limit,
            prefetch_limit: config.prefetch_limit,
            filter: None,
            filter_mode: FilterMode::PerStage,
            quantization: None,
        }
    }
}

/// Plans and runs queries against one collection.
pub struct QueryPlanner {
    store: Arc<dyn VectorStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    schema: CollectionSchema,
    dense_field: String,
    sparse_field: String,
    rrf_k: f64,
    require_ready_index: bool,
}

impl QueryPlanner {
    pub fn new(
        store: Arc<dyn VectorStore>,
        collection: &CollectionConfig,
        search: &SearchConfig,
    ) -> Self {
        Self {
            store,
            embedder: None,
            schema: collection.to_schema(),
            dense_field: collection.dense_field.clone(),
            sparse_field: collection.sparse_field.clone(),
            rrf_k: search.rrf_k,
            require_ready_index: search.require_ready_index,
        }
    }

    /// Attach the provider used to embed query text.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn collection(&self) -> &str {
        &self.schema.name
    }

    /// Run any query shape.
    pub async fn execute(&self, spec: &QuerySpec) -> Result<Vec<ScoredRecord>, QueryError> {
        match spec {
            QuerySpec::Plain(query) => self.plain_query(query).await,
            QuerySpec::Fusion(query) => self.fused_query(query).await,
        }
    }

    /// Single-stage search. Results are best-first and at most `limit` long.
    pub async fn plain_query(
        &self,
        query: &VectorQuery,
    ) -> Result<Vec<ScoredRecord>, QueryError> {
        self.check_stage(query)?;
        self.ensure_ready().await?;

        let mut hits = self.store.query(&self.schema.name, query).await?;
        hits.truncate(query.limit as usize);
        Ok(hits)
    }

    /// Multi-stage search fused client-side.
    ///
    /// All stages are issued concurrently; one failing stage fails the whole
    /// query. With [`FilterMode::PerStage`] the shared filter is added to
    /// every stage. With [`FilterMode::PostFusion`] stages run without it and
    /// the fused list is filtered locally before truncation, so fewer than
    /// `limit` results may come back.
    pub async fn fused_query(
        &self,
        query: &FusionQuery,
    ) -> Result<Vec<ScoredRecord>, QueryError> {
        if query.stages.is_empty() {
            return Err(ConfigError::EmptyStages.into());
        }
        check_limit(query.limit)?;
        let FusionMethod::Rrf { k } = query.method;
        if k.is_nan() || k <= 0.0 {
            return Err(invalid(format!("rrf k must be positive, got {k}")));
        }
        for stage in &query.stages {
            self.check_stage(stage)?;
        }

        let stages = match (&query.filter, query.filter_mode) {
            (Some(shared), FilterMode::PerStage) => query
                .stages
                .iter()
                .map(|stage| {
                    let mut stage = stage.clone();
                    stage.filter = Some(combine(stage.filter.take(), shared)?);
                    Ok(stage)
                })
                .collect::<Result<Vec<_>, QueryError>>()?,
            _ => query.stages.clone(),
        };

        self.ensure_ready().await?;

        let lists = try_join_all(
            stages
                .iter()
                .map(|stage| self.store.query(&self.schema.name, stage)),
        )
        .await?;
        debug!(
            stages = lists.len(),
            candidates = lists.iter().map(Vec::len).sum::<usize>(),
            "fusing stage results"
        );

        let mut fused = reciprocal_rank_fusion(&lists, k);
        if let (Some(filter), FilterMode::PostFusion) = (&query.filter, query.filter_mode) {
            fused.retain(|r| filter.matches(&r.payload));
        }
        fused.truncate(query.limit as usize);
        Ok(fused)
    }

    /// Embed `text` and search it according to `options.mode`.
    ///
    /// Hybrid mode prefetches `prefetch_limit` candidates from the dense and
    /// sparse fields and fuses them with RRF.
    pub async fn hybrid_search(
        &self,
        text: &str,
        options: &SearchOptions,
    ) -> Result<Vec<ScoredRecord>, QueryError> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or(EmbeddingError::NotConfigured("query embedding provider"))?;

        let dense_stage = |vector: Vec<f32>, limit: u64| {
            let mut stage = VectorQuery::new(&self.dense_field, vector, limit);
            stage.quantization = options.quantization;
            stage
        };

        match options.mode {
            SearchMode::Dense => {
                let vector = embedder.embed_dense(text).await?;
                self.plain_query(&with_filter(dense_stage(vector, options.limit), options))
                    .await
            }
            SearchMode::Sparse => {
                let vector = embedder.embed_sparse(text).await?;
                let stage = VectorQuery::new(&self.sparse_field, vector, options.limit);
                self.plain_query(&with_filter(stage, options)).await
            }
            SearchMode::Hybrid => {
                let (dense, sparse) =
                    tokio::try_join!(embedder.embed_dense(text), embedder.embed_sparse(text))?;
                let stages = vec![
                    dense_stage(dense, options.prefetch_limit),
                    VectorQuery::new(&self.sparse_field, sparse, options.prefetch_limit),
                ];
                let mut query = FusionQuery::new(stages, options.limit)
                    .with_method(FusionMethod::Rrf { k: self.rrf_k });
                if let Some(ref filter) = options.filter {
                    query = query.with_filter(filter.clone(), options.filter_mode);
                }
                self.fused_query(&query).await
            }
        }
    }

    fn check_stage(&self, stage: &VectorQuery) -> Result<(), QueryError> {
        check_limit(stage.limit)?;
        self.schema.check_vector(&stage.field, &stage.vector)?;
        if let Some(oversampling) = stage.quantization.and_then(|q| q.oversampling) {
            if oversampling < 1.0 {
                return Err(invalid(format!(
                    "oversampling must be at least 1.0, got {oversampling}"
                )));
            }
        }
        Ok(())
    }

    async fn ensure_ready(&self) -> Result<(), QueryError> {
        if !self.require_ready_index {
            return Ok(());
        }
        let status = self.store.collection_status(&self.schema.name).await?;
        if status.is_ready() {
            Ok(())
        } else {
            Err(QueryError::IndexNotReady {
                collection: self.schema.name.clone(),
                status: status.index_status,
            })
        }
    }
}

fn invalid(message: String) -> QueryError {
    ConfigError::ValidationError(message).into()
}

fn check_limit(limit: u64) -> Result<(), QueryError> {
    if limit == 0 {
        return Err(invalid("limit must be at least 1".to_string()));
    }
    Ok(())
}

/// Plain searches always filter at the store.
fn with_filter(mut stage: VectorQuery, options: &SearchOptions) -> VectorQuery {
    stage.filter = options.filter.clone();
    stage
}

/// Conjunction of a stage's own filter and the shared one.
fn combine(own: Option<Filter>, shared: &Filter) -> Result<Filter, QueryError> {
    let Some(mut own) = own else {
        return Ok(shared.clone());
    };
    if !own.should.is_empty() && !shared.should.is_empty() {
        return Err(invalid(
            "stage filter and shared filter both carry should clauses".to_string(),
        ));
    }
    own.must.extend(shared.must.iter().cloned());
    own.must_not.extend(shared.must_not.iter().cloned());
    if own.should.is_empty() {
        own.should = shared.should.clone();
    }
    Ok(own)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Condition, Distance, EmbeddedPoint, IndexStatus, PointId, Quantization, SparseVector,
    };
    use crate::services::MemoryBackend;
    use async_trait::async_trait;
    use serde_json::{Map, json};

    const COLLECTION: &str = "planner_test";

    fn collection() -> CollectionConfig {
        CollectionConfig {
            name: COLLECTION.to_string(),
            dense_size: 2,
            distance: Distance::Cosine,
            quantization: Quantization::None,
            ..Default::default()
        }
    }

    fn point(id: u64, dense: [f32; 2], terms: &[u32], lang: &str) -> EmbeddedPoint {
        let mut payload = Map::new();
        payload.insert("lang".to_string(), json!(lang));
        let sparse = SparseVector::new(terms.to_vec(), vec![1.0; terms.len()]).unwrap();
        EmbeddedPoint::new(PointId::Num(id), payload)
            .with_vector("dense", dense.to_vec())
            .with_vector("sparse", sparse)
    }

    async fn planner(search: SearchConfig) -> (Arc<MemoryBackend>, QueryPlanner) {
        planner_over(collection(), search).await
    }

    async fn planner_over(
        collection: CollectionConfig,
        search: SearchConfig,
    ) -> (Arc<MemoryBackend>, QueryPlanner) {
        let store = Arc::new(MemoryBackend::new().with_polls_until_ready(0));
        store.create_collection(&collection.to_schema()).await.unwrap();
        store
            .upsert(
                COLLECTION,
                vec![
                    point(1, [1.0, 0.0], &[10], "en"),
                    point(2, [0.8, 0.2], &[10, 20], "de"),
                    point(3, [0.0, 1.0], &[20], "en"),
                    point(4, [0.5, 0.5], &[30], "en"),
                ],
            )
            .await
            .unwrap();
        let planner = QueryPlanner::new(store.clone(), &collection, &search);
        (store, planner)
    }

    fn dense(v: [f32; 2], limit: u64) -> VectorQuery {
        VectorQuery::new("dense", v.to_vec(), limit)
    }

    fn sparse(terms: &[u32], limit: u64) -> VectorQuery {
        let v = SparseVector::new(terms.to_vec(), vec![1.0; terms.len()]).unwrap();
        VectorQuery::new("sparse", v, limit)
    }

    fn ids(hits: &[ScoredRecord]) -> Vec<PointId> {
        hits.iter().map(|h| h.id).collect()
    }

    #[tokio::test]
    async fn test_plain_query_respects_limit() {
        let (_, planner) = planner(SearchConfig::default()).await;
        let hits = planner.plain_query(&dense([1.0, 0.0], 2)).await.unwrap();
        assert_eq!(ids(&hits), vec![PointId::Num(1), PointId::Num(2)]);
    }

    #[tokio::test]
    async fn test_approximate_plain_query_respects_limit() {
        let binary = CollectionConfig {
            quantization: Quantization::Binary { always_ram: true },
            ..collection()
        };
        let (_, planner) = planner_over(binary, SearchConfig::default()).await;

        let query = dense([1.0, 0.0], 2).with_quantization(QuantizationParams::approximate());
        let hits = planner.plain_query(&query).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_fused_query_ranks_shared_candidates_first() {
        let (_, planner) = planner(SearchConfig::default()).await;
        let query = FusionQuery::new(vec![dense([1.0, 0.0], 3), sparse(&[20], 3)], 3);
        let hits = planner.fused_query(&query).await.unwrap();

        assert_eq!(hits.len(), 3);
        // 2 is ranked second by dense and first by sparse.
        assert_eq!(hits[0].id, PointId::Num(2));
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_execute_dispatches_on_shape() {
        let (_, planner) = planner(SearchConfig::default()).await;

        let plain = planner
            .execute(&QuerySpec::Plain(sparse(&[30], 5)))
            .await
            .unwrap();
        assert_eq!(ids(&plain), vec![PointId::Num(4)]);

        let fused = planner
            .execute(&QuerySpec::Fusion(FusionQuery::new(
                vec![dense([0.0, 1.0], 2), sparse(&[20], 2)],
                1,
            )))
            .await
            .unwrap();
        assert_eq!(ids(&fused), vec![PointId::Num(3)]);
    }

    #[tokio::test]
    async fn test_single_stage_fusion_keeps_order() {
        let (_, planner) = planner(SearchConfig::default()).await;
        let plain = planner.plain_query(&dense([1.0, 0.0], 4)).await.unwrap();
        let fused = planner
            .fused_query(&FusionQuery::new(vec![dense([1.0, 0.0], 4)], 4))
            .await
            .unwrap();
        assert_eq!(ids(&plain), ids(&fused));
    }

    #[tokio::test]
    async fn test_filter_modes_both_satisfy_filter() {
        let (_, planner) = planner(SearchConfig::default()).await;
        let filter = Filter::must([Condition::keyword("lang", "en")]);

        for mode in [FilterMode::PerStage, FilterMode::PostFusion] {
            let query = FusionQuery::new(vec![dense([1.0, 0.0], 4), sparse(&[10, 20], 4)], 4)
                .with_filter(filter.clone(), mode);
            let hits = planner.fused_query(&query).await.unwrap();
            assert!(!hits.is_empty());
            assert!(hits.iter().all(|h| h.payload["lang"] == "en"), "{mode:?}");
        }
    }

    #[tokio::test]
    async fn test_post_fusion_may_return_fewer() {
        let (_, planner) = planner(SearchConfig::default()).await;
        let filter = Filter::must([Condition::keyword("lang", "de")]);

        let post = FusionQuery::new(vec![dense([0.0, 1.0], 1)], 1)
            .with_filter(filter.clone(), FilterMode::PostFusion);
        assert!(planner.fused_query(&post).await.unwrap().is_empty());

        let per_stage = FusionQuery::new(vec![dense([0.0, 1.0], 1)], 1)
            .with_filter(filter, FilterMode::PerStage);
        let hits = planner.fused_query(&per_stage).await.unwrap();
        assert_eq!(ids(&hits), vec![PointId::Num(2)]);
    }

    #[tokio::test]
    async fn test_invalid_queries_rejected() {
        let (_, planner) = planner(SearchConfig::default()).await;

        let empty = FusionQuery::new(Vec::new(), 5);
        assert!(matches!(
            planner.fused_query(&empty).await,
            Err(QueryError::Config(ConfigError::EmptyStages))
        ));

        let wrong_kind = VectorQuery::new("sparse", vec![1.0, 0.0], 5);
        assert!(matches!(
            planner.plain_query(&wrong_kind).await,
            Err(QueryError::Config(ConfigError::VectorKindMismatch { .. }))
        ));

        assert!(matches!(
            planner.plain_query(&dense([1.0, 0.0], 0)).await,
            Err(QueryError::Config(_))
        ));

        let short = VectorQuery::new("dense", vec![1.0], 5);
        assert!(matches!(
            planner.plain_query(&short).await,
            Err(QueryError::Config(ConfigError::DimensionMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_index_not_ready() {
        let store = Arc::new(MemoryBackend::new().with_polls_until_ready(100));
        store.create_collection(&collection().to_schema()).await.unwrap();
        store.update_collection(COLLECTION, 16).await.unwrap();
        let planner = QueryPlanner::new(store, &collection(), &SearchConfig::default());

        let err = planner.plain_query(&dense([1.0, 0.0], 1)).await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::IndexNotReady {
                status: IndexStatus::Building,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_collection_is_retrieval_error() {
        let store = Arc::new(MemoryBackend::new());
        let search = SearchConfig {
            require_ready_index: false,
            ..Default::default()
        };
        let planner = QueryPlanner::new(store, &collection(), &search);
        let err = planner.plain_query(&dense([1.0, 0.0], 1)).await.unwrap_err();
        assert!(matches!(err, QueryError::Retrieval(_)));
    }

    struct AxisEmbedder;

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        async fn embed_dense_batch(
            &self,
            texts: &[String],
        ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        async fn embed_sparse_batch(
            &self,
            texts: &[String],
        ) -> Result<Vec<SparseVector>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|_| SparseVector::new(vec![20], vec![1.0]).unwrap())
                .collect())
        }
    }

    #[tokio::test]
    async fn test_hybrid_search_modes() {
        let (_, planner) = planner(SearchConfig::default()).await;
        let planner = planner.with_embedder(Arc::new(AxisEmbedder));
        let mut options = SearchOptions::from_config(&SearchConfig::default());
        options.limit = 2;

        options.mode = SearchMode::Dense;
        let hits = planner.hybrid_search("q", &options).await.unwrap();
        assert_eq!(hits[0].id, PointId::Num(1));

        options.mode = SearchMode::Sparse;
        let hits = planner.hybrid_search("q", &options).await.unwrap();
        assert_eq!(ids(&hits), vec![PointId::Num(2), PointId::Num(3)]);

        options.mode = SearchMode::Hybrid;
        let hits = planner.hybrid_search("q", &options).await.unwrap();
        assert_eq!(hits[0].id, PointId::Num(2));
    }

    #[tokio::test]
    async fn test_hybrid_search_without_embedder() {
        let (_, planner) = planner(SearchConfig::default()).await;
        let options = SearchOptions::from_config(&SearchConfig::default());
        assert!(matches!(
            planner.hybrid_search("q", &options).await,
            Err(QueryError::Embedding(EmbeddingError::NotConfigured(_)))
        ));
    }

    #[test]
    fn test_combine_filters() {
        let own = Filter::must([Condition::keyword("lang", "en")]);
        let shared = Filter::should([Condition::integer("year", 2020)]);
        let combined = combine(Some(own), &shared).unwrap();
        assert_eq!(combined.must.len(), 1);
        assert_eq!(combined.should.len(), 1);

        let clash = combine(Some(shared.clone()), &shared);
        assert!(clash.is_err());
    }
}
