//! In-process vector store.
//!
//! Scores exactly by the declared metric. When the collection is quantized,
//! queries first rank candidates by a compressed approximation (sign bits for
//! binary, 8-bit buckets for scalar), fetch `limit * oversampling` of them,
//! and optionally re-score those with the full vectors. After the graph is
//! enabled with `m > 0` the collection reports `building` for a configurable
//! number of status reads before turning `ready`.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::VectorStore;
use crate::error::VectorStoreError;
use crate::models::{
    CollectionSchema, CollectionStatus, DenseField, EmbeddedPoint, FieldKind, IndexStatus,
    PayloadFieldType, PointId, Quantization, QuantizationParams, ScoredRecord, Vector,
    VectorDriver, VectorQuery,
};

const DEFAULT_POLLS_UNTIL_READY: u32 = 2;

struct MemoryCollection {
    schema: CollectionSchema,
    points: BTreeMap<PointId, EmbeddedPoint>,
    payload_indexes: BTreeMap<String, PayloadFieldType>,
    index_status: IndexStatus,
    polls_remaining: u32,
    upserts: Vec<Vec<PointId>>,
}

/// Vector store held entirely in memory.
pub struct MemoryBackend {
    collections: RwLock<HashMap<String, MemoryCollection>>,
    polls_until_ready: u32,
    upsert_delay: Option<Duration>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            polls_until_ready: DEFAULT_POLLS_UNTIL_READY,
            upsert_delay: None,
        }
    }

    /// Number of status reads spent in `building` after the graph is enabled.
    pub fn with_polls_until_ready(mut self, polls: u32) -> Self {
        self.polls_until_ready = polls;
        self
    }

    /// Sleep before applying every upsert.
    pub fn with_upsert_delay(mut self, delay: Duration) -> Self {
        self.upsert_delay = Some(delay);
        self
    }

    /// Point ids of every upsert call, in the order the calls were applied.
    pub async fn upsert_log(&self, collection: &str) -> Vec<Vec<PointId>> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.upserts.clone())
            .unwrap_or_default()
    }

    pub async fn payload_indexes(&self, collection: &str) -> BTreeMap<String, PayloadFieldType> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.payload_indexes.clone())
            .unwrap_or_default()
    }

    /// Current HNSW `m` of a collection.
    pub async fn hnsw_m(&self, collection: &str) -> Option<u64> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.schema.hnsw_m)
    }
}

fn not_found(collection: &str) -> VectorStoreError {
    VectorStoreError::CollectionNotFound(collection.to_string())
}

/// Order two scores so the best match sorts first.
fn rank(distance_higher_is_better: bool, a: f32, b: f32) -> Ordering {
    let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    if distance_higher_is_better {
        ord.reverse()
    } else {
        ord
    }
}

/// Fraction of dimensions whose sign agrees.
fn binary_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() {
        return 0.0;
    }
    let agree = a
        .iter()
        .zip(b)
        .filter(|(x, y)| (**x > 0.0) == (**y > 0.0))
        .count();
    agree as f32 / a.len() as f32
}

fn scalar_quantize(v: &[f32]) -> Vec<f32> {
    v.iter()
        .map(|x| (x.clamp(-1.0, 1.0) * 127.0).round() / 127.0)
        .collect()
}

fn search_dense(
    field: &DenseField,
    quantization: Quantization,
    params: QuantizationParams,
    query: &[f32],
    candidates: Vec<(&EmbeddedPoint, &[f32])>,
    limit: usize,
) -> Vec<(PointId, f32)> {
    let exact = |v: &[f32]| field.distance.score(query, v);
    let higher = field.distance.higher_is_better();

    if !quantization.is_enabled() || params.ignore {
        let mut scored: Vec<(PointId, f32)> =
            candidates.into_iter().map(|(p, v)| (p.id, exact(v))).collect();
        scored.sort_by(|a, b| rank(higher, a.1, b.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit);
        return scored;
    }

    let (approx_higher, approx): (bool, Box<dyn Fn(&[f32]) -> f32 + '_>) = match quantization {
        Quantization::Binary { .. } => (true, Box::new(|v: &[f32]| binary_similarity(query, v))),
        _ => {
            let quantized_query = scalar_quantize(query);
            (
                higher,
                Box::new(move |v: &[f32]| {
                    field.distance.score(&quantized_query, &scalar_quantize(v))
                }),
            )
        }
    };

    let mut scored: Vec<(PointId, &[f32], f32)> = candidates
        .into_iter()
        .map(|(p, v)| (p.id, v, approx(v)))
        .collect();
    scored.sort_by(|a, b| rank(approx_higher, a.2, b.2).then_with(|| a.0.cmp(&b.0)));

    if !params.rescore {
        return scored
            .into_iter()
            .take(limit)
            .map(|(id, _, score)| (id, score))
            .collect();
    }

    let oversampling = params.oversampling.unwrap_or(1.0).max(1.0);
    let fetch = ((limit as f64) * oversampling).ceil() as usize;
    let mut rescored: Vec<(PointId, f32)> = scored
        .into_iter()
        .take(fetch)
        .map(|(id, v, _)| (id, exact(v)))
        .collect();
    rescored.sort_by(|a, b| rank(higher, a.1, b.1).then_with(|| a.0.cmp(&b.0)));
    rescored.truncate(limit);
    rescored
}

#[async_trait]
impl VectorStore for MemoryBackend {
    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        Ok(true)
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, VectorStoreError> {
        Ok(self.collections.read().await.contains_key(collection))
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<(), VectorStoreError> {
        schema
            .validate()
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;

        let mut collections = self.collections.write().await;
        if collections.contains_key(&schema.name) {
            return Err(VectorStoreError::CollectionError(format!(
                "collection {} already exists",
                schema.name
            )));
        }
        collections.insert(
            schema.name.clone(),
            MemoryCollection {
                schema: schema.clone(),
                points: BTreeMap::new(),
                payload_indexes: BTreeMap::new(),
                index_status: IndexStatus::Ready,
                polls_remaining: 0,
                upserts: Vec::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), VectorStoreError> {
        self.collections
            .write()
            .await
            .remove(collection)
            .map(|_| ())
            .ok_or_else(|| not_found(collection))
    }

    async fn create_payload_index(
        &self,
        collection: &str,
        field: &str,
        field_type: PayloadFieldType,
    ) -> Result<(), VectorStoreError> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection))?;
        coll.payload_indexes.insert(field.to_string(), field_type);
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        points: Vec<EmbeddedPoint>,
    ) -> Result<(), VectorStoreError> {
        if let Some(delay) = self.upsert_delay {
            tokio::time::sleep(delay).await;
        }

        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection))?;

        for point in &points {
            coll.schema
                .check_point(point)
                .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;
        }

        coll.upserts.push(points.iter().map(|p| p.id).collect());
        for point in points {
            coll.points.insert(point.id, point);
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query: &VectorQuery,
    ) -> Result<Vec<ScoredRecord>, VectorStoreError> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| not_found(collection))?;
        let limit = query.limit as usize;

        let matching = coll.points.values().filter(|p| {
            query
                .filter
                .as_ref()
                .is_none_or(|f| f.matches(&p.payload))
        });

        let hits: Vec<(PointId, f32)> = match (coll.schema.field(&query.field), &query.vector) {
            (Some(FieldKind::Dense(field)), Vector::Dense(q)) => {
                if q.len() as u64 != field.size {
                    return Err(VectorStoreError::QueryError(format!(
                        "query vector for {} has {} dimensions, expected {}",
                        query.field,
                        q.len(),
                        field.size
                    )));
                }
                let candidates = matching
                    .filter_map(|p| match p.vector(&query.field) {
                        Some(Vector::Dense(v)) => Some((p, v.as_slice())),
                        _ => None,
                    })
                    .collect();
                search_dense(
                    field,
                    coll.schema.quantization,
                    query.quantization.unwrap_or_default(),
                    q,
                    candidates,
                    limit,
                )
            }
            (Some(FieldKind::Sparse), Vector::Sparse(q)) => {
                let mut scored: Vec<(PointId, f32)> = matching
                    .filter_map(|p| match p.vector(&query.field) {
                        Some(Vector::Sparse(v)) => {
                            let overlaps = v.indices().iter().any(|i| q.indices().contains(i));
                            overlaps.then(|| (p.id, q.dot(v)))
                        }
                        _ => None,
                    })
                    .collect();
                scored.sort_by(|a, b| rank(true, a.1, b.1).then_with(|| a.0.cmp(&b.0)));
                scored.truncate(limit);
                scored
            }
            (None, _) => {
                return Err(VectorStoreError::QueryError(format!(
                    "unknown vector field {}",
                    query.field
                )));
            }
            (Some(_), v) => {
                return Err(VectorStoreError::QueryError(format!(
                    "field {} does not accept {} vectors",
                    query.field,
                    v.kind()
                )));
            }
        };

        Ok(hits
            .into_iter()
            .filter_map(|(id, score)| {
                coll.points.get(&id).map(|p| ScoredRecord {
                    id,
                    score,
                    payload: p.payload.clone(),
                })
            })
            .collect())
    }

    async fn update_collection(
        &self,
        collection: &str,
        hnsw_m: u64,
    ) -> Result<(), VectorStoreError> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection))?;

        coll.schema.hnsw_m = hnsw_m;
        if hnsw_m > 0 {
            coll.polls_remaining = self.polls_until_ready;
            coll.index_status = if self.polls_until_ready == 0 {
                IndexStatus::Ready
            } else {
                IndexStatus::Building
            };
        }
        debug!(collection, hnsw_m, "updated collection");
        Ok(())
    }

    async fn collection_status(
        &self,
        collection: &str,
    ) -> Result<CollectionStatus, VectorStoreError> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection))?;

        if coll.index_status == IndexStatus::Building {
            coll.polls_remaining = coll.polls_remaining.saturating_sub(1);
            if coll.polls_remaining == 0 {
                coll.index_status = IndexStatus::Ready;
            }
        }

        Ok(CollectionStatus {
            point_count: coll.points.len() as u64,
            index_status: coll.index_status,
        })
    }

    fn driver(&self) -> VectorDriver {
        VectorDriver::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Condition, Distance, Filter, SparseVector};
    use serde_json::{Map, json};

    const COLLECTION: &str = "test";

    fn schema(quantization: Quantization) -> CollectionSchema {
        CollectionSchema::new(COLLECTION)
            .with_dense("dense", 3, Distance::Cosine)
            .with_sparse("sparse")
            .with_quantization(quantization)
            .with_hnsw_m(0)
    }

    fn point(id: u64, dense: Vec<f32>, lang: &str) -> EmbeddedPoint {
        let mut payload = Map::new();
        payload.insert("lang".to_string(), json!(lang));
        EmbeddedPoint::new(PointId::Num(id), payload)
            .with_vector("dense", dense)
            .with_vector(
                "sparse",
                SparseVector::new(vec![id as u32, 100], vec![1.0, 0.5]).unwrap(),
            )
    }

    async fn seeded(quantization: Quantization) -> MemoryBackend {
        let store = MemoryBackend::new();
        store.create_collection(&schema(quantization)).await.unwrap();
        store
            .upsert(
                COLLECTION,
                vec![
                    point(1, vec![1.0, 0.0, 0.0], "en"),
                    point(2, vec![0.9, 0.1, 0.0], "de"),
                    point(3, vec![0.0, 1.0, 0.0], "en"),
                    point(4, vec![-1.0, 0.0, 0.0], "en"),
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_exact_dense_query() {
        let store = seeded(Quantization::None).await;
        let q = VectorQuery::new("dense", vec![1.0, 0.0, 0.0], 2);
        let hits = store.query(COLLECTION, &q).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![PointId::Num(1), PointId::Num(2)]);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_filtered_query() {
        let store = seeded(Quantization::None).await;
        let q = VectorQuery::new("dense", vec![1.0, 0.0, 0.0], 10)
            .with_filter(Filter::must([Condition::keyword("lang", "en")]));
        let hits = store.query(COLLECTION, &q).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.payload["lang"] == "en"));
    }

    #[tokio::test]
    async fn test_sparse_query_requires_overlap() {
        let store = seeded(Quantization::None).await;
        let q = VectorQuery::new("sparse", SparseVector::new(vec![3], vec![2.0]).unwrap(), 10);
        let hits = store.query(COLLECTION, &q).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, PointId::Num(3));
        assert!((hits[0].score - 2.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_binary_rescore_restores_exact_order() {
        let store = seeded(Quantization::Binary { always_ram: true }).await;
        let query = vec![1.0, 0.05, 0.0];

        // Sign bits favour 2, exact cosine favours 1.
        let rescored = VectorQuery::new("dense", query.clone(), 1)
            .with_quantization(QuantizationParams::rescored(3.0));
        let exact = VectorQuery::new("dense", query, 1).with_quantization(QuantizationParams {
            ignore: true,
            ..Default::default()
        });

        let a = store.query(COLLECTION, &rescored).await.unwrap();
        let b = store.query(COLLECTION, &exact).await.unwrap();
        assert_eq!(a[0].id, b[0].id);
        assert!((a[0].score - b[0].score).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_approximate_scores_are_sign_agreement() {
        let store = seeded(Quantization::Binary { always_ram: true }).await;
        let q = VectorQuery::new("dense", vec![1.0, 0.0, 0.0], 4)
            .with_quantization(QuantizationParams::approximate());
        let hits = store.query(COLLECTION, &q).await.unwrap();
        assert_eq!(hits.len(), 4);
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
        assert_eq!(hits[0].id, PointId::Num(1));
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[3].id, PointId::Num(3));
    }

    #[tokio::test]
    async fn test_approximate_query_truncates_to_limit() {
        let store = seeded(Quantization::Binary { always_ram: true }).await;
        let q = VectorQuery::new("dense", vec![1.0, 0.0, 0.0], 2)
            .with_quantization(QuantizationParams::approximate());
        let hits = store.query(COLLECTION, &q).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, PointId::Num(1));
    }

    #[tokio::test]
    async fn test_wrong_kind_rejected() {
        let store = seeded(Quantization::None).await;
        let q = VectorQuery::new("sparse", vec![1.0, 0.0, 0.0], 1);
        assert!(matches!(
            store.query(COLLECTION, &q).await,
            Err(VectorStoreError::QueryError(_))
        ));
    }

    #[tokio::test]
    async fn test_index_status_advances_after_enable() {
        let store = MemoryBackend::new().with_polls_until_ready(3);
        store.create_collection(&schema(Quantization::None)).await.unwrap();

        assert!(store.collection_status(COLLECTION).await.unwrap().is_ready());
        store.update_collection(COLLECTION, 16).await.unwrap();
        assert_eq!(store.hnsw_m(COLLECTION).await, Some(16));

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(store.collection_status(COLLECTION).await.unwrap().index_status);
        }
        assert_eq!(
            seen,
            vec![IndexStatus::Building, IndexStatus::Building, IndexStatus::Ready]
        );
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_id() {
        let store = seeded(Quantization::None).await;
        store
            .upsert(COLLECTION, vec![point(1, vec![0.0, 0.0, 1.0], "fr")])
            .await
            .unwrap();
        let status = store.collection_status(COLLECTION).await.unwrap();
        assert_eq!(status.point_count, 4);
        assert_eq!(store.upsert_log(COLLECTION).await.len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_rejects_dimension_mismatch() {
        let store = seeded(Quantization::None).await;
        let err = store
            .upsert(COLLECTION, vec![point(9, vec![1.0], "en")])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::UpsertError(_)));
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let store = MemoryBackend::new();
        assert!(!store.collection_exists("nope").await.unwrap());
        assert!(matches!(
            store.collection_status("nope").await,
            Err(VectorStoreError::CollectionNotFound(_))
        ));
    }
}
