//! Qdrant vector store backend implementation.

use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    BinaryQuantizationBuilder, Condition as QdrantCondition, CreateCollectionBuilder,
    CreateFieldIndexCollectionBuilder, Distance as QdrantDistance, FieldType,
    Filter as QdrantFilter, HnswConfigDiffBuilder, NamedVectors, PointId as QdrantPointId,
    PointStruct, QuantizationSearchParamsBuilder, QuantizationType, Query, QueryPointsBuilder,
    Range as QdrantRange, ScalarQuantizationBuilder, SearchParamsBuilder,
    SparseVectorParamsBuilder, SparseVectorsConfigBuilder, UpdateCollectionBuilder,
    UpsertPointsBuilder, Value as QdrantValue, Vector as QdrantVector, VectorInput,
    VectorParamsBuilder, VectorsConfigBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::VectorStore;
use crate::error::VectorStoreError;
use crate::models::{
    CollectionSchema, CollectionStatus, Condition, Distance, EmbeddedPoint, Filter, IndexStatus,
    MatchValue, PayloadFieldType, PointId, Quantization, ScoredRecord, Vector, VectorDriver,
    VectorQuery, VectorStoreConfig,
};

/// Qdrant vector store backend over gRPC.
pub struct QdrantBackend {
    client: Qdrant,
}

impl QdrantBackend {
    pub fn new(config: &VectorStoreConfig) -> Result<Self, VectorStoreError> {
        let mut builder =
            Qdrant::from_url(&config.url).timeout(Duration::from_secs(config.timeout_secs));

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        Ok(Self { client })
    }
}

/// Map a client error, surfacing deadline expiry as its own variant.
fn store_error(e: QdrantError, wrap: fn(String) -> VectorStoreError) -> VectorStoreError {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("deadline") || lower.contains("timed out") || lower.contains("timeout") {
        VectorStoreError::Timeout(msg)
    } else if lower.contains("not found") || lower.contains("doesn't exist") {
        VectorStoreError::CollectionNotFound(msg)
    } else {
        wrap(msg)
    }
}

fn to_qdrant_distance(distance: Distance) -> QdrantDistance {
    match distance {
        Distance::Cosine => QdrantDistance::Cosine,
        Distance::Dot => QdrantDistance::Dot,
        Distance::Euclid => QdrantDistance::Euclid,
        Distance::Manhattan => QdrantDistance::Manhattan,
    }
}

fn to_field_type(field_type: PayloadFieldType) -> FieldType {
    match field_type {
        PayloadFieldType::Keyword => FieldType::Keyword,
        PayloadFieldType::Integer => FieldType::Integer,
        PayloadFieldType::Float => FieldType::Float,
        PayloadFieldType::Bool => FieldType::Bool,
        PayloadFieldType::Text => FieldType::Text,
    }
}

fn to_qdrant_id(id: PointId) -> QdrantPointId {
    match id {
        PointId::Num(n) => n.into(),
        PointId::Uuid(u) => u.to_string().into(),
    }
}

fn from_qdrant_id(id: Option<QdrantPointId>) -> Option<PointId> {
    match id?.point_id_options? {
        PointIdOptions::Num(n) => Some(PointId::Num(n)),
        PointIdOptions::Uuid(u) => u.parse().ok().map(PointId::Uuid),
    }
}

fn to_qdrant_filter(filter: &Filter) -> QdrantFilter {
    let convert = |conditions: &[Condition]| -> Vec<QdrantCondition> {
        conditions.iter().map(to_qdrant_condition).collect()
    };
    QdrantFilter {
        must: convert(&filter.must),
        should: convert(&filter.should),
        must_not: convert(&filter.must_not),
        ..Default::default()
    }
}

fn to_qdrant_condition(condition: &Condition) -> QdrantCondition {
    let key = condition.key.clone();
    let matched = condition.matches.as_ref().map(|m| match &m.value {
        MatchValue::Bool(b) => QdrantCondition::matches(key.clone(), *b),
        MatchValue::Integer(i) => QdrantCondition::matches(key.clone(), *i),
        MatchValue::Keyword(s) => QdrantCondition::matches(key.clone(), s.clone()),
    });
    let ranged = condition.range.map(|r| {
        QdrantCondition::range(
            key.clone(),
            QdrantRange {
                lt: r.lt,
                gt: r.gt,
                gte: r.gte,
                lte: r.lte,
            },
        )
    });

    match (matched, ranged) {
        (Some(m), None) => m,
        (None, Some(r)) => r,
        (Some(m), Some(r)) => QdrantFilter::must([m, r]).into(),
        // Bare key: the field only has to be present.
        (None, None) => QdrantFilter::must_not([QdrantCondition::is_empty(key)]).into(),
    }
}

fn to_point_struct(point: EmbeddedPoint) -> Result<PointStruct, VectorStoreError> {
    let mut vectors = NamedVectors::default();
    for (name, vector) in point.vectors {
        let vector = match vector {
            Vector::Dense(v) => QdrantVector::new_dense(v),
            Vector::Sparse(s) => {
                let (indices, values) = s.into_parts();
                QdrantVector::new_sparse(indices, values)
            }
        };
        vectors = vectors.add_vector(name, vector);
    }

    let payload = Payload::try_from(Value::Object(point.payload))
        .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;

    Ok(PointStruct::new(to_qdrant_id(point.id), vectors, payload))
}

fn to_vector_input(vector: &Vector) -> VectorInput {
    match vector {
        Vector::Dense(v) => VectorInput::new_dense(v.clone()),
        Vector::Sparse(s) => VectorInput::new_sparse(s.indices().to_vec(), s.values().to_vec()),
    }
}

fn to_json(value: QdrantValue) -> Value {
    match value.kind {
        Some(Kind::NullValue(_)) | None => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::from(i),
        Some(Kind::DoubleValue(d)) => Value::from(d),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => Value::Array(list.values.into_iter().map(to_json).collect()),
        Some(Kind::StructValue(s)) => Value::Object(payload_to_json(s.fields)),
    }
}

fn payload_to_json(payload: HashMap<String, QdrantValue>) -> Map<String, Value> {
    payload.into_iter().map(|(k, v)| (k, to_json(v))).collect()
}

fn to_index_status(status: i32) -> Result<IndexStatus, VectorStoreError> {
    use qdrant_client::qdrant::CollectionStatus as Qs;

    match Qs::try_from(status) {
        Ok(Qs::Green) => Ok(IndexStatus::Ready),
        Ok(Qs::Yellow) => Ok(IndexStatus::Building),
        Ok(Qs::Grey) | Ok(Qs::UnknownCollectionStatus) => Ok(IndexStatus::Pending),
        Ok(Qs::Red) => Err(VectorStoreError::CollectionError(
            "collection reported red status (optimizer failure)".to_string(),
        )),
        Err(_) => Ok(IndexStatus::Pending),
    }
}

#[async_trait]
impl VectorStore for QdrantBackend {
    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.client
            .health_check()
            .await
            .map(|_| true)
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, VectorStoreError> {
        self.client
            .collection_exists(collection)
            .await
            .map_err(|e| store_error(e, VectorStoreError::CollectionError))
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<(), VectorStoreError> {
        let mut vectors = VectorsConfigBuilder::default();
        for (name, field) in &schema.vectors {
            vectors.add_named_vector_params(
                name,
                VectorParamsBuilder::new(field.size, to_qdrant_distance(field.distance))
                    .on_disk(field.on_disk),
            );
        }

        let mut builder = CreateCollectionBuilder::new(&schema.name)
            .vectors_config(vectors)
            .hnsw_config(HnswConfigDiffBuilder::default().m(schema.hnsw_m))
            .shard_number(schema.shard_number)
            .replication_factor(schema.replication_factor);

        if !schema.sparse_vectors.is_empty() {
            let mut sparse = SparseVectorsConfigBuilder::default();
            for name in &schema.sparse_vectors {
                sparse.add_named_vector_params(name, SparseVectorParamsBuilder::default());
            }
            builder = builder.sparse_vectors_config(sparse);
        }

        builder = match schema.quantization {
            Quantization::None => builder,
            Quantization::Binary { always_ram } => {
                builder.quantization_config(BinaryQuantizationBuilder::new(always_ram))
            }
            Quantization::Scalar { always_ram } => builder.quantization_config(
                ScalarQuantizationBuilder::default()
                    .r#type(QuantizationType::Int8.into())
                    .always_ram(always_ram),
            ),
        };

        self.client
            .create_collection(builder)
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;

        debug!(collection = %schema.name, hnsw_m = schema.hnsw_m, "created collection");
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), VectorStoreError> {
        self.client
            .delete_collection(collection)
            .await
            .map_err(|e| store_error(e, VectorStoreError::CollectionError))?;
        Ok(())
    }

    async fn create_payload_index(
        &self,
        collection: &str,
        field: &str,
        field_type: PayloadFieldType,
    ) -> Result<(), VectorStoreError> {
        let request =
            CreateFieldIndexCollectionBuilder::new(collection, field, to_field_type(field_type))
                .wait(true);

        self.client
            .create_field_index(request)
            .await
            .map_err(|e| store_error(e, VectorStoreError::PayloadIndexError))?;
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        points: Vec<EmbeddedPoint>,
    ) -> Result<(), VectorStoreError> {
        if points.is_empty() {
            return Ok(());
        }

        let points = points
            .into_iter()
            .map(to_point_struct)
            .collect::<Result<Vec<_>, _>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .map_err(|e| store_error(e, VectorStoreError::UpsertError))?;

        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query: &VectorQuery,
    ) -> Result<Vec<ScoredRecord>, VectorStoreError> {
        let mut builder = QueryPointsBuilder::new(collection)
            .query(Query::new_nearest(to_vector_input(&query.vector)))
            .using(&query.field)
            .limit(query.limit)
            .with_payload(true);

        if let Some(ref filter) = query.filter {
            builder = builder.filter(to_qdrant_filter(filter));
        }

        if let Some(params) = query.quantization {
            let mut quantization = QuantizationSearchParamsBuilder::default()
                .ignore(params.ignore)
                .rescore(params.rescore);
            if let Some(oversampling) = params.oversampling {
                quantization = quantization.oversampling(oversampling);
            }
            builder = builder.params(SearchParamsBuilder::default().quantization(quantization));
        }

        let response = self
            .client
            .query(builder)
            .await
            .map_err(|e| store_error(e, VectorStoreError::QueryError))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                Some(ScoredRecord {
                    id: from_qdrant_id(point.id)?,
                    score: point.score,
                    payload: payload_to_json(point.payload),
                })
            })
            .collect())
    }

    async fn update_collection(
        &self,
        collection: &str,
        hnsw_m: u64,
    ) -> Result<(), VectorStoreError> {
        let request = UpdateCollectionBuilder::new(collection)
            .hnsw_config(HnswConfigDiffBuilder::default().m(hnsw_m));

        self.client
            .update_collection(request)
            .await
            .map_err(|e| store_error(e, VectorStoreError::CollectionError))?;
        Ok(())
    }

    async fn collection_status(
        &self,
        collection: &str,
    ) -> Result<CollectionStatus, VectorStoreError> {
        let info = self
            .client
            .collection_info(collection)
            .await
            .map_err(|e| store_error(e, VectorStoreError::CollectionError))?
            .result
            .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.to_string()))?;

        Ok(CollectionStatus {
            point_count: info.points_count.unwrap_or(0),
            index_status: to_index_status(info.status)?,
        })
    }

    fn driver(&self) -> VectorDriver {
        VectorDriver::Qdrant
    }
}
