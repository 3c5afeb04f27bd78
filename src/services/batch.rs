//! One unit of ingestion work: embed a batch and upsert it.

use std::sync::Arc;
use tracing::debug;

use crate::error::{EmbeddingError, IngestError};
use crate::models::{CollectionConfig, CollectionSchema, EmbeddedPoint, IdStrategy, Record};
use crate::services::{EmbeddingProvider, VectorStore};

/// Turns record batches into points and writes them with a single upsert.
pub struct BatchProcessor {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    schema: CollectionSchema,
    dense_field: String,
    sparse_field: String,
    id_strategy: IdStrategy,
}

impl BatchProcessor {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        collection: &CollectionConfig,
        id_strategy: IdStrategy,
    ) -> Self {
        Self {
            store,
            embedder,
            schema: collection.to_schema(),
            dense_field: collection.dense_field.clone(),
            sparse_field: collection.sparse_field.clone(),
            id_strategy,
        }
    }

    pub fn collection(&self) -> &str {
        &self.schema.name
    }

    /// Embed and upsert one batch. Returns the number of points written.
    ///
    /// Precomputed dense vectors are used as-is; only the remaining texts go
    /// to the dense model. Every text is sent to the sparse model.
    pub async fn process(&self, batch: u64, records: Vec<Record>) -> Result<usize, IngestError> {
        if records.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();

        let missing: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.dense.is_none())
            .map(|(i, _)| i)
            .collect();

        let computed = if missing.is_empty() {
            Vec::new()
        } else {
            let pending: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            self.embedder
                .embed_dense_batch(&pending)
                .await
                .map_err(|source| IngestError::Embedding { batch, source })?
        };
        check_count(batch, "dense", missing.len(), computed.len())?;

        let sparse = self
            .embedder
            .embed_sparse_batch(&texts)
            .await
            .map_err(|source| IngestError::Embedding { batch, source })?;
        check_count(batch, "sparse", records.len(), sparse.len())?;

        let mut computed = computed.into_iter();
        let mut points = Vec::with_capacity(records.len());
        for (record, sparse) in records.into_iter().zip(sparse) {
            let id = record.point_id(self.id_strategy);
            let dense = match record.dense {
                Some(dense) => dense,
                None => computed.next().ok_or_else(|| {
                    IngestError::Worker(format!("batch {batch}: dense embedding count mismatch"))
                })?,
            };
            let point = EmbeddedPoint::new(id, record.payload)
                .with_vector(&self.dense_field, dense)
                .with_vector(&self.sparse_field, sparse);
            self.schema
                .check_point(&point)
                .map_err(|source| IngestError::InvalidBatch { batch, source })?;
            points.push(point);
        }

        let count = points.len();
        self.store
            .upsert(&self.schema.name, points)
            .await
            .map_err(|source| IngestError::Upsert { batch, source })?;

        debug!(batch, points = count, "batch upserted");
        Ok(count)
    }
}

/// Providers must answer with exactly one vector per input text.
fn check_count(batch: u64, kind: &str, expected: usize, got: usize) -> Result<(), IngestError> {
    if expected == got {
        return Ok(());
    }
    Err(IngestError::Embedding {
        batch,
        source: EmbeddingError::InvalidResponse(format!(
            "expected {expected} {kind} embeddings, got {got}"
        )),
    })
}
