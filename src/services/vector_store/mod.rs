//! Vector store abstraction layer.
//!
//! The pipeline talks to the store only through [`VectorStore`], so the
//! Qdrant backend can be swapped for the in-process [`MemoryBackend`].

mod memory;
mod qdrant;

pub use memory::MemoryBackend;
pub use qdrant::QdrantBackend;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::VectorStoreError;
use crate::models::{
    CollectionSchema, CollectionStatus, EmbeddedPoint, PayloadFieldType, ScoredRecord,
    VectorDriver, VectorQuery, VectorStoreConfig,
};

/// Operations the ingestion and query paths need from a vector store.
///
/// Implementations must be safe to share between concurrent workers.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Check if the vector store is reachable.
    async fn health_check(&self) -> Result<bool, VectorStoreError>;

    async fn collection_exists(&self, collection: &str) -> Result<bool, VectorStoreError>;

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<(), VectorStoreError>;

    async fn delete_collection(&self, collection: &str) -> Result<(), VectorStoreError>;

    async fn create_payload_index(
        &self,
        collection: &str,
        field: &str,
        field_type: PayloadFieldType,
    ) -> Result<(), VectorStoreError>;

    /// Insert or overwrite points in a single call.
    async fn upsert(
        &self,
        collection: &str,
        points: Vec<EmbeddedPoint>,
    ) -> Result<(), VectorStoreError>;

    /// Nearest-neighbour search on one named vector field.
    async fn query(
        &self,
        collection: &str,
        query: &VectorQuery,
    ) -> Result<Vec<ScoredRecord>, VectorStoreError>;

    /// Change the HNSW graph fan-out (`m`).
    async fn update_collection(&self, collection: &str, hnsw_m: u64)
    -> Result<(), VectorStoreError>;

    async fn collection_status(&self, collection: &str)
    -> Result<CollectionStatus, VectorStoreError>;

    fn driver(&self) -> VectorDriver;
}

/// Create a vector store backend based on configuration.
pub fn create_backend(
    config: &VectorStoreConfig,
) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
    match config.driver {
        VectorDriver::Qdrant => Ok(Arc::new(QdrantBackend::new(config)?)),
        VectorDriver::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_memory_backend() {
        let config = VectorStoreConfig {
            driver: VectorDriver::Memory,
            ..Default::default()
        };
        let store = create_backend(&config).unwrap();
        assert_eq!(store.driver(), VectorDriver::Memory);
    }

    #[test]
    fn test_create_qdrant_backend() {
        let store = create_backend(&VectorStoreConfig::default()).unwrap();
        assert_eq!(store.driver(), VectorDriver::Qdrant);
    }
}
