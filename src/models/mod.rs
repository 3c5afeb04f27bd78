mod config;
mod filter;
mod point;
mod query;
mod record;
mod schema;
mod status;

pub use config::{
    CollectionConfig, Config, DEFAULT_COLLECTION, DEFAULT_DENSE_FIELD, DEFAULT_DENSE_SIZE,
    DEFAULT_EMBEDDING_URL, DEFAULT_QDRANT_URL, DEFAULT_SPARSE_FIELD, EmbeddingConfig,
    IngestionConfig, OutputFormat, SearchConfig, VectorDriver, VectorStoreConfig,
};
pub use filter::{Condition, Filter, Match, MatchValue, Range};
pub use point::{EmbeddedPoint, SparseVector, Vector};
pub use query::{
    DEFAULT_RRF_K, FilterMode, FusionMethod, FusionQuery, QuantizationParams, QuerySpec,
    ScoredRecord, VectorQuery,
};
pub use record::{IdStrategy, PointId, Record};
pub use schema::{
    CollectionSchema, DEFAULT_HNSW_M, DenseField, Distance, FieldKind, PayloadFieldType,
    Quantization,
};
pub use status::{CollectionStatus, IndexStatus};
