mod batch;
mod embedding;
mod fusion;
mod index_build;
mod planner;
mod scheduler;
mod vector_store;

pub use batch::BatchProcessor;
pub use embedding::{EmbeddingProvider, HttpEmbeddingProvider};
pub use fusion::reciprocal_rank_fusion;
pub use index_build::IndexBuilder;
pub use planner::{QueryPlanner, SearchMode, SearchOptions};
pub use scheduler::{
    IngestReport, IngestionProgress, IngestionScheduler, ProgressSnapshot, SchedulerConfig,
};
pub use vector_store::{MemoryBackend, QdrantBackend, VectorStore, create_backend};
