//! Post-load HNSW build.
//!
//! Collections are bulk-loaded with `m = 0` so no graph is maintained while
//! points stream in. Afterwards the graph is switched on and the collection
//! status is polled until the optimizers report it ready.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::IndexBuildError;
use crate::models::{CollectionStatus, DEFAULT_HNSW_M, IngestionConfig};
use crate::services::VectorStore;
use crate::utils::{PollConfig, PollOutcome, poll_until};

pub struct IndexBuilder {
    store: Arc<dyn VectorStore>,
    collection: String,
    hnsw_m: u64,
    poll: PollConfig,
}

impl IndexBuilder {
    pub fn new(store: Arc<dyn VectorStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            hnsw_m: DEFAULT_HNSW_M,
            poll: PollConfig::default(),
        }
    }

    pub fn from_config(
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        config: &IngestionConfig,
    ) -> Self {
        Self::new(store, collection).with_poll(
            PollConfig::new(Duration::from_secs(config.poll_interval_secs))
                .with_deadline(config.index_timeout_secs.map(Duration::from_secs)),
        )
    }

    pub fn with_hnsw_m(mut self, m: u64) -> Self {
        self.hnsw_m = m;
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Enable the graph and block until the collection is ready.
    ///
    /// Without a deadline this waits as long as the store keeps reporting a
    /// non-ready status; cancel the token to give up early.
    pub async fn enable_and_wait(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CollectionStatus, IndexBuildError> {
        self.store
            .update_collection(&self.collection, self.hnsw_m)
            .await?;
        info!(
            collection = %self.collection,
            m = self.hnsw_m,
            "enabled HNSW index, waiting for build"
        );

        let outcome = poll_until(
            &self.poll,
            cancel,
            || async {
                let status = self.store.collection_status(&self.collection).await?;
                info!(
                    collection = %self.collection,
                    points = status.point_count,
                    status = %status.index_status,
                    "index status"
                );
                Ok::<_, IndexBuildError>(status)
            },
            CollectionStatus::is_ready,
        )
        .await?;

        match outcome {
            PollOutcome::Ready { value, attempts } => {
                info!(
                    collection = %self.collection,
                    points = value.point_count,
                    attempts,
                    "index ready"
                );
                Ok(value)
            }
            PollOutcome::Cancelled { .. } => Err(IndexBuildError::Cancelled),
            PollOutcome::DeadlineExceeded { .. } => Err(IndexBuildError::DeadlineExceeded(
                self.poll.deadline.unwrap_or_default(),
            )),
        }
    }
}
