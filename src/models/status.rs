use serde::{Deserialize, Serialize};
use std::fmt;

/// Index build state of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    /// Waiting for optimization to start.
    Pending,
    /// Optimizers are running (segments being indexed).
    Building,
    /// Fully indexed ("green").
    Ready,
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexStatus::Pending => write!(f, "pending"),
            IndexStatus::Building => write!(f, "building"),
            IndexStatus::Ready => write!(f, "ready"),
        }
    }
}

/// Collection status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStatus {
    pub point_count: u64,
    pub index_status: IndexStatus,
}

impl CollectionStatus {
    pub fn is_ready(&self) -> bool {
        self.index_status == IndexStatus::Ready
    }
}
