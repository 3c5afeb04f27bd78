use serde::{Deserialize, Serialize};

use super::record::PointId;
use crate::error::ConfigError;

/// Sparse vector as parallel index/weight arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSparseVector")]
pub struct SparseVector {
    indices: Vec<u32>,
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct RawSparseVector {
    indices: Vec<u32>,
    values: Vec<f32>,
}

impl TryFrom<RawSparseVector> for SparseVector {
    type Error = ConfigError;

    fn try_from(raw: RawSparseVector) -> Result<Self, Self::Error> {
        Self::new(raw.indices, raw.values)
    }
}

impl SparseVector {
    /// Build a sparse vector, rejecting mismatched lengths and repeated indices.
    pub fn new(indices: Vec<u32>, values: Vec<f32>) -> Result<Self, ConfigError> {
        if indices.len() != values.len() {
            return Err(ConfigError::InvalidSparseVector(format!(
                "{} indices but {} values",
                indices.len(),
                values.len()
            )));
        }
        let mut seen = indices.clone();
        seen.sort_unstable();
        if let Some(pair) = seen.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::InvalidSparseVector(format!(
                "duplicate index {}",
                pair[0]
            )));
        }
        Ok(Self { indices, values })
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn into_parts(self) -> (Vec<u32>, Vec<f32>) {
        (self.indices, self.values)
    }

    /// Dot product over shared indices.
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .indices
            .iter()
            .zip(&small.values)
            .filter_map(|(idx, v)| {
                large
                    .indices
                    .iter()
                    .position(|o| o == idx)
                    .map(|pos| v * large.values[pos])
            })
            .sum()
    }
}

/// A dense or sparse vector, used both for stored points and for queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vector {
    Dense(Vec<f32>),
    Sparse(SparseVector),
}

impl Vector {
    pub fn kind(&self) -> &'static str {
        match self {
            Vector::Dense(_) => "dense",
            Vector::Sparse(_) => "sparse",
        }
    }
}

impl From<Vec<f32>> for Vector {
    fn from(v: Vec<f32>) -> Self {
        Vector::Dense(v)
    }
}

impl From<SparseVector> for Vector {
    fn from(v: SparseVector) -> Self {
        Vector::Sparse(v)
    }
}

/// A record with its named dense and sparse vectors, ready for upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedPoint {
    pub id: PointId,
    pub vectors: Vec<(String, Vector)>,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl EmbeddedPoint {
    pub fn new(id: PointId, payload: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            id,
            vectors: Vec::with_capacity(2),
            payload,
        }
    }

    pub fn with_vector(mut self, field: impl Into<String>, vector: impl Into<Vector>) -> Self {
        self.vectors.push((field.into(), vector.into()));
        self
    }

    pub fn vector(&self, field: &str) -> Option<&Vector> {
        self.vectors
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, v)| v)
    }
}
