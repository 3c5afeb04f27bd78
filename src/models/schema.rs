//! Collection schema declaration.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::point::{EmbeddedPoint, Vector};
use crate::error::ConfigError;

/// HNSW graph fan-out used once bulk loading is finished.
pub const DEFAULT_HNSW_M: u64 = 16;

/// Distance metric of a dense vector field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    #[default]
    Cosine,
    Dot,
    Euclid,
    Manhattan,
}

impl Distance {
    /// Whether larger scores mean closer matches.
    pub fn higher_is_better(self) -> bool {
        matches!(self, Distance::Cosine | Distance::Dot)
    }

    /// Score of `b` against `a` under this metric.
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Distance::Dot => a.iter().zip(b).map(|(x, y)| x * y).sum(),
            Distance::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    0.0
                } else {
                    dot / (na * nb)
                }
            }
            Distance::Euclid => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            Distance::Manhattan => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
        }
    }
}

impl std::str::FromStr for Distance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(Distance::Cosine),
            "dot" => Ok(Distance::Dot),
            "euclid" | "euclidean" => Ok(Distance::Euclid),
            "manhattan" => Ok(Distance::Manhattan),
            _ => Err(format!("unknown distance: {}", s)),
        }
    }
}

/// Dense vector field parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseField {
    pub size: u64,
    #[serde(default)]
    pub distance: Distance,
    /// Keep the full-precision vectors on disk.
    #[serde(default)]
    pub on_disk: bool,
}

/// Compressed representation kept next to the dense vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Quantization {
    #[default]
    None,
    Binary {
        #[serde(default)]
        always_ram: bool,
    },
    Scalar {
        #[serde(default)]
        always_ram: bool,
    },
}

impl Quantization {
    pub fn is_enabled(self) -> bool {
        !matches!(self, Quantization::None)
    }
}

/// Payload field types that can be indexed for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFieldType {
    Keyword,
    Integer,
    Float,
    Bool,
    Text,
}

impl std::str::FromStr for PayloadFieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keyword" => Ok(PayloadFieldType::Keyword),
            "integer" | "int" => Ok(PayloadFieldType::Integer),
            "float" => Ok(PayloadFieldType::Float),
            "bool" => Ok(PayloadFieldType::Bool),
            "text" => Ok(PayloadFieldType::Text),
            _ => Err(format!("unknown payload field type: {}", s)),
        }
    }
}

impl fmt::Display for PayloadFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayloadFieldType::Keyword => "keyword",
            PayloadFieldType::Integer => "integer",
            PayloadFieldType::Float => "float",
            PayloadFieldType::Bool => "bool",
            PayloadFieldType::Text => "text",
        };
        write!(f, "{}", name)
    }
}

/// Kind of a declared vector field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind<'a> {
    Dense(&'a DenseField),
    Sparse,
}

/// Collection layout, fixed at creation time except for `hnsw_m`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub vectors: BTreeMap<String, DenseField>,
    #[serde(default)]
    pub sparse_vectors: BTreeSet<String>,
    #[serde(default)]
    pub quantization: Quantization,
    pub shard_number: u32,
    pub replication_factor: u32,
    /// HNSW fan-out; 0 disables graph construction during bulk load.
    pub hnsw_m: u64,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vectors: BTreeMap::new(),
            sparse_vectors: BTreeSet::new(),
            quantization: Quantization::None,
            shard_number: 1,
            replication_factor: 1,
            hnsw_m: DEFAULT_HNSW_M,
        }
    }

    pub fn with_dense(mut self, name: impl Into<String>, size: u64, distance: Distance) -> Self {
        self.vectors.insert(
            name.into(),
            DenseField {
                size,
                distance,
                on_disk: false,
            },
        );
        self
    }

    pub fn with_sparse(mut self, name: impl Into<String>) -> Self {
        self.sparse_vectors.insert(name.into());
        self
    }

    pub fn with_quantization(mut self, quantization: Quantization) -> Self {
        self.quantization = quantization;
        self
    }

    pub fn with_hnsw_m(mut self, m: u64) -> Self {
        self.hnsw_m = m;
        self
    }

    pub fn field(&self, name: &str) -> Option<FieldKind<'_>> {
        if let Some(dense) = self.vectors.get(name) {
            return Some(FieldKind::Dense(dense));
        }
        self.sparse_vectors
            .contains(name)
            .then_some(FieldKind::Sparse)
    }

    /// Check a vector against the declared field: it must exist, be of the
    /// same kind, and match the dense dimension.
    pub fn check_vector(&self, field: &str, vector: &Vector) -> Result<(), ConfigError> {
        match (self.field(field), vector) {
            (None, _) => Err(ConfigError::UnknownField(field.to_string())),
            (Some(FieldKind::Dense(params)), Vector::Dense(v)) => {
                if v.len() as u64 != params.size {
                    return Err(ConfigError::DimensionMismatch {
                        field: field.to_string(),
                        expected: params.size as usize,
                        actual: v.len(),
                    });
                }
                Ok(())
            }
            (Some(FieldKind::Sparse), Vector::Sparse(_)) => Ok(()),
            (Some(FieldKind::Dense(_)), Vector::Sparse(_)) => Err(ConfigError::VectorKindMismatch {
                field: field.to_string(),
                expected: "dense",
            }),
            (Some(FieldKind::Sparse), Vector::Dense(_)) => Err(ConfigError::VectorKindMismatch {
                field: field.to_string(),
                expected: "sparse",
            }),
        }
    }

    pub fn check_point(&self, point: &EmbeddedPoint) -> Result<(), ConfigError> {
        point
            .vectors
            .iter()
            .try_for_each(|(field, vector)| self.check_vector(field, vector))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "collection name cannot be empty".to_string(),
            ));
        }
        if self.vectors.is_empty() && self.sparse_vectors.is_empty() {
            return Err(ConfigError::ValidationError(
                "collection needs at least one vector field".to_string(),
            ));
        }
        if let Some((name, _)) = self.vectors.iter().find(|(_, f)| f.size == 0) {
            return Err(ConfigError::ValidationError(format!(
                "dense field {} must have a non-zero size",
                name
            )));
        }
        if let Some(name) = self.vectors.keys().find(|n| self.sparse_vectors.contains(*n)) {
            return Err(ConfigError::ValidationError(format!(
                "field {} declared as both dense and sparse",
                name
            )));
        }
        if self.shard_number == 0 || self.replication_factor == 0 {
            return Err(ConfigError::ValidationError(
                "shard_number and replication_factor must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
