//! Retrieval request and result models.

use serde::{Deserialize, Serialize};

use super::filter::Filter;
use super::point::Vector;
use super::record::PointId;

/// Default RRF constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Search-time knobs for quantized vectors, set per stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationParams {
    /// Skip the quantized representation entirely.
    #[serde(default)]
    pub ignore: bool,
    /// Re-score the approximate top candidates with exact distances.
    #[serde(default = "default_rescore")]
    pub rescore: bool,
    /// Candidates fetched from the quantized index = `limit * oversampling`.
    #[serde(default)]
    pub oversampling: Option<f64>,
}

fn default_rescore() -> bool {
    true
}

impl Default for QuantizationParams {
    fn default() -> Self {
        Self {
            ignore: false,
            rescore: true,
            oversampling: None,
        }
    }
}

impl QuantizationParams {
    pub fn rescored(oversampling: f64) -> Self {
        Self {
            ignore: false,
            rescore: true,
            oversampling: Some(oversampling),
        }
    }

    pub fn approximate() -> Self {
        Self {
            ignore: false,
            rescore: false,
            oversampling: None,
        }
    }
}

/// A single-field nearest-neighbour query.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorQuery {
    /// Named vector field to search.
    pub field: String,
    pub vector: Vector,
    pub limit: u64,
    pub filter: Option<Filter>,
    pub quantization: Option<QuantizationParams>,
}

impl VectorQuery {
    pub fn new(field: impl Into<String>, vector: impl Into<Vector>, limit: u64) -> Self {
        Self {
            field: field.into(),
            vector: vector.into(),
            limit,
            filter: None,
            quantization: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_quantization(mut self, params: QuantizationParams) -> Self {
        self.quantization = Some(params);
        self
    }
}

/// How prefetch results are combined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum FusionMethod {
    /// Reciprocal Rank Fusion: `score = Σ 1 / (k + rank)`.
    Rrf { k: f64 },
}

impl Default for FusionMethod {
    fn default() -> Self {
        FusionMethod::Rrf { k: DEFAULT_RRF_K }
    }
}

/// Where a fused query's filter is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Push the filter into every prefetch stage.
    #[default]
    PerStage,
    /// Run stages unfiltered and drop non-matching candidates after fusion.
    PostFusion,
}

/// Prefetch stages merged by a fusion method.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionQuery {
    pub stages: Vec<VectorQuery>,
    pub method: FusionMethod,
    pub limit: u64,
    pub filter: Option<Filter>,
    pub filter_mode: FilterMode,
}

impl FusionQuery {
    pub fn new(stages: Vec<VectorQuery>, limit: u64) -> Self {
        Self {
            stages,
            method: FusionMethod::default(),
            limit,
            filter: None,
            filter_mode: FilterMode::PerStage,
        }
    }

    pub fn with_method(mut self, method: FusionMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_filter(mut self, filter: Filter, mode: FilterMode) -> Self {
        self.filter = Some(filter);
        self.filter_mode = mode;
        self
    }
}

/// A retrieval request.
#[derive(Debug, Clone, PartialEq)]
pub enum QuerySpec {
    Plain(VectorQuery),
    Fusion(FusionQuery),
}

/// A ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub id: PointId,
    pub score: f32,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantization_params_default_rescore() {
        let params: QuantizationParams = serde_json::from_str(r#"{"oversampling": 3.0}"#).unwrap();
        assert!(params.rescore);
        assert!(!params.ignore);
        assert_eq!(params.oversampling, Some(3.0));
    }

    #[test]
    fn test_fusion_query_builder() {
        let stage = VectorQuery::new("dense", vec![0.1, 0.2], 20)
            .with_quantization(QuantizationParams::approximate());
        let query = FusionQuery::new(vec![stage], 5)
            .with_filter(Filter::default(), FilterMode::PostFusion);
        assert_eq!(query.method, FusionMethod::Rrf { k: 60.0 });
        assert_eq!(query.filter_mode, FilterMode::PostFusion);
        assert!(!query.stages[0].quantization.unwrap().rescore);
    }
}
