use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use super::query::DEFAULT_RRF_K;
use super::record::IdStrategy;
use super::schema::{
    CollectionSchema, DEFAULT_HNSW_M, DenseField, Distance, PayloadFieldType, Quantization,
};
use crate::error::ConfigError;

pub const DEFAULT_EMBEDDING_URL: &str = "http://localhost:11411";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_COLLECTION: &str = "dbpedia_entities_openai3";
pub const DEFAULT_DENSE_FIELD: &str = "dense";
pub const DEFAULT_SPARSE_FIELD: &str = "sparse";
pub const DEFAULT_DENSE_SIZE: u64 = 1536;

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub collection: CollectionConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("hybridload").join("config.toml"))
    }

    /// Load the file (explicit path, else the default location if present),
    /// apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Override fields from environment variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("QDRANT_HOST") {
            self.vector_store.url = url;
        }
        if let Some(key) = lookup("QDRANT_API_KEY") {
            self.vector_store.api_key = Some(key);
        }
        if let Some(name) = lookup("COLLECTION_NAME") {
            self.collection.name = name;
        }
        if let Some(url) = lookup("EMBEDDING_URL") {
            self.embedding.url = url;
        }
        if let Some(url) = lookup("SPARSE_EMBEDDING_URL") {
            self.embedding.sparse_url = Some(url);
        }
        set_parsed(&lookup, "BATCH_SIZE", &mut self.ingestion.batch_size)?;
        set_parsed(&lookup, "MAX_WORKERS", &mut self.ingestion.max_workers)?;
        set_parsed(
            &lookup,
            "MAX_INFLIGHT_MULTIPLIER",
            &mut self.ingestion.max_inflight_multiplier,
        )?;
        set_parsed(&lookup, "SHARD_NUMBER", &mut self.collection.shard_number)?;
        set_parsed(
            &lookup,
            "REPLICATION_FACTOR",
            &mut self.collection.replication_factor,
        )?;
        set_parsed(&lookup, "RRF_K", &mut self.search.rrf_k)?;
        set_parsed(&lookup, "OVERSAMPLING", &mut self.search.oversampling)?;
        Ok(())
    }

    /// Range-check every numeric field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(bool, &str); 11] = [
            (self.ingestion.batch_size >= 1, "ingestion.batch_size must be at least 1"),
            (self.ingestion.max_workers >= 1, "ingestion.max_workers must be at least 1"),
            (
                self.ingestion.max_inflight_multiplier >= 1,
                "ingestion.max_inflight_multiplier must be at least 1",
            ),
            (
                self.ingestion.poll_interval_secs >= 1,
                "ingestion.poll_interval_secs must be at least 1",
            ),
            (self.embedding.batch_size >= 1, "embedding.batch_size must be at least 1"),
            (self.embedding.timeout_secs >= 1, "embedding.timeout_secs must be at least 1"),
            (self.collection.dense_size >= 1, "collection.dense_size must be at least 1"),
            (self.collection.hnsw_m >= 1, "collection.hnsw_m must be at least 1"),
            (
                self.search.rrf_k.is_finite() && self.search.rrf_k > 0.0,
                "search.rrf_k must be positive",
            ),
            (
                self.search.oversampling.is_finite() && self.search.oversampling >= 1.0,
                "search.oversampling must be at least 1.0",
            ),
            (
                self.search.default_limit >= 1 && self.search.prefetch_limit >= 1,
                "search limits must be at least 1",
            ),
        ];

        if let Some((_, message)) = checks.iter().find(|(ok, _)| !ok) {
            return Err(ConfigError::ValidationError((*message).to_string()));
        }
        if self.collection.dense_field == self.collection.sparse_field {
            return Err(ConfigError::ValidationError(
                "dense_field and sparse_field must differ".to_string(),
            ));
        }

        self.collection.to_schema().validate()
    }
}

fn set_parsed<F, T>(lookup: &F, var: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    if let Some(raw) = lookup(var) {
        *target = raw.trim().parse().map_err(|e: T::Err| ConfigError::Env {
            var: var.to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(())
}

/// Vector store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorDriver {
    #[default]
    Qdrant,
    /// In-process store, for dry runs and tests.
    Memory,
}

impl fmt::Display for VectorDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorDriver::Qdrant => write!(f, "qdrant"),
            VectorDriver::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub driver: VectorDriver,

    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

fn default_qdrant_url() -> String {
    DEFAULT_QDRANT_URL.to_string()
}

fn default_store_timeout() -> u64 {
    30
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            driver: VectorDriver::default(),
            url: default_qdrant_url(),
            api_key: None,
            timeout_secs: default_store_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default = "default_collection")]
    pub name: String,

    #[serde(default = "default_dense_field")]
    pub dense_field: String,

    #[serde(default = "default_dense_size")]
    pub dense_size: u64,

    #[serde(default)]
    pub distance: Distance,

    #[serde(default = "default_true")]
    pub on_disk: bool,

    #[serde(default = "default_sparse_field")]
    pub sparse_field: String,

    #[serde(default = "default_quantization")]
    pub quantization: Quantization,

    #[serde(default = "default_one")]
    pub shard_number: u32,

    #[serde(default = "default_one")]
    pub replication_factor: u32,

    /// Graph fan-out enabled after bulk load.
    #[serde(default = "default_hnsw_m")]
    pub hnsw_m: u64,

    /// Payload fields to index at collection creation.
    #[serde(default)]
    pub payload_indexes: BTreeMap<String, PayloadFieldType>,
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_dense_field() -> String {
    DEFAULT_DENSE_FIELD.to_string()
}

fn default_sparse_field() -> String {
    DEFAULT_SPARSE_FIELD.to_string()
}

fn default_dense_size() -> u64 {
    DEFAULT_DENSE_SIZE
}

fn default_quantization() -> Quantization {
    Quantization::Binary { always_ram: true }
}

fn default_hnsw_m() -> u64 {
    DEFAULT_HNSW_M
}

fn default_one() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            name: default_collection(),
            dense_field: default_dense_field(),
            dense_size: default_dense_size(),
            distance: Distance::Cosine,
            on_disk: true,
            sparse_field: default_sparse_field(),
            quantization: default_quantization(),
            shard_number: 1,
            replication_factor: 1,
            hnsw_m: default_hnsw_m(),
            payload_indexes: BTreeMap::new(),
        }
    }
}

impl CollectionConfig {
    /// Schema used for bulk loading: graph construction disabled (`m = 0`).
    pub fn to_schema(&self) -> CollectionSchema {
        let mut schema = CollectionSchema::new(&self.name)
            .with_sparse(&self.sparse_field)
            .with_quantization(self.quantization)
            .with_hnsw_m(0);
        schema.vectors.insert(
            self.dense_field.clone(),
            DenseField {
                size: self.dense_size,
                distance: self.distance,
                on_disk: self.on_disk,
            },
        );
        schema.shard_number = self.shard_number;
        schema.replication_factor = self.replication_factor;
        schema
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Dense embedding server.
    #[serde(default = "default_embedding_url")]
    pub url: String,

    /// Sparse embedding server; defaults to `url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse_url: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Texts per embedding request.
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: u32,
}

fn default_embedding_url() -> String {
    DEFAULT_EMBEDDING_URL.to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_embedding_batch_size() -> u32 {
    32
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            sparse_url: None,
            timeout_secs: default_timeout(),
            batch_size: default_embedding_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_inflight_multiplier")]
    pub max_inflight_multiplier: usize,

    #[serde(default)]
    pub id_strategy: IdStrategy,

    #[serde(default = "default_text_field")]
    pub text_field: String,

    #[serde(default = "default_id_field")]
    pub id_field: Option<String>,

    /// Record field holding a precomputed dense embedding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dense_field: Option<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Give up waiting for the index after this long. Unset waits forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_timeout_secs: Option<u64>,
}

fn default_batch_size() -> usize {
    100
}

fn default_max_workers() -> usize {
    4
}

fn default_inflight_multiplier() -> usize {
    2
}

fn default_text_field() -> String {
    "text".to_string()
}

fn default_id_field() -> Option<String> {
    Some("_id".to_string())
}

fn default_poll_interval() -> u64 {
    5
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_workers: default_max_workers(),
            max_inflight_multiplier: default_inflight_multiplier(),
            id_strategy: IdStrategy::default(),
            text_field: default_text_field(),
            id_field: default_id_field(),
            dense_field: None,
            poll_interval_secs: default_poll_interval(),
            index_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: u64,

    #[serde(default = "default_prefetch_limit")]
    pub prefetch_limit: u64,

    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,

    #[serde(default = "default_oversampling")]
    pub oversampling: f64,

    /// Fail queries against collections that are still indexing.
    #[serde(default = "default_true")]
    pub require_ready_index: bool,

    #[serde(default)]
    pub default_format: OutputFormat,
}

fn default_limit() -> u64 {
    5
}

fn default_prefetch_limit() -> u64 {
    20
}

fn default_rrf_k() -> f64 {
    DEFAULT_RRF_K
}

fn default_oversampling() -> f64 {
    3.0
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            prefetch_limit: default_prefetch_limit(),
            rrf_k: default_rrf_k(),
            oversampling: default_oversampling(),
            require_ready_index: true,
            default_format: OutputFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.vector_store.url, DEFAULT_QDRANT_URL);
        assert_eq!(config.collection.name, DEFAULT_COLLECTION);
        assert_eq!(config.ingestion.batch_size, 100);
        assert_eq!(config.search.rrf_k, 60.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("BATCH_SIZE", "250"),
                ("MAX_WORKERS", " 8 "),
                ("SHARD_NUMBER", "3"),
                ("COLLECTION_NAME", "wiki"),
                ("RRF_K", "10"),
            ]))
            .unwrap();

        assert_eq!(config.ingestion.batch_size, 250);
        assert_eq!(config.ingestion.max_workers, 8);
        assert_eq!(config.collection.shard_number, 3);
        assert_eq!(config.collection.name, "wiki");
        assert_eq!(config.search.rrf_k, 10.0);
    }

    #[test]
    fn test_env_parse_error_names_variable() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("MAX_WORKERS", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref var, .. } if var == "MAX_WORKERS"));
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = Config::default();
        config.ingestion.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search.oversampling = 0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.collection.sparse_field = config.collection.dense_field.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bulk_schema_disables_hnsw() {
        let schema = CollectionConfig::default().to_schema();
        assert_eq!(schema.hnsw_m, 0);
        assert_eq!(schema.vectors[DEFAULT_DENSE_FIELD].size, DEFAULT_DENSE_SIZE);
        assert!(schema.sparse_vectors.contains(DEFAULT_SPARSE_FIELD));
        assert_eq!(schema.quantization, Quantization::Binary { always_ram: true });
    }

    #[test]
    fn test_toml_roundtrip_partial() {
        let config: Config = toml::from_str(
            r#"
            [ingestion]
            batch_size = 64
            id_strategy = "random"

            [collection.payload_indexes]
            lang = "keyword"
            "#,
        )
        .unwrap();
        assert_eq!(config.ingestion.batch_size, 64);
        assert_eq!(config.ingestion.id_strategy, IdStrategy::Random);
        assert_eq!(config.ingestion.max_workers, 4);
        assert_eq!(
            config.collection.payload_indexes.get("lang"),
            Some(&PayloadFieldType::Keyword)
        );
    }
}
