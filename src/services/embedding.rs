//! Embedding providers for dense and sparse vectors.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::EmbeddingError;
use crate::models::{EmbeddingConfig, SparseVector};

/// Source of dense and sparse embeddings for text.
///
/// Batch methods must return exactly one vector per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_dense_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed_sparse_batch(
        &self,
        texts: &[String],
    ) -> Result<Vec<SparseVector>, EmbeddingError>;

    async fn embed_dense(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_dense_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }

    async fn embed_sparse(&self, text: &str) -> Result<SparseVector, EmbeddingError> {
        self.embed_sparse_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }
}

/// Request body for `/embed` and `/embed_sparse`.
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
}

#[derive(Debug, Deserialize)]
struct DenseResponse(Vec<Vec<f32>>);

#[derive(Debug, Deserialize)]
struct SparseEntry {
    index: u32,
    value: f32,
}

#[derive(Debug, Deserialize)]
struct SparseResponse(Vec<Vec<SparseEntry>>);

/// Client for text-embeddings-inference compatible servers.
///
/// Dense vectors come from `POST {url}/embed`, sparse (SPLADE) vectors from
/// `POST {sparse_url}/embed_sparse`.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingProvider {
    client: Client,
    dense_url: String,
    sparse_url: String,
    batch_size: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::ConnectionError(e.to_string()))?;

        let dense_url = config.url.trim_end_matches('/').to_string();
        let sparse_url = config
            .sparse_url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| dense_url.clone());

        Ok(Self {
            client,
            dense_url,
            sparse_url,
            batch_size: config.batch_size.max(1) as usize,
        })
    }

    pub fn with_defaults() -> Result<Self, EmbeddingError> {
        Self::new(&EmbeddingConfig::default())
    }

    /// Check if the dense embedding server is up.
    pub async fn health_check(&self) -> Result<bool, EmbeddingError> {
        let url = format!("{}/health", self.dense_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EmbeddingError::ConnectionError(e.to_string()))?;
        Ok(response.status().is_success())
    }

    pub fn dense_url(&self) -> &str {
        &self.dense_url
    }

    pub fn sparse_url(&self) -> &str {
        &self.sparse_url
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        texts: &[String],
    ) -> Result<T, EmbeddingError> {
        let request = EmbedRequest {
            inputs: texts,
            truncate: true,
        };

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Timeout
                } else if e.is_connect() {
                    EmbeddingError::ConnectionError(e.to_string())
                } else {
                    EmbeddingError::RequestError(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ServerError(format!(
                "status {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))
    }
}

fn check_count(expected: usize, actual: usize) -> Result<(), EmbeddingError> {
    if expected != actual {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {} embeddings, got {}",
            expected, actual
        )));
    }
    Ok(())
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_dense_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embed", self.dense_url);
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let DenseResponse(vectors) = self.post(&url, chunk).await?;
            check_count(chunk.len(), vectors.len())?;
            all.extend(vectors);
        }
        Ok(all)
    }

    async fn embed_sparse_batch(
        &self,
        texts: &[String],
    ) -> Result<Vec<SparseVector>, EmbeddingError> {
        let url = format!("{}/embed_sparse", self.sparse_url);
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let SparseResponse(vectors) = self.post(&url, chunk).await?;
            check_count(chunk.len(), vectors.len())?;
            for entries in vectors {
                let (indices, values): (Vec<u32>, Vec<f32>) = entries
                    .into_iter()
                    .map(|e| (e.index, e.value))
                    .unzip();
                let sparse = SparseVector::new(indices, values)
                    .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
                all.push(sparse);
            }
        }
        Ok(all)
    }
}
