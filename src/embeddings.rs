//! Embedding provider seam plus a TEI (Text Embeddings Inference) client.

use crate::http::{HttpSettings, build_client};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Maximum number of texts per /embed call.
const BATCH_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("embedding service returned status {0}")]
    Status(u16),
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

/// Any provider returning fixed-dimension vectors, one per input, in order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier persisted with the index so a model swap forces a rebuild.
    fn model_name(&self) -> &str;

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub url: String,
    pub model: String,
}

impl EmbeddingConfig {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("EMBEDDINGS_URL").unwrap_or_else(|_| "http://localhost:8080".into()),
            model: std::env::var("EMBEDDINGS_MODEL")
                .unwrap_or_else(|_| "BAAI/bge-small-en-v1.5".into()),
        }
    }
}

pub struct TeiClient {
    client: reqwest::Client,
    url: String,
    model: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [&'a str],
    truncate: bool,
}

impl TeiClient {
    pub fn new(config: &EmbeddingConfig, http: &HttpSettings) -> Self {
        Self {
            client: build_client(http),
            url: format!("{}/embed", config.url.trim_end_matches('/')),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl Embedder for TeiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    /// Texts are sent in groups of [`BATCH_SIZE`]; every vector must share one dimension.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut all_embeddings: Vec<Vec<f32>> = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let request = EmbedRequest {
                inputs: chunk,
                truncate: true,
            };
            let response = self
                .client
                .post(&self.url)
                .json(&request)
                .send()
                .await
                .map_err(|e| EmbeddingError::Request(e.to_string()))?;

            if !response.status().is_success() {
                return Err(EmbeddingError::Status(response.status().as_u16()));
            }

            let embeddings: Vec<Vec<f32>> = response
                .json()
                .await
                .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

            if embeddings.len() != chunk.len() {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "{} embeddings for {} inputs",
                    embeddings.len(),
                    chunk.len()
                )));
            }

            all_embeddings.extend(embeddings);
        }

        if let Some(first) = all_embeddings.first() {
            let dimension = first.len();
            if dimension == 0 || all_embeddings.iter().any(|v| v.len() != dimension) {
                return Err(EmbeddingError::InvalidResponse(
                    "inconsistent embedding dimensions".into(),
                ));
            }
        }

        Ok(all_embeddings)
    }
}

/// Scales `vector` to unit length in place; zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
