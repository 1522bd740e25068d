//! Embedding service abstraction
//!
//! Provides a unified interface for embedding providers:
//! - OpenAI (text-embedding-3-small, text-embedding-ada-002, text-embedding-3-large)
//! - Deterministic feature-hashing embedder (offline fallback)
//!
//! [`EmbeddingGate`] fronts a primary provider and never fails: any provider
//! error degrades to the hashing embedder at the same dimension.

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// OpenAI embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct OpenAIRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let model = model.unwrap_or_else(|| crate::DEFAULT_EMBEDDING_MODEL.to_string());
        let dimension = match model.as_str() {
            "text-embedding-ada-002" => 1536,
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            _ => crate::DEFAULT_EMBEDDING_DIMENSION,
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model,
            dimension,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_retries: max_retries.max(1),
        })
    }

    /// Make request with retry
    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff
                let delay = Duration::from_millis(100 * (2_u64.pow(attempt)));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(texts).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "Embedding request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::EmbeddingError {
            message: "Unknown error after retries".to_string(),
        }))
    }

    async fn make_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = OpenAIRequest {
            input: texts.to_vec(),
            model: self.model.clone(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::EmbeddingError {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::EmbeddingError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: OpenAIResponse = response.json().await.map_err(|e| AppError::EmbeddingError {
            message: format!("Failed to parse response: {}", e),
        })?;

        Ok(result.data.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.request_with_retry(&[text.to_string()]).await?;
        embeddings.into_iter().next().ok_or_else(|| AppError::EmbeddingError {
            message: "Empty response".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        const BATCH_SIZE: usize = 100;

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let embeddings = self.request_with_retry(chunk).await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic pseudo-embedder.
///
/// Tokens and character trigrams are hashed into signed buckets, a
/// low-amplitude sinusoid seeded by the whole text is added, and the result
/// is L2-normalised. The vectors carry lexical overlap only; identical text
/// always produces an identical vector.
pub struct HashEmbedder {
    dimension: usize,
}

const TOKEN_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.35;
const SMOOTHING_AMPLITUDE: f32 = 0.01;

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Synchronous core shared by the trait impl and the gate.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }

        let normalized = text.to_lowercase();
        for token in normalized
            .split(|c: char| !c.is_alphanumeric() && c != '%')
            .filter(|t| !t.is_empty())
        {
            self.accumulate(&mut vector, token.as_bytes(), TOKEN_WEIGHT);

            let chars: Vec<char> = format!("#{}#", token).chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                self.accumulate(&mut vector, trigram.as_bytes(), TRIGRAM_WEIGHT);
            }
        }

        let seed = stable_hash(normalized.as_bytes()) as f32;
        for (i, value) in vector.iter_mut().enumerate() {
            *value += (seed + i as f32).sin() * SMOOTHING_AMPLITUDE;
        }

        normalize(&mut vector);
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let digest = Sha256::digest(feature);
        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(index_bytes) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn model_name(&self) -> &str {
        "hash-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// 32-bit rolling hash of the input, stable across processes.
fn stable_hash(bytes: &[u8]) -> u32 {
    let digest = Sha256::digest(bytes);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) % 1_000_003
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// An embedding plus whether it came from the fallback path.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub degraded: bool,
}

/// Front door for all embedding calls.
///
/// Wraps an optional primary provider. Errors, timeouts and wrong-sized
/// vectors from the primary are logged and replaced by the hashing fallback.
pub struct EmbeddingGate {
    primary: Option<Arc<dyn Embedder>>,
    fallback: HashEmbedder,
    dimension: usize,
}

impl EmbeddingGate {
    pub fn new(primary: Option<Arc<dyn Embedder>>, dimension: usize) -> Self {
        Self {
            primary,
            fallback: HashEmbedder::new(dimension),
            dimension,
        }
    }

    /// Gate that only ever uses the deterministic fallback.
    pub fn offline(dimension: usize) -> Self {
        Self::new(None, dimension)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model_name(&self) -> &str {
        match &self.primary {
            Some(p) => p.model_name(),
            None => self.fallback.model_name(),
        }
    }

    pub async fn embed(&self, text: &str) -> Embedding {
        let Some(primary) = &self.primary else {
            return Embedding {
                vector: self.fallback.embed_text(text),
                degraded: false,
            };
        };

        let start = Instant::now();
        let outcome = primary.embed(text).await.and_then(|vector| {
            if vector.len() == self.dimension {
                Ok(vector)
            } else {
                Err(AppError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                })
            }
        });

        match outcome {
            Ok(vector) => {
                metrics::record_embedding(start.elapsed().as_secs_f64(), primary.model_name(), true);
                Embedding {
                    vector,
                    degraded: false,
                }
            }
            Err(e) => {
                metrics::record_embedding(start.elapsed().as_secs_f64(), primary.model_name(), false);
                tracing::warn!(
                    error = %e,
                    model = primary.model_name(),
                    "Embedding provider unavailable, using deterministic fallback"
                );
                Embedding {
                    vector: self.fallback.embed_text(text),
                    degraded: true,
                }
            }
        }
    }
}

/// Create an embedding gate based on configuration.
///
/// A real provider without credentials is a setup error, not a degrade.
pub fn create_embedding_gate(config: &EmbeddingConfig) -> Result<EmbeddingGate> {
    if config.dimension == 0 {
        return Err(AppError::configuration("embedding.dimension must be positive"));
    }

    match config.provider.as_str() {
        "openai" => {
            let key = config
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| AppError::configuration("OpenAI embedding API key required"))?;
            let embedder = OpenAIEmbedder::new(
                key,
                Some(config.model.clone()),
                config.api_base.clone(),
                Duration::from_secs(config.timeout_secs),
                config.max_retries,
            )?;
            if embedder.dimension() != config.dimension {
                return Err(AppError::configuration(format!(
                    "embedding.dimension is {} but model {} produces {}",
                    config.dimension,
                    config.model,
                    embedder.dimension()
                )));
            }
            Ok(EmbeddingGate::new(Some(Arc::new(embedder)), config.dimension))
        }
        "hash" | "mock" => Ok(EmbeddingGate::offline(config.dimension)),
        other => Err(AppError::configuration(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(AppError::EmbeddingError {
                message: "401 Unauthorized".to_string(),
            })
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(AppError::EmbeddingError {
                message: "401 Unauthorized".to_string(),
            })
        }

        fn model_name(&self) -> &str {
            "failing"
        }

        fn dimension(&self) -> usize {
            64
        }
    }

    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0; 8])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0; 8]).collect())
        }

        fn model_name(&self) -> &str {
            "short"
        }

        fn dimension(&self) -> usize {
            8
        }
    }

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(1536);
        let a = embedder.embed("Q1 revenue grew 15%").await.unwrap();
        let b = embedder.embed("Q1 revenue grew 15%").await.unwrap();
        assert_eq!(a.len(), 1536);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_hash_embedder_is_unit_length() {
        let embedder = HashEmbedder::new(256);
        let v = embedder.embed("operating cash flow").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);

        let empty = embedder.embed("").await.unwrap();
        assert_eq!(empty.len(), 256);
        assert!(empty.iter().any(|x| *x != 0.0));
    }

    #[tokio::test]
    async fn test_hash_batch() {
        let embedder = HashEmbedder::new(128);
        let texts = vec!["burn rate".to_string(), "runway".to_string()];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0], embedder.embed_text("burn rate"));
    }

    #[tokio::test]
    async fn test_gate_falls_back_on_provider_error() {
        let gate = EmbeddingGate::new(Some(Arc::new(FailingEmbedder)), 64);
        let first = gate.embed("cash position").await;
        let second = gate.embed("cash position").await;
        assert!(first.degraded);
        assert_eq!(first.vector.len(), 64);
        assert_eq!(first.vector, second.vector);
    }

    #[tokio::test]
    async fn test_gate_rejects_wrong_dimension() {
        let gate = EmbeddingGate::new(Some(Arc::new(ShortEmbedder)), 32);
        let embedding = gate.embed("expenses").await;
        assert!(embedding.degraded);
        assert_eq!(embedding.vector.len(), 32);
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            ..EmbeddingConfig::default()
        };
        let err = create_embedding_gate(&config).err().unwrap();
        assert!(matches!(err, AppError::Configuration { .. }));

        let config = EmbeddingConfig::default();
        tokio_test::assert_ok!(create_embedding_gate(&config));
    }

    #[test]
    fn test_model_dimension_must_match_config() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            api_key: Some("sk-test".to_string()),
            model: "text-embedding-3-large".to_string(),
            dimension: 1536,
            ..EmbeddingConfig::default()
        };
        let err = create_embedding_gate(&config).err().unwrap();
        assert!(matches!(err, AppError::Configuration { .. }));
        assert!(err.to_string().contains("3072"));

        let config = EmbeddingConfig {
            dimension: 3072,
            ..config
        };
        let gate = create_embedding_gate(&config).unwrap();
        assert_eq!(gate.dimension(), 3072);
    }
}
