//! Vector store facade
//!
//! Provides:
//! - [`VectorIndex`] trait implemented by the local and remote backends
//! - [`VectorStore`], which embeds text through the [`EmbeddingGate`] and
//!   applies threshold, ordering and limit uniformly across backends
//! - Search options, metadata filters and relevance tiers

use crate::document::{generate_document_id, NewDocument, VectorDocument};
use crate::local::LocalIndex;
use crate::remote::RemoteIndex;
use finsight_common::config::VectorStoreConfig;
use finsight_common::errors::{AppError, Result};
use finsight_common::{clamp_unit, metrics, EmbeddingGate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Equality filter over metadata keys
pub type SearchFilter = BTreeMap<String, Value>;

/// True when every filter key is present in the metadata with an equal value.
pub fn matches_filter(document: &VectorDocument, filter: Option<&SearchFilter>) -> bool {
    filter.map_or(true, |f| {
        f.iter()
            .all(|(key, expected)| document.metadata.field(key).as_ref() == Some(expected))
    })
}

/// Relevance tier derived from a similarity score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relevance {
    High,
    Medium,
    Low,
}

impl Relevance {
    /// `>= 0.8` high, `>= 0.6` medium, otherwise low.
    pub fn from_score(score: f32) -> Self {
        if score >= 0.8 {
            Relevance::High
        } else if score >= 0.6 {
            Relevance::Medium
        } else {
            Relevance::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Relevance::High => "high",
            Relevance::Medium => "medium",
            Relevance::Low => "low",
        }
    }
}

/// Search parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum results to return
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Minimum similarity score
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Metadata equality filter
    #[serde(default)]
    pub filter: Option<SearchFilter>,
}

fn default_limit() -> usize {
    5
}

fn default_threshold() -> f32 {
    0.7
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            threshold: default_threshold(),
            filter: None,
        }
    }
}

/// A document paired with its similarity to the query
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: VectorDocument,
    pub score: f32,
}

/// Search hit returned to callers
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document: VectorDocument,
    pub score: f32,
    pub relevance: Relevance,
}

/// Storage backend for embedded documents
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace a document
    async fn upsert(&self, document: VectorDocument) -> Result<()>;

    /// Nearest documents to `vector`, best first, at most `top_k`
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredDocument>>;

    async fn get(&self, id: &str) -> Result<Option<VectorDocument>>;

    /// Returns whether a document was removed
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn list_all(&self) -> Result<Vec<VectorDocument>>;

    /// Backend name for logs and metrics
    fn backend(&self) -> &'static str;
}

/// Embedding-aware store over a [`VectorIndex`]
pub struct VectorStore {
    index: Arc<dyn VectorIndex>,
    embeddings: Arc<EmbeddingGate>,
}

impl VectorStore {
    pub fn new(index: Arc<dyn VectorIndex>, embeddings: Arc<EmbeddingGate>) -> Self {
        Self { index, embeddings }
    }

    /// Fixed embedding dimension of this store
    pub fn dimension(&self) -> usize {
        self.embeddings.dimension()
    }

    pub fn backend(&self) -> &'static str {
        self.index.backend()
    }

    /// Embed and store a new document, returning its id
    pub async fn store(&self, document: NewDocument) -> Result<String> {
        let embedding = self.embeddings.embed(&document.content).await;
        if embedding.degraded {
            tracing::debug!("Storing document with fallback embedding");
        }

        self.store_embedded(VectorDocument {
            id: document.id.unwrap_or_else(generate_document_id),
            content: document.content,
            metadata: document.metadata,
            embedding: embedding.vector,
        })
        .await
    }

    /// Store a document that already carries an embedding
    pub async fn store_embedded(&self, document: VectorDocument) -> Result<String> {
        if document.embedding.len() != self.dimension() {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension(),
                actual: document.embedding.len(),
            });
        }

        let id = document.id.clone();
        self.index.upsert(document).await?;

        tracing::debug!(id = %id, backend = self.backend(), "Document stored");
        Ok(id)
    }

    /// Similarity search for free text
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let start = Instant::now();

        if options.limit == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embeddings.embed(query).await;
        let hits = self
            .index
            .query(&embedding.vector, options.limit, options.filter.as_ref())
            .await?;

        let mut results: Vec<SearchResult> = hits
            .into_iter()
            .map(|hit| {
                let score = clamp_unit(hit.score);
                SearchResult {
                    document: hit.document,
                    score,
                    relevance: Relevance::from_score(score),
                }
            })
            .filter(|r| r.score >= options.threshold)
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(options.limit);

        metrics::record_search(start.elapsed().as_secs_f64(), self.backend(), results.len());
        tracing::debug!(
            backend = self.backend(),
            results = results.len(),
            threshold = options.threshold,
            degraded = embedding.degraded,
            "Vector search complete"
        );

        Ok(results)
    }

    pub async fn get(&self, id: &str) -> Result<Option<VectorDocument>> {
        self.index.get(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.index.delete(id).await
    }

    pub async fn list_all(&self) -> Result<Vec<VectorDocument>> {
        self.index.list_all().await
    }
}

/// Create a vector index based on configuration
pub async fn create_vector_index(config: &VectorStoreConfig) -> Result<Arc<dyn VectorIndex>> {
    match config.provider.as_str() {
        "local" | "memory" => {
            let index = match &config.path {
                Some(path) => LocalIndex::open(path).await?,
                None => LocalIndex::in_memory(),
            };
            Ok(Arc::new(index))
        }
        "remote" | "pinecone" => Ok(Arc::new(RemoteIndex::from_config(config)?)),
        other => Err(AppError::configuration(format!(
            "Unknown vector store provider: {}",
            other
        ))),
    }
}
