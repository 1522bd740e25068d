//! Managed similarity index over HTTP
//!
//! Speaks the Pinecone-style data plane: `POST /vectors/upsert` and
//! `POST /query`. The managed index keeps metadata only, so hits come back
//! with empty content and no embedding. Point lookups, deletes and listing
//! are not supported by this backend and report nothing found.

use crate::document::{DocumentMetadata, VectorDocument};
use crate::store::{ScoredDocument, SearchFilter, VectorIndex};
use finsight_common::config::VectorStoreConfig;
use finsight_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Remote index client
pub struct RemoteIndex {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    namespace: Option<String>,
    timeout: Duration,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<UpsertVector<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a DocumentMetadata,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a SearchFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: Option<Value>,
}

impl RemoteIndex {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        namespace: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            namespace,
            timeout,
        })
    }

    /// Build from configuration; url and api key are mandatory.
    pub fn from_config(config: &VectorStoreConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| AppError::configuration("vector_store.url required for remote index"))?;
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                AppError::configuration("vector_store.api_key required for remote index")
            })?;

        Self::new(
            url,
            api_key,
            config.namespace.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::UpstreamTimeout {
                        service: "vector index".to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    AppError::VectorIndex {
                        message: format!("Request to {} failed: {}", path, e),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::VectorIndex {
                message: format!("Remote index error {}: {}", status, body),
            });
        }

        Ok(response)
    }
}

#[async_trait::async_trait]
impl VectorIndex for RemoteIndex {
    async fn upsert(&self, document: VectorDocument) -> Result<()> {
        let request = UpsertRequest {
            vectors: vec![UpsertVector {
                id: &document.id,
                values: &document.embedding,
                metadata: &document.metadata,
            }],
            namespace: self.namespace.as_deref(),
        };

        self.post("/vectors/upsert", &request).await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredDocument>> {
        let request = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            filter: filter.filter(|f| !f.is_empty()),
            namespace: self.namespace.as_deref(),
        };

        let response: QueryResponse = self
            .post("/query", &request)
            .await?
            .json()
            .await
            .map_err(|e| AppError::VectorIndex {
                message: format!("Failed to parse query response: {}", e),
            })?;

        Ok(response
            .matches
            .into_iter()
            .map(|m| ScoredDocument {
                score: m.score,
                document: VectorDocument {
                    id: m.id,
                    content: String::new(),
                    metadata: parse_metadata(m.metadata),
                    embedding: Vec::new(),
                },
            })
            .collect())
    }

    async fn get(&self, _id: &str) -> Result<Option<VectorDocument>> {
        Ok(None)
    }

    async fn delete(&self, _id: &str) -> Result<bool> {
        Ok(false)
    }

    async fn list_all(&self) -> Result<Vec<VectorDocument>> {
        Ok(Vec::new())
    }

    fn backend(&self) -> &'static str {
        "remote"
    }
}

fn parse_metadata(raw: Option<Value>) -> DocumentMetadata {
    raw.and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}
