//! Document ingestion
//!
//! Handles the ingestion workflow for pre-extracted text:
//! 1. Validate content
//! 2. Stamp date and SHA-256 checksum into metadata
//! 3. Skip content already present with the same checksum
//! 4. Embed and store through the retrieval engine

use crate::rag::RetrievalEngine;
use chrono::Utc;
use finsight_common::errors::{AppError, Result};
use finsight_common::metrics;
use finsight_search::{DocumentMetadata, DocumentType, NewDocument};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Metadata key holding the content checksum
pub const CHECKSUM_KEY: &str = "checksum";

/// A document to ingest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    pub content: String,
    #[serde(rename = "type", default)]
    pub doc_type: DocumentType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl IngestRequest {
    pub fn new(content: impl Into<String>, doc_type: DocumentType) -> Self {
        Self {
            content: content.into(),
            doc_type,
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Hex SHA-256 of the content
pub fn content_checksum(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

pub struct DocumentIngestor {
    retrieval: Arc<RetrievalEngine>,
}

impl DocumentIngestor {
    pub fn new(retrieval: Arc<RetrievalEngine>) -> Self {
        Self { retrieval }
    }

    /// Ingest one document, returning its id.
    ///
    /// Content already stored with the same checksum returns the existing id.
    pub async fn ingest(&self, request: IngestRequest) -> Result<String> {
        let (id, _) = self.ingest_from(request, "api").await?;
        Ok(id)
    }

    /// Ingest in order; stops at the first failure.
    pub async fn ingest_batch(&self, requests: Vec<IngestRequest>) -> Result<Vec<String>> {
        let (ids, _) = self.ingest_all(requests, "api").await?;
        Ok(ids)
    }

    /// Load the sample knowledge base.
    pub async fn seed_samples(&self) -> Result<Vec<String>> {
        let (ids, stored) = self.ingest_all(sample_documents(), "samples").await?;
        tracing::info!(count = ids.len(), stored, "Sample knowledge base seeded");
        Ok(ids)
    }

    /// Returns the ids and how many documents were newly stored.
    async fn ingest_all(
        &self,
        requests: Vec<IngestRequest>,
        label: &str,
    ) -> Result<(Vec<String>, usize)> {
        let mut ids = Vec::with_capacity(requests.len());
        let mut stored = 0;
        for request in requests {
            let (id, created) = self.ingest_from(request, label).await?;
            stored += usize::from(created);
            ids.push(id);
        }
        Ok((ids, stored))
    }

    /// Ingestion metrics count a document once, under `label`, when it is newly stored.
    async fn ingest_from(&self, request: IngestRequest, label: &str) -> Result<(String, bool)> {
        let start = Instant::now();
        let document = prepare(request)?;
        let checksum = document.metadata.extra.get(CHECKSUM_KEY).cloned();

        if let Some(existing) = self.find_by_checksum(checksum.as_ref()).await? {
            tracing::debug!(id = %existing, "Document already ingested, skipping");
            return Ok((existing, false));
        }

        let id = self.retrieval.add_document(document).await?;
        metrics::record_ingestion(1, label);

        tracing::info!(
            id = %id,
            source = label,
            total_ms = start.elapsed().as_millis(),
            "Document ingested"
        );
        Ok((id, true))
    }

    async fn find_by_checksum(&self, checksum: Option<&Value>) -> Result<Option<String>> {
        let Some(checksum) = checksum else {
            return Ok(None);
        };
        let existing = self.retrieval.list_documents().await?;
        Ok(existing
            .into_iter()
            .find(|d| d.metadata.extra.get(CHECKSUM_KEY) == Some(checksum))
            .map(|d| d.id))
    }
}

fn prepare(request: IngestRequest) -> Result<NewDocument> {
    let content = request.content.trim();
    if content.is_empty() {
        return Err(AppError::validation("content", "Document content must not be empty"));
    }

    let mut extra = request.extra;
    extra.insert(CHECKSUM_KEY.to_string(), Value::String(content_checksum(content)));

    let metadata = DocumentMetadata {
        doc_type: request.doc_type,
        title: request.title,
        source: request.source,
        date: Some(
            request
                .date
                .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string()),
        ),
        company_id: request.company_id,
        extra,
    };

    Ok(NewDocument::new(content, metadata))
}

/// The three documents of the sample knowledge base
pub fn sample_documents() -> Vec<IngestRequest> {
    vec![
        IngestRequest::new(include_str!("samples/q1_2025_report.md"), DocumentType::FinancialReport)
            .with_title("Q1 2025 Financial Performance Report")
            .with_source("Finance Team")
            .with_date("2025-01-31")
            .with_extra("quarter", json!("Q1 2025"))
            .with_extra("year", json!(2025)),
        IngestRequest::new(include_str!("samples/controls_policy.md"), DocumentType::Policy)
            .with_title("Financial Controls and Compliance Policy")
            .with_source("Finance Team")
            .with_date("2024-12-01")
            .with_extra("version", json!("2.1"))
            .with_extra("department", json!("Finance")),
        IngestRequest::new(include_str!("samples/metrics_dictionary.md"), DocumentType::DataDictionary)
            .with_title("Financial Metrics Data Dictionary")
            .with_source("Finance Team")
            .with_date("2024-11-15")
            .with_extra("version", json!("1.3"))
            .with_extra("category", json!("definitions")),
    ]
}
