//! API handlers module

pub mod ask;
pub mod documents;
pub mod health;
pub mod rag;
pub mod tools;

use finsight_common::errors::{AppError, Result};
use finsight_context::SourceAttribution;
use finsight_search::{DocumentMetadata, Relevance, VectorDocument};
use serde::Serialize;
use validator::Validate;

/// Run `validator` checks, mapping failures to a 400.
pub(crate) fn validate<T: Validate>(request: &T) -> Result<()> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: e.field_errors().keys().next().map(|k| k.to_string()),
    })
}

/// Stored document without its embedding
#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl From<VectorDocument> for DocumentResponse {
    fn from(document: VectorDocument) -> Self {
        Self {
            id: document.id,
            content: document.content,
            metadata: document.metadata,
        }
    }
}

/// Source cited by a grounded answer
#[derive(Serialize)]
pub struct SourceResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub relevance: f32,
    pub tier: Relevance,
    pub excerpt: String,
}

impl From<SourceAttribution> for SourceResponse {
    fn from(source: SourceAttribution) -> Self {
        let tier = source.tier();
        Self {
            id: source.document.id,
            title: source.document.metadata.title,
            doc_type: source.document.metadata.doc_type.as_str().to_string(),
            relevance: source.relevance,
            tier,
            excerpt: source.excerpt,
        }
    }
}
