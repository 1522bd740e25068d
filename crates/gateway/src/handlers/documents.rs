//! Knowledge base handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use validator::Validate;

use super::{validate, DocumentResponse};
use crate::AppState;
use finsight_common::errors::{AppError, Result};
use finsight_context::IngestRequest;
use finsight_search::{DocumentType, Relevance, SearchFilter, SearchOptions};

/// Request to add a document
#[derive(Debug, Deserialize, Validate)]
pub struct CreateDocumentRequest {
    #[validate(length(min = 1, max = 200000))]
    pub content: String,

    #[serde(rename = "type", default)]
    pub doc_type: DocumentType,

    #[serde(default)]
    #[validate(length(max = 500))]
    pub title: Option<String>,

    #[serde(default)]
    pub source: Option<String>,

    /// YYYY-MM-DD; today when absent
    #[serde(default)]
    pub date: Option<String>,

    #[serde(default)]
    pub company_id: Option<String>,

    /// Free-form metadata keys
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl From<CreateDocumentRequest> for IngestRequest {
    fn from(request: CreateDocumentRequest) -> Self {
        IngestRequest {
            content: request.content,
            doc_type: request.doc_type,
            title: request.title,
            source: request.source,
            date: request.date,
            company_id: request.company_id,
            extra: request.metadata,
        }
    }
}

#[derive(Serialize)]
pub struct CreateDocumentResponse {
    pub id: String,
}

#[derive(Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentResponse>,
    pub total: usize,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SearchDocumentsRequest {
    #[validate(length(min = 1, max = 1000))]
    pub query: String,

    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 50))]
    pub limit: usize,

    #[serde(default = "default_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub threshold: f32,

    #[serde(default)]
    pub filter: Option<SearchFilter>,
}

fn default_limit() -> usize { 5 }
fn default_threshold() -> f32 { 0.7 }

#[derive(Serialize)]
pub struct SearchDocumentsResponse {
    pub query: String,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub document: DocumentResponse,
    pub score: f32,
    pub relevance: Relevance,
}

#[derive(Serialize)]
pub struct SeedResponse {
    pub ids: Vec<String>,
}

/// Ingest one document
pub async fn create_document(
    State(state): State<AppState>,
    Json(request): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<CreateDocumentResponse>)> {
    validate(&request)?;

    let id = state.ingestor.ingest(request.into()).await?;
    Ok((StatusCode::CREATED, Json(CreateDocumentResponse { id })))
}

/// List every stored document
pub async fn list_documents(State(state): State<AppState>) -> Result<Json<DocumentListResponse>> {
    let documents: Vec<DocumentResponse> = state
        .retrieval()
        .list_documents()
        .await?
        .into_iter()
        .map(DocumentResponse::from)
        .collect();

    Ok(Json(DocumentListResponse {
        total: documents.len(),
        documents,
    }))
}

/// Get a document by ID
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>> {
    state
        .retrieval()
        .get_document(&id)
        .await?
        .map(|d| Json(d.into()))
        .ok_or(AppError::DocumentNotFound { id })
}

/// Delete a document by ID
pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    if state.retrieval().delete_document(&id).await? {
        tracing::info!(id = %id, "Document deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::DocumentNotFound { id })
    }
}

/// Similarity search without generation
pub async fn search_documents(
    State(state): State<AppState>,
    Json(request): Json<SearchDocumentsRequest>,
) -> Result<Json<SearchDocumentsResponse>> {
    validate(&request)?;

    let options = SearchOptions {
        limit: request.limit,
        threshold: request.threshold,
        filter: request.filter,
    };
    let results = state
        .retrieval()
        .search_documents(&request.query, &options)
        .await?
        .into_iter()
        .map(|r| SearchHit {
            document: r.document.into(),
            score: r.score,
            relevance: r.relevance,
        })
        .collect();

    Ok(Json(SearchDocumentsResponse {
        query: request.query,
        results,
    }))
}

/// Load the sample knowledge base
pub async fn seed_samples(State(state): State<AppState>) -> Result<Json<SeedResponse>> {
    let ids = state.ingestor.seed_samples().await?;
    Ok(Json(SeedResponse { ids }))
}
