//! Retrieval-augmented query handler

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

use super::{validate, SourceResponse};
use crate::AppState;
use finsight_common::errors::Result;
use finsight_context::RagOptions;
use finsight_search::SearchFilter;

#[derive(Debug, Deserialize, Validate)]
pub struct RagQueryRequest {
    #[validate(length(min = 1, max = 4000))]
    pub question: String,

    #[serde(default)]
    pub context: Option<String>,

    #[serde(default)]
    #[validate(range(min = 1, max = 20))]
    pub max_sources: Option<usize>,

    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub threshold: Option<f32>,

    #[serde(default)]
    pub include_reasoning: bool,

    #[serde(default)]
    pub filter: Option<SearchFilter>,
}

#[derive(Serialize)]
pub struct RagQueryResponse {
    pub answer: String,
    pub sources: Vec<SourceResponse>,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub degraded: bool,
    pub processing_time_ms: u64,
}

/// Answer strictly from the knowledge base
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<RagQueryRequest>,
) -> Result<Json<RagQueryResponse>> {
    let start = Instant::now();
    validate(&request)?;

    let defaults = RagOptions::from_config(&state.config.retrieval);
    let options = RagOptions {
        context: request.context,
        max_sources: request.max_sources.unwrap_or(defaults.max_sources),
        include_reasoning: request.include_reasoning,
        threshold: request.threshold.unwrap_or(defaults.threshold),
        filter: request.filter,
    };

    let response = state.retrieval().query(&request.question, &options).await;

    tracing::info!(
        sources = response.sources.len(),
        confidence = response.confidence,
        degraded = response.degraded,
        "RAG query served"
    );

    Ok(Json(RagQueryResponse {
        answer: response.answer,
        sources: response.sources.into_iter().map(SourceResponse::from).collect(),
        confidence: response.confidence,
        reasoning: response.reasoning,
        degraded: response.degraded,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}
