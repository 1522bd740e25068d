//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;
use std::time::Instant;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub vector_store: CheckResult,
    pub embedding: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness check - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: finsight_common::VERSION,
    })
}

/// Readiness check - verifies that the vector store answers.
///
/// Embedding and generation backends degrade instead of failing, so they
/// are reported but never make the service unready.
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let store = state.retrieval().store();
    let start = Instant::now();

    let vector_store = match store.list_all().await {
        Ok(documents) => CheckResult {
            status: "up".to_string(),
            detail: Some(format!("{} ({} documents)", store.backend(), documents.len())),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            detail: Some(store.backend().to_string()),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    };

    let embedding = CheckResult {
        status: "up".to_string(),
        detail: Some(format!("{} ({} dims)", state.config.embedding.provider, store.dimension())),
        latency_ms: None,
        error: None,
    };

    let all_healthy = vector_store.status == "up";

    Json(ReadyResponse {
        status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
        checks: HealthChecks {
            vector_store,
            embedding,
        },
    })
}
