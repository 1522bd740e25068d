//! Grounded answer handler

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

use super::{validate, SourceResponse};
use crate::AppState;
use finsight_common::errors::Result;
use finsight_context::{
    tools::{ToolCall, ToolResult},
    AnswerRequest, GroundingStrategy, RagOptions,
};
use finsight_search::SearchFilter;

#[derive(Debug, Deserialize, Validate)]
pub struct AskRequest {
    #[validate(length(min = 1, max = 4000))]
    pub question: String,

    /// Prior turns, passed to generation as context
    #[serde(default)]
    #[validate(length(max = 20000))]
    pub conversation_history: Option<String>,

    /// Strategy order; empty means tools, then rag, then plain generation
    #[serde(default)]
    pub strategies: Vec<GroundingStrategy>,

    /// Caller context for the retrieval strategy
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
pub struct AskResponse {
    pub strategy: GroundingStrategy,
    pub answer: String,
    pub confidence: f32,
    pub sources: Vec<SourceResponse>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub processing_time_ms: u64,
}

/// Answer a question through the grounding strategy chain
pub async fn ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>> {
    let start = Instant::now();
    validate(&request)?;

    let defaults = RagOptions::from_config(&state.config.retrieval);
    let mut answer_request = AnswerRequest::new(request.question);
    if let Some(history) = request.conversation_history {
        answer_request = answer_request.with_history(history);
    }
    answer_request.rag = RagOptions {
        context: request.context,
        max_sources: request.max_sources.unwrap_or(defaults.max_sources),
        include_reasoning: request.include_reasoning,
        threshold: request.threshold.unwrap_or(defaults.threshold),
        filter: request.filter,
    };

    let answer = state
        .answers
        .answer(&answer_request, &request.strategies)
        .await;

    Ok(Json(AskResponse {
        strategy: answer.strategy,
        answer: answer.answer,
        confidence: answer.confidence,
        sources: answer.sources.into_iter().map(SourceResponse::from).collect(),
        tool_calls: answer.tool_calls,
        tool_results: answer.tool_results,
        reasoning: answer.reasoning,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}
