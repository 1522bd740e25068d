//! Financial tool handlers

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use super::validate;
use crate::AppState;
use finsight_common::errors::Result;
use finsight_context::tools::{ToolCall, ToolDefinition, ToolResult};

#[derive(Serialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolDefinition>,
    pub live_data: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExecuteToolRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,

    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// List registered tool definitions
pub async fn list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let registry = state.orchestrator().executor().registry();
    Json(ToolListResponse {
        tools: registry.definitions().cloned().collect(),
        live_data: state.config.tools.live_data,
    })
}

/// Run one tool directly.
///
/// Tool failures, including unknown names, come back as an unsuccessful
/// result rather than an error status.
pub async fn execute_tool(
    State(state): State<AppState>,
    Json(request): Json<ExecuteToolRequest>,
) -> Result<Json<ToolResult>> {
    validate(&request)?;

    let call = ToolCall::new(request.name, request.parameters);
    let result = state.orchestrator().executor().execute(&call).await;

    tracing::info!(
        tool = %call.name,
        success = result.success,
        execution_ms = result.execution_time_ms,
        "Tool executed"
    );
    Ok(Json(result))
}
