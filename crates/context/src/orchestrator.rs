//! Tool orchestration
//!
//! `Gate -> Select -> Execute -> Synthesize`, any step able to end in a
//! degraded plain-generation answer. [`Orchestrator::orchestrate`] always
//! returns a well-formed [`OrchestrationResult`]; errors and panics inside
//! the pipeline are converted to [`DegradeReason::PipelineFailure`].

use crate::tools::{ToolCall, ToolExecutor, ToolRegistry, ToolResult, ToolSelector};
use finsight_common::errors::{AppError, Result};
use finsight_common::llm::{financial_insight_messages, FINANCIAL_INSIGHT_OPTIONS};
use finsight_common::{clamp_unit, generate_bounded, metrics, ChatMessage, GenerationOptions, LlmGateway};
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Answer used when even plain generation is unavailable
pub const APOLOGY_ANSWER: &str = "I apologize, but I'm unable to provide an answer right now. \
Please try again in a moment.";

const SYNTHESIS_OPTIONS: GenerationOptions = GenerationOptions {
    temperature: 0.3,
    max_tokens: 2000,
};

const SYNTHESIS_PROMPT: &str = "You are an AI CFO assistant with access to real-time financial \
data through tools. Use the provided tool results to answer the user's question accurately and \
comprehensively.

Guidelines:
- Base your answer on the actual data from the tools
- Explain the key insights and findings
- Provide actionable recommendations when appropriate
- Cite specific numbers and metrics from the tool results
- If the data shows concerning trends, highlight them
- Be specific and data-driven in your analysis

Tool Results:
";

/// Caller-supplied conversation state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestrationContext {
    #[serde(default)]
    pub conversation_history: String,
    #[serde(default)]
    pub recent_results: Vec<ToolResult>,
}

/// Why the orchestrator fell back to plain generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeReason {
    NoToolIntent,
    NoToolsSelected,
    AllToolsFailed,
    PipelineFailure,
}

impl DegradeReason {
    pub fn confidence(&self) -> f32 {
        match self {
            DegradeReason::NoToolIntent | DegradeReason::NoToolsSelected => 0.7,
            DegradeReason::AllToolsFailed | DegradeReason::PipelineFailure => 0.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DegradeReason::NoToolIntent => "no_tool_intent",
            DegradeReason::NoToolsSelected => "no_tools_selected",
            DegradeReason::AllToolsFailed => "all_tools_failed",
            DegradeReason::PipelineFailure => "pipeline_failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum OrchestrationOutcome {
    Synthesized,
    Degraded(DegradeReason),
}

impl OrchestrationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            OrchestrationOutcome::Synthesized => "synthesized",
            OrchestrationOutcome::Degraded(reason) => reason.as_str(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub answer: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub outcome: OrchestrationOutcome,
}

/// A tool attempt that ended without synthesis
#[derive(Debug, Clone)]
pub struct Declined {
    pub reason: DegradeReason,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub reasoning: Option<String>,
}

impl Declined {
    fn new(reason: DegradeReason) -> Self {
        Self {
            reason,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            reasoning: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ToolAttempt {
    Synthesized(OrchestrationResult),
    Declined(Declined),
}

/// Composes selection, execution and synthesis into one answer
pub struct Orchestrator {
    selector: ToolSelector,
    executor: Arc<dyn ToolExecutor>,
    llm: Arc<dyn LlmGateway>,
    generation_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ToolRegistry>,
        executor: Arc<dyn ToolExecutor>,
        llm: Arc<dyn LlmGateway>,
    ) -> Result<Self> {
        Ok(Self {
            selector: ToolSelector::new(registry)?,
            executor,
            llm,
            generation_timeout: Duration::from_secs(60),
        })
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn selector(&self) -> &ToolSelector {
        &self.selector
    }

    pub fn executor(&self) -> &Arc<dyn ToolExecutor> {
        &self.executor
    }

    /// Answer `query`, using tools when they apply.
    pub async fn orchestrate(&self, query: &str, ctx: &OrchestrationContext) -> OrchestrationResult {
        let result = match self.attempt(query).await {
            ToolAttempt::Synthesized(result) => result,
            ToolAttempt::Declined(declined) => self.fall_back(query, ctx, declined).await,
        };

        metrics::record_answer("tools", result.outcome.label(), result.confidence);
        result
    }

    /// Run the tool pipeline without the plain-generation fallback.
    pub async fn attempt(&self, query: &str) -> ToolAttempt {
        match AssertUnwindSafe(self.run_pipeline(query)).catch_unwind().await {
            Ok(Ok(attempt)) => attempt,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Tool orchestration failed, degrading to plain generation");
                ToolAttempt::Declined(Declined::new(DegradeReason::PipelineFailure))
            }
            Err(_) => {
                tracing::error!("Tool orchestration panicked, degrading to plain generation");
                ToolAttempt::Declined(Declined::new(DegradeReason::PipelineFailure))
            }
        }
    }

    async fn run_pipeline(&self, query: &str) -> Result<ToolAttempt> {
        if !self.selector.should_use_tools(query) {
            return Ok(ToolAttempt::Declined(Declined::new(DegradeReason::NoToolIntent)));
        }

        let calls = self.selector.select(query);
        if calls.is_empty() {
            return Ok(ToolAttempt::Declined(Declined::new(DegradeReason::NoToolsSelected)));
        }

        let results = self.execute_all(&calls).await;
        let reasoning = execution_reasoning(&calls, &results);

        if results.iter().all(|r| !r.success) {
            return Ok(ToolAttempt::Declined(Declined {
                reason: DegradeReason::AllToolsFailed,
                tool_calls: calls,
                tool_results: results,
                reasoning: Some(reasoning),
            }));
        }

        let answer = self.synthesize(query, &calls, &results).await?;
        let confidence = synthesis_confidence(&results, &answer);

        tracing::info!(
            tools = calls.len(),
            successful = results.iter().filter(|r| r.success).count(),
            confidence = confidence,
            "Tool orchestration complete"
        );

        Ok(ToolAttempt::Synthesized(OrchestrationResult {
            answer,
            tool_calls: calls,
            tool_results: results,
            confidence,
            reasoning: Some(reasoning),
            outcome: OrchestrationOutcome::Synthesized,
        }))
    }

    /// Run every call concurrently; a panicking call becomes a failed result.
    async fn execute_all(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        join_all(calls.iter().map(|call| async move {
            let started = Instant::now();
            AssertUnwindSafe(self.executor.execute(call))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    ToolResult::failed(
                        &call.name,
                        AppError::ToolExecution {
                            tool: call.name.clone(),
                            message: "tool handler panicked".to_string(),
                        },
                        started,
                    )
                })
        }))
        .await
    }

    async fn synthesize(&self, query: &str, calls: &[ToolCall], results: &[ToolResult]) -> Result<String> {
        let mut system = SYNTHESIS_PROMPT.to_string();
        system.push_str(&tool_context(calls, results));

        let messages = vec![ChatMessage::system(system), ChatMessage::user(query)];
        generate_bounded(self.llm.as_ref(), &messages, SYNTHESIS_OPTIONS, self.generation_timeout).await
    }

    /// Degraded result for a declined attempt, answered by plain generation.
    pub async fn fall_back(
        &self,
        query: &str,
        ctx: &OrchestrationContext,
        declined: Declined,
    ) -> OrchestrationResult {
        tracing::debug!(reason = declined.reason.as_str(), "Answering with plain generation");

        OrchestrationResult {
            answer: self
                .plain_generation(query, ctx)
                .await
                .unwrap_or_else(|| APOLOGY_ANSWER.to_string()),
            tool_calls: declined.tool_calls,
            tool_results: declined.tool_results,
            confidence: declined.reason.confidence(),
            reasoning: declined.reasoning,
            outcome: OrchestrationOutcome::Degraded(declined.reason),
        }
    }

    /// Financial-insight generation over the conversation history and the
    /// caller's recent successful tool results. `None` when the backend
    /// failed or panicked.
    pub async fn plain_generation(&self, query: &str, ctx: &OrchestrationContext) -> Option<String> {
        let data = recent_data(&ctx.recent_results);
        let messages = financial_insight_messages(&ctx.conversation_history, query, data.as_ref());

        let generated = AssertUnwindSafe(generate_bounded(
            self.llm.as_ref(),
            &messages,
            FINANCIAL_INSIGHT_OPTIONS,
            self.generation_timeout,
        ))
        .catch_unwind()
        .await;

        match generated {
            Ok(Ok(answer)) => Some(answer),
            Ok(Err(e)) => {
                tracing::error!(error = %e, llm = self.llm.name(), "Plain generation failed");
                None
            }
            Err(_) => {
                tracing::error!(llm = self.llm.name(), "Plain generation panicked");
                None
            }
        }
    }
}

/// `\n{name}:\n{pretty json}\n` for each successful result.
fn tool_context(calls: &[ToolCall], results: &[ToolResult]) -> String {
    let mut context = String::new();
    for (call, result) in calls.iter().zip(results) {
        if let (true, Some(data)) = (result.success, &result.data) {
            let rendered = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
            context.push_str(&format!("\n{}:\n{}\n", call.name, rendered));
        }
    }
    context
}

fn recent_data(results: &[ToolResult]) -> Option<Value> {
    let successful: Vec<Value> = results
        .iter()
        .filter(|r| r.success)
        .filter_map(|r| {
            r.data
                .as_ref()
                .map(|data| json!({ "tool": r.metadata.tool, "data": data }))
        })
        .collect();

    (!successful.is_empty()).then(|| Value::Array(successful))
}

/// `0.8 * success_rate + min(len / 1000, 0.2)`, clamped.
pub fn synthesis_confidence(results: &[ToolResult], answer: &str) -> f32 {
    if results.is_empty() {
        return DegradeReason::PipelineFailure.confidence();
    }
    let successful = results.iter().filter(|r| r.success).count() as f32;
    let success_rate = successful / results.len() as f32;
    let length_bonus = (answer.chars().count() as f32 / 1000.0).min(0.2);
    clamp_unit(0.8 * success_rate + length_bonus)
}

fn execution_reasoning(calls: &[ToolCall], results: &[ToolResult]) -> String {
    let (succeeded, failed): (Vec<_>, Vec<_>) = calls
        .iter()
        .zip(results)
        .partition(|(_, result)| result.success);
    fn names(pairs: &[(&ToolCall, &ToolResult)]) -> String {
        pairs
            .iter()
            .map(|(call, _)| call.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    let mut reasoning = format!("Executed {} tools: {} successful", calls.len(), succeeded.len());
    if !succeeded.is_empty() {
        reasoning.push_str(&format!(" ({})", names(&succeeded)));
    }
    if !failed.is_empty() {
        reasoning.push_str(&format!(", {} failed ({})", failed.len(), names(&failed)));
    }
    reasoning
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingLlm, ScriptedLlm};
    use crate::tools::registry::{CASH_FLOW_ANALYSIS, EXPENSE_ANALYSIS, REVENUE_ANALYSIS};
    use crate::tools::FixtureToolExecutor;
    use async_trait::async_trait;
    use finsight_common::llm::FINANCIAL_INSIGHT_PROMPT;

    /// Fixture executor that fails, or panics on, selected tools.
    struct FlakyExecutor {
        inner: FixtureToolExecutor,
        fail: Vec<&'static str>,
        panic_on: Option<&'static str>,
    }

    impl FlakyExecutor {
        fn new(fail: Vec<&'static str>, panic_on: Option<&'static str>) -> Self {
            Self {
                inner: FixtureToolExecutor::new(Arc::new(ToolRegistry::builtin())),
                fail,
                panic_on,
            }
        }
    }

    #[async_trait]
    impl ToolExecutor for FlakyExecutor {
        async fn execute(&self, call: &ToolCall) -> ToolResult {
            if self.panic_on == Some(call.name.as_str()) {
                panic!("handler bug");
            }
            if self.fail.contains(&call.name.as_str()) {
                return ToolResult::failed(
                    &call.name,
                    AppError::Accounting {
                        message: "upstream down".into(),
                    },
                    Instant::now(),
                );
            }
            self.inner.execute(call).await
        }

        fn registry(&self) -> &ToolRegistry {
            self.inner.registry()
        }
    }

    /// Fails synthesis, answers plain generation.
    struct SynthesisFailsLlm;

    #[async_trait]
    impl LlmGateway for SynthesisFailsLlm {
        async fn generate(&self, messages: &[ChatMessage], _: GenerationOptions) -> Result<String> {
            if messages[0].content.contains("real-time financial data") {
                Err(AppError::Generation {
                    message: "rate limited".into(),
                })
            } else {
                Ok("plain answer".into())
            }
        }

        fn name(&self) -> &str {
            "synthesis-fails"
        }
    }

    struct PanickingLlm;

    #[async_trait]
    impl LlmGateway for PanickingLlm {
        async fn generate(&self, _: &[ChatMessage], _: GenerationOptions) -> Result<String> {
            panic!("client bug");
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    fn orchestrator(executor: Arc<dyn ToolExecutor>, llm: Arc<dyn LlmGateway>) -> Orchestrator {
        Orchestrator::new(Arc::new(ToolRegistry::builtin()), executor, llm).unwrap()
    }

    fn fixture() -> Arc<dyn ToolExecutor> {
        Arc::new(FixtureToolExecutor::new(Arc::new(ToolRegistry::builtin())))
    }

    #[tokio::test]
    async fn test_no_tool_intent() {
        let llm = Arc::new(ScriptedLlm::new("Hi! How can I help with your finances?"));
        let orch = orchestrator(fixture(), llm.clone());
        let ctx = OrchestrationContext {
            conversation_history: "user: hello".into(),
            ..Default::default()
        };

        let result = orch.orchestrate("Hello, how are you?", &ctx).await;

        assert_eq!(result.outcome, OrchestrationOutcome::Degraded(DegradeReason::NoToolIntent));
        assert_eq!(result.confidence, 0.7);
        assert!(result.tool_calls.is_empty());
        assert!(result.reasoning.is_none());

        let prompt = llm.last_prompt();
        assert_eq!(prompt[0].content, FINANCIAL_INSIGHT_PROMPT);
        assert!(prompt[1].content.starts_with("Context: user: hello"));
        assert!(!prompt[1].content.contains("Data:"));
    }

    #[tokio::test]
    async fn test_no_tools_selected() {
        let orch = orchestrator(fixture(), Arc::new(ScriptedLlm::new("ok")));
        let result = orch.orchestrate("Please analyze this", &OrchestrationContext::default()).await;

        assert_eq!(result.outcome, OrchestrationOutcome::Degraded(DegradeReason::NoToolsSelected));
        assert_eq!(result.confidence, 0.7);
    }

    #[tokio::test]
    async fn test_synthesized_answer() {
        let llm = Arc::new(ScriptedLlm::new("x".repeat(100)));
        let orch = orchestrator(fixture(), llm.clone());

        let result = orch
            .orchestrate("What's our cash flow for Q1 2025?", &OrchestrationContext::default())
            .await;

        assert_eq!(result.outcome, OrchestrationOutcome::Synthesized);
        assert_eq!(result.tool_calls.len(), 1);
        assert!(result.tool_results[0].success);
        assert!((result.confidence - 0.9).abs() < 1e-6);
        assert_eq!(
            result.reasoning.as_deref(),
            Some("Executed 1 tools: 1 successful (get_cash_flow_analysis)")
        );

        let prompt = llm.last_prompt();
        assert!(prompt[0].content.contains("Tool Results:\n\nget_cash_flow_analysis:\n{"));
        assert!(prompt[0].content.contains("\"endingBalance\": 1536000.0"));
        assert_eq!(prompt[1].content, "What's our cash flow for Q1 2025?");
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let executor = Arc::new(FlakyExecutor::new(vec![EXPENSE_ANALYSIS], None));
        let llm = Arc::new(ScriptedLlm::new("Revenue is up."));
        let orch = orchestrator(executor, llm.clone());

        let result = orch
            .orchestrate("Compare revenue and expense trends", &OrchestrationContext::default())
            .await;

        assert_eq!(result.outcome, OrchestrationOutcome::Synthesized);
        let names: Vec<&str> = result.tool_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names[..2], [REVENUE_ANALYSIS, EXPENSE_ANALYSIS]);
        assert!(result
            .reasoning
            .as_deref()
            .unwrap()
            .contains("1 failed (get_expense_analysis)"));
        let system = &llm.last_prompt()[0].content;
        assert!(system.contains("get_revenue_analysis:"));
        assert!(!system.contains("get_expense_analysis:"));
        assert!(result.confidence < 0.8);
    }

    #[tokio::test]
    async fn test_all_tools_failed() {
        let executor = Arc::new(FlakyExecutor::new(
            vec![CASH_FLOW_ANALYSIS, REVENUE_ANALYSIS, EXPENSE_ANALYSIS],
            None,
        ));
        let orch = orchestrator(executor, Arc::new(ScriptedLlm::new("fallback")));

        let result = orch
            .orchestrate("cash flow, revenue and expense review", &OrchestrationContext::default())
            .await;

        assert_eq!(result.outcome, OrchestrationOutcome::Degraded(DegradeReason::AllToolsFailed));
        assert_eq!(result.confidence, 0.5);
        assert_eq!(result.answer, "fallback");
        assert_eq!(result.tool_results.len(), 3);
        assert!(result.tool_results.iter().all(|r| !r.success));
    }

    #[tokio::test]
    async fn test_panicking_tool_is_isolated() {
        let executor = Arc::new(FlakyExecutor::new(vec![], Some(CASH_FLOW_ANALYSIS)));
        let orch = orchestrator(executor, Arc::new(ScriptedLlm::new("ok")));

        let result = orch
            .orchestrate("cash flow and revenue", &OrchestrationContext::default())
            .await;

        assert_eq!(result.outcome, OrchestrationOutcome::Synthesized);
        assert!(!result.tool_results[0].success);
        assert!(result.tool_results[1].success);
    }

    #[tokio::test]
    async fn test_synthesis_failure_degrades() {
        let orch = orchestrator(fixture(), Arc::new(SynthesisFailsLlm));
        let result = orch.orchestrate("What is our revenue?", &OrchestrationContext::default()).await;

        assert_eq!(result.outcome, OrchestrationOutcome::Degraded(DegradeReason::PipelineFailure));
        assert_eq!(result.confidence, 0.5);
        assert_eq!(result.answer, "plain answer");
        assert!(result.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_panic_and_dead_backend_yield_apology() {
        let orch = orchestrator(fixture(), Arc::new(PanickingLlm));
        let result = orch.orchestrate("What is our revenue?", &OrchestrationContext::default()).await;
        assert_eq!(result.outcome, OrchestrationOutcome::Degraded(DegradeReason::PipelineFailure));
        assert_eq!(result.answer, APOLOGY_ANSWER);
        assert_eq!(result.confidence, 0.5);

        let orch = orchestrator(fixture(), Arc::new(FailingLlm));
        let result = orch.orchestrate("Hello there", &OrchestrationContext::default()).await;
        assert_eq!(result.answer, APOLOGY_ANSWER);
        assert_eq!(result.confidence, 0.7);
    }

    #[tokio::test]
    async fn test_recent_results_feed_plain_generation() {
        let executor = fixture();
        let call = ToolCall::new(REVENUE_ANALYSIS, serde_json::Map::new());
        let previous = executor.execute(&call).await;
        assert!(previous.success);

        let llm = Arc::new(ScriptedLlm::new("ok"));
        let orch = orchestrator(executor, llm.clone());
        let ctx = OrchestrationContext {
            conversation_history: String::new(),
            recent_results: vec![previous],
        };
        orch.orchestrate("Thanks, anything else?", &ctx).await;

        let user = &llm.last_prompt()[1].content;
        assert!(user.contains("Data: "));
        assert!(user.contains("get_revenue_analysis"));
        assert!(user.contains("2400000"));
    }

    #[test]
    fn test_confidence_formula() {
        assert_eq!(synthesis_confidence(&[], "anything"), 0.5);
    }
}
