//! Grounding strategies
//!
//! [`AnswerEngine`] tries tool orchestration, retrieval and plain generation
//! in a caller-chosen order and returns the first acceptable answer:
//! - `Tools` is accepted when synthesis succeeded
//! - `Rag` is accepted when at least one source was found and nothing degraded
//! - `None` always terminates the chain

use crate::orchestrator::{
    Declined, OrchestrationContext, OrchestrationResult, Orchestrator, ToolAttempt,
};
use crate::rag::{RagOptions, RagResponse, RetrievalEngine, SourceAttribution};
use crate::tools::{ToolCall, ToolResult};
use finsight_common::metrics;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Confidence of a plain generation answer
pub const PLAIN_CONFIDENCE: f32 = 0.7;

/// Confidence when plain generation itself failed
pub const PLAIN_FAILED_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingStrategy {
    Tools,
    Rag,
    None,
}

impl GroundingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroundingStrategy::Tools => "tools",
            GroundingStrategy::Rag => "rag",
            GroundingStrategy::None => "none",
        }
    }
}

impl fmt::Display for GroundingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tools first, then retrieval, then plain generation
pub const DEFAULT_CHAIN: [GroundingStrategy; 3] = [
    GroundingStrategy::Tools,
    GroundingStrategy::Rag,
    GroundingStrategy::None,
];

#[derive(Debug, Clone, Default)]
pub struct AnswerRequest {
    pub question: String,
    pub context: OrchestrationContext,
    pub rag: RagOptions,
}

impl AnswerRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: impl Into<String>) -> Self {
        self.context.conversation_history = history.into();
        self
    }
}

/// Answer produced by whichever strategy was accepted
#[derive(Debug, Clone)]
pub struct GroundedAnswer {
    pub strategy: GroundingStrategy,
    pub answer: String,
    pub confidence: f32,
    pub sources: Vec<SourceAttribution>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub reasoning: Option<String>,
}

impl From<OrchestrationResult> for GroundedAnswer {
    fn from(result: OrchestrationResult) -> Self {
        Self {
            strategy: GroundingStrategy::Tools,
            answer: result.answer,
            confidence: result.confidence,
            sources: Vec::new(),
            tool_calls: result.tool_calls,
            tool_results: result.tool_results,
            reasoning: result.reasoning,
        }
    }
}

impl From<RagResponse> for GroundedAnswer {
    fn from(response: RagResponse) -> Self {
        Self {
            strategy: GroundingStrategy::Rag,
            answer: response.answer,
            confidence: response.confidence,
            sources: response.sources,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            reasoning: response.reasoning,
        }
    }
}

/// Outcome of a declined strategy, kept in case the chain runs out
enum Pending {
    Tools(Declined),
    Rag(RagResponse),
}

/// Composes the orchestrator and retrieval engine behind one interface
pub struct AnswerEngine {
    orchestrator: Arc<Orchestrator>,
    retrieval: Arc<RetrievalEngine>,
}

impl AnswerEngine {
    pub fn new(orchestrator: Arc<Orchestrator>, retrieval: Arc<RetrievalEngine>) -> Self {
        Self {
            orchestrator,
            retrieval,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn retrieval(&self) -> &Arc<RetrievalEngine> {
        &self.retrieval
    }

    /// Try each strategy in `chain` until one is accepted.
    ///
    /// An empty chain means [`DEFAULT_CHAIN`]. When no strategy is accepted
    /// the last declined attempt is returned in its degraded form.
    pub async fn answer(&self, request: &AnswerRequest, chain: &[GroundingStrategy]) -> GroundedAnswer {
        let chain = if chain.is_empty() { &DEFAULT_CHAIN[..] } else { chain };
        let mut pending = None;

        for strategy in chain {
            match strategy {
                GroundingStrategy::Tools => match self.orchestrator.attempt(&request.question).await {
                    ToolAttempt::Synthesized(result) => return self.accept(result.into()),
                    ToolAttempt::Declined(declined) => {
                        tracing::debug!(reason = declined.reason.as_str(), "Tools strategy declined");
                        pending = Some(Pending::Tools(declined));
                    }
                },
                GroundingStrategy::Rag => {
                    let response = self.retrieval.query(&request.question, &request.rag).await;
                    if !response.sources.is_empty() && !response.degraded {
                        return self.accept(response.into());
                    }
                    tracing::debug!(
                        sources = response.sources.len(),
                        degraded = response.degraded,
                        "RAG strategy declined"
                    );
                    pending = Some(Pending::Rag(response));
                }
                GroundingStrategy::None => return self.accept(self.plain(request).await),
            }
        }

        let answer: GroundedAnswer = match pending {
            Some(Pending::Tools(declined)) => self
                .orchestrator
                .fall_back(&request.question, &request.context, declined)
                .await
                .into(),
            Some(Pending::Rag(response)) => response.into(),
            None => self.plain(request).await,
        };
        self.accept(answer)
    }

    async fn plain(&self, request: &AnswerRequest) -> GroundedAnswer {
        let generated = self
            .orchestrator
            .plain_generation(&request.question, &request.context)
            .await;

        let (answer, confidence) = match generated {
            Some(answer) => (answer, PLAIN_CONFIDENCE),
            None => (
                crate::orchestrator::APOLOGY_ANSWER.to_string(),
                PLAIN_FAILED_CONFIDENCE,
            ),
        };

        GroundedAnswer {
            strategy: GroundingStrategy::None,
            answer,
            confidence,
            sources: Vec::new(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            reasoning: None,
        }
    }

    fn accept(&self, answer: GroundedAnswer) -> GroundedAnswer {
        metrics::record_answer(answer.strategy.as_str(), "accepted", answer.confidence);
        tracing::info!(
            strategy = %answer.strategy,
            confidence = answer.confidence,
            "Grounded answer produced"
        );
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::APOLOGY_ANSWER;
    use crate::testing::{keyword_store, FailingLlm, ScriptedLlm};
    use crate::tools::{FixtureToolExecutor, ToolRegistry};
    use finsight_common::LlmGateway;
    use finsight_search::{DocumentMetadata, DocumentType, NewDocument};

    async fn engine(llm: Arc<dyn LlmGateway>) -> AnswerEngine {
        let registry = Arc::new(ToolRegistry::builtin());
        let executor = Arc::new(FixtureToolExecutor::new(registry.clone()));
        let orchestrator = Orchestrator::new(registry, executor, llm.clone()).unwrap();

        let retrieval = RetrievalEngine::new(keyword_store(), llm);
        retrieval
            .add_document(NewDocument::new(
                "Expense approval policy: purchases above $5,000 need CFO approval.",
                DocumentMetadata::new(DocumentType::Policy).with_title("Controls Policy"),
            ))
            .await
            .unwrap();

        AnswerEngine::new(Arc::new(orchestrator), Arc::new(retrieval))
    }

    #[tokio::test]
    async fn test_tools_accepted_first() {
        let llm = Arc::new(ScriptedLlm::new("Ending cash is $1.5M."));
        let engine = engine(llm.clone()).await;

        let answer = engine
            .answer(&AnswerRequest::new("What's our cash flow this quarter?"), &[])
            .await;

        assert_eq!(answer.strategy, GroundingStrategy::Tools);
        assert_eq!(answer.tool_calls.len(), 1);
        assert!(answer.sources.is_empty());
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_falls_through_to_rag() {
        let llm = Arc::new(ScriptedLlm::new("Purchases above $5,000 need CFO approval."));
        let engine = engine(llm.clone()).await;

        let answer = engine
            .answer(&AnswerRequest::new("Who gives approval under the policy?"), &DEFAULT_CHAIN)
            .await;

        assert_eq!(answer.strategy, GroundingStrategy::Rag);
        assert_eq!(answer.sources.len(), 1);
        assert!(answer.tool_calls.is_empty());
        // The declined tools attempt never reached the backend
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_falls_through_to_plain() {
        let llm = Arc::new(ScriptedLlm::new("Hello!"));
        let engine = engine(llm.clone()).await;

        let answer = engine.answer(&AnswerRequest::new("Good morning"), &[]).await;

        assert_eq!(answer.strategy, GroundingStrategy::None);
        assert_eq!(answer.confidence, PLAIN_CONFIDENCE);
        assert_eq!(answer.answer, "Hello!");
        // rag query plus plain generation
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_custom_chain() {
        let engine = engine(Arc::new(ScriptedLlm::new("From the policy."))).await;

        let answer = engine
            .answer(
                &AnswerRequest::new("What does the approval policy say?"),
                &[GroundingStrategy::Rag, GroundingStrategy::Tools],
            )
            .await;
        assert_eq!(answer.strategy, GroundingStrategy::Rag);

        let answer = engine
            .answer(&AnswerRequest::new("Good morning"), &[GroundingStrategy::Tools])
            .await;
        assert_eq!(answer.strategy, GroundingStrategy::Tools);
        assert_eq!(answer.confidence, 0.7);
    }

    #[tokio::test]
    async fn test_dead_backend_never_errors() {
        let engine = engine(Arc::new(FailingLlm)).await;

        let answer = engine
            .answer(&AnswerRequest::new("What does the approval policy say?"), &[])
            .await;

        assert_eq!(answer.strategy, GroundingStrategy::None);
        assert_eq!(answer.answer, APOLOGY_ANSWER);
        assert_eq!(answer.confidence, PLAIN_FAILED_CONFIDENCE);
    }

    #[test]
    fn test_strategy_serde() {
        let chain: Vec<GroundingStrategy> = serde_json::from_str(r#"["rag", "none"]"#).unwrap();
        assert_eq!(chain, vec![GroundingStrategy::Rag, GroundingStrategy::None]);
        assert_eq!(GroundingStrategy::Tools.to_string(), "tools");
    }
}
