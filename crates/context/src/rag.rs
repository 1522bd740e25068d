//! Retrieval-augmented answers
//!
//! Provides:
//! - Similarity search over the knowledge base
//! - A bounded grounding block built from the hits
//! - Grounded generation with source attribution
//! - Confidence scoring and optional reasoning summary
//!
//! [`RetrievalEngine::query`] never returns an error. Search failures yield
//! an answer with no sources; generation failures yield a fixed answer
//! flagged `degraded`.

use finsight_common::config::RetrievalConfig;
use finsight_common::errors::Result;
use finsight_common::{clamp_unit, generate_bounded, ChatMessage, GenerationOptions, LlmGateway};
use finsight_search::{
    NewDocument, Relevance, SearchFilter, SearchOptions, SearchResult, VectorDocument, VectorStore,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Confidence reported when nothing relevant was retrieved
pub const NO_SOURCES_CONFIDENCE: f32 = 0.3;

/// Confidence reported when generation failed
pub const GENERATION_FAILED_CONFIDENCE: f32 = 0.3;

/// Answer returned when generation failed
pub const GENERATION_FAILED_ANSWER: &str = "I apologize, but I was unable to generate a response \
from the knowledge base at this time. Please try again or rephrase your question.";

const RAG_OPTIONS: GenerationOptions = GenerationOptions {
    temperature: 0.3,
    max_tokens: 2000,
};

const RAG_SYSTEM_PROMPT: &str = "You are an AI CFO assistant answering questions from the \
company's financial knowledge base.

Guidelines:
- Base your answer only on the provided context and documents
- If the documents do not contain the information needed, say so explicitly
- Cite the documents you rely on by title
- State any uncertainty or assumptions clearly
- Use precise financial terminology and keep the answer concise";

const REASONING_INSTRUCTION: &str =
    "\n- Explain your reasoning step by step before giving the final answer";

/// Per-query options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagOptions {
    /// Caller context placed ahead of the documents
    #[serde(default)]
    pub context: Option<String>,

    #[serde(default = "default_max_sources")]
    pub max_sources: usize,

    #[serde(default)]
    pub include_reasoning: bool,

    #[serde(default = "default_threshold")]
    pub threshold: f32,

    #[serde(default)]
    pub filter: Option<SearchFilter>,
}

fn default_max_sources() -> usize {
    5
}

fn default_threshold() -> f32 {
    0.6
}

impl Default for RagOptions {
    fn default() -> Self {
        Self {
            context: None,
            max_sources: default_max_sources(),
            include_reasoning: false,
            threshold: default_threshold(),
            filter: None,
        }
    }
}

impl RagOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            max_sources: config.max_sources,
            threshold: config.threshold,
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// A retrieved document credited in an answer
#[derive(Debug, Clone)]
pub struct SourceAttribution {
    pub document: VectorDocument,
    /// Similarity score of the document
    pub relevance: f32,
    pub excerpt: String,
}

impl SourceAttribution {
    pub fn tier(&self) -> Relevance {
        Relevance::from_score(self.relevance)
    }
}

#[derive(Debug, Clone)]
pub struct RagResponse {
    pub answer: String,
    pub sources: Vec<SourceAttribution>,
    pub confidence: f32,
    pub reasoning: Option<String>,
    pub degraded: bool,
}

/// Retrieval-augmented answer engine over a [`VectorStore`]
pub struct RetrievalEngine {
    store: Arc<VectorStore>,
    llm: Arc<dyn LlmGateway>,
    context_excerpt_chars: usize,
    source_excerpt_chars: usize,
    generation_timeout: Duration,
}

impl RetrievalEngine {
    pub fn new(store: Arc<VectorStore>, llm: Arc<dyn LlmGateway>) -> Self {
        Self {
            store,
            llm,
            context_excerpt_chars: 500,
            source_excerpt_chars: 200,
            generation_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_config(mut self, config: &RetrievalConfig) -> Self {
        self.context_excerpt_chars = config.context_excerpt_chars;
        self.source_excerpt_chars = config.source_excerpt_chars;
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Answer a question from the knowledge base.
    pub async fn query(&self, question: &str, options: &RagOptions) -> RagResponse {
        let search = SearchOptions {
            limit: options.max_sources,
            threshold: options.threshold,
            filter: options.filter.clone(),
        };

        let (results, search_failed) = match self.store.search(question, &search).await {
            Ok(results) => (results, false),
            Err(e) => {
                tracing::warn!(error = %e, "Knowledge base search failed, answering without sources");
                (Vec::new(), true)
            }
        };

        let context = self.build_context(&results, options.context.as_deref());
        let messages = rag_messages(&context, question, options.include_reasoning);

        let generated =
            generate_bounded(self.llm.as_ref(), &messages, RAG_OPTIONS, self.generation_timeout)
                .await;

        let sources: Vec<SourceAttribution> = results
            .into_iter()
            .map(|r| SourceAttribution {
                excerpt: source_excerpt(&r.document.content, self.source_excerpt_chars),
                relevance: r.score,
                document: r.document,
            })
            .collect();

        let (answer, confidence, degraded) = match generated {
            Ok(answer) => {
                let confidence = rag_confidence(&sources);
                (answer, confidence, search_failed)
            }
            Err(e) => {
                tracing::error!(error = %e, llm = self.llm.name(), "Grounded generation failed");
                (
                    GENERATION_FAILED_ANSWER.to_string(),
                    GENERATION_FAILED_CONFIDENCE,
                    true,
                )
            }
        };

        let reasoning = options
            .include_reasoning
            .then(|| rag_reasoning(&sources, &answer));

        tracing::info!(
            sources = sources.len(),
            confidence = confidence,
            degraded = degraded,
            "RAG query complete"
        );

        RagResponse {
            answer,
            sources,
            confidence,
            reasoning,
            degraded,
        }
    }

    fn build_context(&self, results: &[SearchResult], user_context: Option<&str>) -> String {
        let mut context = String::new();

        if let Some(user) = user_context.filter(|c| !c.trim().is_empty()) {
            context.push_str(&format!("User Context:\n{}\n\n", user));
        }

        if results.is_empty() {
            context.push_str("No relevant documents found in the knowledge base.\n");
            return context;
        }

        context.push_str("Relevant Documents:\n");
        for (i, result) in results.iter().enumerate() {
            let meta = &result.document.metadata;
            let content = truncate_chars(&result.document.content, self.context_excerpt_chars);
            context.push_str(&format!(
                "\n{}. {} ({})\n   Source: {}\n   Date: {}\n   Relevance: {}\n   Content: {}\n",
                i + 1,
                meta.title.as_deref().unwrap_or("Document"),
                meta.doc_type,
                meta.source.as_deref().unwrap_or("Unknown"),
                meta.date.as_deref().unwrap_or("Unknown"),
                result.relevance.as_str(),
                content,
            ));
        }

        context
    }

    // Knowledge base pass-throughs

    pub async fn add_document(&self, document: NewDocument) -> Result<String> {
        self.store.store(document).await
    }

    pub async fn add_documents(&self, documents: Vec<NewDocument>) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            ids.push(self.store.store(document).await?);
        }
        tracing::info!(count = ids.len(), "Documents added to knowledge base");
        Ok(ids)
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<VectorDocument>> {
        self.store.get(id).await
    }

    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        self.store.delete(id).await
    }

    pub async fn list_documents(&self) -> Result<Vec<VectorDocument>> {
        self.store.list_all().await
    }

    pub async fn search_documents(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        self.store.search(query, options).await
    }
}

fn rag_messages(context: &str, question: &str, include_reasoning: bool) -> Vec<ChatMessage> {
    let mut system = RAG_SYSTEM_PROMPT.to_string();
    if include_reasoning {
        system.push_str(REASONING_INSTRUCTION);
    }

    vec![
        ChatMessage::system(system),
        ChatMessage::user(format!("Context:\n{}\n\nQuestion: {}", context, question)),
    ]
}

/// First `max` chars followed by `...` when longer.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{}...", head)
}

/// Whole text when short, else head and tail halves around `...`.
pub fn source_excerpt(text: &str, max: usize) -> String {
    let len = text.chars().count();
    if len <= max {
        return text.to_string();
    }
    let half = max / 2;
    let head: String = text.chars().take(half).collect();
    let tail: String = text.chars().skip(len - half).collect();
    format!("{}...{}", head, tail)
}

/// Mean score plus a source-count bonus capped at 0.3.
pub fn rag_confidence(sources: &[SourceAttribution]) -> f32 {
    if sources.is_empty() {
        return NO_SOURCES_CONFIDENCE;
    }
    let n = sources.len() as f32;
    let mean = sources.iter().map(|s| s.relevance).sum::<f32>() / n;
    clamp_unit(mean + (0.1 * n).min(0.3))
}

fn rag_reasoning(sources: &[SourceAttribution], answer: &str) -> String {
    let high = sources.iter().filter(|s| s.tier() == Relevance::High).count();
    let medium = sources.iter().filter(|s| s.tier() == Relevance::Medium).count();

    let mut parts = vec![format!("Found {} relevant documents", sources.len())];
    if !sources.is_empty() {
        let mean = sources.iter().map(|s| s.relevance).sum::<f32>() / sources.len() as f32;
        parts.push(format!(
            "{} highly relevant, {} moderately relevant",
            high, medium
        ));
        parts.push(format!("Average relevance score: {:.2}", mean));
    }
    parts.push(format!("Answer length: {} characters", answer.chars().count()));

    parts.join(". ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{keyword_store, FailingLlm, ScriptedLlm};
    use finsight_search::{DocumentMetadata, DocumentType};

    async fn seeded_engine(llm: Arc<dyn LlmGateway>) -> RetrievalEngine {
        let engine = RetrievalEngine::new(keyword_store(), llm);
        engine
            .add_documents(vec![
                NewDocument::new(
                    "Q1 revenue grew 15% to $2.4M driven by product sales.",
                    DocumentMetadata::new(DocumentType::FinancialReport)
                        .with_title("Q1 Report")
                        .with_source("Finance Team")
                        .with_date("2025-01-31"),
                ),
                NewDocument::new(
                    "Travel policy requires manager approval above $500.",
                    DocumentMetadata::new(DocumentType::Policy).with_title("Travel Policy"),
                ),
            ])
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_grounded_answer_with_sources() {
        let llm = Arc::new(ScriptedLlm::new("Revenue was $2.4M [Q1 Report]."));
        let engine = seeded_engine(llm.clone()).await;

        let response = engine
            .query(
                "What was revenue in Q1?",
                &RagOptions::default().with_context("CFO of a SaaS company"),
            )
            .await;

        assert!(!response.degraded);
        assert_eq!(response.answer, "Revenue was $2.4M [Q1 Report].");
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].tier(), Relevance::High);
        assert!(response.confidence > 0.99);
        assert!(response.reasoning.is_none());

        let prompt = llm.last_prompt();
        assert!(prompt[0].content.contains("only on the provided context"));
        let user = &prompt[1].content;
        assert!(user.starts_with("Context:\nUser Context:\nCFO of a SaaS company\n\nRelevant Documents:\n"));
        assert!(user.contains("1. Q1 Report (financial_report)"));
        assert!(user.contains("Source: Finance Team"));
        assert!(user.contains("Relevance: high"));
        assert!(user.ends_with("Question: What was revenue in Q1?"));
    }

    #[tokio::test]
    async fn test_stored_report_answers_revenue_question() {
        let engine = RetrievalEngine::new(
            keyword_store(),
            Arc::new(ScriptedLlm::new("Revenue grew 15% in Q1 [Q1 report].")),
        );
        let ids = engine
            .add_documents(vec![NewDocument::new(
                "Q1 revenue grew 15%",
                DocumentMetadata::new(DocumentType::FinancialReport).with_title("Q1 report"),
            )])
            .await
            .unwrap();

        let options = RagOptions {
            threshold: 0.5,
            ..RagOptions::default()
        };
        let response = engine.query("How did revenue perform?", &options).await;

        let source = response
            .sources
            .iter()
            .find(|s| s.document.id == ids[0])
            .unwrap();
        assert_eq!(source.document.metadata.title.as_deref(), Some("Q1 report"));
        assert!(matches!(source.tier(), Relevance::High | Relevance::Medium));
        assert!(!response.answer.is_empty());
        assert!(!response.degraded);
    }

    #[tokio::test]
    async fn test_confidence_from_scores() {
        let engine = seeded_engine(Arc::new(ScriptedLlm::new("ok"))).await;

        // cos([1,1,..,0.1], [1,0,..,0.1]) ~= 0.709, plus 0.1 for one source
        let response = engine.query("revenue and cash", &RagOptions::default()).await;
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].tier(), Relevance::Medium);
        assert!((response.confidence - 0.809).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_no_sources() {
        let llm = Arc::new(ScriptedLlm::new("I don't have that information."));
        let engine = seeded_engine(llm.clone()).await;

        let options = RagOptions {
            include_reasoning: true,
            ..RagOptions::default()
        };
        let response = engine.query("How many employees churned?", &options).await;

        assert!(response.sources.is_empty());
        assert_eq!(response.confidence, NO_SOURCES_CONFIDENCE);
        assert!(llm.last_prompt()[1]
            .content
            .contains("No relevant documents found in the knowledge base."));
        assert_eq!(
            response.reasoning.as_deref(),
            Some("Found 0 relevant documents. Answer length: 30 characters")
        );
    }

    #[tokio::test]
    async fn test_reasoning_summary() {
        let llm = Arc::new(ScriptedLlm::new("Revenue grew."));
        let engine = seeded_engine(llm.clone()).await;

        let options = RagOptions {
            include_reasoning: true,
            ..RagOptions::default()
        };
        let response = engine.query("Q1 revenue?", &options).await;

        assert_eq!(
            response.reasoning.as_deref(),
            Some(
                "Found 1 relevant documents. 1 highly relevant, 0 moderately relevant. \
                 Average relevance score: 1.00. Answer length: 13 characters"
            )
        );
        assert!(llm.last_prompt()[0].content.contains("reasoning step by step"));
    }

    #[tokio::test]
    async fn test_generation_failure_is_degraded() {
        let engine = seeded_engine(Arc::new(FailingLlm)).await;
        let response = engine.query("What was revenue in Q1?", &RagOptions::default()).await;

        assert!(response.degraded);
        assert_eq!(response.answer, GENERATION_FAILED_ANSWER);
        assert_eq!(response.confidence, GENERATION_FAILED_CONFIDENCE);
        assert_eq!(response.sources.len(), 1);
    }

    #[test]
    fn test_source_excerpt() {
        let short = "a".repeat(200);
        assert_eq!(source_excerpt(&short, 200), short);

        let long = format!("{}{}", "h".repeat(150), "t".repeat(150));
        let excerpt = source_excerpt(&long, 200);
        assert_eq!(excerpt, format!("{}...{}", "h".repeat(100), "t".repeat(100)));

        let multibyte = "€".repeat(250);
        assert_eq!(source_excerpt(&multibyte, 200).chars().count(), 203);
    }

    #[test]
    fn test_context_truncation() {
        assert_eq!(truncate_chars("abc", 500), "abc");
        let long = "x".repeat(600);
        let truncated = truncate_chars(&long, 500);
        assert_eq!(truncated.len(), 503);
        assert!(truncated.ends_with("..."));
    }

    #[tokio::test]
    async fn test_document_pass_throughs() {
        let engine = seeded_engine(Arc::new(ScriptedLlm::new("ok"))).await;
        let docs = engine.list_documents().await.unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d.id.starts_with("doc_")));

        let id = docs[0].id.clone();
        assert!(engine.get_document(&id).await.unwrap().is_some());
        assert!(engine.delete_document(&id).await.unwrap());
        assert!(!engine.delete_document(&id).await.unwrap());
        assert_eq!(engine.list_documents().await.unwrap().len(), 1);
    }
}
