//! FinSight context engine
//!
//! Turns a free-text financial question into a grounded answer:
//! - Retrieval-augmented generation over the document knowledge base
//! - Financial analysis tools with lexical selection and live data
//! - An orchestrator with a layered fallback chain
//! - Grounding strategies composing the above
//! - Document ingestion and the sample knowledge base

pub mod ingest;
pub mod orchestrator;
pub mod rag;
pub mod strategy;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use ingest::{DocumentIngestor, IngestRequest};
pub use orchestrator::{
    DegradeReason, OrchestrationContext, OrchestrationOutcome, OrchestrationResult, Orchestrator,
};
pub use rag::{RagOptions, RagResponse, RetrievalEngine, SourceAttribution};
pub use strategy::{AnswerEngine, AnswerRequest, GroundedAnswer, GroundingStrategy, DEFAULT_CHAIN};
