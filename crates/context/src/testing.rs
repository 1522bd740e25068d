//! Test doubles shared by the context engine tests

use async_trait::async_trait;
use finsight_common::errors::{AppError, Result};
use finsight_common::{ChatMessage, Embedder, EmbeddingGate, GenerationOptions, LlmGateway};
use finsight_search::{LocalIndex, VectorStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const KEYWORDS: &[&str] = &[
    "revenue", "cash", "expense", "policy", "approval", "churn", "margin",
];

/// One dimension per keyword plus a constant bias dimension.
pub struct KeywordEmbedder;

impl KeywordEmbedder {
    pub fn dimension() -> usize {
        KEYWORDS.len() + 1
    }

    fn vector(text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let mut vector: Vec<f32> = KEYWORDS
            .iter()
            .map(|k| if lowered.contains(k) { 1.0 } else { 0.0 })
            .collect();
        vector.push(0.1);
        vector
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn model_name(&self) -> &str {
        "keyword"
    }

    fn dimension(&self) -> usize {
        Self::dimension()
    }
}

/// In-memory store over the keyword embedder
pub fn keyword_store() -> Arc<VectorStore> {
    let gate = EmbeddingGate::new(Some(Arc::new(KeywordEmbedder)), KeywordEmbedder::dimension());
    Arc::new(VectorStore::new(Arc::new(LocalIndex::in_memory()), Arc::new(gate)))
}

/// Replies with a fixed answer and records every prompt it sees.
pub struct ScriptedLlm {
    reply: String,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Vec<ChatMessage> {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl LlmGateway for ScriptedLlm {
    async fn generate(&self, messages: &[ChatMessage], _options: GenerationOptions) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages.to_vec());
        Ok(self.reply.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Always fails.
pub struct FailingLlm;

#[async_trait]
impl LlmGateway for FailingLlm {
    async fn generate(&self, _messages: &[ChatMessage], _options: GenerationOptions) -> Result<String> {
        Err(AppError::Generation {
            message: "backend unavailable".into(),
        })
    }

    fn name(&self) -> &str {
        "failing"
    }
}
