//! FinSight Common Library
//!
//! Shared code for the FinSight grounded-answer engine including:
//! - Configuration management
//! - Error types and handling
//! - Embedding client abstraction with deterministic fallback
//! - Generation (LLM) client abstraction
//! - Metrics and observability

pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::{Embedder, Embedding, EmbeddingGate};
pub use errors::{AppError, Result};
pub use llm::{generate_bounded, ChatMessage, GenerationOptions, LlmGateway, Role};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

/// Clamp a score or confidence into `[0, 1]`, mapping NaN to zero.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(1.4), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f32::NAN), 0.0);
        assert_eq!(clamp_unit(0.42), 0.42);
    }
}
