//! Configuration management for FinSight services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Generation backend configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Vector store backend configuration
    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    /// Retrieval (RAG) tuning
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Tool execution configuration
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Accounting connector configuration
    #[serde(default)]
    pub accounting: AccountingConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, hash
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Generation provider: openai, anthropic, mock
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API key for the provider
    pub api_key: Option<String>,

    /// API base URL override
    pub api_base: Option<String>,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Default max output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Default sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    /// Backend: local, remote
    #[serde(default = "default_vector_provider")]
    pub provider: String,

    /// Snapshot file for the local backend (in-memory only when unset)
    pub path: Option<String>,

    /// Remote index host, e.g. https://finance-docs-abc123.svc.pinecone.io
    pub url: Option<String>,

    /// Remote index API key
    pub api_key: Option<String>,

    /// Remote index namespace
    pub namespace: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Minimum similarity for a document to ground an answer
    #[serde(default = "default_retrieval_threshold")]
    pub threshold: f32,

    /// Default number of sources per answer
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,

    /// Characters of each document placed into the prompt
    #[serde(default = "default_context_excerpt_chars")]
    pub context_excerpt_chars: usize,

    /// Characters of each document returned as attribution
    #[serde(default = "default_source_excerpt_chars")]
    pub source_excerpt_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    /// Use the accounting connector for data tools
    #[serde(default)]
    pub live_data: bool,

    /// Freshness window of fetched financials, in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountingConfig {
    /// Connector base URL
    pub base_url: Option<String>,

    /// Bearer token
    pub access_token: Option<String>,

    /// Company (realm) identifier
    pub company_id: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 60 }
fn default_embedding_provider() -> String { "hash".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_upstream_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_llm_provider() -> String { "mock".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_max_tokens() -> u32 { 4000 }
fn default_temperature() -> f32 { 0.7 }
fn default_llm_timeout() -> u64 { 60 }
fn default_vector_provider() -> String { "local".to_string() }
fn default_retrieval_threshold() -> f32 { 0.6 }
fn default_max_sources() -> usize { 5 }
fn default_context_excerpt_chars() -> usize { 500 }
fn default_source_excerpt_chars() -> usize { 200 }
fn default_cache_ttl() -> u64 { 300 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "finsight".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_upstream_timeout(),
            max_retries: default_embedding_retries(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            api_base: None,
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_provider(),
            path: None,
            url: None,
            api_key: None,
            namespace: None,
            timeout_secs: default_upstream_timeout(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            threshold: default_retrieval_threshold(),
            max_sources: default_max_sources(),
            context_excerpt_chars: default_context_excerpt_chars(),
            source_excerpt_chars: default_source_excerpt_chars(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            live_data: false,
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            access_token: None,
            company_id: None,
            timeout_secs: default_upstream_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__LLM__PROVIDER=anthropic
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get the tool data freshness window as Duration
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.tools.cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.embedding.dimension, 1536);
        assert_eq!(config.retrieval.threshold, 0.6);
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.llm.provider, "mock");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = std::env::temp_dir().join(format!("finsight-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("partial.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[llm]\nprovider = \"anthropic\"\nmodel = \"claude-3-5-sonnet-latest\"").unwrap();
        writeln!(file, "[tools]\ncache_ttl_secs = 60").unwrap();

        let config = AppConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.llm.max_tokens, 4000);
        assert_eq!(config.tools.cache_ttl_secs, 60);
        assert_eq!(config.vector_store.provider, "local");

        std::fs::remove_dir_all(&dir).ok();
    }
}
