//! Configuration management for Vedika services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Legacy deployment variables (OPENROUTER_*, SITE_*, HOST, PORT)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for `max_results` accepted from callers
pub const MAX_RESULTS_LIMIT: usize = 20;

/// Smallest context budget that still leaves room for the instruction template
pub const MIN_CONTEXT_CHARS: usize = 512;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Record snapshot location
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Index build and persistence
    #[serde(default)]
    pub index: IndexConfig,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Retrieval defaults
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Context assembly budget
    #[serde(default)]
    pub context: ContextConfig,

    /// Answer generation backend
    #[serde(default)]
    pub generation: GenerationConfig,

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

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnapshotConfig {
    /// Directory holding the pre-fetched JSON record files
    #[serde(default = "default_snapshot_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Path of the persisted index file
    #[serde(default = "default_index_path")]
    pub path: PathBuf,

    /// Maximum chunk length in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Chunks shorter than this are dropped unless they are a record's only chunk
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,

    /// Poll interval for snapshot changes (0 disables watching)
    #[serde(default)]
    pub watch_interval_secs: u64,

    /// Number of embedding batches in flight during a build
    #[serde(default = "default_build_concurrency")]
    pub build_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: local, fastembed, openai
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
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first attempt, on transient failures only
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Results returned when the caller does not ask for a number
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,

    /// Documents at or above this cosine distance are not treated as relevant
    #[serde(default = "default_relevance_cutoff")]
    pub relevance_cutoff: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContextConfig {
    /// Hard limit on the assembled prompt length in characters
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// OpenAI-compatible chat completions base URL
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,

    /// API key; without one the extractive fallback answers
    pub api_key: Option<String>,

    /// Model to use
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first attempt on transient failures
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,

    /// Base delay of the exponential backoff in milliseconds
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Cap on a single backoff delay in milliseconds
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Sent as HTTP-Referer for OpenRouter attribution
    #[serde(default = "default_site_url")]
    pub site_url: String,

    /// Sent as X-Title for OpenRouter attribution
    #[serde(default = "default_site_name")]
    pub site_name: String,
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
    /// Requests per second (global)
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
fn default_port() -> u16 { 8000 }
fn default_request_timeout() -> u64 { 120 }
fn default_max_concurrent() -> usize { 100 }
fn default_snapshot_dir() -> PathBuf { PathBuf::from("data/snapshot") }
fn default_index_path() -> PathBuf { PathBuf::from("data/index/vedika-index.json") }
fn default_chunk_size() -> usize { 800 }
fn default_chunk_overlap() -> usize { 100 }
fn default_min_chunk_chars() -> usize { 40 }
fn default_build_concurrency() -> usize { 4 }
fn default_embedding_provider() -> String { "local".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 2 }
fn default_batch_size() -> usize { 64 }
fn default_max_results() -> usize { 5 }
fn default_relevance_cutoff() -> f32 { 1.0 }
fn default_max_context_chars() -> usize { 6000 }
fn default_generation_base_url() -> String { "https://openrouter.ai/api/v1".to_string() }
fn default_generation_model() -> String { crate::DEFAULT_GENERATION_MODEL.to_string() }
fn default_generation_timeout() -> u64 { 30 }
fn default_generation_retries() -> u32 { 2 }
fn default_backoff_base() -> u64 { 500 }
fn default_backoff_max() -> u64 { 8_000 }
fn default_max_tokens() -> usize { 1000 }
fn default_temperature() -> f32 { 0.3 }
fn default_site_url() -> String { "https://vedika-isro.com".to_string() }
fn default_site_name() -> String { "Vedika - ISRO Knowledge Assistant".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "vedika".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { data_dir: default_snapshot_dir() }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_chars: default_min_chunk_chars(),
            watch_interval_secs: 0,
            build_concurrency: default_build_concurrency(),
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
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_max_results: default_max_results(),
            relevance_cutoff: default_relevance_cutoff(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { max_context_chars: default_max_context_chars() }
    }
}

impl GenerationConfig {
    /// Trimmed API key; blank keys count as unset
    pub fn effective_api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|key| !key.is_empty())
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_generation_base_url(),
            api_key: None,
            model: default_generation_model(),
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            site_url: default_site_url(),
            site_name: default_site_name(),
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
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__GENERATION__MODEL=openai/gpt-4o-mini
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        let mut config: AppConfig = config.try_deserialize()?;
        config.apply_legacy_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        let mut config: AppConfig = config.try_deserialize()?;
        config.apply_legacy_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Fill unset values from the legacy deployment variable names.
    /// `APP__` settings always win.
    fn apply_legacy_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.generation.api_key.is_none() {
            self.generation.api_key = lookup("OPENROUTER_API_KEY").filter(|k| !k.trim().is_empty());
        }
        if self.generation.base_url == default_generation_base_url() {
            if let Some(url) = lookup("OPENROUTER_BASE_URL") {
                self.generation.base_url = url;
            }
        }
        if self.generation.model == default_generation_model() {
            if let Some(model) = lookup("OPENROUTER_MODEL") {
                self.generation.model = model;
            }
        }
        if self.generation.site_url == default_site_url() {
            if let Some(site_url) = lookup("SITE_URL") {
                self.generation.site_url = site_url;
            }
        }
        if self.generation.site_name == default_site_name() {
            if let Some(site_name) = lookup("SITE_NAME") {
                self.generation.site_name = site_name;
            }
        }
        if self.server.host == default_host() {
            if let Some(host) = lookup("HOST") {
                self.server.host = host;
            }
        }
        if self.server.port == default_port() {
            if let Some(port) = lookup("PORT").and_then(|p| p.parse().ok()) {
                self.server.port = port;
            }
        }
    }

    /// Reject combinations that would make the pipeline misbehave
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| Err(AppError::Configuration { message });

        if self.index.chunk_size == 0 {
            return fail("index.chunk_size must be greater than zero".to_string());
        }
        if self.index.chunk_overlap >= self.index.chunk_size {
            return fail(format!(
                "index.chunk_overlap ({}) must be smaller than index.chunk_size ({})",
                self.index.chunk_overlap, self.index.chunk_size
            ));
        }
        if self.embedding.dimension == 0 {
            return fail("embedding.dimension must be greater than zero".to_string());
        }
        if self.embedding.batch_size == 0 {
            return fail("embedding.batch_size must be greater than zero".to_string());
        }
        if !(1..=MAX_RESULTS_LIMIT).contains(&self.retrieval.default_max_results) {
            return fail(format!(
                "retrieval.default_max_results must be within 1..={}",
                MAX_RESULTS_LIMIT
            ));
        }
        if !(self.retrieval.relevance_cutoff > 0.0 && self.retrieval.relevance_cutoff <= 2.0) {
            return fail("retrieval.relevance_cutoff must be within (0, 2]".to_string());
        }
        if self.context.max_context_chars < MIN_CONTEXT_CHARS {
            return fail(format!(
                "context.max_context_chars must be at least {}",
                MIN_CONTEXT_CHARS
            ));
        }
        if self.generation.timeout_secs == 0 {
            return fail("generation.timeout_secs must be greater than zero".to_string());
        }
        if self.rate_limit.enabled && (self.rate_limit.requests_per_second == 0 || self.rate_limit.burst == 0) {
            return fail("rate_limit.requests_per_second and rate_limit.burst must be non-zero".to_string());
        }
        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            snapshot: SnapshotConfig::default(),
            index: IndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            context: ContextConfig::default(),
            generation: GenerationConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}
