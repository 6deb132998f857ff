//! Configuration management for the Kazanim engine
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use crate::errors::{AppError, Result};
use crate::resilience::{BreakerConfig, RetryPolicy};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main engine configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Language model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Hybrid search and fusion
    #[serde(default)]
    pub search: SearchConfig,

    /// Language-model reranking
    #[serde(default)]
    pub rerank: RerankConfig,

    /// Circuit breaker, retry and per-attempt timeouts
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Context window budgeting
    #[serde(default)]
    pub tokens: TokenConfig,

    /// Prerequisite gap discovery
    #[serde(default)]
    pub gaps: GapConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
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

    /// HTTP client timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Provider: openai, disabled
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// Chat completions endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// API key
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// HTTP client timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum output tokens for synthesis
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    /// Weight of the curriculum direct search
    #[serde(default = "default_kazanim_weight")]
    pub kazanim_weight: f64,

    /// Weight of the question-similarity search
    #[serde(default = "default_question_weight")]
    pub question_weight: f64,

    /// Additive bonus when both sources found a candidate
    #[serde(default = "default_synergy_bonus")]
    pub synergy_bonus: f64,

    /// Candidates at or above this fraction of the top score are primary
    #[serde(default = "default_primary_ratio")]
    pub primary_ratio: f64,

    /// Shared fan-out ceiling in seconds
    #[serde(default = "default_merge_timeout")]
    pub merge_timeout_secs: u64,

    /// Results returned when the caller does not say
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Upper bound on requested results
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Each source is asked for top_k times this many hits
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Subject codes accepted as filters
    #[serde(default = "default_known_subjects")]
    pub known_subjects: Vec<String>,

    /// Retry once with exam-mode grade filter when nothing matched
    #[serde(default = "default_enabled")]
    pub relax_on_empty: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankConfig {
    /// Enable language-model reranking
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Candidates sent to the model
    #[serde(default = "default_rerank_candidates")]
    pub max_candidates: usize,

    /// Weight (beta) of the model score in the blend
    #[serde(default = "default_llm_weight")]
    pub llm_weight: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,

    #[serde(default = "default_half_open_requests")]
    pub half_open_requests: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,

    #[serde(default = "default_enabled")]
    pub jitter: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResilienceConfig {
    /// Breaker settings for dependencies without an override
    #[serde(default)]
    pub breaker: BreakerSettings,

    /// Per-dependency breaker overrides, keyed by dependency name
    #[serde(default)]
    pub breaker_overrides: HashMap<String, BreakerSettings>,

    /// Retry policy shared by all dependencies
    #[serde(default)]
    pub retry: RetrySettings,

    /// Per-attempt timeout for embedding calls in seconds
    #[serde(default = "default_embedding_attempt_timeout")]
    pub embedding_timeout_secs: u64,

    /// Per-attempt timeout for search backend calls in seconds
    #[serde(default = "default_search_attempt_timeout")]
    pub search_timeout_secs: u64,

    /// Per-attempt timeout for language model calls in seconds
    #[serde(default = "default_llm_attempt_timeout")]
    pub llm_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenConfig {
    /// Model context window
    #[serde(default = "default_max_context")]
    pub max_context: usize,

    /// Tokens kept free for the model's answer
    #[serde(default = "default_reserved_output")]
    pub reserved_output: usize,

    /// Utilization ratio past which a warning is raised
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: f64,

    /// Sub-budget for candidate listings in prompts
    #[serde(default = "default_candidate_budget")]
    pub candidate_budget: usize,

    /// Sub-budget for supporting passages in prompts
    #[serde(default = "default_chunk_budget")]
    pub chunk_budget: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GapConfig {
    /// Maximum gaps reported per question
    #[serde(default = "default_max_gaps")]
    pub max_gaps: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name attached to log lines
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_llm_provider() -> String { "openai".to_string() }
fn default_llm_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_llm_timeout() -> u64 { 60 }
fn default_temperature() -> f32 { 0.2 }
fn default_llm_max_tokens() -> usize { 2000 }
fn default_kazanim_weight() -> f64 { 0.6 }
fn default_question_weight() -> f64 { 0.4 }
fn default_synergy_bonus() -> f64 { 0.1 }
fn default_primary_ratio() -> f64 { 0.9 }
fn default_merge_timeout() -> u64 { 25 }
fn default_top_k() -> usize { 5 }
fn default_max_top_k() -> usize { 50 }
fn default_candidate_multiplier() -> usize { 2 }
fn default_known_subjects() -> Vec<String> {
    ["BIO", "FIZ", "KIM", "MAT", "TDE", "TAR", "COG", "FEL", "DIN", "ING", "FEN", "SOS", "TUR", "GEO"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_enabled() -> bool { true }
fn default_rerank_candidates() -> usize { 10 }
fn default_llm_weight() -> f64 { 0.5 }
fn default_failure_threshold() -> u32 { 5 }
fn default_recovery_timeout() -> u64 { 30 }
fn default_half_open_requests() -> u32 { 2 }
fn default_max_attempts() -> u32 { 3 }
fn default_base_delay() -> u64 { 500 }
fn default_max_delay() -> u64 { 10_000 }
fn default_exponential_base() -> f64 { 2.0 }
fn default_embedding_attempt_timeout() -> u64 { 10 }
fn default_search_attempt_timeout() -> u64 { 8 }
fn default_llm_attempt_timeout() -> u64 { 20 }
fn default_max_context() -> usize { 128_000 }
fn default_reserved_output() -> usize { 4_096 }
fn default_warn_threshold() -> f64 { 0.8 }
fn default_candidate_budget() -> usize { 3_000 }
fn default_chunk_budget() -> usize { 6_000 }
fn default_max_gaps() -> usize { 10 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "kazanim".to_string() }

impl AppConfig {
    /// Load configuration from environment and files, then validate it
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SEARCH__MERGE_TIMEOUT_SECS=15
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            );

        Self::build(builder.build())
    }

    /// Load from a specific file, then validate it
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            );

        Self::build(builder.build())
    }

    fn build(config: std::result::Result<Config, ConfigError>) -> Result<Self> {
        let config: Self = config
            .and_then(|c| c.try_deserialize::<Self>())
            .map_err(|e| AppError::Configuration { message: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        let search = &self.search;
        if search.kazanim_weight < 0.0 || search.question_weight < 0.0 || search.synergy_bonus < 0.0 {
            return Err(config_error("search weights and synergy bonus must be non-negative"));
        }
        if !(0.0..=1.0).contains(&search.primary_ratio) {
            return Err(config_error("search.primary_ratio must be within [0, 1]"));
        }
        if search.max_top_k == 0 || search.candidate_multiplier == 0 {
            return Err(config_error("search.max_top_k and search.candidate_multiplier must be positive"));
        }
        if search.merge_timeout_secs == 0 {
            return Err(config_error("search.merge_timeout_secs must be positive"));
        }
        if !(0.0..=1.0).contains(&self.rerank.llm_weight) {
            return Err(config_error("rerank.llm_weight must be within [0, 1]"));
        }

        let breakers = std::iter::once(&self.resilience.breaker)
            .chain(self.resilience.breaker_overrides.values());
        for breaker in breakers {
            if breaker.failure_threshold == 0 || breaker.half_open_requests == 0 {
                return Err(config_error("breaker thresholds must be positive"));
            }
        }
        if self.resilience.retry.max_attempts == 0 {
            return Err(config_error("resilience.retry.max_attempts must be positive"));
        }
        let resilience = &self.resilience;
        if resilience.embedding_timeout_secs == 0 || resilience.search_timeout_secs == 0 || resilience.llm_timeout_secs == 0 {
            return Err(config_error("resilience attempt timeouts must be positive"));
        }
        if self.resilience.retry.exponential_base < 1.0 {
            return Err(config_error("resilience.retry.exponential_base must be at least 1"));
        }

        if self.tokens.reserved_output >= self.tokens.max_context {
            return Err(config_error("tokens.reserved_output must be below tokens.max_context"));
        }
        if !(0.0..=1.0).contains(&self.tokens.warn_threshold) {
            return Err(config_error("tokens.warn_threshold must be within [0, 1]"));
        }

        Ok(())
    }

    /// Shared fan-out ceiling
    pub fn merge_timeout(&self) -> Duration {
        Duration::from_secs(self.search.merge_timeout_secs)
    }
}

impl ResilienceConfig {
    /// Breaker config for a named dependency
    pub fn breaker_for(&self, name: &str) -> BreakerConfig {
        self.breaker_overrides
            .get(name)
            .unwrap_or(&self.breaker)
            .into()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        (&self.retry).into()
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        BreakerConfig {
            failure_threshold: settings.failure_threshold,
            recovery_timeout: Duration::from_secs(settings.recovery_timeout_secs),
            half_open_requests: settings.half_open_requests,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            exponential_base: settings.exponential_base,
            jitter: settings.jitter,
        }
    }
}

fn config_error(message: &str) -> AppError {
    AppError::Configuration {
        message: message.to_string(),
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
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            temperature: default_temperature(),
            max_tokens: default_llm_max_tokens(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            kazanim_weight: default_kazanim_weight(),
            question_weight: default_question_weight(),
            synergy_bonus: default_synergy_bonus(),
            primary_ratio: default_primary_ratio(),
            merge_timeout_secs: default_merge_timeout(),
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            candidate_multiplier: default_candidate_multiplier(),
            known_subjects: default_known_subjects(),
            relax_on_empty: default_enabled(),
        }
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_candidates: default_rerank_candidates(),
            llm_weight: default_llm_weight(),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
            half_open_requests: default_half_open_requests(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            exponential_base: default_exponential_base(),
            jitter: default_enabled(),
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerSettings::default(),
            breaker_overrides: HashMap::new(),
            retry: RetrySettings::default(),
            embedding_timeout_secs: default_embedding_attempt_timeout(),
            search_timeout_secs: default_search_attempt_timeout(),
            llm_timeout_secs: default_llm_attempt_timeout(),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            max_context: default_max_context(),
            reserved_output: default_reserved_output(),
            warn_threshold: default_warn_threshold(),
            candidate_budget: default_candidate_budget(),
            chunk_budget: default_chunk_budget(),
        }
    }
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            max_gaps: default_max_gaps(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            service_name: default_service_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.search.kazanim_weight, 0.6);
        assert_eq!(config.search.question_weight, 0.4);
        assert_eq!(config.search.synergy_bonus, 0.1);
        assert_eq!(config.merge_timeout(), Duration::from_secs(25));
        assert_eq!(config.resilience.retry.max_attempts, 3);
        assert_eq!(config.rerank.max_candidates, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_breaker_override() {
        let mut config = ResilienceConfig::default();
        config.breaker_overrides.insert(
            "language-model".to_string(),
            BreakerSettings {
                failure_threshold: 2,
                recovery_timeout_secs: 60,
                half_open_requests: 1,
            },
        );

        let llm = config.breaker_for("language-model");
        assert_eq!(llm.failure_threshold, 2);
        assert_eq!(llm.recovery_timeout, Duration::from_secs(60));

        let embedding = config.breaker_for("embedding");
        assert_eq!(embedding.failure_threshold, 5);
    }

    #[test]
    fn test_validate_rejects_bad_budget() {
        let mut config = AppConfig::default();
        config.tokens.reserved_output = config.tokens.max_context;
        assert!(matches!(config.validate(), Err(AppError::Configuration { .. })));

        let mut config = AppConfig::default();
        config.resilience.breaker.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_rejects_zero_failure_threshold() {
        let path = std::env::temp_dir().join(format!("kazanim-breaker-{}.toml", std::process::id()));
        std::fs::write(&path, "[resilience.breaker]\nfailure_threshold = 0\n").unwrap();

        let result = AppConfig::from_file(path.to_str().unwrap());
        std::fs::remove_file(&path).ok();

        match result {
            Err(AppError::Configuration { message }) => assert!(message.contains("breaker")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_from_file_accepts_valid_overrides() {
        let path = std::env::temp_dir().join(format!("kazanim-search-{}.toml", std::process::id()));
        std::fs::write(&path, "[search]\nsynergy_bonus = 0.2\n").unwrap();

        let result = AppConfig::from_file(path.to_str().unwrap());
        std::fs::remove_file(&path).ok();

        let config = result.unwrap();
        assert_eq!(config.search.synergy_bonus, 0.2);
        assert_eq!(config.resilience.breaker.failure_threshold, 5);
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = AppConfig::default();
        config.resilience.search_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(AppError::Configuration { .. })));

        let mut config = AppConfig::default();
        config.search.merge_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let json = r#"{ "search": { "synergy_bonus": 0.2 }, "rerank": { "enabled": false } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.search.synergy_bonus, 0.2);
        assert_eq!(config.search.kazanim_weight, 0.6);
        assert!(!config.rerank.enabled);
        assert_eq!(config.tokens.warn_threshold, 0.8);
    }
}
