//! Kazanim Common Library
//!
//! Shared code for the retrieval engine crates including:
//! - Curriculum data model and objective codes
//! - Embedding and language model client abstractions
//! - External backend traits and in-memory implementations
//! - Resilience pipeline (circuit breaker, retry, deadline)
//! - Token counting and budgeting
//! - Error types, configuration, tracing and metrics

pub mod backends;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod resilience;
pub mod telemetry;
pub mod tokens;

// Re-export commonly used types
pub use errors::{AppError, ErrorCode, Result};
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use llm::LanguageModel;
pub use resilience::{BreakerRegistry, Resilience};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
