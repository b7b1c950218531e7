//! Embedding provider contract, retry/rate-limit plumbing, and the concrete
//! providers used when `managed` mode is active (§4.2).

pub mod factory;
pub mod http_provider;
pub mod model_limits;
pub mod ollama_provider;
pub mod provider;
pub mod rate_limit;
pub mod retry;

pub use factory::from_config;
pub use http_provider::HttpEmbeddingProvider;
pub use model_limits::token_limit_for;
pub use ollama_provider::OllamaProvider;
pub use provider::{EmbeddingError, EmbeddingMode, EmbeddingProvider};
pub use rate_limit::{RateLimitConfig, SlidingWindowLimiter};
pub use retry::{RetryConfig, retry_embedding};
