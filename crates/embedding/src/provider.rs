//! The embedding provider contract (§4.2). A provider is an external
//! collaborator: the memory crate only knows `embed`/`embed_batch`, never
//! which vendor or model backs them.

/// Embedding mode determines how text is formatted before embedding.
///
/// Instruction-following embedding models produce better retrieval results
/// when queries carry a task instruction while documents are embedded
/// as-is, so the two are distinguished at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingMode {
  #[default]
  Document,
  Query,
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
  #[error("no api key configured for embedding provider")]
  NoApiKey,
  #[error("request failed: {0}")]
  Request(#[from] reqwest::Error),
  #[error("provider error: {0}")]
  ProviderError(String),
  #[error("network error: {0}")]
  Network(String),
  #[error("request timed out")]
  Timeout,
}

#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
  fn name(&self) -> &str;
  fn model_id(&self) -> &str;
  fn dimensions(&self) -> usize;

  async fn embed(&self, text: &str, mode: EmbeddingMode) -> Result<Vec<f32>, EmbeddingError>;
  async fn embed_batch(&self, texts: &[&str], mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}
