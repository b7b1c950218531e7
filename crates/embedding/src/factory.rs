//! Build a concrete [`EmbeddingProvider`] from configuration (§4.2, §6).

use std::sync::Arc;

use clawmem_core::{EmbeddingProviderConfig, EmbeddingProviderKind};

use crate::http_provider::HttpEmbeddingProvider;
use crate::ollama_provider::OllamaProvider;
use crate::provider::{EmbeddingError, EmbeddingProvider};

pub fn from_config(config: &EmbeddingProviderConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
  match config.provider {
    EmbeddingProviderKind::Ollama => {
      let base_url = config.base_url.clone().unwrap_or_else(|| "http://localhost:11434".to_string());
      let provider = OllamaProvider::new(base_url, &config.model, config.dimensions, config.max_batch_size);
      Ok(Arc::new(provider))
    }
    EmbeddingProviderKind::Http => {
      let base_url = config
        .base_url
        .clone()
        .ok_or_else(|| EmbeddingError::ProviderError("http provider requires embedding.base_url".into()))?;
      let api_key = config.api_key.clone().unwrap_or_default();
      let provider = HttpEmbeddingProvider::new(
        base_url,
        api_key,
        config.model.clone(),
        config.dimensions,
        config.max_batch_size,
        config.query_instruction.clone(),
      )?;
      Ok(Arc::new(provider))
    }
  }
}
