//! Local embedding provider backed by an Ollama-compatible `/api/embed`
//! endpoint (§4.2 managed mode). Batches are split and processed with
//! bounded concurrency so a large sync doesn't saturate a local GPU.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::provider::{EmbeddingError, EmbeddingMode, EmbeddingProvider};

const DEFAULT_MAX_CONCURRENT: usize = 4;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
  client: reqwest::Client,
  base_url: String,
  model: String,
  dimensions: usize,
  max_batch_size: usize,
}

impl OllamaProvider {
  pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimensions: usize, max_batch_size: usize) -> Self {
    Self {
      client: reqwest::Client::new(),
      base_url: base_url.into(),
      model: model.into(),
      dimensions,
      max_batch_size: max_batch_size.max(1),
    }
  }

  fn embed_url(&self) -> String {
    format!("{}/api/embed", self.base_url)
  }

  async fn embed_single_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let request = EmbedRequest {
      model: &self.model,
      input: texts,
    };
    let response = self.client.post(self.embed_url()).json(&request).send().await?;
    if !response.status().is_success() {
      let status = response.status();
      let body = response.text().await.unwrap_or_default();
      return Err(EmbeddingError::ProviderError(format!("ollama returned {status}: {body}")));
    }
    let parsed: EmbedResponse = response.json().await?;
    Ok(parsed.embeddings)
  }

  async fn embed_batch_concurrent(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let num_batches = texts.len().div_ceil(self.max_batch_size);
    if num_batches <= 1 {
      return self.embed_single_batch(texts).await;
    }

    debug!(
      texts = texts.len(),
      batches = num_batches,
      max_batch_size = self.max_batch_size,
      "splitting embed batch across concurrent sub-requests"
    );

    let semaphore = Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT));
    let futures: Vec<_> = texts
      .chunks(self.max_batch_size)
      .map(|chunk| {
        let semaphore = Arc::clone(&semaphore);
        async move {
          let _permit = semaphore.acquire().await.expect("semaphore never closed");
          self.embed_single_batch(chunk).await
        }
      })
      .collect();

    let results = futures::future::join_all(futures).await;
    let mut out = Vec::with_capacity(texts.len());
    for result in results {
      out.extend(result?);
    }
    Ok(out)
  }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
  fn name(&self) -> &str {
    "ollama"
  }

  fn model_id(&self) -> &str {
    &self.model
  }

  fn dimensions(&self) -> usize {
    self.dimensions
  }

  async fn embed(&self, text: &str, _mode: EmbeddingMode) -> Result<Vec<f32>, EmbeddingError> {
    let mut vectors = self.embed_single_batch(&[text]).await?;
    vectors.pop().ok_or_else(|| EmbeddingError::ProviderError("ollama returned no embeddings".into()))
  }

  async fn embed_batch(&self, texts: &[&str], _mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if texts.is_empty() {
      return Ok(Vec::new());
    }
    self.embed_batch_concurrent(texts).await
  }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
  model: &'a str,
  input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbedResponse {
  embeddings: Vec<Vec<f32>>,
}
