//! Generic OpenAI-compatible embeddings HTTP provider (§4.2 managed mode).
//! A sliding-window rate limiter gates outgoing requests, and queries
//! carrying a task instruction are formatted differently from documents
//! for instruction-following models.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::provider::{EmbeddingError, EmbeddingMode, EmbeddingProvider};
use crate::rate_limit::{RateLimitConfig, RateLimitToken, SlidingWindowLimiter};

#[derive(Debug, Clone)]
pub struct HttpEmbeddingProvider {
  client: reqwest::Client,
  base_url: String,
  api_key: String,
  model: String,
  dimensions: usize,
  max_batch_size: usize,
  query_instruction: Option<String>,
  rate_limiter: std::sync::Arc<Mutex<SlidingWindowLimiter>>,
}

impl HttpEmbeddingProvider {
  pub fn new(base_url: impl Into<String>, api_key: String, model: impl Into<String>, dimensions: usize, max_batch_size: usize, query_instruction: Option<String>) -> Result<Self, EmbeddingError> {
    if api_key.is_empty() {
      return Err(EmbeddingError::NoApiKey);
    }
    Ok(Self {
      client: reqwest::Client::new(),
      base_url: base_url.into(),
      api_key,
      model: model.into(),
      dimensions,
      max_batch_size: max_batch_size.max(1),
      query_instruction,
      rate_limiter: std::sync::Arc::new(Mutex::new(SlidingWindowLimiter::new(RateLimitConfig::default()))),
    })
  }

  fn format_for_embedding(&self, text: &str, mode: EmbeddingMode) -> String {
    match mode {
      EmbeddingMode::Query => match &self.query_instruction {
        Some(instruction) if !instruction.is_empty() => format!("Instruct: {instruction}\nQuery:{text}"),
        _ => text.to_string(),
      },
      EmbeddingMode::Document => text.to_string(),
    }
  }

  async fn acquire_rate_limit_slot(&self) -> Result<RateLimitToken, EmbeddingError> {
    let config = RateLimitConfig::default();
    let start = Instant::now();
    loop {
      let result = self.rate_limiter.lock().await.check_and_record_with_token();
      match result {
        Ok(token) => return Ok(token),
        Err(wait) => {
          if start.elapsed() + wait > config.max_wait {
            warn!(max_wait_ms = config.max_wait.as_millis(), "rate limiter max wait exceeded");
            return Err(EmbeddingError::ProviderError(format!("rate limit wait time exceeded ({:?})", config.max_wait)));
          }
          tokio::time::sleep(wait).await;
        }
      }
    }
  }

  async fn post_embeddings(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let token = self.acquire_rate_limit_slot().await?;
    let request = EmbeddingsRequest {
      model: &self.model,
      input: inputs,
    };

    let result = self
      .client
      .post(format!("{}/embeddings", self.base_url))
      .bearer_auth(&self.api_key)
      .json(&request)
      .send()
      .await;

    let response = match result {
      Ok(r) => r,
      Err(e) => {
        self.rate_limiter.lock().await.refund(token);
        return Err(EmbeddingError::Network(e.to_string()));
      }
    };

    let status = response.status();
    if status.is_server_error() || status.as_u16() == 429 {
      // Didn't consume the remote quota, or the server never processed it.
      self.rate_limiter.lock().await.refund(token);
    }
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(EmbeddingError::ProviderError(format!("embeddings request returned {status}: {body}")));
    }

    let parsed: EmbeddingsResponse = response.json().await?;
    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
  }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
  fn name(&self) -> &str {
    "http"
  }

  fn model_id(&self) -> &str {
    &self.model
  }

  fn dimensions(&self) -> usize {
    self.dimensions
  }

  async fn embed(&self, text: &str, mode: EmbeddingMode) -> Result<Vec<f32>, EmbeddingError> {
    let formatted = self.format_for_embedding(text, mode);
    let mut vectors = self.post_embeddings(&[formatted]).await?;
    vectors.pop().ok_or_else(|| EmbeddingError::ProviderError("empty response".into()))
  }

  async fn embed_batch(&self, texts: &[&str], mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if texts.is_empty() {
      return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(self.max_batch_size) {
      let formatted: Vec<String> = chunk.iter().map(|t| self.format_for_embedding(t, mode)).collect();
      debug!(batch_size = formatted.len(), "requesting embeddings batch");
      out.extend(self.post_embeddings(&formatted).await?);
    }
    Ok(out)
  }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
  model: &'a str,
  input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
  data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
  embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_empty_api_key() {
    let result = HttpEmbeddingProvider::new("https://example.test", String::new(), "model", 1024, 64, None);
    assert!(matches!(result, Err(EmbeddingError::NoApiKey)));
  }

  #[test]
  fn query_instruction_only_applies_to_queries() {
    let provider = HttpEmbeddingProvider::new("https://example.test", "key".into(), "model", 1024, 64, Some("find related memories".into())).unwrap();
    assert_eq!(provider.format_for_embedding("hello", EmbeddingMode::Document), "hello");
    assert_eq!(
      provider.format_for_embedding("hello", EmbeddingMode::Query),
      "Instruct: find related memories\nQuery:hello"
    );
  }
}
