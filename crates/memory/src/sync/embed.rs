//! Shared embedding helpers for the sync engine: batch-embedding chunk text
//! and the deferred re-attempt pass over previously failed chunks (§4.2).

use std::sync::Arc;

use clawmem_core::{Chunk, EmbeddingStatus, hash_str};
use clawmem_db::MongoDb;
use clawmem_embedding::{EmbeddingMode, EmbeddingProvider, RetryConfig, retry_embedding};
use tracing::{debug, warn};

use crate::error::Result;

/// Page size for the deferred re-attempt pass (§4.2).
const REATTEMPT_PAGE_SIZE: i64 = 100;
/// Batch size within a re-attempt pass.
const REATTEMPT_BATCH_SIZE: usize = 20;

/// `providerKey` partition for document-mode embeddings in the embedding
/// cache (§3): separate from query-mode vectors, since a provider may format
/// queries with an instruction prefix the corresponding document never gets.
const DOCUMENT_PROVIDER_KEY: &str = "document";

/// Embed every chunk's text in place, marking each one `success` or `failed`
/// depending on whether the provider call eventually succeeded. A failing
/// embedding call is a per-chunk outcome, never a sync failure (§7): the
/// chunk is still written with its text so full-text search stays usable.
/// Consults the embedding cache first so identical chunk text is never
/// re-embedded within the TTL window, and populates it on a fresh embed.
pub async fn embed_chunks(db: &MongoDb, provider: &Arc<dyn EmbeddingProvider>, retry: RetryConfig, chunks: &mut [Chunk]) {
  let model_id = provider.model_id().to_string();

  for chunk in chunks.iter_mut() {
    let text_hash = hash_str(&chunk.text);
    match db.get_cached_embedding(provider.name(), &model_id, DOCUMENT_PROVIDER_KEY, &text_hash).await {
      Ok(Some(vector)) => {
        debug!(chunk_id = %chunk.id, "embedding cache hit");
        chunk.embedding = Some(vector);
        chunk.embedding_status = EmbeddingStatus::Success;
        chunk.model = Some(model_id.clone());
        continue;
      }
      Ok(None) => {}
      Err(e) => warn!(chunk_id = %chunk.id, error = %e, "embedding cache lookup failed, embedding fresh"),
    }

    embed_one(provider, retry, chunk).await;

    if chunk.embedding_status == EmbeddingStatus::Success {
      if let Some(vector) = chunk.embedding.clone() {
        if let Err(e) = db.put_cached_embedding(provider.name(), &model_id, DOCUMENT_PROVIDER_KEY, &text_hash, vector).await {
          warn!(chunk_id = %chunk.id, error = %e, "failed to populate embedding cache");
        }
      }
    }
  }
}

/// Embed a single chunk's text with retry, bypassing the cache. Split out of
/// [`embed_chunks`] so the retry/failure behavior is testable without a
/// MongoDB connection.
async fn embed_one(provider: &Arc<dyn EmbeddingProvider>, retry: RetryConfig, chunk: &mut Chunk) {
  let text = chunk.text.clone();
  let result = retry_embedding(retry, || {
    let provider = Arc::clone(provider);
    let text = text.clone();
    async move { provider.embed(&text, EmbeddingMode::Document).await }
  })
  .await;

  match result {
    Ok(vector) => {
      chunk.embedding = Some(vector);
      chunk.embedding_status = EmbeddingStatus::Success;
      chunk.model = Some(provider.model_id().to_string());
    }
    Err(e) => {
      warn!(chunk_id = %chunk.id, error = %e, "embedding failed after retries, marking chunk as failed");
      chunk.embedding = None;
      chunk.embedding_status = EmbeddingStatus::Failed;
    }
  }
}

/// Deferred re-attempt pass (§4.2): page up to [`REATTEMPT_PAGE_SIZE`] chunks
/// stuck in `failed` status, oldest-updated first, and retry them in batches
/// of [`REATTEMPT_BATCH_SIZE`]. Returns how many chunks recovered.
pub async fn reattempt_failed_chunks(db: &MongoDb, provider: &Arc<dyn EmbeddingProvider>, retry: RetryConfig) -> Result<usize> {
  let mut chunks = db.page_failed_chunks(REATTEMPT_PAGE_SIZE).await?;
  if chunks.is_empty() {
    return Ok(0);
  }

  let mut recovered = 0usize;
  for batch in chunks.chunks_mut(REATTEMPT_BATCH_SIZE) {
    embed_chunks(db, provider, retry, batch).await;
    for chunk in batch.iter() {
      db.mark_chunk_embedding(&chunk.id, chunk.embedding_status, chunk.embedding.clone(), chunk.model.as_deref())
        .await?;
      if chunk.embedding_status == EmbeddingStatus::Success {
        recovered += 1;
      }
    }
  }
  Ok(recovered)
}

#[cfg(test)]
mod tests {
  use super::*;
  use clawmem_core::Source;

  struct FlakyProvider {
    fail_first: std::sync::atomic::AtomicBool,
  }

  #[async_trait::async_trait]
  impl EmbeddingProvider for FlakyProvider {
    fn name(&self) -> &str {
      "flaky"
    }
    fn model_id(&self) -> &str {
      "flaky-model"
    }
    fn dimensions(&self) -> usize {
      3
    }
    async fn embed(&self, _text: &str, _mode: EmbeddingMode) -> std::result::Result<Vec<f32>, clawmem_embedding::EmbeddingError> {
      if self.fail_first.swap(false, std::sync::atomic::Ordering::SeqCst) {
        Err(clawmem_embedding::EmbeddingError::ProviderError("flaky".into()))
      } else {
        Ok(vec![0.1, 0.2, 0.3])
      }
    }
    async fn embed_batch(&self, texts: &[&str], mode: EmbeddingMode) -> std::result::Result<Vec<Vec<f32>>, clawmem_embedding::EmbeddingError> {
      let mut out = Vec::with_capacity(texts.len());
      for t in texts {
        out.push(self.embed(t, mode).await?);
      }
      Ok(out)
    }
  }

  #[tokio::test(start_paused = true)]
  async fn retries_succeed_on_second_attempt() {
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(FlakyProvider {
      fail_first: std::sync::atomic::AtomicBool::new(true),
    });
    let mut chunks = vec![Chunk::new("memory/a.md", Source::Memory, 1, 5, "hello", "h")];
    embed_one(&provider, RetryConfig::default(), &mut chunks[0]).await;
    assert_eq!(chunks[0].embedding_status, EmbeddingStatus::Success);
    assert_eq!(chunks[0].embedding, Some(vec![0.1, 0.2, 0.3]));
  }
}
