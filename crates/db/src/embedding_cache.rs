//! Embedding cache lookups (§4.2, §3 embedding_cache). Keyed by
//! `(provider, model, providerKey, hash)` so identical text is never
//! re-embedded within the TTL window.

use bson::doc;
use chrono::{Duration, Utc};
use clawmem_core::EmbeddingCacheEntry;

use crate::{connection::MongoDb, error::Result};

impl MongoDb {
  pub async fn get_cached_embedding(&self, provider: &str, model: &str, provider_key: &str, hash: &str) -> Result<Option<Vec<f32>>> {
    let id = EmbeddingCacheEntry::make_id(provider, model, provider_key, hash);
    Ok(self.embedding_cache().find_one(doc! { "_id": id }).await?.map(|e| e.vector))
  }

  pub async fn put_cached_embedding(&self, provider: &str, model: &str, provider_key: &str, hash: &str, vector: Vec<f32>) -> Result<()> {
    let id = EmbeddingCacheEntry::make_id(provider, model, provider_key, hash);
    let ttl_days = self.config.mongodb.embedding_cache_ttl_days;
    let expires_at = if ttl_days == 0 { None } else { Some(Utc::now() + Duration::days(ttl_days as i64)) };
    let entry = EmbeddingCacheEntry {
      id: id.clone(),
      provider: provider.to_string(),
      model: model.to_string(),
      provider_key: provider_key.to_string(),
      hash: hash.to_string(),
      vector,
      created_at: Utc::now(),
      expires_at,
    };
    let doc = bson::to_document(&entry)?;
    self
      .embedding_cache()
      .replace_one(doc! { "_id": id }, doc)
      .with_options(mongodb::options::ReplaceOptions::builder().upsert(true).build())
      .await?;
    Ok(())
  }
}
