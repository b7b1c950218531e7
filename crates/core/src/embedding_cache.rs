use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A previously computed embedding vector, keyed by
/// `(provider, model, provider_key, hash)` so the same text is never
/// re-embedded across runs (§3). `expires_at` is set when
/// `embeddingCacheTtlDays` is nonzero.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingCacheEntry {
  #[serde(rename = "_id")]
  pub id: String,
  pub provider: String,
  pub model: String,
  pub provider_key: String,
  pub hash: String,
  pub vector: Vec<f32>,
  pub created_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub expires_at: Option<DateTime<Utc>>,
}

impl EmbeddingCacheEntry {
  pub fn make_id(provider: &str, model: &str, provider_key: &str, hash: &str) -> String {
    format!("{provider}:{model}:{provider_key}:{hash}")
  }
}
