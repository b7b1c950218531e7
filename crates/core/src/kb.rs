use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunk::EmbeddingStatus;

/// Where a knowledge-base document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KbSourceType {
  File,
  Url,
  Manual,
  Api,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbSource {
  #[serde(rename = "type")]
  pub kind: KbSourceType,
  /// File path, URL, or opaque reference, depending on `kind`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub value: Option<String>,
}

/// A knowledge-base document: independent of the memory/session chunk set,
/// related to its [`KbChunk`]s via `doc_id` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KbDocument {
  #[serde(rename = "_id")]
  pub id: String,
  pub hash: String,
  pub title: String,
  pub source: KbSource,
  pub char_count: u32,
  pub chunk_count: u32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub full_content: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// A chunk of a [`KbDocument`]. Orphan-free invariant: every `doc_id` must
/// reference an existing document (checked at startup, never auto-repaired).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KbChunk {
  #[serde(rename = "_id")]
  pub id: String,
  pub doc_id: String,
  pub path: String,
  pub text: String,
  pub start_line: u32,
  pub end_line: u32,
  pub hash: String,
  pub model: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub embedding: Option<Vec<f32>>,
  pub embedding_status: EmbeddingStatus,
  pub updated_at: DateTime<Utc>,
}

impl KbChunk {
  pub fn make_id(doc_id: &str, start_line: u32, end_line: u32) -> String {
    format!("{doc_id}:{start_line}:{end_line}")
  }
}
