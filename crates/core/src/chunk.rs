use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which watched surface a chunk was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
  Memory,
  Sessions,
}

/// Per-chunk embedding lifecycle state (§4.2).
///
/// `Pending` means embeddings are disabled for this item (automated mode, or
/// no provider attached); `Failed` means retries were exhausted but the chunk
/// was still written so full-text search stays usable; `Success` means a
/// vector is stored alongside the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
  Success,
  Failed,
  Pending,
}

/// A contiguous slice of a source document, the indexing unit for memory and
/// session text (§3).
///
/// `_id` is always `"{path}:{start_line}:{end_line}"` so ingestion is
/// deterministic and idempotent across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
  #[serde(rename = "_id")]
  pub id: String,
  pub path: String,
  pub source: Source,
  pub start_line: u32,
  pub end_line: u32,
  pub hash: String,
  pub model: Option<String>,
  pub text: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub embedding: Option<Vec<f32>>,
  pub embedding_status: EmbeddingStatus,
  pub updated_at: DateTime<Utc>,
}

impl Chunk {
  pub fn make_id(path: &str, start_line: u32, end_line: u32) -> String {
    format!("{path}:{start_line}:{end_line}")
  }

  pub fn new(
    path: impl Into<String>,
    source: Source,
    start_line: u32,
    end_line: u32,
    text: impl Into<String>,
    hash: impl Into<String>,
  ) -> Self {
    let path = path.into();
    let id = Self::make_id(&path, start_line, end_line);
    Self {
      id,
      path,
      source,
      start_line,
      end_line,
      hash: hash.into(),
      model: None,
      text: text.into(),
      embedding: None,
      embedding_status: EmbeddingStatus::Pending,
      updated_at: Utc::now(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn id_is_deterministic_from_path_and_lines() {
    let c = Chunk::new("memory/a.md", Source::Memory, 1, 10, "text", "h");
    assert_eq!(c.id, "memory/a.md:1:10");
  }
}
