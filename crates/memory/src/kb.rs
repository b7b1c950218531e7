//! Knowledge-base ingest: hash, chunk, embed, and upsert a document independent
//! of the memory/session chunk set, plus the time-gated auto-refresh pass
//! (§3 "Knowledge-base document and KB chunk", §6 `kb.*`).

use std::path::Path;

use chrono::Utc;
use clawmem_core::{EmbeddingStatus, KbChunk, KbDocument, KbSource, KbSourceType, config::KbConfig, hash_str, meta::keys::KB_LAST_AUTO_REFRESH};
use clawmem_db::MongoDb;
use clawmem_embedding::{EmbeddingMode, EmbeddingProvider, RetryConfig, retry_embedding};
use std::sync::Arc;
use tracing::{info, warn};

use crate::chunker::{ChunkerConfig, chunk_text};
use crate::error::Result;

pub struct IngestOutcome {
  pub doc_id: String,
  pub chunk_count: u32,
  pub unchanged: bool,
}

/// Ingest a single document's full text under `title`, skipping the work
/// entirely when the hash is unchanged from the stored document unless the
/// caller already confirmed it should run (the orphan-free invariant never
/// deletes a document's existing chunks before its replacements are ready).
pub async fn ingest_document(
  db: &MongoDb,
  kb_config: &KbConfig,
  provider: Option<&Arc<dyn EmbeddingProvider>>,
  id: &str,
  title: &str,
  content: &str,
  source: KbSource,
) -> Result<IngestOutcome> {
  let hash = hash_str(content);
  if let Some(existing) = db.get_kb_document(id).await? {
    if existing.hash == hash {
      return Ok(IngestOutcome {
        doc_id: id.to_string(),
        chunk_count: existing.chunk_count,
        unchanged: true,
      });
    }
  }

  let chunker = ChunkerConfig {
    window_tokens: kb_config.chunk_tokens,
    overlap_tokens: kb_config.chunk_overlap,
  };
  let windows = chunk_text(content, &chunker);

  let mut chunks = Vec::with_capacity(windows.len());
  for window in &windows {
    let mut embedding = None;
    let mut status = EmbeddingStatus::Pending;
    if let Some(provider) = provider {
      match retry_embedding(RetryConfig::default(), || provider.embed(&window.text, EmbeddingMode::Document)).await {
        Ok(vector) => {
          embedding = Some(vector);
          status = EmbeddingStatus::Success;
        }
        Err(e) => {
          warn!(doc_id = %id, start_line = window.start_line, error = %e, "KB chunk embedding failed, keeping chunk text-searchable");
          status = EmbeddingStatus::Failed;
        }
      }
    }
    chunks.push(KbChunk {
      id: KbChunk::make_id(id, window.start_line, window.end_line),
      doc_id: id.to_string(),
      path: title.to_string(),
      text: window.text.clone(),
      start_line: window.start_line,
      end_line: window.end_line,
      hash: hash_str(&window.text),
      model: provider.map(|p| p.model_id().to_string()),
      embedding,
      embedding_status: status,
      updated_at: Utc::now(),
    });
  }

  let now = Utc::now();
  let document = KbDocument {
    id: id.to_string(),
    hash,
    title: title.to_string(),
    source,
    char_count: content.chars().count() as u32,
    chunk_count: chunks.len() as u32,
    full_content: None,
    created_at: now,
    updated_at: now,
  };

  db.delete_kb_chunks_for_doc(id).await?;
  db.upsert_kb_chunks(&chunks).await?;
  db.upsert_kb_document(&document).await?;

  Ok(IngestOutcome {
    doc_id: id.to_string(),
    chunk_count: chunks.len() as u32,
    unchanged: false,
  })
}

/// Ingest a markdown/text file from `path`, using its path as the document
/// id and its filename as the title.
pub async fn ingest_file(db: &MongoDb, kb_config: &KbConfig, provider: Option<&Arc<dyn EmbeddingProvider>>, path: &Path) -> Result<IngestOutcome> {
  let metadata = tokio::fs::metadata(path).await?;
  if metadata.len() > kb_config.max_document_size {
    warn!(path = %path.display(), size = metadata.len(), cap = kb_config.max_document_size, "KB document exceeds configured size cap, skipping");
    return Ok(IngestOutcome {
      doc_id: path.display().to_string(),
      chunk_count: 0,
      unchanged: true,
    });
  }
  let content = tokio::fs::read_to_string(path).await?;
  let title = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| path.display().to_string());
  let id = path.display().to_string();
  ingest_document(
    db,
    kb_config,
    provider,
    &id,
    &title,
    &content,
    KbSource {
      kind: KbSourceType::File,
      value: Some(id.clone()),
    },
  )
  .await
}

/// Re-ingest every `kb.autoImportPaths` entry when enough hours have passed
/// since the last run (§6 `kb.autoRefreshHours`, §4.7 `sync` contract).
pub async fn maybe_auto_refresh(db: &MongoDb, kb_config: &KbConfig, provider: Option<&Arc<dyn EmbeddingProvider>>) -> Result<bool> {
  let Some(hours) = kb_config.auto_refresh_hours else {
    return Ok(false);
  };
  if !kb_config.enabled {
    return Ok(false);
  }

  let last = db.get_meta(KB_LAST_AUTO_REFRESH).await?.and_then(|v| v.as_i64());
  let now = Utc::now().timestamp();
  if let Some(last) = last {
    let elapsed_hours = (now - last).max(0) / 3600;
    if (elapsed_hours as u64) < hours {
      return Ok(false);
    }
  }

  for raw_path in &kb_config.auto_import_paths {
    let path = Path::new(raw_path);
    match ingest_file(db, kb_config, provider, path).await {
      Ok(outcome) if !outcome.unchanged => info!(path = %raw_path, chunks = outcome.chunk_count, "KB auto-refresh re-ingested document"),
      Ok(_) => {}
      Err(e) => warn!(path = %raw_path, error = %e, "KB auto-refresh failed for this path, continuing with the rest"),
    }
  }

  db.set_meta(KB_LAST_AUTO_REFRESH, serde_json::Value::from(now)).await?;
  Ok(true)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn chunker_config_matches_kb_defaults() {
    let kb = KbConfig::default();
    assert_eq!(kb.chunk_tokens, 600);
    assert_eq!(kb.chunk_overlap, 100);
  }
}
