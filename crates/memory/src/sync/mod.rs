//! Sync Engine (C3, §4.3): walk watched sources, detect changes by content
//! hash, chunk, embed, and atomically upsert/delete per source entry.

pub mod embed;
pub mod files;
pub mod sessions;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use clawmem_core::{EmbeddingMode as StoreEmbeddingMode, Source};
use clawmem_db::{AtomicWriteMode, MongoDb};
use clawmem_embedding::{EmbeddingProvider, RetryConfig};
use tracing::{info, warn};

use crate::chunker::ChunkerConfig;
use crate::error::Result;
use crate::sync::files::FileSyncContext;

/// One progress emission per processed file (§4.3 "progress contract").
/// The terminal emission guarantees `completed == total`.
#[derive(Debug, Clone)]
pub struct SyncProgress {
  pub completed: usize,
  pub total: usize,
  pub label: String,
}

pub type ProgressCallback = Arc<dyn Fn(SyncProgress) + Send + Sync>;

#[derive(Default)]
pub struct SyncOptions {
  pub reason: Option<String>,
  pub force: bool,
  pub agent_id: Option<String>,
  pub progress: Option<ProgressCallback>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SyncReport {
  pub files_processed: usize,
  pub chunks_upserted: usize,
  pub stale_deleted: u64,
  pub embeddings_recovered: usize,
}

pub struct SyncEngine {
  db: Arc<MongoDb>,
  provider: Option<Arc<dyn EmbeddingProvider>>,
  embedding_mode: StoreEmbeddingMode,
  atomic_mode: AtomicWriteMode,
  workspace: PathBuf,
  extra_paths: Vec<PathBuf>,
  retry: RetryConfig,
  memory_chunker: ChunkerConfig,
  max_session_chunks: usize,
}

impl SyncEngine {
  pub fn new(
    db: Arc<MongoDb>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    embedding_mode: StoreEmbeddingMode,
    workspace: PathBuf,
    extra_paths: Vec<PathBuf>,
    max_session_chunks: usize,
  ) -> Self {
    Self {
      db,
      provider,
      embedding_mode,
      atomic_mode: AtomicWriteMode::default(),
      workspace,
      extra_paths,
      retry: RetryConfig::default(),
      memory_chunker: ChunkerConfig::memory_default(),
      max_session_chunks,
    }
  }

  fn managed(&self) -> bool {
    self.embedding_mode == StoreEmbeddingMode::Managed
  }

  fn file_ctx(&self) -> FileSyncContext<'_> {
    FileSyncContext {
      db: self.db.as_ref(),
      atomic_mode: &self.atomic_mode,
      provider: self.provider.as_ref(),
      managed: self.managed(),
      retry: self.retry,
      chunker_config: self.memory_chunker,
    }
  }

  /// `id` used for both `FileMeta::path` and every `Chunk::path`: the
  /// workspace-relative path when inside the workspace, the absolute path
  /// otherwise (extra paths may live anywhere on disk, §6).
  fn stable_id(&self, path: &std::path::Path) -> String {
    stable_id(&self.workspace, path)
  }

  /// Run phases A-G of one sync (§4.3). The deferred embedding re-attempt
  /// pass (§4.2) runs first so chunks already in the store get another
  /// chance before new ones are even discovered.
  pub async fn run(&self, opts: SyncOptions) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    if let Some(provider) = &self.provider {
      if self.managed() {
        report.embeddings_recovered = embed::reattempt_failed_chunks(&self.db, provider, self.retry).await?;
      }
    }

    let memory_paths = files::enumerate_memory_files(&self.workspace, &self.extra_paths);
    let session_paths = match &opts.agent_id {
      Some(agent_id) => sessions::enumerate_session_files(&self.workspace, agent_id),
      None => Vec::new(),
    };

    let total = memory_paths.len() + session_paths.len();
    let mut completed = 0usize;
    let mut valid_ids = HashSet::with_capacity(total);
    let ctx = self.file_ctx();

    for path in &memory_paths {
      let id = self.stable_id(path);
      valid_ids.insert(id.clone());

      match files::sync_file(&ctx, path, &id, Source::Memory, opts.force).await {
        Ok(outcome) => {
          if outcome.changed {
            report.files_processed += 1;
            report.chunks_upserted += outcome.chunks_upserted;
          }
        }
        Err(e) => warn!(path = %path.display(), error = %e, "sync failed for file, leaving prior chunks in place"),
      }

      completed += 1;
      emit_progress(&opts.progress, completed, total, &id);
    }

    for path in &session_paths {
      let id = self.stable_id(path);
      valid_ids.insert(id.clone());

      match sessions::sync_session_file(&ctx, path, &id, opts.force, self.max_session_chunks).await {
        Ok(outcome) => {
          if outcome.changed {
            report.files_processed += 1;
            report.chunks_upserted += outcome.chunks_upserted;
          }
        }
        Err(e) => warn!(path = %path.display(), error = %e, "sync failed for session transcript, leaving prior chunks in place"),
      }

      completed += 1;
      emit_progress(&opts.progress, completed, total, &id);
    }

    report.stale_deleted = self.cleanup_stale(&valid_ids).await?;

    info!(
      reason = opts.reason.as_deref().unwrap_or("unspecified"),
      files_processed = report.files_processed,
      chunks_upserted = report.chunks_upserted,
      stale_deleted = report.stale_deleted,
      "sync complete"
    );

    Ok(report)
  }

  /// Phase G: delete chunks/metadata for any stored path no longer in the
  /// valid set discovered this run.
  async fn cleanup_stale(&self, valid_ids: &HashSet<String>) -> Result<u64> {
    let stored = self.db.stored_chunk_paths().await?;
    let stale: Vec<String> = stored.into_iter().filter(|p| !valid_ids.contains(p)).collect();
    if stale.is_empty() {
      return Ok(0);
    }
    Ok(self.db.delete_stale(&stale).await?)
  }
}

fn emit_progress(progress: &Option<ProgressCallback>, completed: usize, total: usize, label: &str) {
  if let Some(cb) = progress {
    cb(SyncProgress {
      completed,
      total,
      label: label.to_string(),
    });
  }
}

fn stable_id(workspace: &std::path::Path, path: &std::path::Path) -> String {
  path
    .strip_prefix(workspace)
    .map(|rel| rel.to_string_lossy().replace('\\', "/"))
    .unwrap_or_else(|_| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stable_id_strips_workspace_prefix() {
    let workspace = PathBuf::from("/ws");
    assert_eq!(stable_id(&workspace, std::path::Path::new("/ws/memory/a.md")), "memory/a.md");
  }

  #[test]
  fn stable_id_falls_back_to_absolute_path_outside_workspace() {
    let workspace = PathBuf::from("/ws");
    assert_eq!(stable_id(&workspace, std::path::Path::new("/elsewhere/a.md")), "/elsewhere/a.md");
  }
}
