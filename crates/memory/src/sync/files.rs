//! Phases A-E of the sync engine for memory files (§4.3): enumeration,
//! hash-compare, chunking, embedding, and the atomic per-file write.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clawmem_core::{Chunk, FileMeta, Source, hash_bytes, hash_str};
use clawmem_db::{AtomicWriteMode, MongoDb};
use clawmem_embedding::{EmbeddingProvider, RetryConfig};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::chunker::{self, ChunkerConfig};
use crate::error::Result;
use crate::sync::embed;

/// Root-level memory files watched unconditionally (§4.3 phase A, §6).
const ROOT_MEMORY_FILES: [&str; 2] = ["MEMORY.md", "memory.md"];
/// Directory recursively scanned for markdown notes.
const MEMORY_DIR: &str = "memory";

/// Enumerate every memory markdown file under `workspace` plus `extra_paths`
/// (§4.3 phase A, §6 "watched filesystem surface").
pub fn enumerate_memory_files(workspace: &Path, extra_paths: &[PathBuf]) -> Vec<PathBuf> {
  let mut paths = Vec::new();

  for name in ROOT_MEMORY_FILES {
    let candidate = workspace.join(name);
    if candidate.is_file() {
      paths.push(candidate);
    }
  }

  let memory_dir = workspace.join(MEMORY_DIR);
  if memory_dir.is_dir() {
    collect_markdown(&memory_dir, &mut paths);
  }

  for extra in extra_paths {
    if extra.is_dir() {
      collect_markdown(extra, &mut paths);
    } else if extra.is_file() {
      paths.push(extra.clone());
    }
  }

  paths
}

fn collect_markdown(root: &Path, out: &mut Vec<PathBuf>) {
  for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
    if entry.file_type().is_file() && entry.path().extension().is_some_and(|ext| ext.eq_ignore_ascii_case("md")) {
      out.push(entry.path().to_path_buf());
    }
  }
}

/// Collaborators a single file-sync needs, borrowed for the duration of one
/// sync run.
pub struct FileSyncContext<'a> {
  pub db: &'a MongoDb,
  pub atomic_mode: &'a AtomicWriteMode,
  pub provider: Option<&'a Arc<dyn EmbeddingProvider>>,
  pub managed: bool,
  pub retry: RetryConfig,
  pub chunker_config: ChunkerConfig,
}

/// Outcome of processing one file through phases B-E.
#[derive(Debug, Default)]
pub struct FileSyncOutcome {
  pub changed: bool,
  pub chunks_upserted: usize,
}

/// Phases B-D: hash-compare against stored metadata, chunk on a change (or
/// `force`), and embed in managed mode. Returns `None` when the file is
/// unchanged and should be left alone.
pub async fn prepare_chunks(ctx: &FileSyncContext<'_>, path: &Path, id: &str, source: Source, force: bool) -> Result<Option<(Vec<Chunk>, FileMeta)>> {
  let bytes = match tokio::fs::read(path).await {
    Ok(bytes) => bytes,
    Err(e) => {
      warn!(path = %path.display(), error = %e, "failed reading file during sync, leaving prior chunks in place");
      return Ok(None);
    }
  };
  let hash = hash_bytes(&bytes);

  if !force {
    if let Some(existing) = ctx.db.get_file_meta(id).await? {
      if existing.hash == hash {
        return Ok(None);
      }
    }
  }

  let text = String::from_utf8_lossy(&bytes).into_owned();
  let mut chunks: Vec<Chunk> = chunker::chunk_text(&text, &ctx.chunker_config)
    .into_iter()
    .map(|tc| {
      let chunk_hash = hash_str(&tc.text);
      Chunk::new(id, source, tc.start_line, tc.end_line, tc.text, chunk_hash)
    })
    .collect();

  if ctx.managed {
    if let Some(provider) = ctx.provider {
      embed::embed_chunks(ctx.db, provider, ctx.retry, &mut chunks).await;
    }
  }

  let mtime = std::fs::metadata(path)
    .ok()
    .and_then(|m| m.modified().ok())
    .map(chrono::DateTime::<chrono::Utc>::from)
    .unwrap_or_else(chrono::Utc::now);
  let meta = FileMeta::new(id, source, hash, mtime, bytes.len() as u64);

  Ok(Some((chunks, meta)))
}

/// Phase E: atomically replace the chunk set for `id` and its file metadata.
pub async fn write_file(ctx: &FileSyncContext<'_>, id: &str, chunks: &[Chunk], meta: &FileMeta) -> Result<()> {
  ctx.db.replace_file_atomic(ctx.atomic_mode, id, chunks, meta).await?;
  debug!(id, chunks = chunks.len(), "file synced");
  Ok(())
}

/// Phases B-E combined for the common case (no chunk-count cap).
pub async fn sync_file(ctx: &FileSyncContext<'_>, path: &Path, id: &str, source: Source, force: bool) -> Result<FileSyncOutcome> {
  let Some((chunks, meta)) = prepare_chunks(ctx, path, id, source, force).await? else {
    return Ok(FileSyncOutcome::default());
  };
  let chunk_count = chunks.len();
  write_file(ctx, id, &chunks, &meta).await?;
  Ok(FileSyncOutcome {
    changed: true,
    chunks_upserted: chunk_count,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn enumerates_root_files_and_memory_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("MEMORY.md"), "# root").unwrap();
    std::fs::create_dir(dir.path().join("memory")).unwrap();
    std::fs::write(dir.path().join("memory/a.md"), "# a").unwrap();
    std::fs::create_dir(dir.path().join("memory/nested")).unwrap();
    std::fs::write(dir.path().join("memory/nested/b.md"), "# b").unwrap();
    std::fs::write(dir.path().join("memory/not-markdown.txt"), "ignore me").unwrap();

    let found = enumerate_memory_files(dir.path(), &[]);
    assert_eq!(found.len(), 3);
  }

  #[test]
  fn includes_extra_paths() {
    let dir = tempfile::tempdir().unwrap();
    let extra_dir = tempfile::tempdir().unwrap();
    std::fs::write(extra_dir.path().join("extra.md"), "# extra").unwrap();

    let found = enumerate_memory_files(dir.path(), &[extra_dir.path().to_path_buf()]);
    assert_eq!(found.len(), 1);
  }
}
