//! Phase F of the sync engine: session transcripts (§4.3), synced the same
//! way as memory files but capped to the most-recent `maxSessionChunks`
//! chunks per transcript — older turns fall out of the index rather than
//! growing it unbounded.

use std::path::{Path, PathBuf};

use clawmem_core::Source;
use walkdir::WalkDir;

use crate::error::Result;
use crate::sync::files::{self, FileSyncContext, FileSyncOutcome};

/// Directory holding one subdirectory of transcripts per agent.
const SESSIONS_DIR: &str = "sessions";

/// Enumerate transcript files for one agent: `<workspace>/sessions/<agentId>/**/*.md`.
pub fn enumerate_session_files(workspace: &Path, agent_id: &str) -> Vec<PathBuf> {
  let root = workspace.join(SESSIONS_DIR).join(agent_id);
  if !root.is_dir() {
    return Vec::new();
  }
  let mut out = Vec::new();
  for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
    if entry.file_type().is_file() && entry.path().extension().is_some_and(|ext| ext.eq_ignore_ascii_case("md")) {
      out.push(entry.path().to_path_buf());
    }
  }
  out
}

/// Process one session transcript, truncating to the most recent
/// `max_session_chunks` chunks (by file order: later chunks are later in
/// the transcript, i.e. more recent) before the atomic write (§5
/// back-pressure).
pub async fn sync_session_file(
  ctx: &FileSyncContext<'_>,
  path: &Path,
  id: &str,
  force: bool,
  max_session_chunks: usize,
) -> Result<FileSyncOutcome> {
  let Some((mut chunks, meta)) = files::prepare_chunks(ctx, path, id, Source::Sessions, force).await? else {
    return Ok(FileSyncOutcome::default());
  };

  if max_session_chunks > 0 && chunks.len() > max_session_chunks {
    let drop = chunks.len() - max_session_chunks;
    chunks.drain(0..drop);
  }

  let chunk_count = chunks.len();
  files::write_file(ctx, id, &chunks, &meta).await?;
  Ok(FileSyncOutcome {
    changed: true,
    chunks_upserted: chunk_count,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn enumerates_only_configured_agent() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("sessions/agent-a")).unwrap();
    std::fs::create_dir_all(dir.path().join("sessions/agent-b")).unwrap();
    std::fs::write(dir.path().join("sessions/agent-a/t1.md"), "turn one").unwrap();
    std::fs::write(dir.path().join("sessions/agent-b/t1.md"), "turn one").unwrap();

    let found = enumerate_session_files(dir.path(), "agent-a");
    assert_eq!(found.len(), 1);
  }

  #[test]
  fn missing_agent_directory_yields_empty() {
    let dir = tempfile::tempdir().unwrap();
    assert!(enumerate_session_files(dir.path(), "nobody").is_empty());
  }
}
