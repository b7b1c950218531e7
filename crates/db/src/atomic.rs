//! Per-file atomic write: replace a file's chunks and its file-metadata
//! entry together (§4.3 "atomic per-file write", §5 concurrency model).
//!
//! Standalone MongoDB deployments don't support transactions at all,
//! replica sets and sharded clusters do. We try a session transaction first
//! and remember the outcome in an [`AtomicWriteMode`] so later calls in the
//! same sync run skip straight to the sequential fallback instead of paying
//! for a doomed retry every time.

use std::sync::atomic::{AtomicBool, Ordering};

use clawmem_core::{Chunk, FileMeta};
use tracing::{debug, warn};

use crate::{connection::MongoDb, error::Result};

/// Tracks whether this store has proven transactions are usable, shared
/// across an entire sync run so the first standalone-detection failure
/// downgrades every subsequent write instead of retrying the doomed path.
pub struct AtomicWriteMode {
  use_transactions: AtomicBool,
}

impl Default for AtomicWriteMode {
  fn default() -> Self {
    Self {
      use_transactions: AtomicBool::new(true),
    }
  }
}

impl AtomicWriteMode {
  pub fn assume_standalone(&self) {
    self.use_transactions.store(false, Ordering::Relaxed);
  }

  pub fn is_transactional(&self) -> bool {
    self.use_transactions.load(Ordering::Relaxed)
  }
}

impl MongoDb {
  /// Delete the old chunks for `path`, write the new ones, and upsert the
  /// file's metadata, as one unit when the topology supports it.
  pub async fn replace_file_atomic(&self, mode: &AtomicWriteMode, path: &str, chunks: &[Chunk], meta: &FileMeta) -> Result<()> {
    if mode.is_transactional() {
      match self.replace_file_in_transaction(path, chunks, meta).await {
        Ok(()) => return Ok(()),
        Err(e) if e.is_standalone_no_transactions() => {
          warn!("Topology does not support transactions, falling back to sequential writes for the rest of this sync run");
          mode.assume_standalone();
        }
        Err(e) => return Err(e),
      }
    }
    self.replace_file_sequential(path, chunks, meta).await
  }

  async fn replace_file_in_transaction(&self, path: &str, chunks: &[Chunk], meta: &FileMeta) -> Result<()> {
    let mut session = self.client.start_session().await?;
    session.start_transaction().await?;

    let result: Result<()> = async {
      self.delete_chunks_for_path_session(&mut session, path).await?;
      self.upsert_chunks_session(&mut session, chunks).await?;
      self.upsert_file_meta_session(&mut session, meta).await?;
      Ok(())
    }
    .await;

    match result {
      Ok(()) => {
        session.commit_transaction().await?;
        debug!(path, "File write committed transactionally");
        Ok(())
      }
      Err(e) => {
        let _ = session.abort_transaction().await;
        Err(e)
      }
    }
  }

  async fn replace_file_sequential(&self, path: &str, chunks: &[Chunk], meta: &FileMeta) -> Result<()> {
    self.delete_chunks_for_path(path).await?;
    self.upsert_chunks(chunks).await?;
    self.upsert_file_meta(meta).await?;
    debug!(path, "File write applied sequentially (no transaction)");
    Ok(())
  }
}
