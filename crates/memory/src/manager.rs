//! Memory Manager (C7, §4.7): lifecycle façade. Owns the client, the shared
//! mutable state described in §5, and exposes the public operations.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use clawmem_core::config::{EmbeddingMode as StoreEmbeddingMode, KbConfig};
use clawmem_core::{Config, StructuredEntry, StructuredType};
use clawmem_db::{Capabilities, MongoDb, StoreStats};
use clawmem_embedding::{EmbeddingMode, EmbeddingProvider, RetryConfig, retry_embedding};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::error::{MemoryError, Result};
use crate::kb;
use crate::search::{CHUNKS_TARGET, Dispatcher, KB_CHUNKS_TARGET, QueryRequest, STRUCTURED_TARGET, merge};
use crate::sync::{ProgressCallback, SyncEngine, SyncOptions, SyncReport};
use crate::watch::{ChangeStreamConfig, ChangeStreamWatcher, FsWatcher, WatcherConfig};

type SharedSyncOutcome = Arc<std::result::Result<SyncReport, String>>;
type SharedSyncFuture = Shared<BoxFuture<'static, SharedSyncOutcome>>;

/// Everything a background (fire-and-forget or explicit) sync needs,
/// independent of `&self`'s borrow so it can be moved into a spawned task
/// (§5 "a second caller joins the existing one").
#[derive(Clone)]
struct SyncState {
  db: Arc<MongoDb>,
  provider: Option<Arc<dyn EmbeddingProvider>>,
  embedding_mode: StoreEmbeddingMode,
  workspace: PathBuf,
  extra_paths: Vec<PathBuf>,
  max_session_chunks: usize,
  kb_config: KbConfig,
  dirty: Arc<AtomicBool>,
  file_count: Arc<AtomicU64>,
  chunk_count: Arc<AtomicU64>,
  in_flight: Arc<AsyncMutex<Option<SharedSyncFuture>>>,
}

async fn run_single_flight_sync(state: SyncState, opts: SyncOptions) -> Result<SyncReport> {
  let fut = {
    let mut guard = state.in_flight.lock().await;
    if let Some(existing) = guard.as_ref() {
      let existing = existing.clone();
      drop(guard);
      let outcome = existing.await;
      return (*outcome).clone().map_err(MemoryError::Config);
    }
    let engine = SyncEngine::new(
      state.db.clone(),
      state.provider.clone(),
      state.embedding_mode,
      state.workspace.clone(),
      state.extra_paths.clone(),
      state.max_session_chunks,
    );
    let shared: SharedSyncFuture = async move { Arc::new(engine.run(opts).await.map_err(|e| e.to_string())) }.boxed().shared();
    *guard = Some(shared.clone());
    shared
  };

  let outcome = fut.await;
  {
    let mut guard = state.in_flight.lock().await;
    *guard = None;
  }
  let report = (*outcome).clone().map_err(MemoryError::Config)?;

  // Refresh cached counts from the store; fall back to the sync's own delta
  // counts if the refresh queries themselves fail (§4.7 `sync` contract).
  match (state.db.count_files().await, state.db.count_chunks().await) {
    (Ok(files), Ok(chunks)) => {
      state.file_count.store(files, Ordering::Relaxed);
      state.chunk_count.store(chunks, Ordering::Relaxed);
    }
    _ => {
      state.file_count.fetch_add(report.files_processed as u64, Ordering::Relaxed);
      state.chunk_count.fetch_add(report.chunks_upserted as u64, Ordering::Relaxed);
    }
  }
  state.dirty.store(false, Ordering::Relaxed);

  if let Err(e) = kb::maybe_auto_refresh(&state.db, &state.kb_config, state.provider.as_ref()).await {
    warn!(error = %e, "KB auto-refresh failed, leaving existing documents in place");
  }

  Ok(report)
}

pub struct CreateOptions {
  pub config: Config,
  pub agent_id: String,
  pub workspace: PathBuf,
  pub extra_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
  pub max_results: u64,
  pub min_score: f32,
  pub session_key: Option<String>,
}

impl SearchOptions {
  pub fn resolved(&self) -> (u64, f32) {
    let max_results = if self.max_results == 0 { 10 } else { self.max_results };
    let min_score = if self.min_score == 0.0 { 0.1 } else { self.min_score };
    (max_results, min_score)
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
  pub id: String,
  pub path: Option<String>,
  pub snippet: String,
  pub score: f32,
  pub source: &'static str,
}

#[derive(Debug, Clone)]
pub struct ReadFileRequest {
  pub rel_path: String,
  pub from: Option<usize>,
  pub lines: Option<usize>,
}

#[derive(Default)]
pub struct ExternalSyncOptions {
  pub reason: Option<String>,
  pub force: bool,
  pub progress: Option<ProgressCallback>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
  pub backend: &'static str,
  pub provider: Option<String>,
  pub model: Option<String>,
  pub file_count: u64,
  pub chunk_count: u64,
  pub dirty: bool,
  pub workspace: String,
  pub sources: Vec<&'static str>,
  pub deployment_profile: String,
  pub embedding_mode: String,
  pub fusion_method: String,
  pub quantization: String,
  pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
  pub store: StoreStats,
  pub stale_paths: Vec<String>,
  /// `$indexStats` rollup per searchable collection, keyed by collection
  /// suffix. Empty for a collection on deployments that don't support the
  /// stage (§4.7 `stats` contract).
  pub index_usage: std::collections::HashMap<String, Vec<bson::Document>>,
}

pub struct StructuredWriteRequest {
  pub agent_id: String,
  pub entry_type: StructuredType,
  pub key: String,
  pub value: String,
  pub context: Option<String>,
  pub confidence: f32,
  pub tags: Vec<String>,
  pub source: Option<String>,
}

/// `constructed → open → closed` (§4.7). `create` is the only way to reach
/// `open`; this type only ever models the latter two states.
pub struct MemoryManager {
  db: Arc<MongoDb>,
  capabilities: Capabilities,
  provider: Option<Arc<dyn EmbeddingProvider>>,
  embedding_mode: StoreEmbeddingMode,
  kb_config: KbConfig,
  agent_id: String,
  workspace: PathBuf,
  extra_paths: Vec<PathBuf>,
  max_session_chunks: usize,

  dirty: Arc<AtomicBool>,
  file_count: Arc<AtomicU64>,
  chunk_count: Arc<AtomicU64>,
  in_flight_sync: Arc<AsyncMutex<Option<SharedSyncFuture>>>,

  fs_watcher: AsyncMutex<Option<FsWatcher>>,
  change_watcher: AsyncMutex<Option<ChangeStreamWatcher>>,
  closed: AtomicBool,
}

impl MemoryManager {
  /// Connect, run schema setup, attach the embedding provider when managed,
  /// and start the watchers. Returns `None` (closing the client) on a
  /// connect or ping failure (§4.7, §7 "surface at manager creation time").
  pub async fn create(options: CreateOptions) -> Option<Self> {
    let db = match MongoDb::connect(options.config.clone(), &options.agent_id).await {
      Ok(db) => Arc::new(db),
      Err(e) => {
        warn!(error = %e, "failed to connect to MongoDB, memory core unavailable");
        return None;
      }
    };

    if let Err(e) = run_schema_setup(&db).await {
      warn!(error = %e, "schema setup encountered an error, continuing with whatever landed");
    }
    let capabilities = db.detect_capabilities().await;

    let embedding_mode = db.config.mongodb.resolve_embedding_mode();
    let provider = if embedding_mode == StoreEmbeddingMode::Managed {
      match clawmem_embedding::from_config(&options.config.embedding) {
        Ok(provider) => Some(provider),
        Err(e) => {
          warn!(error = %e, "failed constructing embedding provider, continuing without managed embeddings");
          None
        }
      }
    } else {
      None
    };

    let dirty = Arc::new(AtomicBool::new(true));
    let manager = Self {
      db,
      capabilities,
      provider,
      embedding_mode,
      kb_config: options.config.mongodb.kb.clone(),
      agent_id: options.agent_id,
      workspace: options.workspace,
      extra_paths: options.extra_paths,
      max_session_chunks: options.config.mongodb.max_session_chunks,
      dirty: dirty.clone(),
      file_count: Arc::new(AtomicU64::new(0)),
      chunk_count: Arc::new(AtomicU64::new(0)),
      in_flight_sync: Arc::new(AsyncMutex::new(None)),
      fs_watcher: AsyncMutex::new(None),
      change_watcher: AsyncMutex::new(None),
      closed: AtomicBool::new(false),
    };

    let watch_config = WatcherConfig {
      workspace: manager.workspace.clone(),
      extra_paths: manager.extra_paths.clone(),
      debounce: Duration::from_millis(manager.db.config.mongodb.watch_debounce_ms),
    };
    let dirty_for_watcher = dirty.clone();
    match FsWatcher::spawn(watch_config, Arc::new(move || dirty_for_watcher.store(true, Ordering::Relaxed))) {
      Ok(watcher) => *manager.fs_watcher.lock().await = Some(watcher),
      Err(e) => warn!(error = %e, "failed to start filesystem watcher, sync will only run on explicit request"),
    }

    if manager.db.config.mongodb.enable_change_streams {
      let cs_config = ChangeStreamConfig {
        debounce: Duration::from_millis(manager.db.config.mongodb.change_stream_debounce_ms),
      };
      let dirty_for_change_stream = dirty.clone();
      let watcher = ChangeStreamWatcher::spawn(manager.db.clone(), cs_config, Arc::new(move || {
        dirty_for_change_stream.store(true, Ordering::Relaxed);
      }))
      .await;
      *manager.change_watcher.lock().await = watcher;
    }

    info!(agent_id = %manager.agent_id, "memory manager open");
    Some(manager)
  }

  fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Relaxed)
  }

  fn sync_state(&self) -> SyncState {
    SyncState {
      db: self.db.clone(),
      provider: self.provider.clone(),
      embedding_mode: self.embedding_mode,
      workspace: self.workspace.clone(),
      extra_paths: self.extra_paths.clone(),
      max_session_chunks: self.max_session_chunks,
      kb_config: self.kb_config.clone(),
      dirty: self.dirty.clone(),
      file_count: self.file_count.clone(),
      chunk_count: self.chunk_count.clone(),
      in_flight: self.in_flight_sync.clone(),
    }
  }

  /// §4.7 `sync`: single-flight wrapper over the Sync Engine.
  pub async fn sync(&self, opts: ExternalSyncOptions) -> Result<SyncReport> {
    if self.is_closed() {
      return Ok(SyncReport::default());
    }
    let sync_opts = SyncOptions {
      reason: opts.reason,
      force: opts.force,
      agent_id: Some(self.agent_id.clone()),
      progress: opts.progress,
    };
    run_single_flight_sync(self.sync_state(), sync_opts).await
  }

  /// Fire-and-forget: spawns the same single-flight sync machinery used by
  /// [`Self::sync`] and logs (rather than surfaces) any failure.
  fn trigger_background_sync(&self, reason: &str) {
    let state = self.sync_state();
    let agent_id = self.agent_id.clone();
    let reason = reason.to_string();
    tokio::spawn(async move {
      let opts = SyncOptions {
        reason: Some(reason),
        force: false,
        agent_id: Some(agent_id),
        progress: None,
      };
      if let Err(e) = run_single_flight_sync(state, opts).await {
        warn!(error = %e, "background sync failed");
      }
    });
  }

  /// §4.7 `search`.
  pub async fn search(&self, query: &str, options: SearchOptions) -> Result<Vec<SearchHit>> {
    let query = query.trim();
    if self.is_closed() || query.is_empty() {
      return Ok(Vec::new());
    }

    if self.dirty.load(Ordering::Relaxed) {
      self.trigger_background_sync("dirty flag set before search");
    }

    let (max_results, min_score) = options.resolved();
    let vector = self.embed_query(query).await;
    let dispatcher = Dispatcher::new(&self.db, self.capabilities);

    let mut agent_filter = bson::Document::new();
    if let Some(session_key) = &options.session_key {
      agent_filter.insert("agentId", session_key.clone());
    }

    let chunks_req = QueryRequest {
      text: query.to_string(),
      vector: vector.clone(),
      max_results,
      filter: None,
    };
    let structured_req = QueryRequest {
      text: query.to_string(),
      vector: vector.clone(),
      max_results,
      filter: if agent_filter.is_empty() { None } else { Some(agent_filter) },
    };

    // §4.5: resolve the bounded KB docId prefilter before dispatching the KB
    // search; an empty resolved set short-circuits KB search entirely.
    let dispatcher_ref = &dispatcher;
    let kb_vector = vector.clone();
    let kb_search = async move {
      let kb_doc_ids = dispatcher_ref.resolve_kb_doc_ids(bson::Document::new()).await?;
      if kb_doc_ids.is_empty() {
        return Ok(Vec::new());
      }
      let kb_req = QueryRequest {
        text: query.to_string(),
        vector: kb_vector,
        max_results,
        filter: Some(bson::doc! { "docId": { "$in": kb_doc_ids } }),
      };
      Ok(dispatcher_ref.search(KB_CHUNKS_TARGET, &kb_req).await)
    };

    let (chunks, kb, structured) = tokio::join!(
      dispatcher.search_strict(CHUNKS_TARGET, &chunks_req),
      kb_search,
      dispatcher.search(STRUCTURED_TARGET, &structured_req),
    );
    let chunks = chunks?;
    let kb: Vec<merge::RawResult> = kb?;

    let mut all = Vec::with_capacity(chunks.len() + kb.len() + structured.len());
    all.extend(chunks);
    all.extend(kb);
    all.extend(structured);

    let deduped = merge::dedup_by_snippet(all);
    let hits: Vec<SearchHit> = deduped
      .into_iter()
      .filter(|r| r.score >= min_score)
      .take(max_results as usize)
      .map(|r| SearchHit {
        id: r.id,
        path: r.path,
        snippet: r.snippet,
        score: r.score,
        source: class_label(r.class),
      })
      .collect();

    Ok(hits)
  }

  async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
    if self.embedding_mode != StoreEmbeddingMode::Managed {
      return None;
    }
    let provider = self.provider.as_ref()?;
    match retry_embedding(RetryConfig::default(), || provider.embed(query, EmbeddingMode::Query)).await {
      Ok(vector) => Some(vector),
      Err(e) => {
        warn!(error = %e, "query embedding failed, falling back to text-only search");
        None
      }
    }
  }

  /// §4.7 `readFile`: resolve under the workspace or an extra path, deny
  /// symlinks, enforce `.md`, and slice lines 1-based inclusive of `from`.
  pub async fn read_file(&self, req: ReadFileRequest) -> Result<String> {
    if self.is_closed() {
      return Err(MemoryError::Closed);
    }
    let resolved = self.resolve_readable_path(&req.rel_path).await?;
    let content = tokio::fs::read_to_string(&resolved).await?;

    let Some(from) = req.from else {
      return Ok(content);
    };
    let start = from.saturating_sub(1);
    let lines: Vec<&str> = content.lines().collect();
    let end = match req.lines {
      Some(count) => (start + count).min(lines.len()),
      None => lines.len(),
    };
    if start >= lines.len() {
      return Ok(String::new());
    }
    Ok(lines[start..end].join("\n"))
  }

  async fn resolve_readable_path(&self, rel_path: &str) -> Result<PathBuf> {
    if !rel_path.ends_with(".md") {
      return Err(MemoryError::InvalidPath);
    }

    let mut candidate_roots = vec![self.workspace.clone()];
    candidate_roots.extend(self.extra_paths.iter().cloned());

    for root in candidate_roots {
      let candidate = root.join(rel_path);
      if !candidate.exists() {
        continue;
      }
      let symlink_meta = match tokio::fs::symlink_metadata(&candidate).await {
        Ok(meta) => meta,
        Err(_) => continue,
      };
      if symlink_meta.file_type().is_symlink() {
        return Err(MemoryError::InvalidPath);
      }
      let canonical_root = tokio::fs::canonicalize(&root).await.map_err(|_| MemoryError::InvalidPath)?;
      let canonical_candidate = tokio::fs::canonicalize(&candidate).await.map_err(|_| MemoryError::InvalidPath)?;
      if !canonical_candidate.starts_with(&canonical_root) {
        return Err(MemoryError::InvalidPath);
      }
      return Ok(candidate);
    }
    Err(MemoryError::InvalidPath)
  }

  /// §4.7 `status`. Non-blocking: reads only cached counters.
  pub fn status(&self) -> ManagerStatus {
    let mongo = &self.db.config.mongodb;
    ManagerStatus {
      backend: "mongodb",
      provider: self.provider.as_ref().map(|p| p.name().to_string()),
      model: self.provider.as_ref().map(|p| p.model_id().to_string()),
      file_count: self.file_count.load(Ordering::Relaxed),
      chunk_count: self.chunk_count.load(Ordering::Relaxed),
      dirty: self.dirty.load(Ordering::Relaxed),
      workspace: self.workspace.display().to_string(),
      sources: vec!["memory", "sessions"],
      deployment_profile: format!("{:?}", mongo.deployment_profile),
      embedding_mode: format!("{:?}", self.embedding_mode),
      fusion_method: format!("{:?}", mongo.fusion_method),
      quantization: format!("{:?}", mongo.quantization),
      capabilities: self.capabilities,
    }
  }

  /// §4.7 `writeStructuredMemory`: upsert on the natural key, generating an
  /// embedding first when managed mode has a live provider.
  pub async fn write_structured_memory(&self, req: StructuredWriteRequest) -> Result<()> {
    if self.is_closed() {
      return Err(MemoryError::Closed);
    }

    let id = StructuredEntry::make_id(&req.agent_id, req.entry_type, &req.key);
    let now = chrono::Utc::now();
    let mut entry = StructuredEntry {
      id,
      agent_id: req.agent_id,
      entry_type: req.entry_type,
      key: req.key,
      value: req.value,
      context: req.context,
      confidence: req.confidence.clamp(0.0, 1.0),
      tags: req.tags,
      source: req.source,
      embedding: None,
      embedding_status: clawmem_core::EmbeddingStatus::Pending,
      created_at: now,
      updated_at: now,
    };

    if self.embedding_mode == StoreEmbeddingMode::Managed {
      if let Some(provider) = &self.provider {
        let text = entry.embed_text();
        match retry_embedding(RetryConfig::default(), || provider.embed(&text, EmbeddingMode::Document)).await {
          Ok(vector) => {
            entry.embedding = Some(vector);
            entry.embedding_status = clawmem_core::EmbeddingStatus::Success;
          }
          Err(e) => {
            warn!(key = %entry.key, error = %e, "structured-memory embedding failed, entry stays text-searchable only");
            entry.embedding_status = clawmem_core::EmbeddingStatus::Failed;
          }
        }
      }
    }

    self.db.upsert_structured_entry(&entry).await?;
    Ok(())
  }

  /// §4.7 `stats`.
  pub async fn stats(&self, valid_paths: Option<&[String]>) -> Result<MemoryStats> {
    let store = self.db.store_stats().await?;
    let stale_paths = match valid_paths {
      Some(valid) => {
        let valid: std::collections::HashSet<&str> = valid.iter().map(String::as_str).collect();
        self
          .db
          .stored_chunk_paths()
          .await?
          .into_iter()
          .filter(|p| !valid.contains(p.as_str()))
          .collect()
      }
      None => Vec::new(),
    };

    let mut index_usage = std::collections::HashMap::new();
    for suffix in self.db.searchable_collections() {
      index_usage.insert(suffix.to_string(), self.db.index_usage(suffix).await);
    }
    Ok(MemoryStats { store, stale_paths, index_usage })
  }

  /// §4.7 `probeEmbeddingAvailability`.
  pub async fn probe_embedding_availability(&self) -> Result<()> {
    match self.embedding_mode {
      StoreEmbeddingMode::Automated => {
        if self.capabilities.vector_search {
          Ok(())
        } else {
          Err(MemoryError::Config("automated embeddings require vector search capability, which this deployment lacks".into()))
        }
      }
      StoreEmbeddingMode::Managed => {
        let provider = self
          .provider
          .as_ref()
          .ok_or_else(|| MemoryError::Config("managed embedding mode has no provider configured".into()))?;
        provider.embed_batch(&["ping"], EmbeddingMode::Query).await.map_err(MemoryError::Embedding)?;
        Ok(())
      }
    }
  }

  /// §4.7 `close`. Idempotent.
  pub async fn close(&self) {
    if self.closed.swap(true, Ordering::Relaxed) {
      return;
    }
    if let Some(mut watcher) = self.fs_watcher.lock().await.take() {
      watcher.close().await;
    }
    if let Some(mut watcher) = self.change_watcher.lock().await.take() {
      watcher.close().await;
    }
    let in_flight = self.in_flight_sync.lock().await.clone();
    if let Some(fut) = in_flight {
      let _ = fut.await;
    }
    info!(agent_id = %self.agent_id, "memory manager closed");
  }
}

fn class_label(class: merge::ScoreClass) -> &'static str {
  match class {
    merge::ScoreClass::Vector => "vector",
    merge::ScoreClass::Text => "text",
    merge::ScoreClass::Hybrid => "hybrid",
    merge::ScoreClass::Structured => "structured",
    merge::ScoreClass::Kb => "kb",
  }
}

async fn run_schema_setup(db: &MongoDb) -> Result<()> {
  db.ensure_collections().await?;
  db.ensure_schema_validation().await?;
  db.ensure_standard_indexes().await?;
  db.ensure_ttl_index(
    clawmem_db::schema::EMBEDDING_CACHE,
    "expiresAt",
    "embedding_cache_ttl_idx",
    db.config.mongodb.embedding_cache_ttl_days,
  )
  .await?;
  db.ensure_ttl_index(clawmem_db::schema::FILES, "updatedAt", "memory_ttl_idx", db.config.mongodb.memory_ttl_days)
    .await?;

  use clawmem_core::config::DeploymentProfile;
  if !matches!(db.config.mongodb.deployment_profile, DeploymentProfile::CommunityBare) {
    db.ensure_search_indexes().await?;
  }

  if let Err(report) = check_orphans(db).await {
    warn!(error = %report, "KB orphan check failed to run");
  }
  Ok(())
}

async fn check_orphans(db: &MongoDb) -> Result<()> {
  let report = db.check_kb_orphans().await?;
  if !report.is_clean() {
    warn!(
      documents_without_chunks = report.documents_without_chunks.len(),
      orphaned_chunks = report.orphaned_chunk_ids.len(),
      "KB integrity check found orphans (not auto-repaired)"
    );
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn search_options_apply_defaults() {
    let (max_results, min_score) = SearchOptions::default().resolved();
    assert_eq!(max_results, 10);
    assert_eq!(min_score, 0.1);
  }

  #[test]
  fn class_label_covers_every_variant() {
    assert_eq!(class_label(merge::ScoreClass::Vector), "vector");
    assert_eq!(class_label(merge::ScoreClass::Kb), "kb");
  }
}
