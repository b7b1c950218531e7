//! Optional server-side change-stream watcher for cross-instance invalidation
//! (§4.4). Only meaningful on a replica set or sharded cluster; a standalone
//! server rejects the `watch` call outright, which we treat as "close
//! quietly and fall back to filesystem-only" rather than an error.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use clawmem_db::{DbError, MongoDb};
use futures::StreamExt;
use mongodb::change_stream::event::OperationType;
use mongodb::options::{ChangeStreamOptions, FullDocumentType};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct ChangeStreamConfig {
  pub debounce: Duration,
}

impl Default for ChangeStreamConfig {
  fn default() -> Self {
    Self {
      debounce: Duration::from_millis(1000),
    }
  }
}

pub struct ChangeStreamWatcher {
  cancel: CancellationToken,
  task: Option<tokio::task::JoinHandle<()>>,
}

impl ChangeStreamWatcher {
  /// Returns `None` when the deployment doesn't support change streams
  /// (standalone topology): the caller falls back to filesystem-only
  /// watching without surfacing an error.
  pub async fn spawn(db: Arc<MongoDb>, config: ChangeStreamConfig, on_dirty: Arc<dyn Fn() + Send + Sync>) -> Option<Self> {
    let pipeline = vec![bson::doc! {
      "$match": { "operationType": { "$in": ["insert", "update", "replace", "delete"] } }
    }];
    let options = ChangeStreamOptions::builder()
      .full_document(Some(FullDocumentType::UpdateLookup))
      .build();

    let mut stream = match db.chunks().watch().pipeline(pipeline).with_options(options).await {
      Ok(stream) => stream,
      Err(e) => {
        let db_err = DbError::from(e);
        if db_err.is_not_replica_set() {
          debug!("change streams unavailable on this topology, falling back to filesystem-only watching");
        } else {
          warn!(error = %db_err, "failed opening change stream, falling back to filesystem-only watching");
        }
        return None;
      }
    };

    let (tx, mut rx) = mpsc::channel::<String>(256);
    let cancel = CancellationToken::new();
    let stream_cancel = cancel.clone();

    let reader = tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = stream_cancel.cancelled() => break,
          next = stream.next() => {
            match next {
              Some(Ok(event)) => {
                if let Some(path) = affected_path(&event) {
                  let _ = tx.send(path).await;
                }
              }
              Some(Err(e)) => warn!(error = %e, "change stream event error, continuing"),
              None => break,
            }
          }
        }
      }
    });

    let debounce = config.debounce;
    let debounce_cancel = cancel.clone();
    let debouncer = tokio::spawn(async move {
      let mut pending: HashSet<String> = HashSet::new();
      let mut timer = tokio::time::interval(debounce);
      timer.tick().await;
      loop {
        tokio::select! {
          _ = debounce_cancel.cancelled() => break,
          maybe = rx.recv() => {
            match maybe {
              Some(path) => { pending.insert(path); }
              None => break,
            }
          }
          _ = timer.tick() => {
            if !pending.is_empty() {
              pending.clear();
              on_dirty();
            }
          }
        }
      }
    });

    let task = tokio::spawn(async move {
      let _ = reader.await;
      let _ = debouncer.await;
    });

    Some(Self {
      cancel,
      task: Some(task),
    })
  }

  /// Idempotent.
  pub async fn close(&mut self) {
    self.cancel.cancel();
    if let Some(task) = self.task.take() {
      let _ = task.await;
    }
  }
}

/// Extract the affected chunk path from a change event: `fullDocument.path`
/// for insert/update/replace, or parsed from the composite `_id` for
/// deletes (§4.4).
fn affected_path(event: &mongodb::change_stream::event::ChangeStreamEvent<clawmem_core::Chunk>) -> Option<String> {
  if let Some(doc) = &event.full_document {
    return Some(doc.path.clone());
  }
  if event.operation_type == OperationType::Delete {
    let id = event.document_key.as_ref()?.get_str("_id").ok()?;
    return id.rsplit_once(':').and_then(|(rest, _end)| rest.rsplit_once(':')).map(|(path, _start)| path.to_string());
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_path_from_composite_chunk_id() {
    let id = "memory/a.md:10:20";
    let parsed = id.rsplit_once(':').and_then(|(rest, _)| rest.rsplit_once(':')).map(|(path, _)| path.to_string());
    assert_eq!(parsed, Some("memory/a.md".to_string()));
  }
}
