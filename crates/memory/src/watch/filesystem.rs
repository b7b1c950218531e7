//! Debounced filesystem watcher over the markdown memory surface (§4.4).
//!
//! Reduces filesystem change events to a single dirty-flag signal: any
//! create/modify/remove event inside the watched surface marks
//! the store dirty once the debounce window settles. The sync engine
//! re-derives content hashes on its own, so this layer doesn't need to
//! track per-path state the way a diffing watcher would.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
  #[error("failed to initialize filesystem watcher: {0}")]
  Init(#[source] notify::Error),
  #[error("failed to watch path {path}: {source}")]
  Watch { path: PathBuf, #[source] source: notify::Error },
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
  pub workspace: PathBuf,
  pub extra_paths: Vec<PathBuf>,
  pub debounce: Duration,
}

impl Default for WatcherConfig {
  fn default() -> Self {
    Self {
      workspace: PathBuf::from("."),
      extra_paths: Vec::new(),
      debounce: Duration::from_millis(500),
    }
  }
}

/// Owns the OS watch handle and the debounce task; dropping it does not
/// stop the task, call [`Self::close`] explicitly (§9 "scoped resources").
pub struct FsWatcher {
  _watcher: RecommendedWatcher,
  cancel: CancellationToken,
  task: Option<tokio::task::JoinHandle<()>>,
}

impl FsWatcher {
  pub fn spawn(config: WatcherConfig, on_dirty: Arc<dyn Fn() + Send + Sync>) -> Result<Self, WatcherError> {
    let (tx, mut rx) = mpsc::channel::<()>(64);

    let mut watcher = RecommendedWatcher::new(
      move |res: notify::Result<Event>| match res {
        Ok(event) if is_relevant(&event.kind) => {
          let _ = tx.blocking_send(());
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "filesystem watch error, continuing to watch"),
      },
      notify::Config::default(),
    )
    .map_err(WatcherError::Init)?;

    for name in ["MEMORY.md", "memory.md"] {
      let path = config.workspace.join(name);
      if path.exists() {
        watch_path(&mut watcher, &path, RecursiveMode::NonRecursive)?;
      }
    }
    let memory_dir = config.workspace.join("memory");
    if memory_dir.is_dir() {
      watch_path(&mut watcher, &memory_dir, RecursiveMode::Recursive)?;
    }
    for extra in &config.extra_paths {
      if extra.exists() {
        let mode = if extra.is_dir() { RecursiveMode::Recursive } else { RecursiveMode::NonRecursive };
        watch_path(&mut watcher, extra, mode)?;
      }
    }

    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let debounce = config.debounce;
    let task = tokio::spawn(async move {
      let mut pending = false;
      let mut timer = tokio::time::interval(debounce);
      timer.tick().await;
      loop {
        tokio::select! {
          _ = task_cancel.cancelled() => break,
          maybe = rx.recv() => {
            match maybe {
              Some(()) => pending = true,
              None => break,
            }
          }
          _ = timer.tick() => {
            if pending {
              pending = false;
              on_dirty();
            }
          }
        }
      }
    });

    Ok(Self {
      _watcher: watcher,
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

fn watch_path(watcher: &mut RecommendedWatcher, path: &std::path::Path, mode: RecursiveMode) -> Result<(), WatcherError> {
  watcher.watch(path, mode).map_err(|e| WatcherError::Watch {
    path: path.to_path_buf(),
    source: e,
  })
}

fn is_relevant(kind: &EventKind) -> bool {
  matches!(kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[tokio::test]
  async fn fires_on_dirty_after_a_file_change() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("memory")).unwrap();
    std::fs::write(dir.path().join("memory/a.md"), "# a").unwrap();

    let fires = Arc::new(AtomicUsize::new(0));
    let fires_clone = Arc::clone(&fires);
    let config = WatcherConfig {
      workspace: dir.path().to_path_buf(),
      extra_paths: Vec::new(),
      debounce: Duration::from_millis(50),
    };
    let mut watcher = FsWatcher::spawn(config, Arc::new(move || {
      fires_clone.fetch_add(1, Ordering::SeqCst);
    }))
    .unwrap();

    std::fs::write(dir.path().join("memory/a.md"), "# a changed").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    watcher.close().await;

    assert!(fires.load(Ordering::SeqCst) >= 1);
  }
}
