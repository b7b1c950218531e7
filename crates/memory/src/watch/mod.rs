//! Watcher Layer (C4, §4.4): a debounced filesystem watcher (the sole
//! dirty-flag producer) plus an optional server-side change-stream watcher
//! for cross-instance invalidation.

pub mod change_stream;
pub mod filesystem;

pub use change_stream::{ChangeStreamConfig, ChangeStreamWatcher};
pub use filesystem::{FsWatcher, WatcherConfig, WatcherError};
