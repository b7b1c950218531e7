//! Unified error type for the memory core's public operations.

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
  #[error("configuration error: {0}")]
  Config(String),
  #[error(transparent)]
  Db(#[from] clawmem_db::DbError),
  #[error(transparent)]
  Embedding(#[from] clawmem_embedding::EmbeddingError),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("path required")]
  InvalidPath,
  #[error("manager is closed")]
  Closed,
}

pub type Result<T> = std::result::Result<T, MemoryError>;
