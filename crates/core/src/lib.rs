//! Shared domain types and configuration for the MongoDB-backed agent memory
//! core: chunks, file metadata, knowledge-base documents, structured entries,
//! and the configuration surface that gates how they are stored and searched.

pub mod config;
pub mod embedding_cache;
pub mod chunk;
pub mod file_meta;
pub mod kb;
pub mod meta;
pub mod structured;

pub use chunk::{Chunk, EmbeddingStatus, Source};
pub use config::{Config, DeploymentProfile, EmbeddingMode, EmbeddingProviderConfig, EmbeddingProviderKind, FusionMethod, Quantization};
pub use embedding_cache::EmbeddingCacheEntry;
pub use file_meta::FileMeta;
pub use kb::{KbChunk, KbDocument, KbSourceType};
pub use meta::MetaEntry;
pub use structured::{StructuredEntry, StructuredType};

/// Sha-256 hash of a byte slice, hex-encoded. Used for both whole-file hashes
/// and chunk-content hashes so change detection is a plain string compare.
pub fn hash_bytes(data: &[u8]) -> String {
  use sha2::{Digest, Sha256};
  let mut hasher = Sha256::new();
  hasher.update(data);
  hex::encode(hasher.finalize())
}

pub fn hash_str(text: &str) -> String {
  hash_bytes(text.as_bytes())
}

/// Clamp a raw score into `[0, 1]`. Centralized so every normalization path
/// (§4.6) goes through one invariant-preserving function.
pub fn clamp_unit(score: f32) -> f32 {
  score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hash_is_deterministic() {
    assert_eq!(hash_str("alpha"), hash_str("alpha"));
    assert_ne!(hash_str("alpha"), hash_str("beta"));
  }

  #[test]
  fn clamp_bounds() {
    assert_eq!(clamp_unit(-1.0), 0.0);
    assert_eq!(clamp_unit(2.0), 1.0);
    assert_eq!(clamp_unit(0.4), 0.4);
  }
}
