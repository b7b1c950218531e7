use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunk::Source;

/// One entry per indexed source file (§3). Id is the path itself so lookups
/// by path never need a secondary index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
  #[serde(rename = "_id")]
  pub path: String,
  pub source: Source,
  pub hash: String,
  pub mtime: DateTime<Utc>,
  pub size: u64,
  pub updated_at: DateTime<Utc>,
}

impl FileMeta {
  pub fn new(path: impl Into<String>, source: Source, hash: impl Into<String>, mtime: DateTime<Utc>, size: u64) -> Self {
    Self {
      path: path.into(),
      source,
      hash: hash.into(),
      mtime,
      size,
      updated_at: Utc::now(),
    }
  }
}
