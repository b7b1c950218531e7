use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Small key/value state not worth its own collection, e.g. the last KB
/// auto-refresh timestamp (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaEntry {
  #[serde(rename = "_id")]
  pub key: String,
  pub value: serde_json::Value,
  pub updated_at: DateTime<Utc>,
}

/// Well-known meta keys.
pub mod keys {
  pub const KB_LAST_AUTO_REFRESH: &str = "kb_last_auto_refresh";
}
