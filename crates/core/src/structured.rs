use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunk::EmbeddingStatus;

/// Kind of typed observation a structured entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructuredType {
  Decision,
  Preference,
  Person,
  Todo,
  Fact,
  Project,
  Architecture,
  Custom,
}

/// A typed key/value observation written on behalf of an agent. The natural
/// key `(agent_id, type, key)` is unique; re-writes upsert in place (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredEntry {
  #[serde(rename = "_id")]
  pub id: String,
  pub agent_id: String,
  #[serde(rename = "type")]
  pub entry_type: StructuredType,
  pub key: String,
  pub value: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub context: Option<String>,
  pub confidence: f32,
  pub tags: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub source: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub embedding: Option<Vec<f32>>,
  pub embedding_status: EmbeddingStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl StructuredType {
  pub fn as_str(self) -> &'static str {
    match self {
      StructuredType::Decision => "decision",
      StructuredType::Preference => "preference",
      StructuredType::Person => "person",
      StructuredType::Todo => "todo",
      StructuredType::Fact => "fact",
      StructuredType::Project => "project",
      StructuredType::Architecture => "architecture",
      StructuredType::Custom => "custom",
    }
  }
}

impl StructuredEntry {
  pub fn make_id(agent_id: &str, entry_type: StructuredType, key: &str) -> String {
    format!("{agent_id}:{}:{key}", entry_type.as_str())
  }

  /// Text that gets embedded: `value`, plus `" " + context` when present (§3).
  pub fn embed_text(&self) -> String {
    match &self.context {
      Some(ctx) if !ctx.is_empty() => format!("{} {}", self.value, ctx),
      _ => self.value.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn embed_text_appends_context_when_present() {
    let mut e = StructuredEntry {
      id: "x".into(),
      agent_id: "a".into(),
      entry_type: StructuredType::Fact,
      key: "k".into(),
      value: "value".into(),
      context: None,
      confidence: 1.0,
      tags: vec![],
      source: None,
      embedding: None,
      embedding_status: EmbeddingStatus::Pending,
      created_at: Utc::now(),
      updated_at: Utc::now(),
    };
    assert_eq!(e.embed_text(), "value");
    e.context = Some("context".into());
    assert_eq!(e.embed_text(), "value context");
  }
}
