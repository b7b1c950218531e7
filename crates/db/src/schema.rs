//! Collection names, JSON-schema validators, and standard index definitions
//! (§4.1). Validators are installed with `validationAction: "warn"` so
//! malformed documents still land; the server just logs.

use bson::doc;
use bson::Document;
use mongodb::IndexModel;
use mongodb::options::IndexOptions;

pub const CHUNKS: &str = "chunks";
pub const FILES: &str = "files";
pub const EMBEDDING_CACHE: &str = "embedding_cache";
pub const META: &str = "meta";
pub const KNOWLEDGE_BASE: &str = "knowledge_base";
pub const KB_CHUNKS: &str = "kb_chunks";
pub const STRUCTURED_MEM: &str = "structured_mem";

/// All collections that carry a schema validator.
pub const VALIDATED_COLLECTIONS: &[&str] = &[CHUNKS, KNOWLEDGE_BASE, KB_CHUNKS, STRUCTURED_MEM];

/// All collections that are searchable (carry text + vector search indexes).
pub const SEARCHABLE_COLLECTIONS: &[&str] = &[CHUNKS, KNOWLEDGE_BASE_CHUNKS_ALIAS, STRUCTURED_MEM];
const KNOWLEDGE_BASE_CHUNKS_ALIAS: &str = KB_CHUNKS;

pub fn validator_for(collection: &str) -> Option<Document> {
  let schema = match collection {
    CHUNKS => doc! {
      "bsonType": "object",
      "required": ["path", "text", "hash", "updatedAt"],
      "properties": {
        "path": { "bsonType": "string" },
        "text": { "bsonType": "string" },
        "hash": { "bsonType": "string" },
        "updatedAt": { "bsonType": "date" },
      }
    },
    KNOWLEDGE_BASE => doc! {
      "bsonType": "object",
      "required": ["hash", "title", "source", "updatedAt"],
      "properties": {
        "hash": { "bsonType": "string" },
        "title": { "bsonType": "string" },
        "updatedAt": { "bsonType": "date" },
        "source": {
          "bsonType": "object",
          "required": ["type"],
          "properties": {
            "type": { "enum": ["file", "url", "manual", "api"] }
          }
        }
      }
    },
    KB_CHUNKS => doc! {
      "bsonType": "object",
      "required": ["docId", "path", "text", "startLine", "endLine", "updatedAt"],
      "properties": {
        "docId": { "bsonType": "string" },
        "path": { "bsonType": "string" },
        "text": { "bsonType": "string" },
        "startLine": { "bsonType": "int" },
        "endLine": { "bsonType": "int" },
        "updatedAt": { "bsonType": "date" },
      }
    },
    STRUCTURED_MEM => doc! {
      "bsonType": "object",
      "required": ["type", "key", "value", "updatedAt"],
      "properties": {
        "type": { "bsonType": "string" },
        "key": { "bsonType": "string" },
        "value": { "bsonType": "string" },
        "updatedAt": { "bsonType": "date" },
        "confidence": { "bsonType": ["double", "int"], "minimum": 0, "maximum": 1 },
      }
    },
    _ => return None,
  };
  Some(doc! { "$jsonSchema": schema })
}

/// Standard (non-search) index definitions per collection.
pub fn standard_indexes_for(collection: &str) -> Vec<IndexModel> {
  match collection {
    CHUNKS => vec![
      index(doc! { "path": 1 }, None),
      index(doc! { "path": 1, "hash": 1 }, None),
      index(doc! { "updatedAt": 1 }, None),
      text_index(doc! { "text": "text" }),
    ],
    FILES => vec![index(doc! { "source": 1 }, None), index(doc! { "updatedAt": 1 }, None)],
    KNOWLEDGE_BASE => vec![index(doc! { "updatedAt": 1 }, None)],
    KB_CHUNKS => vec![
      index(doc! { "docId": 1 }, None),
      index(doc! { "path": 1 }, None),
      text_index(doc! { "text": "text" }),
    ],
    STRUCTURED_MEM => vec![
      unique_index(doc! { "agentId": 1, "type": 1, "key": 1 }),
      index(doc! { "tags": 1 }, None),
      text_index(doc! { "value": "text", "context": "text" }),
    ],
    EMBEDDING_CACHE => vec![unique_index(doc! { "provider": 1, "model": 1, "providerKey": 1, "hash": 1 })],
    META => vec![],
    _ => vec![],
  }
}

fn index(keys: Document, options: Option<IndexOptions>) -> IndexModel {
  IndexModel::builder().keys(keys).options(options).build()
}

fn unique_index(keys: Document) -> IndexModel {
  let options = IndexOptions::builder().unique(true).build();
  IndexModel::builder().keys(keys).options(options).build()
}

fn text_index(keys: Document) -> IndexModel {
  IndexModel::builder().keys(keys).build()
}

/// Build (or re-build) a TTL index on `field`, dropping any existing
/// non-TTL index on that same key first — two indexes on an identical key
/// with different options are rejected by the server (§4.1).
pub fn ttl_index(field: &str, ttl_seconds: i64) -> IndexModel {
  let options = IndexOptions::builder().expire_after(Some(std::time::Duration::from_secs(ttl_seconds.max(0) as u64))).build();
  IndexModel::builder().keys(doc! { field: 1 }).options(options).build()
}

/// Plain (non-TTL) index on `field`, used when TTL=0 replaces the expiring
/// index with a non-expiring one on the same key (§4.1).
pub fn plain_index(field: &str) -> IndexModel {
  index(doc! { field: 1 }, None)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_validated_collection_has_a_validator() {
    for collection in VALIDATED_COLLECTIONS {
      assert!(validator_for(collection).is_some(), "{collection} should carry a validator");
    }
  }

  #[test]
  fn unvalidated_collection_has_no_validator() {
    assert!(validator_for(FILES).is_none());
    assert!(validator_for(META).is_none());
  }

  #[test]
  fn structured_mem_has_a_unique_natural_key_index() {
    let models = standard_indexes_for(STRUCTURED_MEM);
    let has_unique = models.iter().any(|m| m.options.as_ref().and_then(|o| o.unique).unwrap_or(false));
    assert!(has_unique, "structured_mem should have a unique index on (agentId, type, key)");
  }

  #[test]
  fn embedding_cache_index_is_unique() {
    let models = standard_indexes_for(EMBEDDING_CACHE);
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].options.as_ref().and_then(|o| o.unique), Some(true));
  }

  #[test]
  fn ttl_index_seconds_match_input() {
    let model = ttl_index("expiresAt", 3600);
    let options = model.options.expect("ttl index always carries options");
    assert_eq!(options.expire_after, Some(std::time::Duration::from_secs(3600)));
  }
}
