//! Structured memory CRUD, keyed by the natural (agentId, type, key) triple
//! rather than by a generated id (§3 structured_mem, §4.7).

use bson::doc;
use clawmem_core::StructuredEntry;
use futures::TryStreamExt;

use crate::{connection::MongoDb, error::Result};

impl MongoDb {
  /// Upsert on the natural key. Preserves `createdAt` across updates via
  /// `$setOnInsert`.
  pub async fn upsert_structured_entry(&self, entry: &StructuredEntry) -> Result<()> {
    let filter = doc! { "agentId": &entry.agent_id, "type": entry.entry_type.as_str(), "key": &entry.key };
    let mut set = bson::to_document(entry)?;
    set.remove("_id");
    set.remove("createdAt");
    let update = doc! {
      "$set": set,
      "$setOnInsert": { "createdAt": entry.created_at, "_id": &entry.id },
    };
    self
      .structured()
      .update_one(filter, update)
      .with_options(mongodb::options::UpdateOptions::builder().upsert(true).build())
      .await?;
    Ok(())
  }

  pub async fn get_structured_entry(&self, agent_id: &str, entry_type: &str, key: &str) -> Result<Option<StructuredEntry>> {
    Ok(
      self
        .structured()
        .find_one(doc! { "agentId": agent_id, "type": entry_type, "key": key })
        .await?,
    )
  }

  pub async fn delete_structured_entry(&self, agent_id: &str, entry_type: &str, key: &str) -> Result<bool> {
    let result = self
      .structured()
      .delete_one(doc! { "agentId": agent_id, "type": entry_type, "key": key })
      .await?;
    Ok(result.deleted_count > 0)
  }

  pub async fn list_structured_entries(&self, agent_id: &str) -> Result<Vec<StructuredEntry>> {
    let mut cursor = self.structured().find(doc! { "agentId": agent_id }).await?;
    let mut out = Vec::new();
    while let Some(entry) = cursor.try_next().await? {
      out.push(entry);
    }
    Ok(out)
  }
}
