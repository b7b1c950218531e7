//! Small key/value metadata store (§3 meta).

use bson::doc;
use chrono::Utc;
use clawmem_core::MetaEntry;

use crate::{connection::MongoDb, error::Result};

impl MongoDb {
  pub async fn get_meta(&self, key: &str) -> Result<Option<serde_json::Value>> {
    Ok(self.meta().find_one(doc! { "_id": key }).await?.map(|e| e.value))
  }

  pub async fn set_meta(&self, key: &str, value: serde_json::Value) -> Result<()> {
    let entry = MetaEntry {
      key: key.to_string(),
      value,
      updated_at: Utc::now(),
    };
    let doc = bson::to_document(&entry)?;
    self
      .meta()
      .replace_one(doc! { "_id": key }, doc)
      .with_options(mongodb::options::ReplaceOptions::builder().upsert(true).build())
      .await?;
    Ok(())
  }
}
